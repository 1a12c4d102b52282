//! Generic dispatch against the simulated target.

use nxipc::{AllocKind, BufferAttr, BufferEntry, BufferKind, Error, InValue, Shape, Version};

use crate::mock_device::{Call, MockDevice, ObjectInfo};

/// `test:ech`
/// - 0: out u64 = input u64 + 1
/// - 1: copy buffer 0 (In) into buffer 1 (Out)
/// - 2: fail with 0x202
/// - 3: out u32 = number of handles, out[4] = send_pid
/// - 4: uppercase buffer 0 in place (pointer)
fn echo(_: &ObjectInfo, call: &mut Call) -> Result<(), u32> {
    match call.request_id {
        0 => {
            let v = call.input_u64(0) + 1;
            call.set_out(&v.to_le_bytes());
        }
        1 => {
            let data = call.buffers[0].data.clone();
            call.buffers[1].data[..data.len()].copy_from_slice(&data);
        }
        2 => return Err(0x202),
        3 => {
            let count = call.handles.len() as u32;
            call.set_out(&count.to_le_bytes());
            call.out[4] = u8::from(call.send_pid);
        }
        4 => call.buffers[0].data.make_ascii_uppercase(),
        _ => return Err(0x1_0000),
    }
    Ok(())
}

fn device() -> MockDevice {
    let device = MockDevice::new();
    device.register("test:ech", echo);
    device
}

#[test]
fn input_and_output_roundtrip() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let reply = svc
        .dispatch(svc.request(0).input(&41u64).output::<u64>())
        .unwrap();
    assert_eq!(reply.out::<u64>().unwrap(), 42);
    assert_eq!(device.unread(), 0);
}

#[test]
fn in_buffer_copied_to_out_buffer() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let reply = svc
        .dispatch(
            svc.request(1)
                .buffer(BufferEntry::raw_in(b"hello".to_vec(), BufferAttr::HIPC_MAP_ALIAS))
                .buffer(BufferEntry::sized_out(8, BufferAttr::HIPC_MAP_ALIAS)),
        )
        .unwrap();
    // Only the Out buffer comes back.
    assert_eq!(reply.data().buffers.len(), 1);
    assert_eq!(reply.buffer(0).unwrap(), b"hello\0\0\0");
}

#[test]
fn target_failure_surfaces_result() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let err = svc
        .dispatch(svc.request(2).output::<u64>())
        .err()
        .unwrap();
    assert_eq!(err.result().unwrap(), 0x202u32);
    assert_eq!(err.to_string(), "ipc: 2002-0001 (0x202)");
    // Channel stays in sync for the next request.
    let reply = svc.dispatch(svc.request(0).input(&1u64).output::<u64>()).unwrap();
    assert_eq!(reply.out::<u64>().unwrap(), 2);
}

#[test]
fn handles_and_pid_reach_target() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let reply = svc
        .dispatch(
            svc.request(3)
                .in_handle(0x11)
                .in_handle(0x22)
                .send_pid()
                .output_shape(Shape::bytes(8)),
        )
        .unwrap();
    let out = reply.data().out.clone().unwrap();
    assert_eq!(&out[..4], &2u32.to_le_bytes());
    assert_eq!(out[4], 1);
}

#[test]
fn pointer_buffer_uses_target_memory_in_place() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let ptr = svc.allocate(AllocKind::Malloc, 4, None).unwrap();
    svc.raw_write(ptr, b"abcd").unwrap();

    svc.dispatch(svc.request(4).buffer(BufferEntry::deferred_pointer(
        ptr,
        4,
        BufferAttr::IN | BufferAttr::HIPC_MAP_ALIAS,
    )))
    .unwrap();
    assert_eq!(svc.raw_read(ptr, 4).unwrap(), b"ABCD");
    assert_eq!(device.unread(), 0);
    svc.free(ptr).unwrap();
}

#[test]
fn pointer_value_buffer_is_read_back_when_out() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let ptr = svc.allocate(AllocKind::Calloc, 8, None).unwrap();
    client.write_value(ptr, &0x6162_6364u64).unwrap();

    // A bare pointer value describes 8 bytes of target memory.
    let reply = svc
        .dispatch(svc.request(4).buffer(BufferEntry {
            kind: BufferKind::StructuredIn(InValue::Pointer(ptr)),
            attr: BufferAttr::OUT,
        }))
        .unwrap();
    assert_eq!(reply.buffer(0).unwrap(), b"DCBA\0\0\0\0");
}

#[test]
fn limits_rejected_before_any_traffic() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();
    let before = device.events().len();

    let mut request = svc.request(0);
    for h in 0..9 {
        request = request.in_handle(h);
    }
    assert!(matches!(svc.dispatch(request), Err(Error::ProtocolViolation(_))));
    assert!(matches!(
        svc.dispatch(svc.request(0).out_objects(9)),
        Err(Error::ProtocolViolation(_))
    ));
    assert_eq!(device.events().len(), before);
}

#[test]
fn large_payload_respects_chunk_limit() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();

    let payload: Vec<u8> = (0..0x3000u32).map(|i| i as u8).collect();
    let reply = svc
        .dispatch(
            svc.request(1)
                .buffer(BufferEntry::raw_in(payload.clone(), BufferAttr::NONE))
                .buffer(BufferEntry::sized_out(0x3000, BufferAttr::NONE)),
        )
        .unwrap();
    assert_eq!(reply.buffer(0).unwrap(), payload.as_slice());
    assert_eq!(device.largest_write(), 0xE00);
    assert_eq!(device.largest_read(), 0xE00);
}

#[test]
fn unknown_request_is_target_error() {
    let device = device();
    let client = device.client();
    let svc = client.open_service("test:ech", false, Version::default()).unwrap();
    let err = svc.call(99).err().unwrap();
    assert_eq!(err.result().map(|rc| rc.value()), Some(0x1_0000));
}

