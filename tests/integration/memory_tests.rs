//! Target heap commands.

use nxipc::rpc::commands::{AllocKind, Allocate};
use nxipc::rpc::result::ResultCode;
use nxipc::{ChannelConfig, Error, Pointer};

use crate::mock_device::{Event, HEAP_BASE, MockDevice};

#[test]
fn malloc_write_read_free() {
    let device = MockDevice::new();
    let client = device.client();

    let ptr = client.allocate(AllocKind::Malloc, 16, None).unwrap();
    assert!(ptr.addr() >= HEAP_BASE);
    client.raw_write(ptr, b"0123456789abcdef").unwrap();
    assert_eq!(client.raw_read(ptr.offset(10), 6).unwrap(), b"abcdef");
    assert_eq!(device.peek(ptr.addr(), 4), b"0123");
    client.free(ptr).unwrap();

    assert_eq!(
        device.events(),
        vec![
            Event::Allocate { kind: 0, size: 16 },
            Event::Write {
                ptr: ptr.addr(),
                size: 16
            },
            Event::Read {
                ptr: ptr.addr() + 10,
                size: 6
            },
            Event::Free(ptr.addr()),
        ]
    );
}

#[test]
fn memalign_honours_alignment() {
    let device = MockDevice::new();
    let client = device.client();
    let _ = client.allocate(AllocKind::Malloc, 3, None).unwrap();
    let ptr = client.allocate(AllocKind::Memalign, 0x100, Some(0x1000)).unwrap();
    assert_eq!(ptr.addr() % 0x1000, 0);
}

#[test]
fn memalign_without_alignment_is_rejected_locally() {
    let device = MockDevice::new();
    let client = device.client();
    assert!(matches!(
        client.execute(&Allocate {
            kind: AllocKind::Memalign,
            size: 8,
            align: None,
        }),
        Err(Error::ProtocolViolation(_))
    ));
    assert!(device.events().is_empty());
}

#[test]
fn oversized_allocation_reports_out_of_memory() {
    let device = MockDevice::new();
    let client = device.client();
    let err = client.allocate(AllocKind::Calloc, 1 << 40, None).unwrap_err();
    assert_eq!(err.result(), Some(ResultCode::OUT_OF_MEMORY));
    // The failed command consumed only its result word.
    let ptr = client.allocate(AllocKind::Calloc, 4, None).unwrap();
    assert_eq!(client.raw_read(ptr, 4).unwrap(), vec![0; 4]);
}

#[test]
fn typed_values_roundtrip_through_target_memory() {
    let device = MockDevice::new();
    let client = device.client();
    let ptr = client.allocate(AllocKind::Malloc, 8, None).unwrap();
    client.write_value(ptr, &Pointer(0xDEAD_BEEF)).unwrap();
    assert_eq!(client.read_value::<Pointer>(ptr).unwrap(), Pointer(0xDEAD_BEEF));
    assert_eq!(client.read_value::<u32>(ptr).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn large_transfer_is_chunked_both_ways() {
    let device = MockDevice::new();
    let client = device.client();
    let ptr = client.allocate(AllocKind::Malloc, 0x2345, None).unwrap();
    let data: Vec<u8> = (0..0x2345u32).map(|i| (i % 251) as u8).collect();
    client.raw_write(ptr, &data).unwrap();
    assert_eq!(client.raw_read(ptr, 0x2345).unwrap(), data);
    assert_eq!(device.largest_write(), 0xE00);
    assert_eq!(device.largest_read(), 0xE00);
}

#[test]
fn empty_write_sends_no_payload() {
    let device = MockDevice::new();
    let client = device.client();
    let ptr = client.allocate(AllocKind::Malloc, 1, None).unwrap();
    client.raw_write(ptr, &[]).unwrap();
    assert_eq!(client.raw_read(ptr, 0).unwrap(), Vec::<u8>::new());
    assert_eq!(device.unread(), 0);
}

#[test]
fn configured_timeout_reaches_every_chunk() {
    let device = MockDevice::new();
    let client = device.client_with(&ChannelConfig {
        timeout_ms: 250,
        max_chunk: 0x100,
        ..ChannelConfig::default()
    });
    let ptr = client.allocate(AllocKind::Malloc, 0x300, None).unwrap();
    client.raw_write(ptr, &[7; 0x300]).unwrap();
    assert_eq!(client.raw_read(ptr, 0x300).unwrap(), vec![7; 0x300]);
    assert_eq!(
        device.timeouts().into_iter().collect::<Vec<_>>(),
        vec![std::time::Duration::from_millis(250)]
    );
}
