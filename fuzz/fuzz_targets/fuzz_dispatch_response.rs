//! Fuzz target: dispatch response decoding
//!
//! Uses the first byte to pick a request layout, then serves the remaining
//! bytes as the target's response. Decoding must never panic, and a
//! successful decode must match the sizes that were asked for.
//!
//! cargo fuzz run fuzz_dispatch_response

#![no_main]

use libfuzzer_sys::fuzz_target;
use nxipc::{
    BufferAttr, BufferEntry, Channel, ChannelConfig, DispatchRequest, MockTransport, ServiceRef,
};

fuzz_target!(|data: &[u8]| {
    let Some((&layout, response)) = data.split_first() else {
        return;
    };

    let service = ServiceRef {
        session: 1,
        ..ServiceRef::INACTIVE
    };
    let out_objects = u32::from(layout & 0x3);
    let out_size = usize::from((layout >> 2) & 0x7) * 4;
    let buffers = usize::from(layout >> 5);

    let mut request = DispatchRequest::new(service, 0)
        .output_shape(nxipc::Shape::bytes(out_size))
        .out_objects(out_objects);
    for i in 0..buffers {
        request = request.buffer(BufferEntry::sized_out(i as u64 * 3, BufferAttr::NONE));
    }

    let probe = MockTransport::new();
    probe.push_response(response);
    let config = ChannelConfig {
        max_chunk: 7,
        ..ChannelConfig::default()
    };
    let Ok(mut channel) = Channel::new(probe, &config) else {
        return;
    };

    if let Ok(Some(result)) = channel.execute(&request) {
        assert_eq!(result.out.map(|o| o.len()), Some(out_size));
        assert_eq!(result.objects.len(), out_objects as usize);
        assert_eq!(result.buffers.len(), buffers);
        for (i, b) in result.buffers.iter().enumerate() {
            assert_eq!(b.len(), i * 3);
        }
    }
});
