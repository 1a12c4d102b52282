//! Fuzz target: fixed-layout record decoding
//!
//! Arbitrary bytes fed to every record decoder must either decode or fail
//! cleanly; a decoded record must re-encode to its fixed size.
//!
//! cargo fuzz run fuzz_wire_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use nxipc::Wire;
use nxipc::rpc::wire::ServiceName;
use nxipc::services::fs::{DirEntry, FileTimestamp};
use nxipc::services::set::FirmwareVersion;
use nxipc::{Pointer, ServiceRef};

fn check<T: Wire>(data: &[u8]) {
    if let Ok(value) = T::decode(data) {
        assert_eq!(value.to_bytes().len(), T::SIZE);
    }
    let _ = T::decode_array(data);
}

fuzz_target!(|data: &[u8]| {
    check::<ServiceRef>(data);
    check::<ServiceName>(data);
    check::<Pointer>(data);
    check::<FileTimestamp>(data);
    check::<DirEntry>(data);
    check::<FirmwareVersion>(data);
});
