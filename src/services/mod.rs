//! Typed stubs over [`Service`](crate::session::Service).
//!
//! Each stub owns its service handle and encodes one remote method per
//! Rust method. Closing the stub (or dropping it) releases the session;
//! objects a stub returns stay valid until they or their parent close.

pub mod fs;
pub mod set;

pub use fs::{
    BisPartitionId, DirEntry, Directory, EntryType, File, FileSystem, FileTimestamp, FspSrv,
    OpenMode,
};
pub use set::{FirmwareVersion, SetSys};
