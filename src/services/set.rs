//! `set:sys`: system settings, used here for the firmware version.

use log::info;

use crate::error::Result;
use crate::rpc::dispatch::BufferEntry;
use crate::rpc::transport::Transport;
use crate::rpc::types::{BufferAttr, Version};
use crate::rpc::wire::{Reader, Wire, cstr, pad};
use crate::session::{Client, Service};

pub const SERVICE_NAME: &str = "set:sys";

const GET_FIRMWARE_VERSION: u32 = 3;
const GET_FIRMWARE_VERSION_2: u32 = 4;

/// The 0x100-byte firmware version record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub platform: [u8; 0x20],
    pub version_hash: [u8; 0x40],
    pub display_version: [u8; 0x18],
    pub display_title: [u8; 0x80],
}

impl FirmwareVersion {
    /// Version to construct later services with.
    pub fn hos_version(&self) -> Version {
        Version::new(self.major, self.minor, self.micro)
    }

    pub fn platform(&self) -> String {
        cstr(&self.platform)
    }

    pub fn version_hash(&self) -> String {
        cstr(&self.version_hash)
    }

    pub fn display_version(&self) -> String {
        cstr(&self.display_version)
    }

    pub fn display_title(&self) -> String {
        cstr(&self.display_title)
    }
}

impl Wire for FirmwareVersion {
    const SIZE: usize = 0x100;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.major, self.minor, self.micro, 0]);
        out.extend_from_slice(&[self.revision_major, self.revision_minor]);
        pad(out, 2);
        out.extend_from_slice(&self.platform);
        out.extend_from_slice(&self.version_hash);
        out.extend_from_slice(&self.display_version);
        out.extend_from_slice(&self.display_title);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Self> {
        let major = r.u8()?;
        let minor = r.u8()?;
        let micro = r.u8()?;
        r.skip(1)?;
        let revision_major = r.u8()?;
        let revision_minor = r.u8()?;
        r.skip(2)?;
        Ok(Self {
            major,
            minor,
            micro,
            revision_major,
            revision_minor,
            platform: r.array()?,
            version_hash: r.array()?,
            display_version: r.array()?,
            display_title: r.array()?,
        })
    }
}

/// System settings service.
pub struct SetSys<T: Transport> {
    service: Service<T>,
}

impl<T: Transport> SetSys<T> {
    pub fn open(client: &Client<T>, version: Version) -> Result<Self> {
        Ok(Self {
            service: client.open_service(SERVICE_NAME, false, version)?,
        })
    }

    pub fn service(&self) -> &Service<T> {
        &self.service
    }

    pub fn firmware_version(&self) -> Result<FirmwareVersion> {
        fetch_firmware_version(&self.service)
    }

    pub fn close(&mut self) -> Result<()> {
        self.service.close()
    }
}

fn fetch_firmware_version<T: Transport>(service: &Service<T>) -> Result<FirmwareVersion> {
    let request_id = if service.version() >= Version::new(3, 0, 0) {
        GET_FIRMWARE_VERSION_2
    } else {
        GET_FIRMWARE_VERSION
    };
    let record = BufferEntry::typed_out::<FirmwareVersion>(
        BufferAttr::FIXED_SIZE | BufferAttr::HIPC_POINTER,
    );
    let reply = service.dispatch(service.request(request_id).buffer(record))?;
    let fw = reply.buffer_as::<FirmwareVersion>(0)?;
    info!("firmware {} ({})", fw.hos_version(), fw.display_version());
    Ok(fw)
}

/// Open `set:sys`, read the firmware version and close again.
pub fn query_version<T: Transport>(client: &Client<T>) -> Result<Version> {
    client.with_service(SERVICE_NAME, false, Version::default(), |service| {
        fetch_firmware_version(service).map(|fw| fw.hos_version())
    })
}
