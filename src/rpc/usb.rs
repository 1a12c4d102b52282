//! USB bulk transport: backed by the `rusb` crate.
//!
//! The target enumerates with one configuration whose first interface
//! exposes a bulk OUT and a bulk IN endpoint:
//!
//! ```text
//! host ── OUT ep ──▶ target command loop
//! host ◀── IN ep ─── target command loop
//! ```

use std::time::Duration;

use log::{info, warn};
use rusb::{DeviceHandle, Direction, GlobalContext};

use super::transport::Transport;
use crate::config::ChannelConfig;
use crate::error::{Error, Result, TransportError};

const INTERFACE: u8 = 0;
const ALT_SETTING: u8 = 0;

fn map_usb_error(e: rusb::Error) -> TransportError {
    match e {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::NoDevice => TransportError::Disconnected,
        rusb::Error::Pipe => TransportError::Stall,
        other => {
            warn!("usb: {other}");
            TransportError::Io
        }
    }
}

pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    ep_out: u8,
    ep_in: u8,
}

impl UsbTransport {
    /// Open the first device matching the configured vendor/product pair,
    /// select its first configuration and claim interface 0.
    pub fn open(config: &ChannelConfig) -> Result<Self> {
        let mut handle = rusb::open_device_with_vid_pid(config.vendor_id, config.product_id)
            .ok_or(Error::DeviceNotFound)?;
        let device = handle.device();

        let descriptor = device
            .config_descriptor(0)
            .map_err(|e| Error::Transport(map_usb_error(e)))?;
        if let Err(e) = handle.set_active_configuration(descriptor.number()) {
            // Already configured by another claim on some platforms.
            warn!("usb: set configuration {}: {e}", descriptor.number());
        }

        let setting = descriptor
            .interfaces()
            .find(|i| i.number() == INTERFACE)
            .and_then(|i| i.descriptors().find(|d| d.setting_number() == ALT_SETTING))
            .ok_or(Error::DeviceNotFound)?;

        let endpoint = |dir: Direction| {
            setting
                .endpoint_descriptors()
                .find(|ep| ep.direction() == dir)
                .map(|ep| ep.address())
        };
        let ep_out = endpoint(Direction::Out).ok_or(Error::DeviceNotFound)?;
        let ep_in = endpoint(Direction::In).ok_or(Error::DeviceNotFound)?;

        // Not every platform can detach kernel drivers; claiming still works.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(INTERFACE)
            .map_err(|e| Error::Transport(map_usb_error(e)))?;

        info!(
            "usb: opened {:04x}:{:04x} (out {:#04x}, in {:#04x})",
            config.vendor_id, config.product_id, ep_out, ep_in
        );
        Ok(Self {
            handle,
            ep_out,
            ep_in,
        })
    }

    pub fn endpoints(&self) -> (u8, u8) {
        (self.ep_out, self.ep_in)
    }
}

impl Transport for UsbTransport {
    fn write_chunk(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> core::result::Result<usize, TransportError> {
        self.handle
            .write_bulk(self.ep_out, data, timeout)
            .map_err(map_usb_error)
    }

    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> core::result::Result<usize, TransportError> {
        self.handle
            .read_bulk(self.ep_in, buf, timeout)
            .map_err(map_usb_error)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            warn!("usb: release interface: {e}");
        }
    }
}
