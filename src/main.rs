//! nxipc command-line front end.
//!
//! ```text
//! nxipc [--config FILE] probe NAME [--domain]   open and close a service
//! nxipc [--config FILE] firmware                print the firmware version
//! nxipc [--config FILE] exit                    stop the target's loop
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use nxipc::services::set::SetSys;
use nxipc::{ChannelConfig, Client, Version};

#[derive(Parser)]
#[command(name = "nxipc", version, about = "Drive the USB IPC bridge on a target")]
struct Cli {
    /// JSON channel configuration; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up a service, print its reference and close it.
    Probe {
        name: String,
        /// Convert the session to a domain first.
        #[arg(long)]
        domain: bool,
    },
    /// Query set:sys for the firmware version.
    Firmware,
    /// Tell the target to leave its command loop.
    Exit,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("═══════════════════════════════════════");
    info!("  nxipc v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════");

    let cli = Cli::parse();
    let config = ChannelConfig::load(cli.config.as_deref()).context("loading channel config")?;
    let client = Client::connect(&config).context("opening USB device")?;

    match cli.command {
        Command::Probe { name, domain } => {
            let mut service = client
                .open_service(&name, domain, Version::default())
                .with_context(|| format!("opening {name}"))?;
            let r = service.reference();
            println!(
                "{name}: session={:#x} own_handle={:#x} object_id={} pointer_buffer_size={:#x}",
                r.session, r.own_handle, r.object_id, r.pointer_buffer_size
            );
            service.close().with_context(|| format!("closing {name}"))?;
        }
        Command::Firmware => {
            let mut set = SetSys::open(&client, Version::default()).context("opening set:sys")?;
            let fw = set.firmware_version().context("reading firmware version")?;
            println!(
                "{} (display {}, platform {}, hash {})",
                fw.hos_version(),
                fw.display_version(),
                fw.platform(),
                fw.version_hash()
            );
            set.close().context("closing set:sys")?;
        }
        Command::Exit => {
            client.exit().context("sending exit")?;
            info!("target command loop stopped");
        }
    }
    Ok(())
}
