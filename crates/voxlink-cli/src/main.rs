//! Voxlink CLI tools: key generation, loopback simulation, packet inspection.

#![forbid(unsafe_code)]

mod loopback;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use voxlink_crypto::{CryptConfig, CryptState, KeyMaterial};

#[derive(Parser, Debug)]
#[command(name = "voxlink")]
#[command(about = "Voxlink packet encryption tools")]
struct Args {
    /// JSON file with crypt settings
    #[arg(long, global = true, env = "VOXLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Override how far behind a late packet may be
    #[arg(long, global = true, env = "VOXLINK_LATE_WINDOW")]
    late_window: Option<u8>,

    /// Override how many epochs ahead resync searches
    #[arg(long, global = true, env = "VOXLINK_RESYNC_EPOCHS")]
    resync_epochs: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate session key material
    Keygen {
        /// Print JSON (base64 fields) instead of hex
        #[arg(long)]
        json: bool,

        /// Also save the material to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run two crypt states over a UDP loopback with simulated impairment
    Loopback {
        /// Packets to send
        #[arg(long, default_value_t = 1000)]
        packets: u32,

        /// Probability of dropping each packet (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        loss: f64,

        /// Probability of swapping a packet with the next one (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,

        /// Payload size in bytes
        #[arg(long, default_value_t = 60)]
        size: usize,
    },

    /// Encrypt a hex payload with the first IV of the given material
    Seal {
        /// Key material as printed by `keygen` (sender's view)
        #[arg(short, long)]
        key: String,

        /// Plaintext as hex
        data: String,
    },

    /// Decrypt a hex packet produced by `seal` with the same material
    Open {
        /// Key material as printed by `keygen` (sender's view)
        #[arg(short, long)]
        key: String,

        /// Packet as hex
        data: String,
    },

    /// Show version information
    Version,
}

impl Args {
    fn crypt_config(&self) -> Result<CryptConfig> {
        let mut config = voxlink_common::config::load_crypt_config(self.config.as_deref())?;
        if let Some(late_window) = self.late_window {
            config.late_window = late_window;
        }
        if let Some(resync_epochs) = self.resync_epochs {
            config.resync_epochs = resync_epochs;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    voxlink_common::init_tracing();

    let args = Args::parse();

    match &args.command {
        Command::Keygen { json, output } => {
            let material = KeyMaterial::generate();

            if *json {
                println!("{}", serde_json::to_string_pretty(&material)?);
            } else {
                println!("{}", material.to_hex());
            }

            if let Some(path) = output {
                material.save(path)?;
                eprintln!("Saved to {}", path.display());
            }
        }
        Command::Loopback {
            packets,
            loss,
            reorder,
            size,
        } => {
            let config = args.crypt_config()?;
            let sim = loopback::Simulation {
                packets: *packets,
                loss: *loss,
                reorder: *reorder,
                size: *size,
            };
            sim.validate()?;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let report = rt.block_on(loopback::run(sim, config))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Seal { key, data } => {
            let config = args.crypt_config()?;
            let material = KeyMaterial::from_hex(key)?;
            let plaintext = hex::decode(data).context("plaintext is not valid hex")?;

            let mut state = CryptState::with_config(config)?;
            state.set_key_material(&material);
            let packet = state.encrypt(&plaintext)?;
            println!("{}", hex::encode(packet));
        }
        Command::Open { key, data } => {
            let config = args.crypt_config()?;
            let material = KeyMaterial::from_hex(key)?;
            let packet = hex::decode(data).context("packet is not valid hex")?;

            let mut state = CryptState::with_config(config)?;
            state.set_key_material(&material.peer());
            let plaintext = state.decrypt(&packet)?;
            println!("{}", hex::encode(plaintext));
        }
        Command::Version => {
            println!("voxlink {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
