//! UDP loopback simulation with packet loss and reordering.

use anyhow::{bail, Result};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};
use voxlink_crypto::{CryptConfig, CryptState, CryptStats, KeyMaterial};

/// How long the receiver waits for the next datagram before giving up.
const RECV_IDLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub packets: u32,
    pub loss: f64,
    pub reorder: f64,
    pub size: usize,
}

impl Simulation {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.loss) {
            bail!("loss must be between 0 and 1, got {}", self.loss);
        }
        if !(0.0..=1.0).contains(&self.reorder) {
            bail!("reorder must be between 0 and 1, got {}", self.reorder);
        }
        if self.size > 1400 {
            bail!("payload size {} exceeds a safe datagram size", self.size);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub sent: u32,
    pub dropped: u32,
    pub reordered: u32,
    pub rejected: u32,
    pub receiver: CryptStats,
}

pub async fn run(sim: Simulation, config: CryptConfig) -> Result<Report> {
    let material = KeyMaterial::generate();
    let mut sender = CryptState::with_config(config)?;
    sender.set_key_material(&material);
    let mut receiver = CryptState::with_config(config)?;
    receiver.set_key_material(&material.peer());

    let rx_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let tx_socket = UdpSocket::bind("127.0.0.1:0").await?;
    tx_socket.connect(rx_socket.local_addr()?).await?;

    info!(packets = sim.packets, loss = sim.loss, reorder = sim.reorder, "starting loopback");

    let recv_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let mut rejected = 0u32;

        while let Ok(received) = timeout(RECV_IDLE, rx_socket.recv(&mut buf)).await {
            let len = received?;
            if let Err(err) = receiver.decrypt(&buf[..len]) {
                debug!(%err, "receiver rejected packet");
                rejected += 1;
            }
        }

        Ok::<_, std::io::Error>((rejected, *receiver.stats()))
    });

    let mut dropped = 0u32;
    let mut reordered = 0u32;
    let mut held: Option<Vec<u8>> = None;

    for i in 0..sim.packets {
        let mut payload = vec![0u8; sim.size];
        for (j, byte) in payload.iter_mut().enumerate() {
            *byte = (i as usize + j) as u8;
        }
        let packet = sender.encrypt(&payload)?;

        // Decide on impairment without holding the RNG across an await.
        let (drop_it, hold_it) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(sim.loss), rng.gen_bool(sim.reorder))
        };

        if drop_it {
            dropped += 1;
            continue;
        }

        if hold_it && held.is_none() {
            held = Some(packet.to_vec());
            reordered += 1;
            continue;
        }

        tx_socket.send(&packet).await?;
        if let Some(late) = held.take() {
            tx_socket.send(&late).await?;
        }
    }

    if let Some(late) = held.take() {
        tx_socket.send(&late).await?;
    }

    let (rejected, receiver) = recv_task.await??;

    Ok(Report {
        sent: sim.packets,
        dropped,
        reordered,
        rejected,
        receiver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_link_delivers_everything() {
        let sim = Simulation {
            packets: 200,
            loss: 0.0,
            reorder: 0.0,
            size: 40,
        };
        let report = run(sim, CryptConfig::default()).await.unwrap();

        assert_eq!(report.dropped, 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.receiver.good(), 200);
        assert_eq!(report.receiver.lost(), 0);
    }

    #[tokio::test]
    async fn test_reordering_is_absorbed() {
        let sim = Simulation {
            packets: 200,
            loss: 0.0,
            reorder: 0.3,
            size: 40,
        };
        let report = run(sim, CryptConfig::default()).await.unwrap();

        assert_eq!(report.rejected, 0);
        assert_eq!(report.receiver.good(), 200);
        // A packet held back at the very end goes out in order.
        assert!(report.receiver.late() <= report.reordered);
        assert_eq!(report.receiver.lost(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_probabilities() {
        let mut sim = Simulation {
            packets: 1,
            loss: 1.5,
            reorder: 0.0,
            size: 10,
        };
        assert!(sim.validate().is_err());
        sim.loss = 0.5;
        sim.reorder = -0.1;
        assert!(sim.validate().is_err());
        sim.reorder = 0.0;
        assert!(sim.validate().is_ok());
    }
}
