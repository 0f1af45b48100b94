//! Inbound packet accounting.

use crate::history::Arrival;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Counters for one receiving direction.
///
/// `good`, `late` and `resync` only grow. `lost` is an estimate: it grows
/// when a gap opens and shrinks again when a packet from the gap turns up
/// late.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptStats {
    good: u32,
    late: u32,
    lost: u32,
    resync: u32,
    #[serde(skip)]
    last_good: Option<Instant>,
}

impl CryptStats {
    /// Packets that decrypted and authenticated.
    pub fn good(&self) -> u32 {
        self.good
    }

    /// Packets that arrived behind the stream position, whether accepted
    /// from the late window or turned away as stale or replayed.
    pub fn late(&self) -> u32 {
        self.late
    }

    /// Packets presumed dropped.
    pub fn lost(&self) -> u32 {
        self.lost
    }

    /// Times the stream position was re-established after a large gap.
    pub fn resync(&self) -> u32 {
        self.resync
    }

    /// Time since the last packet that authenticated.
    pub fn since_last_good(&self) -> Option<Duration> {
        self.last_good.map(|at| at.elapsed())
    }

    pub(crate) fn record(&mut self, arrival: Arrival) {
        self.good = self.good.saturating_add(1);
        self.last_good = Some(Instant::now());

        match arrival {
            Arrival::InOrder => {}
            Arrival::Ahead { lost } => self.lost = self.lost.saturating_add(lost),
            Arrival::Late => {
                self.late = self.late.saturating_add(1);
                self.lost = self.lost.saturating_sub(1);
            }
            Arrival::Resync { lost } => {
                self.resync = self.resync.saturating_add(1);
                self.lost = self.lost.saturating_add(lost);
            }
        }
    }

    pub(crate) fn record_rejected(&mut self) {
        self.late = self.late.saturating_add(1);
    }
}
