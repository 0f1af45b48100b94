//! Replay and reorder tracking for inbound packets.
//!
//! The receiver only sees the low byte of the sender's IV counter. The
//! tracker holds the peer's stream position (the decrypt IV) and turns each
//! sequence byte into a full nonce:
//!
//! - `seq - low` is folded into (-128, 128]
//! - `+1` is the next packet, larger steps mean packets were lost
//! - small negative steps (within `late_window`) are late arrivals
//! - `0`, or any nonce already in the history, is a replay
//! - everything else is stale and rejected before decryption
//!
//! The history has one slot per sequence byte holding the epoch in which
//! that byte was last accepted, which is enough to remember every nonce in
//! the trailing 256-packet span.
//!
//! # Thread Safety
//!
//! Not synchronized. One tracker belongs to one receiving direction.

use crate::config::CryptConfig;
use crate::iv::Iv;

/// Accepted (epoch, sequence) pairs, indexed by sequence byte.
#[derive(Debug, Clone)]
pub struct ReplayHistory {
    slots: [Option<u8>; 256],
}

impl Default for ReplayHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayHistory {
    pub fn new() -> Self {
        Self { slots: [None; 256] }
    }

    pub fn contains(&self, nonce: &Iv) -> bool {
        self.slots[nonce.seq() as usize] == Some(nonce.epoch())
    }

    pub fn record(&mut self, nonce: &Iv) {
        self.slots[nonce.seq() as usize] = Some(nonce.epoch());
    }

    pub fn clear(&mut self) {
        self.slots = [None; 256];
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Where an accepted packet sits relative to the stream position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Exactly the next packet.
    InOrder,
    /// Ahead of the next packet; `lost` packets were skipped.
    Ahead { lost: u32 },
    /// Behind the stream position but inside the late window.
    Late,
    /// Beyond the normal forward window; adopted as the new baseline.
    Resync { lost: u32 },
}

/// Why a sequence byte was turned away before decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Same sequence as the newest accepted packet.
    Duplicate,
    /// Nonce already recorded in the history.
    Replayed,
    /// Too far behind to be a late packet.
    Stale,
}

/// A reconstructed nonce awaiting authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub nonce: Iv,
    pub arrival: Arrival,
}

/// Decrypt-direction IV plus replay history.
#[derive(Debug, Clone)]
pub struct ReplayTracker {
    iv: Iv,
    history: ReplayHistory,
    late_window: u8,
    resync_epochs: u8,
}

impl ReplayTracker {
    pub fn new(iv: Iv, config: &CryptConfig) -> Self {
        Self {
            iv,
            history: ReplayHistory::new(),
            late_window: config.late_window,
            resync_epochs: config.resync_epochs,
        }
    }

    /// Current stream position (the decrypt IV).
    pub fn iv(&self) -> &Iv {
        &self.iv
    }

    pub fn history(&self) -> &ReplayHistory {
        &self.history
    }

    /// Map a sequence byte to a nonce, or reject it without decrypting.
    ///
    /// Does NOT update state. Call `accept` once the packet authenticates.
    pub fn classify(&self, seq: u8) -> Result<Candidate, Rejection> {
        let diff = fold(seq, self.iv.seq());

        let arrival = match diff {
            0 => return Err(Rejection::Duplicate),
            1 => Arrival::InOrder,
            d if d > 1 => Arrival::Ahead { lost: (d - 1) as u32 },
            d if d > -i16::from(self.late_window) => Arrival::Late,
            _ => return Err(Rejection::Stale),
        };

        let nonce = self.iv.offset(i128::from(diff));
        if self.history.contains(&nonce) {
            return Err(Rejection::Replayed);
        }

        Ok(Candidate { nonce, arrival })
    }

    /// Forward nonces to try when `seq` does not fit the current position:
    /// every counter value ahead of it that ends in `seq`, up to
    /// `resync_epochs` epochs further on, minus the one already tried.
    pub fn resync_candidates(&self, seq: u8, tried: Option<Iv>) -> Vec<Candidate> {
        let base = u128::from(seq.wrapping_sub(self.iv.seq()));

        (0..=u128::from(self.resync_epochs))
            .map(|epoch| base + 256 * epoch)
            .filter(|&gap| gap != 0)
            .map(|gap| Candidate {
                nonce: Iv::from_counter(self.iv.counter().wrapping_add(gap)),
                arrival: Arrival::Resync {
                    lost: u32::try_from(gap - 1).unwrap_or(u32::MAX),
                },
            })
            .filter(|candidate| Some(candidate.nonce) != tried)
            .collect()
    }

    /// Commit an authenticated candidate.
    pub fn accept(&mut self, candidate: &Candidate) {
        match candidate.arrival {
            Arrival::Late => {}
            Arrival::Resync { .. } => {
                self.history.clear();
                self.iv = candidate.nonce;
            }
            Arrival::InOrder | Arrival::Ahead { .. } => self.iv = candidate.nonce,
        }
        self.history.record(&candidate.nonce);
    }
}

/// Signed distance from `low` to `seq`, folded into (-128, 128].
fn fold(seq: u8, low: u8) -> i16 {
    let diff = i16::from(seq) - i16::from(low);
    if diff > 128 {
        diff - 256
    } else if diff <= -128 {
        diff + 256
    } else {
        diff
    }
}
