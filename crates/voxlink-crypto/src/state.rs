//! Session crypt state.
//!
//! [`CryptState`] owns the key, both directional IVs, the replay history and
//! the inbound counters for one session, and turns plaintext into wire
//! envelopes and back.
//!
//! Encrypt-side state (the encrypt IV) and decrypt-side state (decrypt IV,
//! history, counters) never touch each other. [`CryptState::split`] hands
//! them out as an [`Encryptor`] and a [`Decryptor`] sharing one keyed cipher,
//! so the two directions can run on different threads. Two calls in the same
//! direction still need the caller to serialize them.

use crate::cipher::{Aes128Cipher, Block, BlockCipher, Key, KEY_SIZE};
use crate::codec::{self, Envelope, EnvelopeBuilder};
use crate::config::{ConfigError, CryptConfig, XexStarPolicy};
use crate::error::CryptError;
use crate::history::{Candidate, ReplayTracker};
use crate::iv::Iv;
use crate::keys::KeyMaterial;
use crate::ocb::{is_xex_star_shaped, Ocb};
use crate::stats::CryptStats;
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

/// Crypt state for one session.
///
/// Constructed empty; ready once the key and both IVs are set, either through
/// the setters or [`CryptState::generate`].
pub struct CryptState<C: BlockCipher = Aes128Cipher> {
    raw_key: Option<Zeroizing<Key>>,
    ocb: Option<Arc<Ocb<C>>>,
    encrypt_iv: Option<Iv>,
    tracker: Option<ReplayTracker>,
    stats: CryptStats,
    config: CryptConfig,
}

impl Default for CryptState {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptState {
    /// Create an empty AES-128 state with the default configuration.
    pub fn new() -> Self {
        Self::empty(CryptConfig::default())
    }

    /// Create an empty AES-128 state with a custom configuration.
    pub fn with_config(config: CryptConfig) -> Result<Self, ConfigError> {
        Self::for_cipher(config)
    }

    /// Create a ready AES-128 state from negotiated material.
    pub fn from_key_material(material: &KeyMaterial) -> Self {
        let mut state = Self::new();
        state.set_key_material(material);
        state
    }
}

impl<C: BlockCipher> CryptState<C> {
    /// Create an empty state over any block cipher.
    pub fn for_cipher(config: CryptConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::empty(config))
    }

    fn empty(config: CryptConfig) -> Self {
        Self {
            raw_key: None,
            ocb: None,
            encrypt_iv: None,
            tracker: None,
            stats: CryptStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &CryptConfig {
        &self.config
    }

    /// True once the key and both IVs are set.
    pub fn is_ready(&self) -> bool {
        self.ocb.is_some() && self.encrypt_iv.is_some() && self.tracker.is_some()
    }

    /// Fill the key and both IVs from the OS CSPRNG.
    pub fn generate(&mut self) {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut encrypt_iv = Block::default();
        let mut decrypt_iv = Block::default();
        OsRng.fill_bytes(key.as_mut());
        OsRng.fill_bytes(&mut encrypt_iv);
        OsRng.fill_bytes(&mut decrypt_iv);

        self.install_key(key);
        self.encrypt_iv = Some(Iv::from_bytes(encrypt_iv));
        self.install_decrypt_iv(Iv::from_bytes(decrypt_iv));
        debug!("generated session key material");
    }

    /// Set key and both IVs at once. Nothing changes unless all three
    /// have the right length.
    pub fn set_key(&mut self, raw_key: &[u8], encrypt_iv: &[u8], decrypt_iv: &[u8]) -> Result<(), CryptError> {
        let key = parse_key(raw_key)?;
        let encrypt_iv = Iv::from_slice(encrypt_iv)?;
        let decrypt_iv = Iv::from_slice(decrypt_iv)?;

        self.install_key(key);
        self.encrypt_iv = Some(encrypt_iv);
        self.install_decrypt_iv(decrypt_iv);
        Ok(())
    }

    pub fn set_key_material(&mut self, material: &KeyMaterial) {
        self.install_key(Zeroizing::new(material.key));
        self.encrypt_iv = Some(Iv::from_bytes(material.encrypt_iv));
        self.install_decrypt_iv(Iv::from_bytes(material.decrypt_iv));
    }

    /// Replace the shared key. IVs, history and counters are kept.
    pub fn set_raw_key(&mut self, raw_key: &[u8]) -> Result<(), CryptError> {
        let key = parse_key(raw_key)?;
        self.install_key(key);
        Ok(())
    }

    pub fn set_encrypt_iv(&mut self, iv: &[u8]) -> Result<(), CryptError> {
        self.encrypt_iv = Some(Iv::from_slice(iv)?);
        Ok(())
    }

    /// Set the peer's stream position. Clears the replay history.
    pub fn set_decrypt_iv(&mut self, iv: &[u8]) -> Result<(), CryptError> {
        let iv = Iv::from_slice(iv)?;
        self.install_decrypt_iv(iv);
        Ok(())
    }

    pub fn raw_key(&self) -> Option<&Key> {
        self.raw_key.as_deref()
    }

    pub fn encrypt_iv(&self) -> Option<&Block> {
        self.encrypt_iv.as_ref().map(Iv::as_bytes)
    }

    pub fn decrypt_iv(&self) -> Option<&Block> {
        self.tracker.as_ref().map(|t| t.iv().as_bytes())
    }

    /// Snapshot of the current material, for handing to the handshake layer.
    pub fn key_material(&self) -> Option<KeyMaterial> {
        Some(KeyMaterial {
            key: *self.raw_key()?,
            encrypt_iv: *self.encrypt_iv()?,
            decrypt_iv: *self.decrypt_iv()?,
        })
    }

    /// Seal `plaintext` into a wire envelope (`len + OVERHEAD` bytes).
    ///
    /// The caller's buffer is only read. Decrypting the envelope yields
    /// `plaintext` exactly, with one exception: an XEX*-shaped plaintext
    /// ([`is_xex_star_shaped`], e.g. more than 16 bytes of silence) has the
    /// low bit of one block flipped under [`XexStarPolicy::Perturb`], and is
    /// refused with [`CryptError::RejectedPlaintext`] under
    /// [`XexStarPolicy::Reject`] without consuming an IV.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes, CryptError> {
        let (ocb, iv) = match (&self.ocb, &mut self.encrypt_iv) {
            (Some(ocb), Some(iv)) if self.tracker.is_some() => (ocb, iv),
            _ => return Err(CryptError::NotReady),
        };
        seal(ocb, iv, self.config.xex_star, plaintext)
    }

    /// Replace the plaintext in `buf` with its wire envelope.
    ///
    /// With `allow_in_place_scratch` the packet is sealed inside `buf` itself;
    /// otherwise this goes through [`CryptState::encrypt`] and copies the
    /// result back.
    pub fn encrypt_in_place(&mut self, buf: &mut Vec<u8>) -> Result<(), CryptError> {
        if !self.config.allow_in_place_scratch {
            let sealed = self.encrypt(buf)?;
            buf.clear();
            buf.extend_from_slice(&sealed);
            return Ok(());
        }

        let (ocb, iv) = match (&self.ocb, &mut self.encrypt_iv) {
            (Some(ocb), Some(iv)) if self.tracker.is_some() => (ocb, iv),
            _ => return Err(CryptError::NotReady),
        };
        seal_in_place(ocb, iv, self.config.xex_star, buf)
    }

    /// Open a wire envelope.
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, CryptError> {
        let (ocb, tracker) = match (&self.ocb, &mut self.tracker) {
            (Some(ocb), Some(tracker)) if self.encrypt_iv.is_some() => (ocb, tracker),
            _ => return Err(CryptError::NotReady),
        };
        open(ocb, tracker, &mut self.stats, packet)
    }

    pub fn stats(&self) -> &CryptStats {
        &self.stats
    }

    pub fn good(&self) -> u32 {
        self.stats.good()
    }

    pub fn late(&self) -> u32 {
        self.stats.late()
    }

    pub fn lost(&self) -> u32 {
        self.stats.lost()
    }

    pub fn resync(&self) -> u32 {
        self.stats.resync()
    }

    /// Time since the last packet that authenticated.
    pub fn since_last_good(&self) -> Option<Duration> {
        self.stats.since_last_good()
    }

    /// Split a ready state into independent sending and receiving halves.
    pub fn split(self) -> Result<(Encryptor<C>, Decryptor<C>), CryptError> {
        match (self.ocb, self.encrypt_iv, self.tracker) {
            (Some(ocb), Some(iv), Some(tracker)) => Ok((
                Encryptor {
                    ocb: Arc::clone(&ocb),
                    iv,
                    xex_star: self.config.xex_star,
                },
                Decryptor {
                    ocb,
                    tracker,
                    stats: self.stats,
                },
            )),
            _ => Err(CryptError::NotReady),
        }
    }

    fn install_key(&mut self, key: Zeroizing<Key>) {
        self.ocb = Some(Arc::new(Ocb::new(C::new(&key))));
        self.raw_key = Some(key);
    }

    fn install_decrypt_iv(&mut self, iv: Iv) {
        self.tracker = Some(ReplayTracker::new(iv, &self.config));
    }
}

/// Sending half of a split [`CryptState`].
pub struct Encryptor<C: BlockCipher = Aes128Cipher> {
    ocb: Arc<Ocb<C>>,
    iv: Iv,
    xex_star: XexStarPolicy,
}

impl<C: BlockCipher> Encryptor<C> {
    /// See [`CryptState::encrypt`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes, CryptError> {
        seal(&self.ocb, &mut self.iv, self.xex_star, plaintext)
    }

    /// Seal inside `buf`, using it as scratch space.
    pub fn encrypt_in_place(&mut self, buf: &mut Vec<u8>) -> Result<(), CryptError> {
        seal_in_place(&self.ocb, &mut self.iv, self.xex_star, buf)
    }

    pub fn iv(&self) -> &Block {
        self.iv.as_bytes()
    }
}

/// Receiving half of a split [`CryptState`].
pub struct Decryptor<C: BlockCipher = Aes128Cipher> {
    ocb: Arc<Ocb<C>>,
    tracker: ReplayTracker,
    stats: CryptStats,
}

impl<C: BlockCipher> Decryptor<C> {
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>, CryptError> {
        open(&self.ocb, &mut self.tracker, &mut self.stats, packet)
    }

    pub fn iv(&self) -> &Block {
        self.tracker.iv().as_bytes()
    }

    pub fn stats(&self) -> &CryptStats {
        &self.stats
    }

    pub fn since_last_good(&self) -> Option<Duration> {
        self.stats.since_last_good()
    }
}

fn parse_key(raw_key: &[u8]) -> Result<Zeroizing<Key>, CryptError> {
    let key: Key = raw_key.try_into().map_err(|_| CryptError::InvalidLength {
        expected: KEY_SIZE,
        actual: raw_key.len(),
    })?;
    Ok(Zeroizing::new(key))
}

fn check_policy(policy: XexStarPolicy, plaintext: &[u8]) -> Result<(), CryptError> {
    if policy == XexStarPolicy::Reject && is_xex_star_shaped(plaintext) {
        debug!(len = plaintext.len(), "refusing XEX*-shaped plaintext");
        return Err(CryptError::RejectedPlaintext);
    }
    Ok(())
}

fn seal<C: BlockCipher>(
    ocb: &Ocb<C>,
    iv: &mut Iv,
    policy: XexStarPolicy,
    plaintext: &[u8],
) -> Result<Bytes, CryptError> {
    check_policy(policy, plaintext)?;
    iv.advance();
    let mut envelope = EnvelopeBuilder::new(iv.seq(), plaintext);
    let tag = ocb.encrypt_in_place(envelope.body_mut(), iv.as_bytes());
    Ok(envelope.finish(&tag))
}

fn seal_in_place<C: BlockCipher>(
    ocb: &Ocb<C>,
    iv: &mut Iv,
    policy: XexStarPolicy,
    buf: &mut Vec<u8>,
) -> Result<(), CryptError> {
    check_policy(policy, buf)?;
    iv.advance();
    let tag = ocb.encrypt_in_place(buf, iv.as_bytes());
    codec::frame_in_place(buf, iv.seq(), &tag);
    Ok(())
}

/// Validate, place and authenticate one inbound envelope.
fn open<C: BlockCipher>(
    ocb: &Ocb<C>,
    tracker: &mut ReplayTracker,
    stats: &mut CryptStats,
    packet: &[u8],
) -> Result<Vec<u8>, CryptError> {
    let envelope = Envelope::parse(packet)?;
    let seq = envelope.seq;

    let (error, tried) = match tracker.classify(seq) {
        Ok(candidate) => {
            if let Some(plaintext) = try_open(ocb, &envelope, &candidate) {
                tracker.accept(&candidate);
                stats.record(candidate.arrival);
                trace!(seq, arrival = ?candidate.arrival, "packet accepted");
                return Ok(plaintext);
            }
            (CryptError::AuthenticationFailure, Some(candidate.nonce))
        }
        // A fresh packet after a long burst of loss can fold back onto a
        // used or stale slot. Only nonces ahead of the position are tried,
        // and a genuine replay cannot authenticate under any of them.
        Err(rejection) => {
            trace!(seq, ?rejection, "trying resync before rejecting");
            (CryptError::ReplayRejected { seq }, None)
        }
    };

    for candidate in tracker.resync_candidates(seq, tried) {
        if let Some(plaintext) = try_open(ocb, &envelope, &candidate) {
            tracker.accept(&candidate);
            stats.record(candidate.arrival);
            warn!(seq, arrival = ?candidate.arrival, "resynchronized decrypt IV");
            return Ok(plaintext);
        }
    }

    if matches!(error, CryptError::ReplayRejected { .. }) {
        stats.record_rejected();
    }
    debug!(seq, %error, "packet rejected");
    Err(error)
}

fn try_open<C: BlockCipher>(ocb: &Ocb<C>, envelope: &Envelope<'_>, candidate: &Candidate) -> Option<Vec<u8>> {
    ocb.decrypt(envelope.ciphertext, candidate.nonce.as_bytes(), envelope.tag)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OVERHEAD;

    fn session_pair() -> (CryptState, CryptState) {
        let material = KeyMaterial::generate();
        (
            CryptState::from_key_material(&material),
            CryptState::from_key_material(&material.peer()),
        )
    }

    #[test]
    fn test_roundtrip_lengths() {
        let (mut client, mut server) = session_pair();

        for len in 0..=100 {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let packet = client.encrypt(&plaintext).unwrap();
            assert_eq!(packet.len(), len + OVERHEAD);
            assert_eq!(server.decrypt(&packet).unwrap(), plaintext);
        }
        assert_eq!(server.good(), 101);
        assert_eq!(server.lost(), 0);
    }

    #[test]
    fn test_not_ready() {
        let mut state = CryptState::new();
        assert!(!state.is_ready());
        assert_eq!(state.encrypt(b"x").unwrap_err(), CryptError::NotReady);
        assert_eq!(state.decrypt(&[0u8; 8]).unwrap_err(), CryptError::NotReady);

        state.set_raw_key(&[1u8; 16]).unwrap();
        state.set_encrypt_iv(&[2u8; 16]).unwrap();
        assert!(!state.is_ready());
        assert_eq!(state.encrypt(b"x").unwrap_err(), CryptError::NotReady);

        state.set_decrypt_iv(&[3u8; 16]).unwrap();
        assert!(state.is_ready());
        assert!(state.encrypt(b"x").is_ok());
    }

    #[test]
    fn test_generate_makes_ready() {
        let mut state = CryptState::new();
        state.generate();
        assert!(state.is_ready());
        assert!(state.key_material().is_some());
    }

    #[test]
    fn test_set_raw_key_wrong_length_keeps_key() {
        let mut state = CryptState::new();
        state.set_raw_key(&[7u8; 16]).unwrap();

        let result = state.set_raw_key(&[9u8; 15]);
        assert_eq!(
            result,
            Err(CryptError::InvalidLength {
                expected: 16,
                actual: 15
            })
        );
        assert_eq!(state.raw_key(), Some(&[7u8; 16]));
    }

    #[test]
    fn test_set_iv_wrong_length_keeps_state() {
        let (mut client, mut server) = session_pair();
        let first = client.encrypt(b"first").unwrap();
        server.decrypt(&first).unwrap();

        let encrypt_before = *server.encrypt_iv().unwrap();
        let decrypt_before = *server.decrypt_iv().unwrap();

        for len in [0, 15, 17] {
            let bad = vec![0xaa; len];
            let expected = Err(CryptError::InvalidLength {
                expected: 16,
                actual: len,
            });
            assert_eq!(server.set_encrypt_iv(&bad), expected);
            assert_eq!(server.set_decrypt_iv(&bad), expected);
        }

        assert_eq!(server.encrypt_iv(), Some(&encrypt_before));
        assert_eq!(server.decrypt_iv(), Some(&decrypt_before));

        // History survived: the accepted packet is still a replay.
        assert!(matches!(server.decrypt(&first), Err(CryptError::ReplayRejected { .. })));
        let second = client.encrypt(b"second").unwrap();
        assert_eq!(server.decrypt(&second).unwrap(), b"second");
    }

    #[test]
    fn test_set_key_all_or_nothing() {
        let mut state = CryptState::new();
        assert!(state.set_key(&[1u8; 16], &[2u8; 16], &[3u8; 17]).is_err());
        assert!(state.raw_key().is_none());
        assert!(state.encrypt_iv().is_none());
        assert!(!state.is_ready());

        state.set_key(&[1u8; 16], &[2u8; 16], &[3u8; 16]).unwrap();
        assert_eq!(state.encrypt_iv(), Some(&[2u8; 16]));
        assert_eq!(state.decrypt_iv(), Some(&[3u8; 16]));
    }

    #[test]
    fn test_encrypt_advances_iv() {
        let mut state = CryptState::new();
        state.set_key(&[1u8; 16], &[0u8; 16], &[0u8; 16]).unwrap();

        let first = state.encrypt(b"a").unwrap();
        let second = state.encrypt(b"a").unwrap();
        assert_eq!(first[0], 1);
        assert_eq!(second[0], 2);
        assert_ne!(first[1..], second[1..]);
        assert_eq!(state.encrypt_iv().unwrap()[0], 2);
    }

    #[test]
    fn test_malformed_before_anything_else() {
        let (_, mut server) = session_pair();
        assert_eq!(server.decrypt(&[1, 2, 3]), Err(CryptError::MalformedPacket(3)));
        assert_eq!(server.late(), 0);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut client, mut server) = session_pair();

        let a = client.encrypt(b"A").unwrap();
        let b = client.encrypt(b"B").unwrap();
        server.decrypt(&a).unwrap();
        server.decrypt(&b).unwrap();

        assert!(matches!(server.decrypt(&a), Err(CryptError::ReplayRejected { .. })));
        assert!(matches!(server.decrypt(&b), Err(CryptError::ReplayRejected { .. })));
        assert_eq!(server.good(), 2);
    }

    #[test]
    fn test_reorder_tolerance() {
        let (mut client, mut server) = session_pair();

        let a = client.encrypt(b"A").unwrap();
        let b = client.encrypt(b"B").unwrap();

        assert_eq!(server.decrypt(&b).unwrap(), b"B");
        assert_eq!(server.decrypt(&a).unwrap(), b"A");
        assert_eq!(server.good(), 2);
        assert_eq!(server.lost(), 0);
        assert_eq!(server.late(), 1);
    }

    #[test]
    fn test_loss_accounting() {
        let (mut client, mut server) = session_pair();

        let first = client.encrypt(b"n").unwrap();
        server.decrypt(&first).unwrap();
        let good_before = server.good();

        client.encrypt(b"n+1").unwrap();
        client.encrypt(b"n+2").unwrap();
        let fourth = client.encrypt(b"n+3").unwrap();
        server.decrypt(&fourth).unwrap();

        assert_eq!(server.lost(), 2);
        assert_eq!(server.good(), good_before + 1);
    }

    #[test]
    fn test_sequence_wraparound() {
        let material = KeyMaterial {
            key: [5u8; 16],
            encrypt_iv: [0xfd; 16],
            decrypt_iv: [0u8; 16],
        };
        let mut client = CryptState::from_key_material(&material);
        let mut server = CryptState::from_key_material(&material.peer());

        for expected_seq in [0xfe, 0xff, 0x00, 0x01, 0x02] {
            let packet = client.encrypt(b"tick").unwrap();
            assert_eq!(packet[0], expected_seq);
            assert_eq!(server.decrypt(&packet).unwrap(), b"tick");
        }
        assert_eq!(server.good(), 5);
        assert_eq!(server.lost(), 0);
    }

    #[test]
    fn test_tamper_rejected_state_untouched() {
        let (mut client, mut server) = session_pair();
        let packet = client.encrypt(b"payload").unwrap();

        let before = *server.decrypt_iv().unwrap();
        for bit in 0..8 {
            let mut tampered = packet.to_vec();
            tampered[1] ^= 1 << bit;
            assert_eq!(server.decrypt(&tampered), Err(CryptError::AuthenticationFailure));

            let mut tampered = packet.to_vec();
            let last = tampered.len() - 1;
            tampered[last] ^= 1 << bit;
            assert_eq!(server.decrypt(&tampered), Err(CryptError::AuthenticationFailure));
        }
        assert_eq!(server.decrypt_iv(), Some(&before));
        assert_eq!(server.good(), 0);
        assert_eq!(server.late(), 0);

        assert_eq!(server.decrypt(&packet).unwrap(), b"payload");
    }

    #[test]
    fn test_resync_after_long_gap() {
        let (mut client, mut server) = session_pair();

        for _ in 0..299 {
            client.encrypt(b"dropped").unwrap();
        }
        let packet = client.encrypt(b"after the gap").unwrap();

        assert_eq!(server.decrypt(&packet).unwrap(), b"after the gap");
        assert_eq!(server.resync(), 1);
        assert_eq!(server.lost(), 299);
        assert_eq!(server.decrypt_iv(), client.encrypt_iv());

        let next = client.encrypt(b"steady").unwrap();
        assert_eq!(server.decrypt(&next).unwrap(), b"steady");
        assert_eq!(server.resync(), 1);
    }

    #[test]
    fn test_resync_disabled() {
        let material = KeyMaterial::generate();
        let config = CryptConfig {
            resync_epochs: 0,
            ..CryptConfig::default()
        };
        let mut client = CryptState::from_key_material(&material);
        let mut server = CryptState::with_config(config).unwrap();
        server.set_key_material(&material.peer());

        for _ in 0..299 {
            client.encrypt(b"dropped").unwrap();
        }
        let packet = client.encrypt(b"lost cause").unwrap();
        assert_eq!(server.decrypt(&packet), Err(CryptError::AuthenticationFailure));
        assert_eq!(server.resync(), 0);
    }

    #[test]
    fn test_stale_counts_as_late() {
        let (mut client, mut server) = session_pair();

        let old = client.encrypt(b"old").unwrap();
        for _ in 0..49 {
            client.encrypt(b"skip").unwrap();
        }
        let newest = client.encrypt(b"new").unwrap();
        server.decrypt(&newest).unwrap();

        assert!(matches!(server.decrypt(&old), Err(CryptError::ReplayRejected { .. })));
        assert_eq!(server.late(), 1);
        assert_eq!(server.resync(), 0);
    }

    #[test]
    fn test_in_place_paths_agree() {
        let material = KeyMaterial::generate();
        let scratch = CryptConfig {
            allow_in_place_scratch: true,
            ..CryptConfig::default()
        };
        let mut copying = CryptState::from_key_material(&material);
        let mut in_place = CryptState::with_config(scratch).unwrap();
        in_place.set_key_material(&material);

        let mut a = b"same frame".to_vec();
        let mut b = a.clone();
        copying.encrypt_in_place(&mut a).unwrap();
        in_place.encrypt_in_place(&mut b).unwrap();
        assert_eq!(a, b);

        let mut server = CryptState::from_key_material(&material.peer());
        assert_eq!(server.decrypt(&a).unwrap(), b"same frame");
    }

    #[test]
    fn test_split_halves_across_threads() {
        let (client, server) = session_pair();
        let (mut tx, _) = client.split().unwrap();
        let (_, mut rx) = server.split().unwrap();

        let packets: Vec<Bytes> = (1..=50u8).map(|i| tx.encrypt(&[i; 20]).unwrap()).collect();

        let handle = std::thread::spawn(move || {
            for (i, packet) in (1..=50u8).zip(&packets) {
                assert_eq!(rx.decrypt(packet).unwrap(), vec![i; 20]);
            }
            *rx.stats()
        });

        let stats = handle.join().unwrap();
        assert_eq!(stats.good(), 50);
    }

    #[test]
    fn test_split_requires_ready() {
        assert!(matches!(CryptState::new().split(), Err(CryptError::NotReady)));
    }

    #[test]
    fn test_silence_frame_is_perturbed_by_default() {
        let (mut client, mut server) = session_pair();
        let silence = [0u8; 20];

        let packet = client.encrypt(&silence).unwrap();
        assert_eq!(silence, [0u8; 20]);

        let received = server.decrypt(&packet).unwrap();
        assert_eq!(received[0], 1);
        assert_eq!(&received[1..], &silence[1..]);

        // Silence that fits in one block is untouched.
        let short = client.encrypt(&[0u8; 16]).unwrap();
        assert_eq!(server.decrypt(&short).unwrap(), [0u8; 16]);
    }

    #[test]
    fn test_silence_frame_refused_under_reject_policy() {
        let material = KeyMaterial::generate();
        let config = CryptConfig {
            xex_star: XexStarPolicy::Reject,
            ..CryptConfig::default()
        };
        let mut client = CryptState::with_config(config).unwrap();
        client.set_key_material(&material);
        let mut server = CryptState::from_key_material(&material.peer());

        let iv_before = *client.encrypt_iv().unwrap();
        assert_eq!(client.encrypt(&[0u8; 40]), Err(CryptError::RejectedPlaintext));
        let mut buf = vec![0u8; 40];
        assert_eq!(client.encrypt_in_place(&mut buf), Err(CryptError::RejectedPlaintext));
        assert_eq!(buf, vec![0u8; 40]);
        assert_eq!(client.encrypt_iv(), Some(&iv_before));

        // Everything that does encrypt comes back exactly.
        for len in 0..=64 {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 3) as u8).collect();
            match client.encrypt(&plaintext) {
                Ok(packet) => assert_eq!(server.decrypt(&packet).unwrap(), plaintext),
                Err(err) => assert_eq!(err, CryptError::RejectedPlaintext),
            }
        }

        let (mut tx, _) = client.split().unwrap();
        assert_eq!(tx.encrypt(&[0u8; 17]), Err(CryptError::RejectedPlaintext));
    }

    #[test]
    fn test_recovers_when_gap_folds_onto_used_slots() {
        let (mut client, mut server) = session_pair();

        for _ in 0..40 {
            let packet = client.encrypt(b"before").unwrap();
            server.decrypt(&packet).unwrap();
        }
        for _ in 0..240 {
            client.encrypt(b"dropped").unwrap();
        }
        for _ in 0..40 {
            let packet = client.encrypt(b"after").unwrap();
            assert_eq!(server.decrypt(&packet).unwrap(), b"after");
        }

        assert_eq!(server.good(), 80);
        assert_eq!(server.resync(), 1);
        assert_eq!(server.lost(), 240);
        assert_eq!(server.late(), 0);
    }
}
