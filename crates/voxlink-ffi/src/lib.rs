#![allow(clippy::missing_safety_doc)]

//! C ABI over [`voxlink_crypto::CryptState`].
//!
//! Every function taking a state pointer accepts only pointers returned by
//! [`voxlink_crypt_new`] and not yet passed to [`voxlink_crypt_free`]. Calls
//! on one handle must not overlap.

use std::ptr;
use std::slice;
use voxlink_crypto::{CryptError, CryptState, BLOCK_SIZE, KEY_SIZE, OVERHEAD};

pub const VOXLINK_OK: i32 = 0;
pub const VOXLINK_ERR_NULL: i32 = -1;
pub const VOXLINK_ERR_INVALID_LENGTH: i32 = -2;
pub const VOXLINK_ERR_NOT_READY: i32 = -3;
pub const VOXLINK_ERR_AUTH: i32 = -4;
pub const VOXLINK_ERR_REPLAY: i32 = -5;
pub const VOXLINK_ERR_MALFORMED: i32 = -6;
pub const VOXLINK_ERR_BUFFER_TOO_SMALL: i32 = -7;
pub const VOXLINK_ERR_REJECTED_PLAINTEXT: i32 = -8;

/// Opaque handle handed across the boundary.
pub struct VoxlinkCryptState {
    inner: CryptState,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VoxlinkStats {
    pub good: u32,
    pub late: u32,
    pub lost: u32,
    pub resync: u32,
}

fn status(err: CryptError) -> i32 {
    match err {
        CryptError::InvalidLength { .. } => VOXLINK_ERR_INVALID_LENGTH,
        CryptError::NotReady => VOXLINK_ERR_NOT_READY,
        CryptError::AuthenticationFailure => VOXLINK_ERR_AUTH,
        CryptError::ReplayRejected { .. } => VOXLINK_ERR_REPLAY,
        CryptError::MalformedPacket(_) => VOXLINK_ERR_MALFORMED,
        CryptError::RejectedPlaintext => VOXLINK_ERR_REJECTED_PLAINTEXT,
    }
}

fn to_status(result: Result<(), CryptError>) -> i32 {
    match result {
        Ok(()) => VOXLINK_OK,
        Err(err) => status(err),
    }
}

/// Borrow a caller buffer. A null pointer is only allowed with length 0.
unsafe fn input<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() {
        return if len == 0 { Some(&[]) } else { None };
    }
    Some(slice::from_raw_parts(data, len))
}

unsafe fn state<'a>(handle: *mut VoxlinkCryptState) -> Option<&'a mut CryptState> {
    handle.as_mut().map(|h| &mut h.inner)
}

/// Copy `src` into a caller buffer of `out_len` bytes and report the length
/// written through `written`.
unsafe fn write_out(src: &[u8], out: *mut u8, out_len: usize, written: *mut usize) -> i32 {
    if out.is_null() {
        return VOXLINK_ERR_NULL;
    }
    if out_len < src.len() {
        return VOXLINK_ERR_BUFFER_TOO_SMALL;
    }
    ptr::copy_nonoverlapping(src.as_ptr(), out, src.len());
    if let Some(written) = written.as_mut() {
        *written = src.len();
    }
    VOXLINK_OK
}

#[no_mangle]
pub extern "C" fn voxlink_init() {
    let _ = env_logger::try_init();
    log::info!("Voxlink crypto (FFI) initialized");
}

#[no_mangle]
pub extern "C" fn voxlink_crypt_new() -> *mut VoxlinkCryptState {
    Box::into_raw(Box::new(VoxlinkCryptState {
        inner: CryptState::new(),
    }))
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_free(handle: *mut VoxlinkCryptState) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_is_ready(handle: *mut VoxlinkCryptState) -> bool {
    state(handle).is_some_and(|s| s.is_ready())
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_generate(handle: *mut VoxlinkCryptState) -> i32 {
    let Some(state) = state(handle) else {
        return VOXLINK_ERR_NULL;
    };
    state.generate();
    VOXLINK_OK
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_set_key(
    handle: *mut VoxlinkCryptState,
    key: *const u8,
    key_len: usize,
    encrypt_iv: *const u8,
    encrypt_iv_len: usize,
    decrypt_iv: *const u8,
    decrypt_iv_len: usize,
) -> i32 {
    let (Some(state), Some(key), Some(encrypt_iv), Some(decrypt_iv)) = (
        state(handle),
        input(key, key_len),
        input(encrypt_iv, encrypt_iv_len),
        input(decrypt_iv, decrypt_iv_len),
    ) else {
        return VOXLINK_ERR_NULL;
    };
    to_status(state.set_key(key, encrypt_iv, decrypt_iv))
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_set_raw_key(
    handle: *mut VoxlinkCryptState,
    key: *const u8,
    len: usize,
) -> i32 {
    let (Some(state), Some(key)) = (state(handle), input(key, len)) else {
        return VOXLINK_ERR_NULL;
    };
    to_status(state.set_raw_key(key))
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_set_encrypt_iv(
    handle: *mut VoxlinkCryptState,
    iv: *const u8,
    len: usize,
) -> i32 {
    let (Some(state), Some(iv)) = (state(handle), input(iv, len)) else {
        return VOXLINK_ERR_NULL;
    };
    to_status(state.set_encrypt_iv(iv))
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_set_decrypt_iv(
    handle: *mut VoxlinkCryptState,
    iv: *const u8,
    len: usize,
) -> i32 {
    let (Some(state), Some(iv)) = (state(handle), input(iv, len)) else {
        return VOXLINK_ERR_NULL;
    };
    to_status(state.set_decrypt_iv(iv))
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_raw_key(
    handle: *mut VoxlinkCryptState,
    out: *mut u8,
    out_len: usize,
) -> i32 {
    let Some(state) = state(handle) else {
        return VOXLINK_ERR_NULL;
    };
    match state.raw_key() {
        Some(key) => write_out(key, out, out_len, ptr::null_mut()),
        None => VOXLINK_ERR_NOT_READY,
    }
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_encrypt_iv(
    handle: *mut VoxlinkCryptState,
    out: *mut u8,
    out_len: usize,
) -> i32 {
    let Some(state) = state(handle) else {
        return VOXLINK_ERR_NULL;
    };
    match state.encrypt_iv() {
        Some(iv) => write_out(iv, out, out_len, ptr::null_mut()),
        None => VOXLINK_ERR_NOT_READY,
    }
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_decrypt_iv(
    handle: *mut VoxlinkCryptState,
    out: *mut u8,
    out_len: usize,
) -> i32 {
    let Some(state) = state(handle) else {
        return VOXLINK_ERR_NULL;
    };
    match state.decrypt_iv() {
        Some(iv) => write_out(iv, out, out_len, ptr::null_mut()),
        None => VOXLINK_ERR_NOT_READY,
    }
}

/// Seal `src` into `dst`, which must hold `src_len + voxlink_overhead()`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_encrypt(
    handle: *mut VoxlinkCryptState,
    src: *const u8,
    src_len: usize,
    dst: *mut u8,
    dst_len: usize,
    written: *mut usize,
) -> i32 {
    let (Some(state), Some(src)) = (state(handle), input(src, src_len)) else {
        return VOXLINK_ERR_NULL;
    };
    // Check before sealing so an unusable buffer does not burn an IV.
    if dst.is_null() {
        return VOXLINK_ERR_NULL;
    }
    if dst_len < src.len() + OVERHEAD {
        return VOXLINK_ERR_BUFFER_TOO_SMALL;
    }
    match state.encrypt(src) {
        Ok(packet) => write_out(&packet, dst, dst_len, written),
        Err(err) => status(err),
    }
}

/// Open the envelope in `src` into `dst`, which must hold
/// `src_len - voxlink_overhead()` bytes.
#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_decrypt(
    handle: *mut VoxlinkCryptState,
    src: *const u8,
    src_len: usize,
    dst: *mut u8,
    dst_len: usize,
    written: *mut usize,
) -> i32 {
    let (Some(state), Some(src)) = (state(handle), input(src, src_len)) else {
        return VOXLINK_ERR_NULL;
    };
    if dst.is_null() {
        return VOXLINK_ERR_NULL;
    }
    if dst_len < src.len().saturating_sub(OVERHEAD) {
        return VOXLINK_ERR_BUFFER_TOO_SMALL;
    }
    match state.decrypt(src) {
        Ok(plaintext) => {
            let rc = write_out(&plaintext, dst, dst_len, written);
            if rc != VOXLINK_OK {
                log::warn!("decrypted packet dropped: output buffer rejected ({})", rc);
            }
            rc
        }
        Err(err) => {
            log::debug!("decrypt failed: {}", err);
            status(err)
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_stats(
    handle: *mut VoxlinkCryptState,
    out: *mut VoxlinkStats,
) -> i32 {
    let (Some(state), Some(out)) = (state(handle), out.as_mut()) else {
        return VOXLINK_ERR_NULL;
    };
    let stats = state.stats();
    *out = VoxlinkStats {
        good: stats.good(),
        late: stats.late(),
        lost: stats.lost(),
        resync: stats.resync(),
    };
    VOXLINK_OK
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_good(handle: *mut VoxlinkCryptState) -> u32 {
    state(handle).map_or(0, |s| s.good())
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_late(handle: *mut VoxlinkCryptState) -> u32 {
    state(handle).map_or(0, |s| s.late())
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_lost(handle: *mut VoxlinkCryptState) -> u32 {
    state(handle).map_or(0, |s| s.lost())
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_get_resync(handle: *mut VoxlinkCryptState) -> u32 {
    state(handle).map_or(0, |s| s.resync())
}

/// Milliseconds since the last authenticated packet, or -1 if none yet.
#[no_mangle]
pub unsafe extern "C" fn voxlink_crypt_ms_since_last_good(handle: *mut VoxlinkCryptState) -> i64 {
    state(handle)
        .and_then(|s| s.since_last_good())
        .map_or(-1, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[no_mangle]
pub extern "C" fn voxlink_overhead() -> usize {
    OVERHEAD
}

#[no_mangle]
pub extern "C" fn voxlink_key_size() -> usize {
    KEY_SIZE
}

#[no_mangle]
pub extern "C" fn voxlink_block_size() -> usize {
    BLOCK_SIZE
}

#[no_mangle]
pub unsafe extern "C" fn voxlink_version() -> *const std::ffi::c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const std::ffi::c_char
}
