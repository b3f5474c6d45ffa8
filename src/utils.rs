//! Shared helpers for bounded text handling and locking.
//!
//! Credentials, topics and payloads all live in fixed-capacity `heapless`
//! buffers.  These helpers centralise the two conversions the core needs:
//! strict (reject over-long input) and lossy (truncate silently).

use std::sync::{Mutex, MutexGuard, PoisonError};

use heapless::String;

/// Lock `m`, taking the data over from a panicked holder.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copy `s` into a `String<N>`, or `None` if it does not fit.
pub(crate) fn bounded<const N: usize>(s: &str) -> Option<String<N>> {
    let mut out = String::new();
    out.push_str(s).ok()?;
    Some(out)
}

/// Append as much of `s` as fits into `out`, never splitting a UTF-8
/// sequence.  Returns `true` if anything was dropped.
pub(crate) fn push_truncated<const N: usize>(out: &mut String<N>, s: &str) -> bool {
    let room = N - out.len();
    if s.len() <= room {
        // Cannot fail: length checked above.
        let _ = out.push_str(s);
        return false;
    }
    let mut cut = room;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let _ = out.push_str(&s[..cut]);
    true
}

/// Copy at most `N` bytes of `src` into a fixed buffer.
pub(crate) fn truncated_bytes<const N: usize>(src: &[u8]) -> heapless::Vec<u8, N> {
    let len = src.len().min(N);
    let mut out = heapless::Vec::new();
    // Cannot fail: `len <= N`.
    let _ = out.extend_from_slice(&src[..len]);
    out
}
