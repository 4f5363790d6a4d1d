//! File-descriptor limits and the in-flight bound derived from them.
use std::io;

use tracing::{debug, warn};

/// Descriptors kept free for everything that is not a probe socket.
const HEADROOM: u64 = 100;

/// Below this limit, half of it is used instead of `limit - HEADROOM`.
const SMALL_LIMIT: u64 = 3000;

/// Current soft RLIMIT_NOFILE, if the platform exposes one.
#[cfg(unix)]
pub fn fd_soft_limit() -> Option<u64> {
    match rlimit::Resource::NOFILE.get() {
        Ok((soft, _hard)) => Some(soft),
        Err(e) => {
            warn!("could not read file descriptor limit: {e}");
            None
        }
    }
}

#[cfg(not(unix))]
pub fn fd_soft_limit() -> Option<u64> {
    None
}

/// Raise the soft descriptor limit towards `target` (capped by the hard limit).
/// Returns the limit now in effect.
pub fn raise_fd_limit(target: u64) -> io::Result<u64> {
    let effective = rlimit::increase_nofile_limit(target)?;
    debug!(requested = target, effective, "raised file descriptor limit");
    Ok(effective)
}

/// Lower `requested` so the scan cannot exhaust `soft_limit` descriptors.
pub fn clamp_in_flight(requested: usize, soft_limit: Option<u64>) -> usize {
    let requested = requested.max(1);
    let Some(limit) = soft_limit else {
        return requested;
    };
    if (requested as u64) < limit {
        return requested;
    }
    let clamped = if limit < SMALL_LIMIT {
        limit / 2
    } else {
        limit - HEADROOM
    };
    let clamped = (clamped.max(1)).min(usize::MAX as u64) as usize;
    warn!(
        requested,
        limit, clamped, "in-flight bound exceeds the file descriptor limit; lowering it"
    );
    clamped
}
