//! Device enumeration.
//!
//! Enumeration has no random access, so every lookup walks a fresh
//! enumeration context from the start.

use crate::protocol::DeviceId;
use crate::transport::Transport;
use tracing::warn;

/// Every device currently known to the transport, in enumeration order.
///
/// Failure to start enumeration is logged and yields an empty list:
/// no hardware attached is a normal condition.
pub fn list<T: Transport>(transport: &T) -> Vec<DeviceId> {
    match transport.enumerate() {
        Ok(monitor) => monitor.collect(),
        Err(e) => {
            warn!("Cannot create device monitor: {}", e);
            Vec::new()
        }
    }
}

/// The `n`-th (1-based) enumerated device
pub fn lookup<T: Transport>(transport: &T, n: usize) -> Option<DeviceId> {
    if n == 0 {
        return None;
    }
    match transport.enumerate() {
        Ok(mut monitor) => monitor.nth(n - 1),
        Err(e) => {
            warn!("Cannot create device monitor: {}", e);
            None
        }
    }
}
