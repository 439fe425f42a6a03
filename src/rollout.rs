// src/rollout.rs

//! Deterministic rollout partitioning
//!
//! A device is inside a staged rollout when the SHA-256 of its identifier
//! concatenated with the update id lands below the rollout percentage.
//! Nothing is stored per device: the same pair always lands in the same
//! bucket, and each new update id reshuffles which devices go first.

use sha2::{Digest, Sha256};

/// Device identity used when the client sends none
pub const ANONYMOUS_DEVICE: &str = "anonymous";

/// Check whether `device_id` receives `update_id` at `percentage`
pub fn in_rollout(device_id: &str, update_id: &str, percentage: u8) -> bool {
    if percentage >= 100 {
        return true;
    }
    if percentage == 0 {
        return false;
    }

    bucket(device_id, update_id) < u32::from(percentage)
}

/// Bucket in 0..100 for a (device, update) pair
fn bucket(device_id: &str, update_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(update_id.as_bytes());
    let digest = hasher.finalize();

    let tail: [u8; 4] = [digest[28], digest[29], digest[30], digest[31]];
    u32::from_be_bytes(tail) % 100
}
