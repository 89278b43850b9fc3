//! Idempotency-key minting (C7).

use uuid::Uuid;

/// Mints a fresh idempotency key for a batch registration. Generated once
/// per chunk, outside the retry loop, so repeated attempts against the same
/// chunk present the same UUID (spec §3, §4.4).
pub fn new_batch_id() -> Uuid {
    Uuid::new_v4()
}
