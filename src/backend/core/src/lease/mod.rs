//! Exclusive leases for singleton maintenance work.
//!
//! Leases are the only critical-section primitive in the crate and are meant
//! for short administrative tasks, not the job hot path. A holder that
//! crashes leaves the lease to expire, so the guarantee is "at most one
//! acknowledged completion at a time", bounded by the store's TTL accuracy.

pub mod backoff;
pub mod exclusive_lease;
pub mod helpers;

pub use backoff::BackoffStrategy;
pub use exclusive_lease::ExclusiveLease;
pub use helpers::{in_lock, LockOptions};
