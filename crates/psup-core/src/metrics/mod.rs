//! Metrics sampling and bounded per-process history.

mod ring;
mod sampler;

pub use ring::{MetricsSnapshot, RING_CAPACITY, SnapshotRing};
pub use sampler::{spawn_listener_scanner, spawn_sampler};
