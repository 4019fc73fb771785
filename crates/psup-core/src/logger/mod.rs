//! Per-child log pipeline.
//!
//! `RotatingWriter` owns one append-only log file and rolls it over by size.
//! `LineStamper` wraps a writer and frames byte streams into timestamped
//! lines, buffering partial lines until a newline arrives.

mod rotate;
mod stamp;

pub use rotate::RotatingWriter;
pub use stamp::LineStamper;
