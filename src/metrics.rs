//! Metric names and helpers for `fabriclink`.
//!
//! Helpers wrap the [`metrics`](https://docs.rs/metrics) facade and compile to
//! no-ops when the `metrics` feature is disabled.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking established links.
pub const LINKS_ACTIVE: &str = "fabriclink_links_active";
/// Name of the counter tracking frames moved through links.
pub const FRAMES_PROCESSED: &str = "fabriclink_frames_processed_total";
/// Name of the counter tracking link-fatal errors.
pub const ERRORS_TOTAL: &str = "fabriclink_errors_total";
/// Name of the counter tracking enqueue attempts rejected by a full queue.
pub const QUEUE_FULL_TOTAL: &str = "fabriclink_queue_full_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from a peer.
    Inbound,
    /// Frames written to a peer.
    Outbound,
}

impl Direction {
    /// Label value recorded for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the established links gauge.
pub fn inc_links() {
    #[cfg(feature = "metrics")]
    gauge!(LINKS_ACTIVE).increment(1.0);
}

/// Decrement the established links gauge.
pub fn dec_links() {
    #[cfg(feature = "metrics")]
    gauge!(LINKS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a link-fatal error.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Record a rejected enqueue.
pub fn inc_queue_full() {
    #[cfg(feature = "metrics")]
    counter!(QUEUE_FULL_TOTAL).increment(1);
}
