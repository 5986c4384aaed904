//! Fixtures shared by the integration tests.

use std::{sync::Arc, time::Duration};

use fabriclink::{Worker, config::WorkerOptions};
use fabriclink_testing::RecordingHandler;
use rstest::fixture;

/// Upper bound on waiting for a worker to report an event.
pub const WAIT: Duration = Duration::from_secs(5);

#[fixture]
pub fn worker() -> Worker {
    let options = WorkerOptions {
        poll_timeout: Duration::from_millis(50),
        ..WorkerOptions::default()
    };
    Worker::spawn(0, options).expect("spawn worker")
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn handler() -> Arc<RecordingHandler> { RecordingHandler::new() }
