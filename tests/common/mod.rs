//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use datapipe_rs::config::PipelineSettings;
use std::time::Duration;

/// Upper bound for waiting on a pipeline thread
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Settings with a short output poll so tests finish quickly
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings::default()
        .with(datapipe_rs::config::OUTPUT_POLL_MS, 5)
        .expect("known setting")
}

/// Assert two durations are within `tolerance` of each other
pub fn assert_duration_near(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "Expected {:?} to be within {:?} of {:?}",
        actual,
        tolerance,
        expected
    );
}
