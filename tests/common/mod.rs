//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod backends;
pub mod builders;

use althea_engine::config::AppConfig;

/// Config with a short node timeout and a single worker
pub fn test_config() -> AppConfig {
    AppConfig {
        num_workers: 1,
        calc_timeout_secs: 10.0,
        auto_recalc_log: true,
        ..AppConfig::default()
    }
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
