//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use crossbeam_channel::Receiver;
use sensorhub_rs::config::{AdaptorSettings, HubConfig};
use sensorhub_rs::plugins::{self, ACCELEROMETER_ADAPTOR};
use sensorhub_rs::{SensorFrame, SensorManager};
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Config whose simulated accelerometer polls every 2 ms
pub fn fast_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.adaptors.insert(
        ACCELEROMETER_ADAPTOR.to_string(),
        AdaptorSettings {
            default_interval_ms: 2,
            ..AdaptorSettings::new(ACCELEROMETER_ADAPTOR)
        },
    );
    config
}

/// Manager with the built-in plugins installed and `load` loaded
pub fn hub(config: HubConfig, load: &[&str]) -> SensorManager {
    let manager = SensorManager::new(config);
    plugins::install_builtin(&manager);
    for name in load {
        manager
            .load_plugin(name)
            .unwrap_or_else(|e| panic!("Failed to load plugin '{}': {}", name, e));
    }
    manager
}

/// Poll `cond` until it holds or the test timeout passes
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Receive up to `n` frames, stopping early on timeout
pub fn recv_frames(rx: &Receiver<SensorFrame>, n: usize) -> Vec<SensorFrame> {
    let mut frames = Vec::with_capacity(n);
    while frames.len() < n {
        match rx.recv_timeout(test_timeout()) {
            Ok(frame) => frames.push(frame),
            Err(_) => break,
        }
    }
    frames
}

/// Discard everything currently queued
pub fn drain(rx: &Receiver<SensorFrame>) {
    while rx.try_recv().is_ok() {}
}
