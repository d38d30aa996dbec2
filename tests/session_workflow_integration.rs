//! Integration tests for the client session workflow
//!
//! These tests validate the complete path from hardware to client:
//! - Request, start, stop and release of sessions
//! - Frames delivered per active session
//! - Display state and lost clients
//! - Startup from a config file

mod common;

use common::{drain, fast_config, hub, recv_frames, wait_for};
use sensorhub_rs::config::{HubConfig, CONFIG_FILE, DROP_IN_DIR};
use sensorhub_rs::hub::SimulatedPattern;
use sensorhub_rs::plugins::{
    self, ACCELEROMETER_ADAPTOR, ACCELEROMETER_CHAIN, ACCELEROMETER_SENSOR,
    SMOOTH_ACCELEROMETER_SENSOR,
};
use sensorhub_rs::{HubError, SamplePayload, SensorManager, SessionId, TimedXyz};
use std::collections::HashSet;
use tempfile::TempDir;

fn xyz(payload: &SamplePayload) -> TimedXyz {
    match payload {
        SamplePayload::TimedXyz(sample) => *sample,
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn test_frames_reach_started_sessions_only() {
    let manager = hub(fast_config(), &[ACCELEROMETER_SENSOR]);
    let frames = manager.frames();

    let a = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    let b = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    assert_ne!(a, b);
    assert!(a.is_valid() && b.is_valid());

    assert!(manager.start(a).unwrap());
    let got = recv_frames(&frames, 10);
    assert_eq!(got.len(), 10);
    assert!(got.iter().all(|f| f.session == a && f.sensor == ACCELEROMETER_SENSOR));
    assert!(got
        .windows(2)
        .all(|w| xyz(&w[0].payload).timestamp_us <= xyz(&w[1].payload).timestamp_us));

    assert!(manager.start(b).unwrap());
    drain(&frames);
    let sessions: HashSet<SessionId> = recv_frames(&frames, 20).iter().map(|f| f.session).collect();
    assert_eq!(sessions, HashSet::from([a, b]));

    assert!(manager.stop(a).unwrap());
    assert!(!manager.stop(a).unwrap());
    drain(&frames);
    assert!(recv_frames(&frames, 10).iter().all(|f| f.session == b));

    manager.release_sensor(ACCELEROMETER_SENSOR, a).unwrap();
    manager.release_sensor(ACCELEROMETER_SENSOR, b).unwrap();
    assert_eq!(manager.session_count(), 0);
    assert_eq!(manager.adaptor_ref_count(ACCELEROMETER_ADAPTOR), 0);
}

#[test]
fn test_session_interval_reaches_adaptor() {
    let manager = hub(fast_config(), &[ACCELEROMETER_SENSOR]);
    let a = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    let b = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();

    manager.set_interval(a, 100).unwrap();
    let decision = manager.set_interval(b, 0).unwrap();
    assert_eq!(decision.interval_ms, 100);
    assert_eq!(decision.winner, Some(a));

    manager.start(b).unwrap();
    let status = manager.status();
    assert_eq!(status.adaptors[0].interval_ms, 100);
    assert_eq!(status.adaptors[0].sessions, 2);

    // Releasing the winner falls back to b's request, which is zero.
    manager.release_sensor(ACCELEROMETER_SENSOR, a).unwrap();
    let status = manager.status();
    assert_eq!(status.adaptors[0].interval_ms, 2);
    assert_eq!(status.adaptors[0].interval_winner, None);
}

#[test]
fn test_display_off_suspends_without_override() {
    let manager = hub(fast_config(), &[ACCELEROMETER_SENSOR]);
    let frames = manager.frames();
    let s = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    manager.start(s).unwrap();
    assert_eq!(recv_frames(&frames, 1).len(), 1);

    manager.set_display_state(false);
    assert!(!manager.display_on());
    let adaptor = &manager.status().adaptors[0];
    assert!(adaptor.suspended);
    assert!(!adaptor.running);

    // An override wakes it while the display stays off.
    assert!(manager.set_standby_override(s, true).unwrap());
    assert!(manager.status().adaptors[0].running);
    drain(&frames);
    assert_eq!(recv_frames(&frames, 3).len(), 3);

    assert!(!manager.set_standby_override(s, false).unwrap());
    assert!(manager.status().adaptors[0].suspended);

    manager.set_display_state(true);
    let adaptor = &manager.status().adaptors[0];
    assert!(!adaptor.suspended);
    assert!(adaptor.running);
}

#[test]
fn test_lost_client_releases_everything() {
    let manager = hub(fast_config(), &[ACCELEROMETER_SENSOR]);
    let s = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    manager.start(s).unwrap();
    manager.set_interval(s, 20).unwrap();

    assert!(manager.lost_client(s));
    assert!(!manager.lost_client(s));
    assert_eq!(manager.session_count(), 0);
    assert_eq!(manager.chain_ref_count(ACCELEROMETER_CHAIN), 0);
    assert!(matches!(manager.start(s), Err(HubError::UnknownSession(_))));
}

#[test]
fn test_smooth_sensor_averages_samples() {
    let mut config = fast_config();
    if let Some(settings) = config.adaptors.get_mut(ACCELEROMETER_ADAPTOR) {
        settings.pattern = Some(SimulatedPattern::Sequence {
            values: vec![[0, 0, 0], [4, 8, -4]],
        });
    }
    let manager = hub(config, &[SMOOTH_ACCELEROMETER_SENSOR]);
    let frames = manager.frames();
    let s = manager.request_sensor(SMOOTH_ACCELEROMETER_SENSOR).unwrap();
    manager.start(s).unwrap();

    let got = recv_frames(&frames, 3);
    assert_eq!(got.len(), 3);
    for frame in &got {
        let sample = xyz(&frame.payload);
        assert_eq!((sample.x, sample.y, sample.z), (2, 4, -2));
    }
}

#[test]
fn test_startup_from_layered_config() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join(CONFIG_FILE);
    let drop_in = dir.path().join(DROP_IN_DIR);
    std::fs::create_dir(&drop_in).unwrap();
    std::fs::write(
        &main,
        r#"
device_id = "devboard"
plugins = ["accelerometersensor"]

[adaptors.accelerometeradaptor]
type = "accelerometeradaptor"
default_interval_ms = 2
pattern = { pattern = "still", x = 1, y = 2, z = 3 }
"#,
    )
    .unwrap();
    std::fs::write(
        drop_in.join("50-mounting.toml"),
        "[transforms]\nacc_trans_matrix = [0, 1, 0, -1, 0, 0, 0, 0, 1]\n",
    )
    .unwrap();

    let config = HubConfig::load_layered(&main, &drop_in).unwrap();
    let manager = SensorManager::new(config);
    plugins::install_builtin(&manager);
    manager.load_autoload_plugins().unwrap();
    assert!(manager.has_sensor(ACCELEROMETER_SENSOR));

    let frames = manager.frames();
    let s = manager.request_sensor(ACCELEROMETER_SENSOR).unwrap();
    manager.start(s).unwrap();
    let got = recv_frames(&frames, 2);
    assert_eq!(got.len(), 2);
    let sample = xyz(&got[0].payload);
    assert_eq!((sample.x, sample.y, sample.z), (2, -1, 3));

    manager.shutdown();
    assert!(wait_for(|| manager.adaptor_ref_count(ACCELEROMETER_ADAPTOR) == 0));
}

#[test]
fn test_autoload_reports_missing_plugin() {
    let mut config = fast_config();
    config.plugins = vec!["nosuchplugin".into(), ACCELEROMETER_SENSOR.into()];
    let manager = SensorManager::new(config);
    plugins::install_builtin(&manager);

    let err = manager.load_autoload_plugins().unwrap_err();
    assert!(matches!(err, HubError::PluginNotFound(ref n) if n == "nosuchplugin"));
    // The rest of the list still loaded.
    assert!(manager.has_sensor(ACCELEROMETER_SENSOR));
}
