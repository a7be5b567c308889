/*
 * Integration tests for Foodlog
 *
 * These tests run the client side (DaemonClient, the watch App and the
 * CLI) against a scripted daemon listening on a temporary Unix socket.
 */

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use fl_error::FoodlogError;
use fl_protocol::{
    ControllerStatusInfo, RecentEntry, Request, RequestEnvelope, Response, ResponseEnvelope,
};
use foodlog::app::App;
use foodlog::cli::{Cli, Commands};
use foodlog::client::DaemonClient;
use foodlog::report::{format_recent, format_status};
use serial_test::serial;
use tempfile::TempDir;

// Test utilities
fn sample_status(running: bool) -> ControllerStatusInfo {
    ControllerStatusInfo {
        cage_id: "cage-7".to_string(),
        running,
        offset_mm: 1.5,
        calibrated_at: "2024-03-01 13:59:59".to_string(),
        ticks: 12,
        sensor_faults: 1,
        storage_errors: 0,
        last_value_mm: Some(42.0),
        current_partition: Some("Food_20240301_14.csv".to_string()),
        sensor: "iio:vl53l0x".to_string(),
    }
}

fn sample_recent() -> Vec<RecentEntry> {
    vec![
        RecentEntry { timestamp: "2024-03-01 13:59:59".to_string(), data: 41.5 },
        RecentEntry { timestamp: "2024-03-01 14:00:00".to_string(), data: 0.0 },
    ]
}

/// Answers requests the way foodlogd does for a controller that is running
fn scripted_response(request: &Request) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),
        Request::Version => Response::ok_string("0.1.0"),
        Request::Status => Response::ok_status(sample_status(true)),
        Request::Recent => Response::ok_recent(sample_recent()),
        Request::Start => Response::error("Sensor loop is already running"),
        Request::Stop => Response::ok(),
        Request::Calibrate { known_distance_mm } => Response::ok_offset(known_distance_mm - 40.0),
    }
}

/// Serve `connections` clients on a fresh socket, one at a time
fn spawn_fake_daemon(dir: &Path, connections: usize) -> (PathBuf, JoinHandle<Vec<String>>) {
    let socket_path = dir.join("foodlog.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..connections {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let line = line.unwrap();
                let envelope: RequestEnvelope = serde_json::from_str(&line).unwrap();
                seen.push(envelope.request.type_name().to_string());
                let reply = ResponseEnvelope::new(envelope.id, scripted_response(&envelope.request));
                let mut json = serde_json::to_vec(&reply).unwrap();
                json.push(b'\n');
                writer.write_all(&json).unwrap();
            }
        }
        seen
    });

    (socket_path, handle)
}

#[test]
fn test_client_round_trips_every_request() {
    let dir = TempDir::new().unwrap();
    let (socket_path, daemon) = spawn_fake_daemon(dir.path(), 1);

    {
        let mut client = DaemonClient::connect(&socket_path).unwrap();
        client.ping().unwrap();
        assert_eq!(client.version().unwrap(), "0.1.0");
        assert_eq!(client.status().unwrap(), sample_status(true));
        assert_eq!(client.recent().unwrap(), sample_recent());
        assert_eq!(client.calibrate(50.0).unwrap(), 10.0);
        assert_eq!(client.stop().unwrap(), None);
    }

    let seen = daemon.join().unwrap();
    assert_eq!(seen, vec!["Ping", "Version", "Status", "Recent", "Calibrate", "Stop"]);
}

#[test]
fn test_daemon_error_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let (socket_path, daemon) = spawn_fake_daemon(dir.path(), 1);

    {
        let mut client = DaemonClient::connect(&socket_path).unwrap();
        match client.start() {
            Err(FoodlogError::DaemonRequest(msg)) => assert!(msg.contains("already running")),
            other => panic!("expected daemon error, got {:?}", other),
        }
        // The connection survives an error response
        client.ping().unwrap();
    }

    daemon.join().unwrap();
}

#[test]
fn test_invalid_calibration_never_reaches_daemon() {
    let dir = TempDir::new().unwrap();
    let (socket_path, daemon) = spawn_fake_daemon(dir.path(), 1);

    {
        let mut client = DaemonClient::connect(&socket_path).unwrap();
        assert!(client.calibrate(f64::NAN).is_err());
        client.ping().unwrap();
    }

    assert_eq!(daemon.join().unwrap(), vec!["Ping"]);
}

#[test]
fn test_watch_app_refresh() {
    let dir = TempDir::new().unwrap();
    let (socket_path, daemon) = spawn_fake_daemon(dir.path(), 1);

    {
        let mut app = App::new(socket_path.clone(), Duration::from_millis(500));
        assert!(!app.is_connected());

        app.refresh();
        assert!(app.is_connected());
        assert!(app.last_error.is_none());
        assert_eq!(app.status.as_ref().map(|s| s.cage_id.as_str()), Some("cage-7"));
        assert_eq!(app.recent.len(), 2);

        // Second refresh reuses the same connection
        app.refresh();
        assert!(app.is_connected());
    }

    assert_eq!(daemon.join().unwrap(), vec!["Status", "Recent", "Status", "Recent"]);
}

#[test]
fn test_watch_app_reports_missing_daemon() {
    let dir = TempDir::new().unwrap();
    let mut app = App::new(dir.path().join("absent.sock"), Duration::from_millis(500));

    app.refresh();
    assert!(!app.is_connected());
    assert!(app.status.is_none());
    assert!(app.last_error.as_deref().unwrap().contains("not available"));
}

#[test]
fn test_reports_from_daemon_data() {
    let status = format_status(&sample_status(true));
    assert!(status.contains("cage-7"));
    assert!(status.contains("Food_20240301_14.csv"));

    let recent = format_recent(&sample_recent());
    assert!(recent.contains("2024-03-01 13:59:59"));
    assert!(recent.contains("41.5"));
}

#[test]
#[serial]
fn test_socket_from_environment() {
    std::env::set_var("FOODLOG_SOCKET", "/tmp/foodlog-env.sock");
    let cli = Cli::try_parse_from(["foodlog", "status"]).unwrap();
    std::env::remove_var("FOODLOG_SOCKET");

    assert_eq!(cli.socket_path(), PathBuf::from("/tmp/foodlog-env.sock"));
    assert!(matches!(cli.command, Commands::Status));
}

#[test]
#[serial]
fn test_explicit_socket_overrides_environment() {
    std::env::set_var("FOODLOG_SOCKET", "/tmp/foodlog-env.sock");
    let cli = Cli::try_parse_from(["foodlog", "--socket", "/run/other.sock", "recent", "--json"]).unwrap();
    std::env::remove_var("FOODLOG_SOCKET");

    assert_eq!(cli.socket_path(), PathBuf::from("/run/other.sock"));
    assert!(matches!(cli.command, Commands::Recent { json: true }));
}
