//! Unix Socket Server
//!
//! JSON-lines control interface of the sampling daemon.
//!
//! # Safety Features
//! - **Socket**: stale sockets are replaced, symlinks are refused
//! - **Peer credentials**: UID/GID/PID logged for every mutating request
//! - **Connection limits**: maximum concurrent connections enforced
//! - **Timeouts**: read/write timeouts prevent resource exhaustion
//! - **Message limits**: bounded line reads, oversize requests are rejected

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use fl_core::constants::partition;
use fl_core::ControllerStatus;
use fl_error::FoodlogError;
use fl_protocol::{ControllerStatusInfo, RecentEntry, Request, RequestEnvelope, Response, ResponseEnvelope};

use crate::sampler::Sampler;

// ============================================================================
// Limits
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = fl_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket permissions (owner and group)
const SOCKET_MODE: u32 = 0o660;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Bind the socket, replacing a stale one
pub fn bind(socket_path: &Path) -> Result<UnixListener, Box<dyn std::error::Error>> {
    if socket_path.exists() {
        let metadata = socket_path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            return Err("Socket path is a symlink - refusing to replace it".into());
        }
        std::fs::remove_file(socket_path)?;
        debug!("Removed existing socket file");
    }

    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {:?} (mode {:o})", socket_path, SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);
    Ok(listener)
}

/// Accept clients until `shutdown` is notified
pub async fn run_server(listener: UnixListener, sampler: Arc<Sampler>, shutdown: Arc<Notify>) {
    tokio::select! {
        _ = serve(listener, sampler) => {}
        _ = shutdown.notified() => {
            info!("Shutdown requested");
        }
    }

    info!("Server stopped");
}

/// Accept clients until the future is dropped
async fn serve(listener: UnixListener, sampler: Arc<Sampler>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => accept(stream, &sampler),
            Err(e) => error!("Accept error: {}", e),
        }
    }
}

fn accept(stream: UnixStream, sampler: &Arc<Sampler>) {
    let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
    if current >= MAX_CONNECTIONS {
        warn!("Connection limit reached ({}), rejecting new connection", current);
        drop(stream);
        return;
    }

    ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
    let sampler = sampler.clone();
    tokio::spawn(async move {
        handle_client(stream, sampler).await;
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    let cred = stream.peer_cred().ok()?;
    Some(PeerCredentials {
        uid: cred.uid(),
        gid: cred.gid(),
        pid: cred.pid().unwrap_or(0),
    })
}

async fn handle_client(stream: UnixStream, sampler: Arc<Sampler>) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };
    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid, cred.pid, request_count, connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", cred.uid, e);
                        let envelope = ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &cred, &sampler).await;
                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let envelope = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        }
    }
}

/// Send response with timeout
async fn send_response(writer: &mut OwnedWriteHalf, envelope: &ResponseEnvelope) -> Result<(), ()> {
    let response_json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

async fn process_request(line: &str, cred: &PeerCredentials, sampler: &Arc<Sampler>) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    debug!(
        "Processing {} (id={}) from uid={}, pid={}",
        request.type_name(), request_id, cred.uid, cred.pid
    );

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::Status => Response::ok_status(status_to_protocol(&sampler.controller().status())),

        Request::Recent => {
            let entries = sampler
                .recent()
                .lock()
                .iter()
                .map(|r| RecentEntry { timestamp: r.timestamp.clone(), data: r.value })
                .collect();
            Response::ok_recent(entries)
        }

        Request::Start => {
            info!("AUDIT: Start by uid={}, pid={}", cred.uid, cred.pid);
            match sampler.start() {
                Ok(()) => Response::ok(),
                Err(e @ FoodlogError::AlreadyRunning) => Response::error(e.to_string()),
                Err(e) => {
                    error!("Failed to start sensor loop: {}", e);
                    Response::error(e.to_string())
                }
            }
        }

        Request::Stop => {
            info!("AUDIT: Stop by uid={}, pid={}", cred.uid, cred.pid);
            if sampler.stop() {
                Response::ok()
            } else {
                Response::ok_string("already stopped")
            }
        }

        Request::Calibrate { known_distance_mm } => {
            info!(
                "AUDIT: Calibrate known_distance_mm={} by uid={}, pid={}",
                known_distance_mm, cred.uid, cred.pid
            );
            let controller = sampler.controller().clone();
            match tokio::task::spawn_blocking(move || controller.calibrate(known_distance_mm)).await {
                Ok(Ok(offset)) => Response::ok_offset(offset),
                Ok(Err(e)) => {
                    warn!("Calibration failed: {}", e);
                    Response::error(e.to_string())
                }
                Err(e) => {
                    error!("Calibration task failed: {}", e);
                    Response::error("Calibration task failed")
                }
            }
        }
    };

    ResponseEnvelope::new(request_id, response)
}

fn status_to_protocol(status: &ControllerStatus) -> ControllerStatusInfo {
    ControllerStatusInfo {
        cage_id: status.cage_id.clone(),
        running: status.state == fl_core::RunState::Running,
        offset_mm: status.offset_mm,
        calibrated_at: status.calibrated_at.format(partition::ROW_TIME_FORMAT).to_string(),
        ticks: status.stats.ticks,
        sensor_faults: status.stats.sensor_faults,
        storage_errors: status.stats.storage_errors,
        last_value_mm: status.last_value_mm,
        current_partition: status.current_partition.clone(),
        sensor: status.sensor.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_core::{DaemonSettings, SensorSettings};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn sampler(tmp: &TempDir) -> Arc<Sampler> {
        let settings = DaemonSettings {
            log_directory: tmp.path().join("Food_sensor_values"),
            poll_interval_ms: 50,
            sensor: SensorSettings::Simulated { min_mm: 40.0, max_mm: 41.0, fault_rate: 0.0 },
            ..Default::default()
        };
        let sensor = crate::sampler::build_sensor(&settings.sensor, false).unwrap();
        Arc::new(Sampler::from_settings(&settings, sensor))
    }

    fn cred() -> PeerCredentials {
        PeerCredentials { uid: 1000, gid: 1000, pid: 42 }
    }

    async fn call(sampler: &Arc<Sampler>, request: Request) -> Response {
        let line = serde_json::to_string(&RequestEnvelope::with_id(request, 7)).unwrap();
        let envelope = process_request(&line, &cred(), sampler).await;
        assert_eq!(envelope.id, 7);
        envelope.response
    }

    #[tokio::test]
    async fn test_ping_and_invalid_json() {
        let tmp = TempDir::new().unwrap();
        let sampler = sampler(&tmp);
        match call(&sampler, Request::Ping).await {
            Response::Ok(data) => assert_eq!(data.value.as_deref(), Some("pong")),
            other => panic!("unexpected {:?}", other),
        }

        let envelope = process_request("{nope", &cred(), &sampler).await;
        assert!(!envelope.response.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_is_error() {
        let tmp = TempDir::new().unwrap();
        let sampler = sampler(&tmp);

        assert!(call(&sampler, Request::Start).await.is_ok());
        match call(&sampler, Request::Start).await {
            Response::Error { message } => assert!(message.contains("already running")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(call(&sampler, Request::Stop).await.is_ok());
        sampler.shutdown().await;
    }

    #[tokio::test]
    async fn test_calibrate_reports_offset_in_status() {
        let tmp = TempDir::new().unwrap();
        let sampler = sampler(&tmp);

        let offset = match call(&sampler, Request::Calibrate { known_distance_mm: 100.0 }).await {
            Response::Ok(data) => data.offset_mm.unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert!(offset > 59.0 && offset <= 60.0);

        match call(&sampler, Request::Status).await {
            Response::Ok(data) => {
                let status = data.status.unwrap();
                assert!(!status.running);
                assert_eq!(status.offset_mm, offset);
                assert_eq!(status.cage_id, "cage-1");
            }
            other => panic!("unexpected {:?}", other),
        }

        // Persisted next to the partitions
        assert!(tmp.path().join("Food_sensor_values").join("calibration.json").exists());
    }

    #[tokio::test]
    async fn test_non_finite_calibration_rejected() {
        let tmp = TempDir::new().unwrap();
        let sampler = sampler(&tmp);
        let line = r#"{"id":3,"cmd":"Calibrate","data":{"known_distance_mm":1e400}}"#;
        let envelope = process_request(line, &cred(), &sampler).await;
        assert!(!envelope.response.is_ok());
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("foodlog.sock");
        let listener = bind(&socket).unwrap();
        let server = tokio::spawn(serve(listener, sampler(&tmp)));

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        let request = serde_json::to_string(&RequestEnvelope::with_id(Request::Recent, 1)).unwrap();
        stream.write_all(format!("{}\n", request).as_bytes()).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let reply: ResponseEnvelope = serde_json::from_slice(buf[..n].trim_ascii_end()).unwrap();
        match reply.response {
            Response::Ok(data) => assert_eq!(data.recent, Some(vec![])),
            other => panic!("unexpected {:?}", other),
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_shutdown_notify_stops_server() {
        let tmp = TempDir::new().unwrap();
        let listener = bind(&tmp.path().join("foodlog.sock")).unwrap();
        let shutdown = Arc::new(Notify::new());

        // Permit is stored even before the server waits on it
        shutdown.notify_one();
        tokio::time::timeout(
            Duration::from_secs(5),
            run_server(listener, sampler(&tmp), shutdown),
        )
        .await
        .unwrap();
    }
}
