/*
 * This file is part of Foodlog.
 *
 * Copyright (C) 2025 Foodlog contributors
 *
 * Foodlog is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Foodlog is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Foodlog. If not, see <https://www.gnu.org/licenses/>.
 */

//! Daemon Client
//!
//! Blocking JSON-lines client for the foodlogd control socket.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fl_error::{FoodlogError, Result};
use fl_protocol::{
    generate_request_id, ControllerStatusInfo, RecentEntry, Request, RequestEnvelope, Response,
    ResponseData, ResponseEnvelope, MAX_MESSAGE_SIZE,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a running daemon
pub struct DaemonClient {
    socket_path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    /// Connect with read/write timeouts applied
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .map_err(|_| FoodlogError::DaemonNotAvailable(socket_path.to_path_buf()))?;
        stream.set_read_timeout(Some(TIMEOUT))?;
        stream.set_write_timeout(Some(TIMEOUT))?;
        let reader_stream = stream.try_clone()?;

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its response
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate()
            .map_err(|e| FoodlogError::daemon(format!("Request validation failed: {}", e)))?;

        let request_id = generate_request_id();
        let envelope = RequestEnvelope::with_id(req.clone(), request_id);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(FoodlogError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer.write_all(&json).map_err(|e| io_error("send request", e))?;

        // One byte over the limit is enough to detect an oversize reply
        let mut response_buf: Vec<u8> = Vec::with_capacity(1024);
        (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| io_error("read response", e))?;

        if response_buf.is_empty() {
            return Err(FoodlogError::IpcProtocol("Daemon closed connection".to_string()));
        }
        if response_buf.len() > MAX_MESSAGE_SIZE {
            return Err(FoodlogError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let response_envelope: ResponseEnvelope = serde_json::from_slice(&response_buf)
            .map_err(|e| FoodlogError::IpcProtocol(format!("Failed to parse response: {}", e)))?;

        if response_envelope.id != request_id {
            return Err(FoodlogError::IpcProtocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response_envelope.id
            )));
        }

        verify_response_type(&req, &response_envelope.response)?;
        Ok(response_envelope.response)
    }

    fn request_ok(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message } => Err(FoodlogError::DaemonRequest(message)),
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        self.request_ok(Request::Ping).map(|_| ())
    }

    pub fn version(&mut self) -> Result<String> {
        Ok(self.request_ok(Request::Version)?.value.unwrap_or_default())
    }

    pub fn status(&mut self) -> Result<ControllerStatusInfo> {
        self.request_ok(Request::Status)?
            .status
            .ok_or_else(|| FoodlogError::IpcProtocol("status missing from response".into()))
    }

    pub fn start(&mut self) -> Result<()> {
        self.request_ok(Request::Start).map(|_| ())
    }

    /// Returns the daemon's note when the loop was already stopped
    pub fn stop(&mut self) -> Result<Option<String>> {
        Ok(self.request_ok(Request::Stop)?.value)
    }

    /// Returns the new offset
    pub fn calibrate(&mut self, known_distance_mm: f64) -> Result<f64> {
        self.request_ok(Request::Calibrate { known_distance_mm })?
            .offset_mm
            .ok_or_else(|| FoodlogError::IpcProtocol("offset missing from response".into()))
    }

    /// Most recent readings, oldest first
    pub fn recent(&mut self) -> Result<Vec<RecentEntry>> {
        self.request_ok(Request::Recent)?
            .recent
            .ok_or_else(|| FoodlogError::IpcProtocol("readings missing from response".into()))
    }
}

fn io_error(action: &str, e: std::io::Error) -> FoodlogError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            FoodlogError::Timeout(format!("{} after {:?}", action, TIMEOUT))
        }
        _ => FoodlogError::daemon(format!("Failed to {}: {}", action, e)),
    }
}

/// Check that a successful response carries the payload the request asks for
fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
    let data = match resp {
        Response::Error { .. } => return Ok(()),
        Response::Ok(data) => data,
    };

    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::Status => data.status.is_some(),
        Request::Calibrate { .. } => data.offset_mm.is_some(),
        Request::Recent => data.recent.is_some(),
        Request::Start | Request::Stop => true,
    };

    if !valid {
        return Err(FoodlogError::IpcProtocol(format!(
            "Response type mismatch for request {}",
            req.type_name()
        )));
    }
    Ok(())
}
