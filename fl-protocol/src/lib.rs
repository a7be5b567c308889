use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Largest ground-truth distance accepted for calibration, in millimeters
pub const MAX_CALIBRATION_DISTANCE_MM: f64 = 10_000.0;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Controller state, counters and calibration
    Status,
    /// Start the polling loop (rejected while already running)
    Start,
    /// Request the polling loop to stop after the in-flight tick
    Stop,
    /// Calibrate against a known ground-truth distance
    Calibrate { known_distance_mm: f64 },
    /// The bounded list of most recent readings, oldest first
    Recent,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::Status
            | Request::Start
            | Request::Stop
            | Request::Recent => Ok(()),

            Request::Calibrate { known_distance_mm } => {
                validate_calibration_distance(*known_distance_mm)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Status => "Status",
            Request::Start => "Start",
            Request::Stop => "Stop",
            Request::Calibrate { .. } => "Calibrate",
            Request::Recent => "Recent",
        }
    }

    /// Requests that change controller state get audit logging
    pub fn is_mutating(&self) -> bool {
        matches!(self, Request::Start | Request::Stop | Request::Calibrate { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data - at most one field is populated per response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// New calibration offset after a successful calibration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_mm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ControllerStatusInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent: Option<Vec<RecentEntry>>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn offset(o: f64) -> Self { Self { offset_mm: Some(o), ..Self::default() } }
    pub fn status(s: ControllerStatusInfo) -> Self { Self { status: Some(s), ..Self::default() } }
    pub fn recent(r: Vec<RecentEntry>) -> Self { Self { recent: Some(r), ..Self::default() } }
}

/// Snapshot of the sensor controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatusInfo {
    pub cage_id: String,
    pub running: bool,
    pub offset_mm: f64,
    /// When the current offset was set (`%Y-%m-%d %H:%M:%S`)
    pub calibrated_at: String,
    pub ticks: u64,
    pub sensor_faults: u64,
    pub storage_errors: u64,
    pub last_value_mm: Option<f64>,
    pub current_partition: Option<String>,
    pub sensor: String,
}

/// One entry of the recent-readings read-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEntry {
    pub timestamp: String,
    pub data: f64,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_offset(o: f64) -> Self {
        Response::Ok(ResponseData::offset(o))
    }

    pub fn ok_status(s: ControllerStatusInfo) -> Self {
        Response::Ok(ResponseData::status(s))
    }

    pub fn ok_recent(r: Vec<RecentEntry>) -> Self {
        Response::Ok(ResponseData::recent(r))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

pub fn validate_calibration_distance(distance_mm: f64) -> Result<(), String> {
    if !distance_mm.is_finite() {
        return Err("Calibration distance must be a finite number".into());
    }
    if distance_mm.abs() > MAX_CALIBRATION_DISTANCE_MM {
        return Err(format!(
            "Calibration distance out of range (maximum ±{} mm)",
            MAX_CALIBRATION_DISTANCE_MM
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let env = RequestEnvelope::with_id(Request::Calibrate { known_distance_mm: 120.0 }, 7);
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"id":7,"cmd":"Calibrate","data":{"known_distance_mm":120.0}}"#);

        let unit = serde_json::to_string(&RequestEnvelope::with_id(Request::Recent, 3)).unwrap();
        assert_eq!(unit, r#"{"id":3,"cmd":"Recent"}"#);
    }

    #[test]
    fn test_request_parse() {
        let env: RequestEnvelope = serde_json::from_str(r#"{"id":9,"cmd":"Stop"}"#).unwrap();
        assert_eq!(env.id, 9);
        assert_eq!(env.request, Request::Stop);
        assert!(env.request.is_mutating());
    }

    #[test]
    fn test_response_parse() {
        let json = r#"{"id":4,"status":"ok","recent":[{"timestamp":"2024-01-01 13:59:59","data":21.5}]}"#;
        let env: ResponseEnvelope = serde_json::from_str(json).unwrap();
        match env.response {
            Response::Ok(data) => {
                let recent = data.recent.unwrap();
                assert_eq!(recent.len(), 1);
                assert_eq!(recent[0].data, 21.5);
            }
            Response::Error { message } => panic!("unexpected error: {}", message),
        }

        let err: ResponseEnvelope =
            serde_json::from_str(r#"{"id":5,"status":"error","message":"Sensor loop is already running"}"#).unwrap();
        assert!(!err.response.is_ok());
    }

    #[test]
    fn test_calibration_validation() {
        assert!(Request::Calibrate { known_distance_mm: 80.0 }.validate().is_ok());
        assert!(Request::Calibrate { known_distance_mm: -35.0 }.validate().is_ok());
        assert!(Request::Calibrate { known_distance_mm: f64::NAN }.validate().is_err());
        assert!(Request::Calibrate { known_distance_mm: f64::INFINITY }.validate().is_err());
        assert!(Request::Calibrate { known_distance_mm: 20_000.0 }.validate().is_err());
    }

    #[test]
    fn test_request_ids_increase() {
        let a = RequestEnvelope::new(Request::Ping);
        let b = RequestEnvelope::new(Request::Ping);
        assert!(b.id > a.id);
    }
}
