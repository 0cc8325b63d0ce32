use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One raw sensor observation from the telemetry feed.
///
/// Field layout matches the JSON published by the tracker: bounding box in
/// frame coordinates, geo position, confidence, track id and a fractional
/// epoch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub confidence: f64,
    pub track_id: i64,
    pub timestamp: f64,
}

impl TelemetryReading {
    /// Convert the fractional epoch timestamp into a UTC datetime.
    ///
    /// Out-of-range values fall back to the epoch rather than failing the
    /// reading.
    pub fn captured_at(&self) -> DateTime<Utc> {
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1_000_000_000.0) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }
}

/// Detection record before durable storage has assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDetection {
    pub camera_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub objects: Vec<serde_json::Value>,
}

/// Persisted detection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: u64,
    pub camera_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub objects: Vec<serde_json::Value>,
}

/// Outbound detection broadcast payload for keyed viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub id: u64,
    pub camera_id: Uuid,
    pub timestamp: String,
    pub path: String,
    pub objects: Vec<serde_json::Value>,
    /// Base64 encoded image, present when a frame was captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    pub mime_type: String,
}

impl DetectionMessage {
    /// Build the outbound message for a stored detection, attaching the
    /// captured frame when one exists.
    pub fn from_detection(detection: &Detection, image: Option<&[u8]>) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        Self {
            id: detection.id,
            camera_id: detection.camera_id,
            timestamp: detection.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            path: detection.path.clone(),
            objects: detection.objects.clone(),
            image_data: image.map(|bytes| STANDARD.encode(bytes)),
            mime_type: mime_type_for_path(&detection.path),
        }
    }
}

/// Video frame message pushed by the detection stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrameMessage {
    /// Base64 encoded JPEG
    pub frame: String,
    /// Unix timestamp
    pub timestamp: f64,
    /// Frame sequence number
    pub frame_number: u64,
    /// Number of objects detected in the frame
    pub detections: u32,
    pub width: u32,
    pub height: u32,
    /// Model name used by the source
    pub model: String,
}

/// Attack record broadcast unfiltered to attack viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attack {
    #[serde(default)]
    pub id: u64,
    pub lat: f32,
    pub lng: f32,
    pub height: f32,
    pub function: String,
    pub acceleration: f32,
    pub velocity: f32,
    pub distance: f32,
    pub status: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Map a file extension to a mime type for the outbound message.
pub fn mime_type_for_path(path: &str) -> String {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
    .to_string()
}
