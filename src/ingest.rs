use crate::config::MqttConfig;
use crate::detection::{DetectionMessage, NewDetection, TelemetryReading};
use crate::frame_cache::FrameCache;
use crate::hub::Hub;
use crate::processing;
use crate::storage::DetectionStore;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Minimum and maximum delay between reconnect attempts.
const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bridges the MQTT telemetry feed to persisted detections and the keyed
/// detection hub.
///
/// One long-lived task for the process lifetime. Each message is handled
/// independently: a malformed payload or failed persistence affects only
/// that reading, never the subscription.
pub struct DetectionIngestWorker {
    config: MqttConfig,
    capture_dir: PathBuf,
    store: Arc<dyn DetectionStore>,
    frame_cache: Arc<FrameCache>,
    detection_hub: Hub,
}

impl DetectionIngestWorker {
    pub fn new(
        config: MqttConfig,
        capture_dir: impl Into<PathBuf>,
        store: Arc<dyn DetectionStore>,
        frame_cache: Arc<FrameCache>,
        detection_hub: Hub,
    ) -> Self {
        Self {
            config,
            capture_dir: capture_dir.into(),
            store,
            frame_cache,
            detection_hub,
        }
    }

    /// Connect, subscribe and process telemetry until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let client_id = format!("skywatch-detect-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        info!(
            "Detection ingest connecting to MQTT broker {}:{}",
            self.config.host, self.config.port
        );

        let mut backoff = MIN_BACKOFF;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Detection ingest shutting down");
                    let _ = client.disconnect().await;
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        backoff = MIN_BACKOFF;
                        info!(
                            "MQTT connected to broker {}:{}",
                            self.config.host, self.config.port
                        );
                        // Subscriptions do not survive reconnects
                        if let Err(e) = client
                            .subscribe(&self.config.topic, QoS::AtLeastOnce)
                            .await
                        {
                            warn!("Failed to subscribe to {}: {}", self.config.topic, e);
                        } else {
                            info!("Subscribed to MQTT topic: {}", self.config.topic);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        backoff = MIN_BACKOFF;
                        debug!("Received MQTT message on topic {}", publish.topic);
                        self.handle_message(&publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "MQTT connection error: {}. Reconnecting in {:?}",
                            e, backoff
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
    }

    /// Process one telemetry payload: decode, capture, persist, broadcast.
    pub async fn handle_message(&self, payload: &[u8]) {
        let reading: TelemetryReading = match serde_json::from_slice(payload) {
            Ok(reading) => reading,
            Err(e) => {
                // The feed is continuous; losing one reading is acceptable
                warn!("Failed to parse telemetry payload: {}", e);
                return;
            }
        };

        info!(
            "Telemetry reading: track_id={} lat={:.6} lon={:.6} alt={:.2} confidence={:.2}",
            reading.track_id, reading.lat, reading.lon, reading.alt, reading.confidence
        );

        let (image_path, image_bytes) = self.capture_frame(reading.track_id).await;

        let objects = match serde_json::to_value(&reading) {
            Ok(value) => vec![value],
            Err(e) => {
                warn!("Failed to serialize reading as object list: {}", e);
                return;
            }
        };

        let detection = NewDetection {
            camera_id: self.config.camera_id,
            timestamp: reading.captured_at(),
            path: image_path,
            objects,
        };

        // Persistence first; broadcast only a durable record
        let stored = match self.store.create(detection).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to save detection: {}", e);
                return;
            }
        };

        info!(
            "Saved detection id={} with {} objects",
            stored.id,
            stored.objects.len()
        );

        let message = DetectionMessage::from_detection(&stored, image_bytes.as_deref());
        if let Err(e) = self
            .detection_hub
            .broadcast_json(&message, Some(stored.camera_id))
            .await
        {
            warn!("Failed to broadcast detection {}: {}", stored.id, e);
        }
    }

    /// Grab the latest cached frame, run it through the resize pipeline and
    /// persist it. Every failure degrades to a detection without an image.
    async fn capture_frame(&self, track_id: i64) -> (String, Option<Vec<u8>>) {
        let Some((frame, _timestamp)) = self.frame_cache.latest().await else {
            debug!("No video frame available, saving detection without image");
            return (String::new(), None);
        };

        let processed = match processing::process_capture(&frame) {
            Ok(processed) => processed,
            Err(e) => {
                warn!("Failed to process captured frame: {}", e);
                return (String::new(), None);
            }
        };

        match processing::save_capture(&self.capture_dir, &processed.bytes, track_id).await {
            Ok(path) => {
                info!("Saved captured frame to: {}", path);
                (path, Some(processed.bytes))
            }
            Err(e) => {
                warn!("Failed to save captured frame: {}", e);
                (String::new(), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SkywatchConfig;
    use crate::storage::MemoryDetectionStore;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    const TELEMETRY: &str = r#"{"x":10,"y":20,"w":5,"h":5,"lat":16.47,"lon":102.78,"alt":100.0,"confidence":0.92,"track_id":7,"timestamp":1700000000}"#;

    fn jpeg_fixture() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 48, Rgb([200, 100, 50]));
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, 90)
            .encode_image(&img)
            .unwrap();
        bytes
    }

    struct Fixture {
        worker: DetectionIngestWorker,
        store: Arc<MemoryDetectionStore>,
        cache: Arc<FrameCache>,
        hub: Hub,
        _dir: tempfile::TempDir,
    }

    fn fixture(camera_id: Uuid) -> Fixture {
        let mut config = SkywatchConfig::default().mqtt;
        config.camera_id = camera_id;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDetectionStore::new());
        let cache = Arc::new(FrameCache::new());
        let hub = Hub::spawn("detect", 8, 32);

        let worker = DetectionIngestWorker::new(
            config,
            dir.path(),
            store.clone(),
            cache.clone(),
            hub.clone(),
        );

        Fixture {
            worker,
            store,
            cache,
            hub,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_telemetry_with_cached_frame_persists_and_broadcasts() {
        let camera_id = Uuid::new_v4();
        let f = fixture(camera_id);

        f.cache.update(jpeg_fixture(), 1700000000.0).await;
        let mut viewer = f.hub.register(Some(camera_id)).await.unwrap();

        f.worker.handle_message(TELEMETRY.as_bytes()).await;

        let records = f.store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert!(!records[0].path.is_empty());
        assert_eq!(records[0].camera_id, camera_id);

        let raw = viewer.receiver.recv().await.unwrap();
        let message: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(message["id"], 1);
        assert_eq!(message["camera_id"], camera_id.to_string());
        assert_eq!(message["mime_type"], "image/jpeg");
        assert!(message["image_data"].is_string());
        assert_eq!(message["objects"][0]["track_id"], 7);

        // Exactly one broadcast
        let _barrier = f.hub.register(None).await.unwrap();
        assert!(viewer.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detection_without_frame_has_no_image() {
        let camera_id = Uuid::new_v4();
        let f = fixture(camera_id);
        let mut viewer = f.hub.register(Some(camera_id)).await.unwrap();

        f.worker.handle_message(TELEMETRY.as_bytes()).await;

        let records = f.store.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].path.is_empty());

        let raw = viewer.receiver.recv().await.unwrap();
        let message: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(message.get("image_data").is_none());
        assert_eq!(message["mime_type"], "application/octet-stream");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_without_side_effects() {
        let camera_id = Uuid::new_v4();
        let f = fixture(camera_id);
        let mut viewer = f.hub.register(Some(camera_id)).await.unwrap();

        f.worker.handle_message(b"{not json").await;

        assert!(f.store.records().await.is_empty());
        let _barrier = f.hub.register(None).await.unwrap();
        assert!(viewer.receiver.try_recv().is_err());

        // Subscription stays usable for the next reading
        f.worker.handle_message(TELEMETRY.as_bytes()).await;
        assert_eq!(f.store.records().await.len(), 1);
        assert!(viewer.receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_routes_only_to_matching_camera() {
        let camera_id = Uuid::new_v4();
        let f = fixture(camera_id);

        let mut other = f.hub.register(Some(Uuid::new_v4())).await.unwrap();
        let mut matching = f.hub.register(Some(camera_id)).await.unwrap();

        f.worker.handle_message(TELEMETRY.as_bytes()).await;

        assert!(matching.receiver.recv().await.is_some());
        let _barrier = f.hub.register(None).await.unwrap();
        assert!(other.receiver.try_recv().is_err());
    }
}
