pub mod config;
pub mod detection;
pub mod error;
pub mod frame_cache;
pub mod hub;
pub mod ingest;
pub mod processing;
pub mod storage;
pub mod streaming;

pub use config::SkywatchConfig;
pub use detection::{
    Attack, Detection, DetectionMessage, NewDetection, TelemetryReading, VideoFrameMessage,
};
pub use error::{Result, SkywatchError};
pub use frame_cache::FrameCache;
pub use hub::{ClientId, Hub, RegisteredClient};
pub use ingest::DetectionIngestWorker;
pub use processing::{process_capture, save_capture, ProcessedCapture};
pub use storage::{
    AttackStore, DetectionStore, MemoryAttackStore, MemoryDetectionStore,
};
pub use streaming::{AppState, StreamServer};
