use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SkywatchConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub capture: CaptureConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    /// Broker hostname or IP
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Topic carrying telemetry readings
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,

    /// Camera the telemetry feed belongs to
    #[serde(default = "default_camera_id")]
    pub camera_id: Uuid,

    /// Keep-alive interval in seconds
    #[serde(default = "default_mqtt_keep_alive")]
    pub keep_alive_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Directory for captured detection frames
    #[serde(default = "default_capture_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HubConfig {
    /// Per-client outbound queue capacity for detection/attack viewers
    #[serde(default = "default_viewer_queue_capacity")]
    pub viewer_queue_capacity: usize,

    /// Per-client outbound queue capacity for video frame viewers
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,

    /// Hub control channel capacity (registers/unregisters/broadcasts)
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,
}

impl SkywatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("skywatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("mqtt.host", default_mqtt_host())?
            .set_default("mqtt.port", default_mqtt_port())?
            .set_default("mqtt.topic", default_mqtt_topic())?
            .set_default("mqtt.camera_id", default_camera_id().to_string())?
            .set_default("mqtt.keep_alive_seconds", default_mqtt_keep_alive())?
            .set_default("capture.path", default_capture_path())?
            .set_default(
                "hub.viewer_queue_capacity",
                default_viewer_queue_capacity() as i64,
            )?
            .set_default(
                "hub.frame_queue_capacity",
                default_frame_queue_capacity() as i64,
            )?
            .set_default(
                "hub.control_queue_capacity",
                default_control_queue_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SKYWATCH_ prefix
            .add_source(Environment::with_prefix("SKYWATCH").separator("_"))
            .build()?;

        let config: SkywatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Message(
                "MQTT broker host must not be empty".to_string(),
            ));
        }

        if self.mqtt.topic.is_empty() {
            return Err(ConfigError::Message(
                "MQTT topic must not be empty".to_string(),
            ));
        }

        if self.capture.path.is_empty() {
            return Err(ConfigError::Message(
                "Capture path must not be empty".to_string(),
            ));
        }

        if self.hub.viewer_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Viewer queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.hub.frame_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Frame queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.hub.control_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Hub control queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SkywatchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            mqtt: MqttConfig {
                host: default_mqtt_host(),
                port: default_mqtt_port(),
                topic: default_mqtt_topic(),
                camera_id: default_camera_id(),
                keep_alive_seconds: default_mqtt_keep_alive(),
            },
            capture: CaptureConfig {
                path: default_capture_path(),
            },
            hub: HubConfig {
                viewer_queue_capacity: default_viewer_queue_capacity(),
                frame_queue_capacity: default_frame_queue_capacity(),
                control_queue_capacity: default_control_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_topic() -> String {
    "detection/telemetry".to_string()
}
fn default_camera_id() -> Uuid {
    Uuid::nil()
}
fn default_mqtt_keep_alive() -> u64 {
    30
}

fn default_capture_path() -> String {
    "./upload".to_string()
}

fn default_viewer_queue_capacity() -> usize {
    256
}
fn default_frame_queue_capacity() -> usize {
    100
}
fn default_control_queue_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = SkywatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hub.viewer_queue_capacity, 256);
        assert_eq!(config.hub.frame_queue_capacity, 100);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_validation_rejects_zero_capacities() {
        let mut config = SkywatchConfig::default();
        config.hub.viewer_queue_capacity = 0;
        assert!(config.validate().is_err());

        config.hub.viewer_queue_capacity = 256;
        config.hub.frame_queue_capacity = 0;
        assert!(config.validate().is_err());

        config.hub.frame_queue_capacity = 100;
        config.mqtt.topic = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_port() {
        let mut config = SkywatchConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
