use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkywatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Hub error: {message}")]
    Hub { message: String },

    #[error("Server error: {message}")]
    Server { message: String },
}

impl SkywatchError {
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn hub<S: Into<String>>(message: S) -> Self {
        Self::Hub {
            message: message.into(),
        }
    }

    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SkywatchError>;
