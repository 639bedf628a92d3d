use std::io;

pub type Result<T> = std::result::Result<T, AmbilightError>;

#[derive(thiserror::Error, Debug)]
pub enum AmbilightError {
    #[error("invalid stream header")]
    InvalidHeader,

    #[error("stream contains no frames")]
    EmptyStream,

    #[error("led layout has no zones")]
    NoZones,

    #[error("cannot resolve destination '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AmbilightError {
    pub fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn resolve(host: impl Into<String>, source: io::Error) -> Self {
        Self::Resolve {
            host: host.into(),
            source,
        }
    }
}
