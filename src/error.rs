//! Error types for the gateway core.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::opcode::CloseCode;

#[derive(Error, Debug)]
pub enum Error {
    /// The websocket transport failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A payload could not be (de)serialised.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The gateway broke protocol (unexpected opcode, missing hello, ...).
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The gateway closed the connection with a close frame.
    #[error("gateway closed the connection with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    /// A value could not be parsed as a snowflake.
    #[error("invalid snowflake: {0:?}")]
    InvalidSnowflake(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The heartbeat task is no longer running.
    #[error("kokoro is not running")]
    KokoroStopped,

    /// Reconnecting gave up after the configured number of attempts.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl Error {
    /// Whether reconnecting can fix this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WebSocket(_) | Self::Gateway(_) | Self::Json(_) => true,
            Self::Closed { code, .. } => !CloseCode::is_fatal(*code),
            Self::InvalidSnowflake(_)
            | Self::Config(_)
            | Self::KokoroStopped
            | Self::ReconnectExhausted { .. } => false,
        }
    }

    /// Whether a reconnect after this error may resume the old session.
    pub fn can_resume(&self) -> bool {
        match self {
            Self::Closed { code, .. } => CloseCode::can_resume(*code),
            _ => self.is_retryable(),
        }
    }

    /// Suggested delay before the next attempt, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            // rate limited by the gateway, wait out a full minute window
            Self::Closed { code: 4008, .. } => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
