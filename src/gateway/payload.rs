//! Gateway payload shapes needed to run a session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::opcode::Opcode;
use crate::snowflake::Snowflake;

/// The envelope every gateway message travels in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    fn new(op: Opcode, d: Option<Value>) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.op).ok()
    }

    /// A heartbeat carrying the last sequence number seen, `null` if none.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(Opcode::Heartbeat, Some(sequence.map_or(Value::Null, Value::from)))
    }

    pub fn identify(identify: &Identify) -> serde_json::Result<Self> {
        Ok(Self::new(Opcode::Identify, Some(serde_json::to_value(identify)?)))
    }

    pub fn resume(resume: &Resume) -> serde_json::Result<Self> {
        Ok(Self::new(Opcode::Resume, Some(serde_json::to_value(resume)?)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Milliseconds.
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.into(),
            browser: env!("CARGO_PKG_NAME").into(),
            device: env!("CARGO_PKG_NAME").into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub resume_gateway_url: String,
    pub user: ReadyUser,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyUser {
    pub id: Snowflake,
    pub username: String,
}

/// Guilds listed in READY arrive later through GUILD_CREATE.
#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}
