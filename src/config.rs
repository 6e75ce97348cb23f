use std::time::Duration;

use env_logger::Env;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    gateway::kokoro::KokoroConfig,
};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
pub const DEFAULT_API_VERSION: u8 = 10;

pub fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

pub fn load_discord_token() -> Result<String> {
    match std::env::var("DISCORD_TOKEN") {
        Ok(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(Error::Config(
            "Expected a token in the environment variable DISCORD_TOKEN".into(),
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ClientConfig {
    #[builder(setter(into))]
    pub token: String,

    /// Gateway intents bitfield.
    #[builder(default = default_intents())]
    #[serde(default = "default_intents")]
    pub intents: u64,

    #[builder(default = DEFAULT_GATEWAY_URL.to_string(), setter(into))]
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[builder(default = DEFAULT_API_VERSION)]
    #[serde(default = "default_api_version")]
    pub api_version: u8,

    /// `[shard_id, shard_count]`.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// How long a new socket may stay silent before hello, in milliseconds.
    #[builder(default = default_hello_timeout_ms())]
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,

    #[builder(default)]
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[builder(default)]
    #[serde(default)]
    pub kokoro: KokoroConfig,
}

fn default_intents() -> u64 {
    // guilds, guild messages, direct messages, message content
    (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15)
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_api_version() -> u8 {
    DEFAULT_API_VERSION
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

impl ClientConfig {
    /// Reads `DISCORD_TOKEN`, plus the optional `HATA_GATEWAY_URL` and `HATA_INTENTS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::builder().token(load_discord_token()?).build();

        if let Ok(url) = std::env::var("HATA_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(raw) = std::env::var("HATA_INTENTS") {
            config.intents = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("HATA_INTENTS is not a number: {raw:?}")))?;
        }
        Ok(config)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    /// Websocket url for a fresh connection or a resume url.
    pub fn connect_url(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before giving up, `0` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor (0.0-1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 + jitter * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis((base as f64 * factor) as u64)
    }
}
