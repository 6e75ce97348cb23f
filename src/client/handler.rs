use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::discord::Client;
use crate::gateway::payload::Ready;

/// Callbacks for gateway events. Every method defaults to doing nothing.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn ready(&self, _client: Arc<Client>, _ready: Ready) {}

    async fn resumed(&self, _client: Arc<Client>) {}

    /// Every dispatch, `READY` included, with its raw payload.
    async fn dispatch(&self, _client: Arc<Client>, _name: String, _data: Value) {}
}
