use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::handler::EventHandler;
use crate::{
    cache::SnowflakeCache,
    config::ClientConfig,
    error::{Error, Result},
    gateway::{
        payload::ReadyUser, GatewayEvent, Shard, ShardHandle, DEFAULT_LATENCY,
    },
    registry::ClientRegistry,
    snowflake::{Identified, Snowflake},
};

const EVENT_BUFFER: usize = 256;

pub struct Client {
    config: ClientConfig,
    user: OnceLock<ReadyUser>,
    shard: Mutex<Option<ShardHandle>>,
    guilds: SnowflakeCache<Value>,
}

impl Identified for Client {
    /// Zero until the first READY.
    fn id(&self) -> Snowflake {
        self.user.get().map(|user| user.id).unwrap_or_default()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(Error::Config("token must not be empty".into()));
        }
        Ok(Self {
            config,
            user: OnceLock::new(),
            shard: Mutex::new(None),
            guilds: SnowflakeCache::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user.get().map(|user| user.username.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.shard.lock().is_some()
    }

    pub fn latency(&self) -> Duration {
        self.shard
            .lock()
            .as_ref()
            .map_or(DEFAULT_LATENCY, ShardHandle::latency)
    }

    /// Last payload seen for a guild the client is in.
    pub async fn guild_payload(&self, id: Snowflake) -> Option<Arc<Value>> {
        self.guilds.get(id).await
    }

    pub fn shutdown(&self) {
        if let Some(shard) = self.shard.lock().as_ref() {
            info!("shutting down client {}", self.id());
            shard.shutdown();
        }
    }

    /// Connects and dispatches events to `handler` until shutdown or a fatal error.
    ///
    /// The client joins `registry` once READY tells it its id, and leaves it
    /// when the connection stops for good.
    pub async fn run<H: EventHandler>(
        self: Arc<Self>,
        registry: &ClientRegistry<Client>,
        handler: H,
    ) -> Result<()> {
        let (events_tx, mut events) = mpsc::channel(EVENT_BUFFER);
        let shard = {
            let mut slot = self.shard.lock();
            if slot.is_some() {
                return Err(Error::Config("client is already running".into()));
            }
            let (shard, handle) = Shard::new(self.config.clone(), events_tx);
            *slot = Some(handle);
            shard
        };
        let shard_task = tokio::spawn(shard.run());

        while let Some(event) = events.recv().await {
            self.handle_event(event, registry, &handler).await;
        }

        let result = shard_task
            .await
            .map_err(|e| Error::Gateway(format!("shard task failed: {e}")));
        self.shard.lock().take();

        let id = self.id();
        if registry
            .get(id)
            .is_some_and(|registered| Arc::ptr_eq(&registered, &self))
        {
            registry.remove(id);
        }
        result?
    }

    async fn handle_event<H: EventHandler>(
        self: &Arc<Self>,
        event: GatewayEvent,
        registry: &ClientRegistry<Client>,
        handler: &H,
    ) {
        match event {
            GatewayEvent::Ready(ready) => {
                let user = ready.user.clone();
                if let Err(user) = self.user.set(user) {
                    if Some(user.id) != self.user.get().map(|u| u.id) {
                        warn!("token now belongs to {}, keeping {}", user.id, self.id());
                    }
                }
                if let Some(previous) = registry.insert(Arc::clone(self)) {
                    if !Arc::ptr_eq(&previous, self) {
                        warn!("replaced another client registered as {}", self.id());
                    }
                }
                handler.ready(Arc::clone(self), *ready).await;
            }
            GatewayEvent::Resumed => handler.resumed(Arc::clone(self)).await,
            GatewayEvent::Dispatch { name, data } => {
                self.update_guilds(&name, &data).await;
                handler.dispatch(Arc::clone(self), name, data).await;
            }
        }
    }

    async fn update_guilds(&self, name: &str, data: &Value) {
        let Some(id) = data
            .get("id")
            .and_then(|id| serde_json::from_value::<Snowflake>(id.clone()).ok())
        else {
            return;
        };

        match name {
            "GUILD_CREATE" | "GUILD_UPDATE" => {
                self.guilds.insert(id, data.clone()).await;
                debug!("cached guild {}", id);
            }
            "GUILD_DELETE" => {
                self.guilds.remove(id).await;
                debug!("evicted guild {}", id);
            }
            _ => {}
        }
    }
}
