use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::{
    client::{Client, EventHandler},
    gateway::payload::Ready,
    snowflake::Identified,
};

/// Logs who the client is logged in as and how its connection is doing.
pub struct HealthCheckService;

impl HealthCheckService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HealthCheckService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for HealthCheckService {
    async fn ready(&self, client: Arc<Client>, r: Ready) {
        info!("Discord client is ready!");

        // display the client's information
        info!("user name : {}", r.user.username);
        info!("user id : {}", client.id());
        info!("created at : {}", client.id().created_at());
        info!("library version : {}", env!("CARGO_PKG_VERSION"));

        // guilds in READY are announced later through GUILD_CREATE
        info!("member of {} guilds", r.guilds.len());
    }

    async fn resumed(&self, client: Arc<Client>) {
        info!(
            "session resumed, latency {}ms",
            client.latency().as_millis()
        );
    }
}
