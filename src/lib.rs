//! Discord gateway client core.
//!
//! The pieces with real state live here: [`gateway::Kokoro`], the heartbeat
//! state machine keeping a gateway connection alive, [`gateway::Shard`], the
//! connection lifecycle around it, and [`registry::ClientDictionary`], the
//! id-ordered store of running clients.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod feature;
pub mod gateway;
pub mod jump_url;
pub mod registry;
pub mod snowflake;
pub mod timer;

pub use client::{Client, EventHandler};
pub use error::{Error, Result};
pub use snowflake::{Identified, Snowflake};
