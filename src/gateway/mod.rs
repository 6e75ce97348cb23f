//! Gateway connection: protocol state, heartbeat and socket lifecycle.

pub mod kokoro;
pub mod opcode;
pub mod payload;
pub mod session;
pub mod shard;

pub use kokoro::{HeartbeatSignal, Kokoro, KokoroConfig, KokoroState, DEFAULT_LATENCY};
pub use shard::{GatewayEvent, Shard, ShardHandle};
