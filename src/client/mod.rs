pub mod discord;
pub mod handler;

pub use discord::Client;
pub use handler::EventHandler;
