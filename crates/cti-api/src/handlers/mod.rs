//! HTTP request handlers

pub mod calls;
pub mod health;
pub mod ws;

pub use calls::configure as configure_calls;
pub use calls::execute;
pub use health::configure as configure_health;
pub use ws::ws_handler;
