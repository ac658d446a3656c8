pub mod client;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use client::ClientRegistry;
pub use handlers::HandlerState;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
