//! Concrete [`Transport`](clinisync_core::transport::Transport) for the
//! clinisync backend.
//!
//! Two channels sit behind one interface: a reqwest HTTP client for
//! request/response calls and a WebSocket push channel that reconnects on its
//! own and replays subscriptions after every reconnect.

mod client;
mod http;
mod push;

pub mod config;
pub mod error;

pub use client::ClientTransport;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use http::HttpChannel;
pub use push::PushChannel;
