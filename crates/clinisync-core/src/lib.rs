//! Core types and trait definitions for the clinisync client.
//!
//! No HTTP or socket dependencies live here. The transport and sync crates
//! depend on this one; it depends on nothing that talks to the network.

pub mod error;
pub mod id;
pub mod lead;
pub mod notification;
pub mod push;
pub mod transport;
pub mod wire;

pub use error::{Error, ErrorKind, Result};
pub use id::Id;
