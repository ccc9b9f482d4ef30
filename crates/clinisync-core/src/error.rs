//! Error types for `clinisync-core`.
//!
//! Every failure the engines can surface is one of these variants. The type
//! is `Clone` so one in-flight result can be handed to every waiter.

use strum::Display;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// A client-side precondition failed; nothing was sent to the server.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out")]
  Timeout,

  /// The server answered with a non-success status.
  #[error("http {status}: {detail}")]
  Http { status: u16, detail: String },

  /// A push-channel emit was attempted while the channel is not connected.
  #[error("push channel unavailable")]
  ChannelUnavailable,

  #[error("unexpected payload: {0}")]
  Decode(String),
}

/// Coarse classification of an [`Error`], mirroring the transport failure
/// semantics callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  Network,
  Timeout,
  Http4xx,
  Http5xx,
  ChannelUnavailable,
  Decode,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::Network(_) => ErrorKind::Network,
      Self::Timeout => ErrorKind::Timeout,
      Self::Http { status, .. } if *status >= 500 => ErrorKind::Http5xx,
      Self::Http { .. } => ErrorKind::Http4xx,
      Self::ChannelUnavailable => ErrorKind::ChannelUnavailable,
      Self::Decode(_) => ErrorKind::Decode,
    }
  }

  /// The HTTP status, if the server produced this error.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self { Self::Decode(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
