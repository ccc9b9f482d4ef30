//! Setup errors for `clinisync-transport`.
//!
//! Failures of individual requests are reported as [`clinisync_core::Error`];
//! this type only covers building the channels.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid url {url:?}: {source}")]
  InvalidUrl {
    url:    String,
    #[source]
    source: url::ParseError,
  },

  #[error("cannot derive a push url from scheme {0:?}")]
  UnsupportedScheme(String),

  #[error("invalid identity header {0:?}")]
  InvalidHeader(String),

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
