//! Request/response channel over reqwest.

use clinisync_core::{
  Error as CoreError,
  transport::{Method, Request},
};
use reqwest::{
  Client,
  header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing::debug;

use crate::{ClientConfig, Error, Result};

/// Async HTTP channel to the backend.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpChannel {
  client:   Client,
  base_url: String,
  identity: HeaderMap,
}

impl HttpChannel {
  pub fn new(config: &ClientConfig) -> Result<Self> {
    // Validates the URL up front so `send` can join paths with plain strings.
    let base = config.api_url()?;
    let client = Client::builder()
      .timeout(config.request_timeout())
      .build()?;
    Ok(Self {
      client,
      base_url: base.as_str().trim_end_matches('/').to_owned(),
      identity: identity_headers(config)?,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  /// Perform one exchange. No retries.
  ///
  /// An empty success body decodes as `null`.
  pub async fn send(&self, request: Request) -> clinisync_core::Result<serde_json::Value> {
    let route = request.route();
    let mut builder = self
      .client
      .request(method(request.method), self.url(&request.path))
      .headers(self.identity.clone());
    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let resp = builder.send().await.map_err(classify)?;
    let status = resp.status();
    debug!(%route, %status, "http exchange");

    if !status.is_success() {
      let text = resp.text().await.unwrap_or_default();
      return Err(CoreError::Http {
        status: status.as_u16(),
        detail: detail_from_body(&text)
          .or_else(|| status.canonical_reason().map(str::to_owned))
          .unwrap_or_default(),
      });
    }

    let bytes = resp.bytes().await.map_err(classify)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
  }
}

fn method(m: Method) -> reqwest::Method {
  match m {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

/// Map a reqwest failure onto the timeout / network split.
fn classify(e: reqwest::Error) -> CoreError {
  if e.is_timeout() {
    CoreError::Timeout
  } else if e.is_decode() {
    CoreError::Decode(e.to_string())
  } else {
    CoreError::Network(e.to_string())
  }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": ...}` and `{"error": ...}`; anything else is
/// returned as trimmed text.
fn detail_from_body(text: &str) -> Option<String> {
  let text = text.trim();
  if text.is_empty() {
    return None;
  }
  let Ok(json) = serde_json::from_str::<serde_json::Value>(text) else {
    return Some(text.to_owned());
  };
  let field = json.get("detail").or_else(|| json.get("error"));
  Some(match field {
    Some(serde_json::Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
    None => text.to_owned(),
  })
}

pub(crate) fn identity_headers(config: &ClientConfig) -> Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  for (name, value) in &config.identity_headers {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|_| Error::InvalidHeader(name.clone()))?;
    let value =
      HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(name.to_string()))?;
    headers.insert(name, value);
  }
  Ok(headers)
}
