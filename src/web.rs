//! HTTP helper for JSON endpoints.
//!
//! One request per call, bounded by the client timeout, with status-code
//! classification and tolerant JSON decoding (empty bodies are errors,
//! unknown fields are ignored).

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use crate::collector::CollectorError;

/// Errors from HTTP probes.
#[derive(Debug, Error)]
pub enum WebError {
    /// The configured URL is malformed.
    #[error("invalid url '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The request did not complete in time.
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// Connection or transport failure.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The body could not be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<WebError> for CollectorError {
    fn from(err: WebError) -> Self {
        match err {
            WebError::Url { .. } | WebError::Client(_) => Self::Config(err.to_string()),
            WebError::Timeout { timeout, .. } => Self::ProbeTimeout(timeout),
            WebError::Request { ref source, .. } if source.is_connect() => {
                Self::ProbeUnavailable(err.to_string())
            }
            WebError::Request { .. } => Self::Transient(err.to_string()),
            WebError::Status { status, .. }
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::FORBIDDEN.as_u16() =>
            {
                Self::Auth(err.to_string())
            }
            WebError::Status { status, .. } => Self::ProbeFailed {
                code: Some(i32::from(status)),
                message: err.to_string(),
            },
            WebError::Decode { .. } => Self::Parse(err.to_string()),
        }
    }
}

/// Thin wrapper over a `reqwest::Client` with a per-request deadline.
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
    timeout: Duration,
}

impl WebClient {
    /// # Errors
    /// Returns [`WebError::Client`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, WebError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebError::Client(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Underlying client, for building requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, WebError> {
        self.send_json(self.client.get(url.clone())).await
    }

    /// Send a prepared request and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, WebError> {
        let (url, body) = self.execute(request).await?;
        decode_json(&url, &body)
    }

    /// Send a prepared request and return the raw body.
    pub async fn fetch(&self, request: RequestBuilder) -> Result<Vec<u8>, WebError> {
        self.execute(request).await.map(|(_, body)| body)
    }

    /// Send a prepared request and discard the body.
    pub async fn send(&self, request: RequestBuilder) -> Result<(), WebError> {
        self.execute(request).await.map(|_| ())
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(String, Vec<u8>), WebError> {
        let request = request.build().map_err(|e| WebError::Request {
            url: String::new(),
            source: e,
        })?;
        let url = request.url().to_string();

        let response = match tokio::time::timeout(self.timeout, self.client.execute(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => {
                return Err(WebError::Timeout {
                    url,
                    timeout: self.timeout,
                });
            }
            Ok(Err(e)) => return Err(WebError::Request { url, source: e }),
            Err(_) => {
                return Err(WebError::Timeout {
                    url,
                    timeout: self.timeout,
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| WebError::Request {
                url: url.clone(),
                source: e,
            })?
            .to_vec();

        tracing::trace!(url = %url, status = status.as_u16(), bytes = body.len(), "HTTP response");
        Ok((url, body))
    }
}

/// Decode a JSON body, rejecting empty or whitespace-only input.
pub fn decode_json<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, WebError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(WebError::Decode {
            url: url.to_string(),
            message: "empty response body".to_string(),
        });
    }
    serde_json::from_slice(body).map_err(|e| WebError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Deserialize an optional integer that may arrive as a JSON number, a
/// float, or a numeric string. Anything else becomes `None`.
///
/// Use with `#[serde(default, deserialize_with = "lenient_i64")]`.
pub fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }))
}

/// Append `path` to `base`, keeping every segment of `base`.
///
/// # Errors
/// Returns [`WebError::Url`] if the result is not a valid URL.
pub fn join_url(base: &str, path: &str) -> Result<Url, WebError> {
    let joined = format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| WebError::Url {
        url: joined,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        let url = join_url("https://hub.docker.com/v2/repositories/", "/library/nginx").unwrap();
        assert_eq!(
            url.as_str(),
            "https://hub.docker.com/v2/repositories/library/nginx"
        );

        let url = join_url("http://127.0.0.1:8080", "api/auth").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/auth");

        assert!(matches!(
            join_url("not a url", "x"),
            Err(WebError::Url { .. })
        ));
    }

    #[test]
    fn test_decode_json_rejects_empty() {
        #[derive(serde::Deserialize)]
        struct Body {
            #[allow(dead_code)]
            value: i64,
        }

        assert!(decode_json::<Body>("u", b"").is_err());
        assert!(decode_json::<Body>("u", b"  \n ").is_err());
        assert!(decode_json::<Body>("u", b"{not json").is_err());
        assert!(decode_json::<Body>("u", br#"{"value": 3, "extra": true}"#).is_ok());
    }

    #[test]
    fn test_lenient_i64() {
        #[derive(serde::Deserialize)]
        struct Counts {
            #[serde(default, deserialize_with = "lenient_i64")]
            n: Option<i64>,
        }

        let n = |json: &str| serde_json::from_str::<Counts>(json).unwrap().n;
        assert_eq!(n(r#"{"n": 7}"#), Some(7));
        assert_eq!(n(r#"{"n": "7"}"#), Some(7));
        assert_eq!(n(r#"{"n": 1000.5}"#), Some(1000));
        assert_eq!(n(r#"{"n": " 12.0 "}"#), Some(12));
        assert_eq!(n(r#"{"n": null}"#), None);
        assert_eq!(n(r#"{"n": true}"#), None);
        assert_eq!(n("{}"), None);
    }

    #[test]
    fn test_status_classification() {
        let auth: CollectorError = WebError::Status {
            url: "u".into(),
            status: 401,
        }
        .into();
        assert!(matches!(auth, CollectorError::Auth(_)));

        let forbidden: CollectorError = WebError::Status {
            url: "u".into(),
            status: 403,
        }
        .into();
        assert!(matches!(forbidden, CollectorError::Auth(_)));

        let server: CollectorError = WebError::Status {
            url: "u".into(),
            status: 503,
        }
        .into();
        assert!(matches!(
            server,
            CollectorError::ProbeFailed { code: Some(503), .. }
        ));

        let decode: CollectorError = WebError::Decode {
            url: "u".into(),
            message: "m".into(),
        }
        .into();
        assert!(matches!(decode, CollectorError::Parse(_)));
    }
}
