//! Credential acquisition from the token issuing endpoint.
//!
//! Each acquisition is one request carrying an independently built context
//! (fresh request id, fresh visitor cookie); nothing mutable is shared
//! between in-flight requests. A non-2xx response is a counted failure,
//! never retried within the batch; backfill is the pool's job.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::header::SET_COOKIE;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

const CLIENT_TOKEN: &str = "e1393935a959b4020a4491574f6490129f678acdaa92760471263db43487f823";

/// A bearer token plus the cookie material that must accompany the
/// connection it authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub cookie: String,
}

/// Produces up to `n` credentials per call. Finite, not restartable; each
/// call issues fresh requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self, n: usize) -> Vec<Result<Credential>>;
}

pub struct TokenAcquirer {
    client: reqwest::Client,
    token_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    data: TokenData,
}

#[derive(Deserialize)]
struct TokenData {
    token: String,
}

impl TokenAcquirer {
    pub fn new(token_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url,
        }
    }

    async fn acquire_one(&self) -> Result<Credential> {
        let response = self
            .client
            .get(&self.token_url)
            .header("Cookie", format!("_cfuvid={}", fresh_visitor_id()))
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .header("X-Client-Token", CLIENT_TOKEN)
            .header("Origin", "https://kick.com")
            .header("Referer", "https://kick.com/")
            .header("User-Agent", "mozilla")
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Acquisition {
                status: status.as_u16(),
            });
        }

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(extract_cookie_pair)
            .collect();

        let body: TokenResponse = response.json().await?;
        debug!(cookies = cookies.len(), "token issued");

        Ok(Credential {
            token: body.data.token,
            cookie: cookies.join("; "),
        })
    }
}

#[async_trait]
impl TokenSource for TokenAcquirer {
    async fn acquire(&self, n: usize) -> Vec<Result<Credential>> {
        stream::iter((0..n).map(|_| self.acquire_one()))
            .buffer_unordered(n.max(1))
            .collect()
            .await
    }
}

/// Extract the leading `key=value` pair from a `Set-Cookie` header value.
fn extract_cookie_pair(value: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"([a-zA-Z0-9._-]+=[a-zA-Z0-9._-]+);").expect("valid pattern"));
    pattern
        .captures(value)
        .map(|captures| captures[1].to_string())
}

/// Fresh `_cfuvid`-style visitor cookie material for one request.
fn fresh_visitor_id() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(43)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-0.0.1.1-604800000",
        token,
        chrono::Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_leading_cookie_pair() {
        let value = "cf_clearance=abc123.def-456; Path=/; HttpOnly; Secure";
        assert_eq!(
            extract_cookie_pair(value),
            Some("cf_clearance=abc123.def-456".into())
        );
    }

    #[test]
    fn ignores_unparseable_cookie() {
        assert_eq!(extract_cookie_pair("garbage"), None);
    }

    #[test]
    fn joins_pairs_like_a_cookie_header() {
        let values = [
            "__cf_bm=token1; Path=/; Secure",
            "_cfuvid=token2; Path=/; HttpOnly",
        ];
        let pairs: Vec<String> = values
            .iter()
            .filter_map(|v| extract_cookie_pair(v))
            .collect();
        assert_eq!(pairs.join("; "), "__cf_bm=token1; _cfuvid=token2");
    }

    #[test]
    fn visitor_ids_are_unique_per_request() {
        let first = fresh_visitor_id();
        let second = fresh_visitor_id();
        assert_ne!(first, second);
        assert!(first.contains("-0.0.1.1-"));
    }
}
