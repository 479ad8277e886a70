//! Channel resolution by human-readable name.
//!
//! The channel page embeds its numeric ids inside escaped-JSON substrings
//! of the HTML payload; fixed patterns pull them out. A response missing
//! the channel or stream id is a resolution failure; no retry happens at
//! this layer, the caller decides.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub stream_id: String,
    /// Viewer count embedded in the page, when present.
    pub viewer_count: Option<i64>,
}

pub struct ChannelResolver {
    client: reqwest::Client,
    site_url: String,
}

impl ChannelResolver {
    pub fn new(site_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            site_url,
        }
    }

    pub async fn resolve(&self, channel_name: &str) -> Result<ChannelInfo> {
        let url = format!("{}/{}", self.site_url, channel_name);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", "mozilla")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%channel_name, status = status.as_u16(), "resolution request error");
            return Err(Error::Resolution(format!(
                "http {} for \"{channel_name}\"",
                status.as_u16()
            )));
        }

        let body = response.text().await?;
        let info = parse_channel_page(&body)?;
        info!(
            %channel_name,
            channel_id = %info.channel_id,
            stream_id = %info.stream_id,
            "channel resolved"
        );
        Ok(info)
    }
}

fn channel_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"channel_id\\":([0-9]+)"#).expect("valid pattern"))
}

fn stream_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"livestream\\":\{\\"id\\":([0-9]+)"#).expect("valid pattern"))
}

fn viewer_count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"viewer_count\\":([0-9]+)"#).expect("valid pattern"))
}

/// Extract the channel ids from a channel page body. Missing channel or
/// stream id means the channel is unknown or not live.
pub fn parse_channel_page(body: &str) -> Result<ChannelInfo> {
    let channel_id = channel_id_pattern()
        .captures(body)
        .map(|captures| captures[1].to_string());
    let stream_id = stream_id_pattern()
        .captures(body)
        .map(|captures| captures[1].to_string());
    let viewer_count = viewer_count_pattern()
        .captures(body)
        .and_then(|captures| captures[1].parse().ok());

    match (channel_id, stream_id) {
        (Some(channel_id), Some(stream_id)) => Ok(ChannelInfo {
            channel_id,
            stream_id,
            viewer_count,
        }),
        (channel_id, _) => Err(Error::Resolution(format!(
            "page missing {}",
            if channel_id.is_none() {
                "channel id"
            } else {
                "stream id"
            }
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{"props":"{\"channel_id\":15108912,\"livestream\":{\"id\":44556677,\"viewer_count\":1234}}"}"#;

    #[test]
    fn extracts_ids_and_viewers() {
        let info = parse_channel_page(PAGE).unwrap();
        assert_eq!(info.channel_id, "15108912");
        assert_eq!(info.stream_id, "44556677");
        assert_eq!(info.viewer_count, Some(1234));
    }

    #[test]
    fn missing_stream_id_is_a_resolution_failure() {
        let body = r#"{"props":"{\"channel_id\":15108912}"}"#;
        let err = parse_channel_page(body).unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[test]
    fn missing_channel_id_is_a_resolution_failure() {
        let body = r#"{"props":"{\"livestream\":{\"id\":44556677}}"}"#;
        assert!(parse_channel_page(body).is_err());
    }

    #[test]
    fn viewer_count_is_optional() {
        let body = r#"{"props":"{\"channel_id\":1,\"livestream\":{\"id\":2}}"}"#;
        let info = parse_channel_page(body).unwrap();
        assert_eq!(info.viewer_count, None);
    }
}
