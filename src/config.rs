//! Process configuration
//!
//! Settings come from an optional JSON file (see `settings.example.json`)
//! with CLI flags layered on top in `main`. A missing file path means
//! defaults; an unreadable or unparseable file is a fatal startup error.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::media::format::VideoCodec;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub router: RouterConfig,
    pub adapter: AdapterConfig,
}

/// Signaling router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterConfig {
    /// Listen address for the HTTP/WebSocket server
    pub bind_addr: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5174".to_string(),
        }
    }
}

/// Adapter process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    /// WebSocket URL of the signaling router
    pub signaling_url: String,
    /// Display name announced to the router
    pub user_name: String,
    /// ICE server URLs for peer connections
    pub ice_servers: Vec<String>,
    /// Video codec preference, most preferred first
    pub video_codecs: Vec<VideoCodec>,
    /// Address the per-client frame publishers bind to
    pub sink_bind_addr: String,
    /// First TCP port handed to frame publishers
    pub sink_base_port: u16,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:5174/ws".to_string(),
            user_name: "RTC Adapter".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            video_codecs: vec![VideoCodec::H264, VideoCodec::VP8],
            sink_bind_addr: "0.0.0.0".to_string(),
            sink_base_port: 9500,
        }
    }
}

impl AppConfig {
    /// Load settings from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!(
                        "failed to read settings file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&contents).map_err(|e| {
                    AppError::Config(format!(
                        "failed to parse settings file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.router.bind_addr.is_empty() {
            return Err(AppError::Config("router bind address is empty".into()));
        }
        if self.adapter.signaling_url.is_empty() {
            return Err(AppError::Config("signaling URL is empty".into()));
        }
        if self.adapter.user_name.is_empty() {
            return Err(AppError::Config("adapter user name is empty".into()));
        }
        if self.adapter.video_codecs.is_empty() {
            return Err(AppError::Config(
                "at least one video codec must be configured".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.router.bind_addr, "0.0.0.0:5174");
        assert_eq!(config.adapter.video_codecs[0], VideoCodec::H264);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "router": {{ "bindAddr": "127.0.0.1:9000" }},
                "adapter": {{
                    "signalingUrl": "ws://router:9000/ws",
                    "videoCodecs": ["vp8", "h264"]
                }}
            }}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.router.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.adapter.signaling_url, "ws://router:9000/ws");
        assert_eq!(
            config.adapter.video_codecs,
            vec![VideoCodec::VP8, VideoCodec::H264]
        );
        // Untouched sections keep their defaults
        assert_eq!(config.adapter.sink_base_port, 9500);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/settings.json"))).is_err());
    }

    #[test]
    fn test_unparseable_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_empty_codec_list_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "adapter": {{ "videoCodecs": [] }} }}"#).unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }
}
