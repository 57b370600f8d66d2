use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use blcapi::{ClientConfig, RoomKey};
use serde::Deserialize;

use crate::cli::Args;

/// Listener settings, read from an optional TOML file and overridden by
/// command line arguments.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ws_url: Option<String>,
    pub room_id: Option<u64>,
    pub auth_code: Option<String>,
    /// Seconds
    pub heartbeat_interval: Option<f64>,
    pub auto_translate: Option<bool>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ws_url) = &args.ws_url {
            self.ws_url = Some(ws_url.clone());
        }
        // Picking one kind of key on the command line discards the other one.
        if let Some(room_id) = args.room_id {
            self.room_id = Some(room_id);
            self.auth_code = None;
        }
        if let Some(auth_code) = &args.auth_code {
            self.auth_code = Some(auth_code.clone());
            self.room_id = None;
        }
        if let Some(interval) = args.heartbeat_interval {
            self.heartbeat_interval = Some(interval);
        }
        if let Some(auto_translate) = args.auto_translate {
            self.auto_translate = Some(auto_translate);
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let room_key = match (self.room_id, &self.auth_code) {
            (Some(_), Some(_)) => bail!("Set either room_id or auth_code, not both"),
            (Some(room_id), None) => RoomKey::room_id(room_id),
            (None, Some(auth_code)) => RoomKey::auth_code(auth_code.clone()),
            (None, None) => bail!("No room configured, pass --room-id or --auth-code"),
        };

        let mut config = ClientConfig::new(room_key);
        if let Some(ws_url) = &self.ws_url {
            config = config.with_ws_url(ws_url.clone());
        }
        if let Some(secs) = self.heartbeat_interval {
            let interval = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .with_context(|| format!("Invalid heartbeat interval {secs}"))?;
            config = config.with_heartbeat_interval(interval);
        }
        if let Some(auto_translate) = self.auto_translate {
            config = config.with_auto_translate(auto_translate);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[test]
    fn test_parse_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            ws_url = "ws://example.com:12450/api/chat"
            auth_code = "ABCDEF123"
            heartbeat_interval = 5
            "#,
        )
        .unwrap();

        let client = config.client_config().unwrap();
        assert_eq!(client.ws_url, "ws://example.com:12450/api/chat");
        assert_eq!(client.room_key, RoomKey::auth_code("ABCDEF123"));
        assert_eq!(client.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_args_override_file() {
        let mut config = AppConfig {
            auth_code: Some("ABCDEF123".to_string()),
            ..Default::default()
        };
        let args = Args::parse_from(["blc-listener", "--room-id", "92384"]);
        config.apply_args(&args);

        let client = config.client_config().unwrap();
        assert_eq!(client.room_key, RoomKey::room_id(92384));
    }

    #[rstest]
    #[case(AppConfig::default())]
    #[case(AppConfig { room_id: Some(1), auth_code: Some("x".into()), ..Default::default() })]
    #[case(AppConfig { room_id: Some(1), heartbeat_interval: Some(0.0), ..Default::default() })]
    #[case(AppConfig { room_id: Some(1), heartbeat_interval: Some(-3.0), ..Default::default() })]
    fn test_invalid_config(#[case] config: AppConfig) {
        assert!(config.client_config().is_err());
    }
}
