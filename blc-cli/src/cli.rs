use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// WebSocket endpoint of the blivechat server
    #[arg(long, env = "BLC_WS_URL")]
    pub ws_url: Option<String>,

    /// Live room id
    #[arg(long, env = "BLC_ROOM_ID", conflicts_with = "auth_code")]
    pub room_id: Option<u64>,

    /// Streamer identity code, used instead of a room id
    #[arg(long, env = "BLC_AUTH_CODE", hide_env_values = true)]
    pub auth_code: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long)]
    pub heartbeat_interval: Option<f64>,

    /// Ask the server to translate messages
    #[arg(long)]
    pub auto_translate: Option<bool>,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_id() {
        let args = Args::try_parse_from(["blc-listener", "--room-id", "92384", "-v"]).unwrap();
        assert_eq!(args.room_id, Some(92384));
        assert!(args.verbose);
        assert!(args.auth_code.is_none());
    }

    #[test]
    fn test_room_id_conflicts_with_auth_code() {
        let result =
            Args::try_parse_from(["blc-listener", "--room-id", "1", "--auth-code", "ABC"]);
        assert!(result.is_err());
    }
}
