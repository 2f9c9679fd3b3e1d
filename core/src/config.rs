/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API origin, without trailing slash
    pub base_url: String,

    /// Trailing delay before "mark conversation seen" is sent
    #[serde(with = "millis")]
    pub seen_debounce: Duration,

    /// Idle delay after the last keystroke before "typing stop" is emitted
    #[serde(with = "millis")]
    pub typing_idle: Duration,

    /// Health check timeout; exceeding it means offline
    #[serde(with = "millis")]
    pub health_timeout: Duration,

    /// Notifications per page
    pub notification_page_size: u32,

    /// Capacity of the push event fan-out channel
    pub event_buffer: usize,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            seen_debounce: Duration::from_millis(300),
            typing_idle: Duration::from_millis(1000),
            health_timeout: Duration::from_secs(5),
            notification_page_size: DEFAULT_PAGE_SIZE,
            event_buffer: 256,
            user_agent: format!("chyloo-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load a JSON config file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("invalid config file: {}", e)))?;
        config.base_url = normalize_base_url(&config.base_url)?;
        Ok(config)
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(SyncError::Config(format!(
                "Usage: {} <base_url> [--config <file>] [--seen-debounce-ms <ms>] [--typing-idle-ms <ms>] [--health-timeout-ms <ms>] [--page-size <n>]",
                args.first().map(String::as_str).unwrap_or("chyloo")
            )));
        }

        // The file is the base layer; flags apply on top wherever they appear
        let mut config = match args.iter().position(|a| a == "--config") {
            Some(i) => Config::load(Path::new(flag_value(args, i)?))?,
            None => Config::default(),
        };
        let mut base_url: Option<String> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    flag_value(args, i)?;
                    i += 2;
                }
                "--seen-debounce-ms" => {
                    config.seen_debounce = Duration::from_millis(parse_flag(args, i)?);
                    i += 2;
                }
                "--typing-idle-ms" => {
                    config.typing_idle = Duration::from_millis(parse_flag(args, i)?);
                    i += 2;
                }
                "--health-timeout-ms" => {
                    config.health_timeout = Duration::from_millis(parse_flag(args, i)?);
                    i += 2;
                }
                "--page-size" => {
                    config.notification_page_size = parse_flag(args, i)?;
                    i += 2;
                }
                other if base_url.is_none() && !other.starts_with("--") => {
                    base_url = Some(other.to_string());
                    i += 1;
                }
                other => {
                    return Err(SyncError::Config(format!("unexpected argument: {}", other)));
                }
            }
        }

        if let Some(url) = base_url {
            config.base_url = url;
        }

        // Env overrides
        if let Ok(url) = std::env::var("CHYLOO_BASE_URL") {
            config.base_url = url;
        }
        if let Some(n) = std::env::var("CHYLOO_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.notification_page_size = n;
        }

        if config.notification_page_size == 0 {
            return Err(SyncError::Config("page size must be at least 1".to_string()));
        }
        config.base_url = normalize_base_url(&config.base_url)?;
        Ok(config)
    }

    /// Absolute URL for an API path such as `/api/feed`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn normalize_base_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(SyncError::Config(format!(
            "base url must start with http:// or https://, got {:?}",
            url
        )));
    }
    Ok(trimmed.to_string())
}

fn flag_value(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("{} requires an argument", args[i])))
}

fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize) -> Result<T> {
    flag_value(args, i)?
        .parse::<T>()
        .map_err(|_| SyncError::Config(format!("{} must be a valid number", args[i])))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
