//! Configuration parsing.

use std::collections::HashMap;
use std::default::Default;
use std::fs;
use std::path::Path;

use log::debug;
use regex::Captures;
use regex::Regex;
use serde_derive::Deserialize;

use crate::models::queue;

const INTERPOLATE_RE: &str = r"(?m)\$\{([A-Z][A-Z0-9_]*)(?:=([^}]+))?\}";

/// Main application config, typically read from a `.toml` file.
///
/// Values may reference environment variables as `${VAR}` or `${VAR=default}`;
/// interpolation happens before the TOML is parsed.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Configuration for connecting to Redis.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Optional per-queue settings, written to each queue's meta hash at
    /// deployment time.
    pub queue: Option<HashMap<String, queue::Settings>>,
}

impl Config {
    /// Read configuration from a file into a new Config struct.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => return Err(err.to_string()),
        };

        let conf: Config = match toml::from_str(&Self::interpolate_env(&data)) {
            Ok(conf) => conf,
            Err(err) => return Err(err.to_string()),
        };

        Ok(conf)
    }

    /// Get the Redis URL to use for connecting to a Redis server.
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }

    fn interpolate_env(raw_toml: &str) -> std::borrow::Cow<str> {
        let re = Regex::new(INTERPOLATE_RE).expect("failed to compile interpolation regex");

        re.replace_all(raw_toml, |captures: &Captures| {
            let var_name = captures
                .get(1)
                .expect("capture should have at least 1 group");

            match std::env::var(var_name.as_str()) {
                Ok(env_val) => env_val,
                Err(_) => captures
                    .get(2)
                    .map_or_else(String::new, |v| v.as_str().to_owned()),
            }
        })
    }
}

/// Configuration for connecting to Redis.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL to connect to. Defaults to "redis://127.0.0.1".
    pub url: String,

    /// Prefix added to every queue key. Avoids key collisions when the queue
    /// shares a Redis server with other applications.
    pub key_namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1".to_owned(),
            key_namespace: "".to_owned(),
        }
    }
}
