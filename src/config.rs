//! Application configuration.
//!
//! corvid does not read configuration files. [`Config`] derives
//! `Deserialize` so any loader can produce one; [`Config::from_env`] layers
//! environment variables over the defaults:
//!
//! | Variable | Field |
//! |---|---|
//! | `GENERAL_LOG_LEVEL` | `general.log_level` |
//! | `SERVER_ADDRESS` / `SERVER_PORT` | `server.address` / `server.port` |
//! | `SERVER_SHUTDOWN_TIMEOUT` | `server.shutdown_timeout` (seconds) |
//! | `SERVER_IP_EXTRACTOR` | `server.ip_extractor` (`direct`, `x-forwarded-for`, `x-real-ip`) |
//! | `CORS_ORIGINS` | `cors.origins` (comma-separated) |
//! | `CORS_CREDENTIALS` | `cors.credentials` (`true`/`1`, `false`/`0`) |
//! | `STATIC_ENABLED` / `_PREFIX` / `_ROOT` / `_INDEX` | `static.*` |
//! | `DATABASE_HOST` / `_PORT` / `_USERNAME` / `_PASSWORD` / `_NAME` | `database.*` |
//! | `APP_*` | `app`, lower-cased with the prefix stripped |

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Error;
use crate::ip::IpExtractor;

const APP_PREFIX: &str = "APP_";
const SENSITIVE: [&str; 5] = ["password", "token", "key", "secret", "auth"];

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub database: DatabaseConfig,
    /// `static` in configuration documents.
    #[serde(rename = "static")]
    pub static_files: StaticConfig,
    pub app: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: "info".to_owned() }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Seconds to wait for in-flight requests after a shutdown signal.
    pub shutdown_timeout: u64,
    pub ip_extractor: IpExtractor,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: 3000,
            shutdown_timeout: 3,
            ip_extractor: IpExtractor::Direct,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        let addr = format!("{}:{}", self.address, self.port);
        addr.parse().map_err(|_| Error::Address(addr))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Policy for the built-in [`Cors`](crate::middleware::Cors) middleware.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any.
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_owned()],
            methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(str::to_owned)
                .to_vec(),
            headers: ["Content-Type", "Authorization", "Accept"]
                .map(str::to_owned)
                .to_vec(),
            credentials: false,
            max_age: 86_400,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5432,
            username: "dbuser".to_owned(),
            password: "dbpass".to_owned(),
            name: "dbname".to_owned(),
        }
    }
}

/// Files under `root` served at `prefix` by the built-in static controller.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StaticConfig {
    pub enabled: bool,
    pub prefix: String,
    pub root: String,
    /// Served for requests naming a directory.
    pub index: String,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: "/public".to_owned(),
            root: "./public".to_owned(),
            index: "index.html".to_owned(),
        }
    }
}

impl Config {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(env::vars())
    }

    /// Defaults overlaid with the given `(key, value)` pairs.
    pub fn from_lookup<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> =
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let mut config = Self::default();
        config.apply(&vars);
        config
    }

    fn apply(&mut self, vars: &HashMap<String, String>) {
        let env = Overrides { vars };

        env.string("GENERAL_LOG_LEVEL", &mut self.general.log_level);

        env.string("SERVER_ADDRESS", &mut self.server.address);
        env.parse("SERVER_PORT", &mut self.server.port);
        env.parse("SERVER_SHUTDOWN_TIMEOUT", &mut self.server.shutdown_timeout);
        env.parse("SERVER_IP_EXTRACTOR", &mut self.server.ip_extractor);

        env.list("CORS_ORIGINS", &mut self.cors.origins);
        env.flag("CORS_CREDENTIALS", &mut self.cors.credentials);

        env.flag("STATIC_ENABLED", &mut self.static_files.enabled);
        env.string("STATIC_PREFIX", &mut self.static_files.prefix);
        env.string("STATIC_ROOT", &mut self.static_files.root);
        env.string("STATIC_INDEX", &mut self.static_files.index);

        env.string("DATABASE_HOST", &mut self.database.host);
        env.parse("DATABASE_PORT", &mut self.database.port);
        env.string("DATABASE_USERNAME", &mut self.database.username);
        env.string("DATABASE_PASSWORD", &mut self.database.password);
        env.string("DATABASE_NAME", &mut self.database.name);

        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(APP_PREFIX) {
                info!(key = %key, value = %mask(key, value), "applying app environment variable");
                self.app.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }

    /// Overlays every field of `other` that differs from its default.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.general != defaults.general {
            self.general = other.general;
        }
        let server = other.server;
        if server.address != defaults.server.address {
            self.server.address = server.address;
        }
        if server.port != defaults.server.port {
            self.server.port = server.port;
        }
        if server.shutdown_timeout != defaults.server.shutdown_timeout {
            self.server.shutdown_timeout = server.shutdown_timeout;
        }
        if server.ip_extractor != defaults.server.ip_extractor {
            self.server.ip_extractor = server.ip_extractor;
        }
        if other.cors != defaults.cors {
            self.cors = other.cors;
        }
        if other.database != defaults.database {
            self.database = other.database;
        }
        if other.static_files != defaults.static_files {
            self.static_files = other.static_files;
        }
        self.app.extend(other.app);
    }
}

struct Overrides<'a> {
    vars: &'a HashMap<String, String>,
}

impl<'a> Overrides<'a> {
    fn string(&self, key: &str, field: &mut String) {
        if let Some(value) = self.get(key) {
            *field = value.to_owned();
        }
    }

    fn parse<T: FromStr>(&self, key: &str, field: &mut T) {
        if let Some(value) = self.get(key) {
            match value.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => warn!(key, value, "ignoring unparseable environment variable"),
            }
        }
    }

    fn flag(&self, key: &str, field: &mut bool) {
        if let Some(value) = self.get(key) {
            match value {
                "true" | "1" => *field = true,
                "false" | "0" => *field = false,
                _ => warn!(key, value, "ignoring unparseable environment variable"),
            }
        }
    }

    fn list(&self, key: &str, field: &mut Vec<String>) {
        if let Some(value) = self.get(key) {
            *field = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        let value = self.vars.get(key)?;
        info!(key, value = %mask(key, value), "applying environment variable");
        Some(value.as_str())
    }
}

fn mask<'v>(key: &str, value: &'v str) -> &'v str {
    let key = key.to_ascii_lowercase();
    if SENSITIVE.iter().any(|word| key.contains(word)) {
        "********"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.socket_addr().unwrap(), "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(config.server.ip_extractor, IpExtractor::Direct);
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup([
            ("SERVER_PORT", "8080"),
            ("SERVER_IP_EXTRACTOR", "x-real-ip"),
            ("DATABASE_PASSWORD", "hunter2"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("APP_FEATURE_FLAG", "on"),
        ]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ip_extractor, IpExtractor::XRealIp);
        assert_eq!(config.database.password, "hunter2");
        assert_eq!(config.cors.origins, ["https://a.example", "https://b.example"]);
        assert_eq!(config.app.get("feature_flag").map(String::as_str), Some("on"));
    }

    #[test]
    fn cors_credentials_and_static_overrides() {
        let config = Config::from_lookup([
            ("CORS_CREDENTIALS", "1"),
            ("STATIC_ENABLED", "true"),
            ("STATIC_PREFIX", "/assets"),
            ("STATIC_ROOT", "/srv/www"),
        ]);
        assert!(config.cors.credentials);
        assert!(config.static_files.enabled);
        assert_eq!(config.static_files.prefix, "/assets");
        assert_eq!(config.static_files.root, "/srv/www");
        assert_eq!(config.static_files.index, "index.html");

        let config = Config::from_lookup([("CORS_CREDENTIALS", "yes")]);
        assert!(!config.cors.credentials);
    }

    #[test]
    fn static_section_deserialises_from_static_key() {
        let config: Config =
            serde_json::from_str(r#"{"static":{"enabled":true,"root":"dist"}}"#).unwrap();
        assert!(config.static_files.enabled);
        assert_eq!(config.static_files.root, "dist");
        assert_eq!(config.static_files.prefix, "/public");
    }

    #[test]
    fn unparseable_numbers_keep_default() {
        let config = Config::from_lookup([("SERVER_PORT", "eighty")]);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn sensitive_values_are_masked() {
        assert_eq!(mask("DATABASE_PASSWORD", "hunter2"), "********");
        assert_eq!(mask("APP_API_KEY", "abc"), "********");
        assert_eq!(mask("SERVER_PORT", "80"), "80");
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let mut base = Config::from_lookup([("SERVER_PORT", "9000")]);
        let mut other = Config::default();
        other.server.address = "0.0.0.0".to_owned();
        other.app.insert("name".to_owned(), "demo".to_owned());
        base.merge(other);

        assert_eq!(base.server.address, "0.0.0.0");
        assert_eq!(base.server.port, 9000);
        assert_eq!(base.app["name"], "demo");
    }

    #[test]
    fn deserialises_partial_documents() {
        let config: Config = serde_json::from_str(
            r#"{"server":{"port":4000,"ip_extractor":"x-forwarded-for"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.server.ip_extractor, IpExtractor::XForwardedFor);
    }
}
