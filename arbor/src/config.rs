//! Server configuration, environment overrides and the listener-address
//! grammar.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use log::LevelFilter;
use rand::distributions::Alphanumeric;
use rand::Rng;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;
const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// The run mode, driven by the `MODE` environment variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The default.
    Development,
    /// Set via `MODE=production`.
    Production,
}

/// Certificate material for TLS serving. With `ca_cert_file` set, client
/// certificates are required and verified against it.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// PEM server certificate chain.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
    /// Optional PEM CA bundle for client-certificate verification.
    pub ca_cert_file: Option<PathBuf>,
}

/// Application configuration. [`ServerConfig::from_env`] applies the
/// recognized environment overrides on top of the defaults.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Interface bound when the listen address does not name one.
    pub host: String,
    /// Port bound by default (`PORT`).
    pub port: u16,
    /// TLS port, when TLS serving is enabled (`HTTPS_PORT`).
    pub https_port: Option<u16>,
    /// Run mode (`MODE`).
    pub mode: Mode,
    /// Log level (`LOG_LEVEL`).
    pub log_level: LevelFilter,
    /// Signing secret (`SECRET_KEY`); generated when absent.
    pub secret_key: String,
    /// Session lifetime (`SESSION_MAX_AGE`, humantime or seconds).
    pub session_max_age: Duration,
    /// Upper bound for buffered request bodies.
    pub body_limit: usize,
    /// TLS material, when serving HTTPS.
    pub tls: Option<TlsOptions>,
    /// Recorded for external collaborators (`REDIS_URL`).
    pub redis_url: Option<String>,
    /// Recorded for external collaborators (`SENTRY_DSN`).
    pub sentry_dsn: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            https_port: None,
            mode: Mode::Development,
            log_level: LevelFilter::Info,
            secret_key: generated_secret_key(),
            session_max_age: DEFAULT_SESSION_MAX_AGE,
            body_limit: DEFAULT_BODY_LIMIT,
            tls: None,
            redis_url: None,
            sentry_dsn: None,
        }
    }
}

impl ServerConfig {
    /// Defaults with the recognized environment overrides applied.
    pub fn from_env() -> ServerConfig {
        let mut config = ServerConfig::default();

        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(port) = env::var("HTTPS_PORT").ok().and_then(|v| v.parse().ok()) {
            config.https_port = Some(port);
        }
        if let Ok(mode) = env::var("MODE") {
            if mode.eq_ignore_ascii_case("production") {
                config.mode = Mode::Production;
            }
        }
        if let Some(level) = env::var("LOG_LEVEL").ok().and_then(|v| parse_log_level(&v)) {
            config.log_level = level;
        }
        if let Ok(secret) = env::var("SECRET_KEY") {
            if !secret.is_empty() {
                config.secret_key = secret;
            }
        }
        if let Some(age) = env::var("SESSION_MAX_AGE")
            .ok()
            .and_then(|v| parse_duration_value(&v))
        {
            config.session_max_age = age;
        }
        config.redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());
        config.sentry_dsn = env::var("SENTRY_DSN").ok().filter(|v| !v.is_empty());

        config
    }

    /// True in production mode.
    pub fn is_prod(&self) -> bool {
        self.mode == Mode::Production
    }

    /// The default `host:port` listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn generated_secret_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("arbor_{}", suffix)
}

pub(crate) fn parse_log_level(value: &str) -> Option<LevelFilter> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

// `SESSION_MAX_AGE` accepts plain seconds or a humantime value ("24h").
pub(crate) fn parse_duration_value(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).ok()
}

/// A parsed listener address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddr {
    /// A TCP address. `scheme` is parsed for telemetry only.
    Tcp {
        /// The host to bind.
        host: String,
        /// The port to bind.
        port: u16,
        /// `http` or `https`, informational.
        scheme: String,
    },
    /// A Unix domain socket path.
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp { host, port, scheme } => {
                write!(f, "{}://{}:{}", scheme, host, port)
            }
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Parses the single-string listen address accepted by the server entry
/// points:
///
/// - `:<port>`: all interfaces, TCP;
/// - `<host>:<port>`: a specific host, TCP;
/// - `http://<host>:<port>`: as above, scheme recorded for telemetry;
/// - `unix://<path>` or `/<path>`: a Unix domain socket.
pub fn parse_addr(addr: &str) -> anyhow::Result<ListenAddr> {
    if addr.is_empty() {
        return Err(anyhow!("empty listen address"));
    }

    if let Some(path) = addr.strip_prefix("unix://") {
        return Ok(ListenAddr::Unix(PathBuf::from(path)));
    }
    if addr.starts_with('/') {
        return Ok(ListenAddr::Unix(PathBuf::from(addr)));
    }

    let (scheme, rest) = if let Some(rest) = addr.strip_prefix("http://") {
        ("http", rest)
    } else if let Some(rest) = addr.strip_prefix("https://") {
        ("https", rest)
    } else {
        ("http", addr)
    };

    let (host, port) = match rest.rfind(':') {
        Some(i) => {
            let host = &rest[..i];
            let port = rest[i + 1..]
                .parse::<u16>()
                .with_context(|| format!("invalid port in listen address `{}`", addr))?;
            (if host.is_empty() { DEFAULT_HOST } else { host }, port)
        }
        None => {
            if rest.is_empty() {
                return Err(anyhow!("invalid listen address `{}`", addr));
            }
            (rest, DEFAULT_PORT)
        }
    };

    Ok(ListenAddr::Tcp {
        host: host.to_string(),
        port,
        scheme: scheme.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_only_addresses() {
        assert_eq!(
            parse_addr(":9000").unwrap(),
            ListenAddr::Tcp {
                host: "0.0.0.0".to_string(),
                port: 9000,
                scheme: "http".to_string(),
            }
        );
    }

    #[test]
    fn parses_host_port_and_scheme() {
        assert_eq!(
            parse_addr("127.0.0.1:8081").unwrap(),
            ListenAddr::Tcp {
                host: "127.0.0.1".to_string(),
                port: 8081,
                scheme: "http".to_string(),
            }
        );
        assert_eq!(
            parse_addr("http://0.0.0.0:8080").unwrap(),
            ListenAddr::Tcp {
                host: "0.0.0.0".to_string(),
                port: 8080,
                scheme: "http".to_string(),
            }
        );
    }

    #[test]
    fn parses_unix_addresses() {
        assert_eq!(
            parse_addr("unix:///tmp/arbor.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("/tmp/arbor.sock"))
        );
        assert_eq!(
            parse_addr("/tmp/arbor.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("/tmp/arbor.sock"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_addr("").is_err());
        assert!(parse_addr("host:notaport").is_err());
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        assert_eq!(parse_duration_value("90"), Some(Duration::from_secs(90)));
        assert_eq!(
            parse_duration_value("24h"),
            Some(Duration::from_secs(24 * 60 * 60))
        );
        assert_eq!(parse_duration_value("nonsense"), None);
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("DEBUG"), Some(LevelFilter::Debug));
        assert_eq!(parse_log_level("warning"), Some(LevelFilter::Warn));
        assert_eq!(parse_log_level("loud"), None);
    }

    #[test]
    fn secret_keys_carry_the_crate_prefix() {
        let config = ServerConfig::default();
        assert!(config.secret_key.starts_with("arbor_"));
        assert_eq!(config.secret_key.len(), "arbor_".len() + 24);
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert!(!config.is_prod());
        assert_eq!(config.session_max_age, Duration::from_secs(86_400));
    }
}
