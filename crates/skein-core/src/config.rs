use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Listen address used when the configuration does not set one.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:443";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: Option<String>,
    pub tls: Option<TlsConfig>,
    pub acme: Option<AcmeConfig>,
    pub auth: Option<AuthConfig>,
}

/// Static certificate material. Mutually exclusive with [`AcmeConfig`].
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: Option<String>,
    pub key: Option<String>,
}

/// Automatic certificate provisioning. Mutually exclusive with [`TlsConfig`].
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AcmeConfig {
    pub domains: Option<Vec<String>>,
    pub email: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub password: Option<String>,
    pub userpass: Option<BTreeMap<String, String>>,
    pub http: Option<HttpAuthConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HttpAuthConfig {
    pub url: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(listen) = &self.listen {
            if listen.trim().is_empty() {
                return Err("listen must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// The configured listen string, or [`DEFAULT_LISTEN_ADDR`].
    pub fn listen_str(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR)
    }

    /// Resolves the listen string to a UDP endpoint address.
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        resolve_listen_addr(self.listen_str())
    }
}

/// Resolves a host:port string to a single socket address.
pub fn resolve_listen_addr(listen: &str) -> Result<SocketAddr, String> {
    listen
        .to_socket_addrs()
        .map_err(|e| format!("invalid listen address {}: {}", listen, e))?
        .next()
        .ok_or_else(|| format!("listen address {} resolved to no endpoints", listen))
}

pub fn default_config_path() -> PathBuf {
    // Minimal: ~/.config/skein/config.toml
    // (XDG support can be added later)
    if let Some(home) = env::var_os("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("skein")
            .join("config.toml")
    } else {
        PathBuf::from(".config/skein/config.toml")
    }
}

pub fn load_config() -> Result<(Config, PathBuf), ConfigError> {
    let path = env::var("SKEIN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());

    let data = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        source: e,
    })?;
    let cfg: Config = toml::from_str(&data).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        source: e,
    })?;
    Ok((cfg, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_path(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        env::temp_dir().join(format!("skein-{prefix}-{nanos}.toml"))
    }

    fn empty_config() -> Config {
        Config {
            listen: None,
            tls: None,
            acme: None,
            auth: None,
        }
    }

    #[test]
    fn validate_rejects_empty_listen() {
        let cfg = Config {
            listen: Some("   ".to_string()),
            ..empty_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn listen_falls_back_to_default() {
        let cfg = empty_config();
        assert_eq!(cfg.listen_str(), DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn listen_addr_resolves_configured_endpoint() {
        let cfg = Config {
            listen: Some("127.0.0.1:4433".to_string()),
            ..empty_config()
        };
        let addr = cfg.listen_addr().expect("resolve");
        assert_eq!(addr.port(), 4433);
    }

    #[test]
    fn listen_addr_rejects_garbage() {
        let err = resolve_listen_addr("not an address").unwrap_err();
        assert!(err.contains("invalid listen address"));
    }

    #[test]
    fn load_config_reads_toml() {
        let _guard = crate::test_support::ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let path = unique_temp_path("config-load");
        let data = concat!(
            "listen = \"0.0.0.0:4433\"\n\n",
            "[tls]\ncert = \"/etc/skein/cert.pem\"\nkey = \"/etc/skein/key.pem\"\n\n",
            "[auth]\ntype = \"password\"\npassword = \"hunter22hunter22\"\n",
        );
        fs::write(&path, data).expect("write config");

        let prev = env::var("SKEIN_CONFIG").ok();
        env::set_var("SKEIN_CONFIG", &path);

        let (cfg, loaded_path) = load_config().expect("load config");
        assert_eq!(loaded_path, path);
        assert_eq!(cfg.listen.as_deref(), Some("0.0.0.0:4433"));
        assert!(cfg.tls.is_some());
        assert!(cfg.acme.is_none());
        let auth = cfg.auth.expect("auth section");
        assert_eq!(auth.kind.as_deref(), Some("password"));

        if let Some(value) = prev {
            env::set_var("SKEIN_CONFIG", value);
        } else {
            env::remove_var("SKEIN_CONFIG");
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_config_reports_parse_error() {
        let _guard = crate::test_support::ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let path = unique_temp_path("config-bad");
        fs::write(&path, "listen = [not toml").expect("write config");

        let prev = env::var("SKEIN_CONFIG").ok();
        env::set_var("SKEIN_CONFIG", &path);

        let err = load_config().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));

        if let Some(value) = prev {
            env::set_var("SKEIN_CONFIG", value);
        } else {
            env::remove_var("SKEIN_CONFIG");
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn userpass_parses_as_map() {
        let data =
            "[auth]\ntype = \"userpass\"\n\n[auth.userpass]\nalice = \"one\"\nbob = \"two\"\n";
        let cfg: Config = toml::from_str(data).expect("parse");
        let users = cfg.auth.and_then(|a| a.userpass).expect("userpass");
        assert_eq!(users.len(), 2);
        assert_eq!(users.get("alice").map(String::as_str), Some("one"));
    }
}
