//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets never live in the TOML: each one comes from its env var or from
//! a `*_file` path, resolved after parsing.

use common::Secret;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum signing secret length for HS256.
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

pub const SIGNING_SECRET_ENV: &str = "AUTH_SIGNING_SECRET";
pub const STATIC_FACTOR_ENV: &str = "DEVICE_STATIC_FACTOR";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Listener and request handling
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Externally reachable base URL, used to build provider redirect URIs
    pub public_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Session token signing and lifetimes
#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(skip)]
    pub signing_secret: Option<Secret<String>>,
    /// Alternative to the AUTH_SIGNING_SECRET env var
    #[serde(default)]
    pub signing_secret_file: Option<PathBuf>,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
}

/// Which second factor authorizes a device code redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecondFactorKind {
    RefreshToken,
    /// Fixed sentinel, development only
    Static,
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
    #[serde(default = "default_exchange_ttl")]
    pub exchange_ttl_secs: u64,
    #[serde(default = "default_second_factor")]
    pub second_factor: SecondFactorKind,
    #[serde(skip)]
    pub static_factor: Option<Secret<String>>,
    /// Alternative to the DEVICE_STATIC_FACTOR env var
    #[serde(default)]
    pub static_factor_file: Option<PathBuf>,
    /// Identity credentials are minted for under the static factor
    #[serde(default = "default_static_email")]
    pub static_email: String,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// JSON file for user records; in-memory only when unset
    #[serde(default)]
    pub users_path: Option<PathBuf>,
    #[serde(default = "default_max_refresh_tokens")]
    pub max_refresh_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Yandex,
}

/// One external identity provider
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    /// URL slug: /auth/{id}/login
    pub id: String,
    pub kind: ProviderKind,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Alternative to the <ID>_CLIENT_SECRET env var
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    /// GitHub API base or Yandex info endpoint
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub pkce: bool,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_access_ttl() -> u64 {
    60
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_state_ttl() -> u64 {
    300
}

fn default_code_ttl() -> u64 {
    60
}

fn default_exchange_ttl() -> u64 {
    300
}

fn default_second_factor() -> SecondFactorKind {
    SecondFactorKind::RefreshToken
}

fn default_static_email() -> String {
    "device@localhost".into()
}

fn default_max_refresh_tokens() -> usize {
    10
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            signing_secret_file: None,
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_code_ttl(),
            exchange_ttl_secs: default_exchange_ttl(),
            second_factor: default_second_factor(),
            static_factor: None,
            static_factor_file: None,
            static_email: default_static_email(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            users_path: None,
            max_refresh_tokens: default_max_refresh_tokens(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Redirect URI registered with a provider.
    pub fn callback_url(&self, provider_id: &str) -> String {
        format!(
            "{}/auth/{provider_id}/callback",
            self.public_url.trim_end_matches('/')
        )
    }
}

impl ProviderConfig {
    /// Env var holding this provider's client secret, e.g. `GITHUB_CLIENT_SECRET`.
    pub fn secret_env_var(&self) -> String {
        format!("{}_CLIENT_SECRET", self.id.to_ascii_uppercase().replace('-', "_"))
    }
}

impl Config {
    /// Load configuration from a TOML file, validate it, then resolve secrets.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;
        config.resolve_secrets()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let server = &self.server;
        if !server.public_url.starts_with("http://") && !server.public_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "public_url must start with http:// or https://, got: {}",
                server.public_url
            )));
        }

        let non_zero = [
            ("request_timeout_secs", server.request_timeout_secs),
            ("max_connections", server.max_connections as u64),
            ("sweep_interval_secs", server.sweep_interval_secs),
            ("access_ttl_secs", self.tokens.access_ttl_secs),
            ("refresh_ttl_secs", self.tokens.refresh_ttl_secs),
            ("state_ttl_secs", self.login.state_ttl_secs),
            ("code_ttl_secs", self.device.code_ttl_secs),
            ("exchange_ttl_secs", self.device.exchange_ttl_secs),
            ("max_refresh_tokens", self.storage.max_refresh_tokens as u64),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(common::Error::Config(format!(
                "{name} must be greater than 0"
            )));
        }

        if self.device.static_email.trim().is_empty() {
            return Err(common::Error::Config("static_email must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !is_slug(&provider.id) {
                return Err(common::Error::Config(format!(
                    "provider id must be lowercase letters, digits or '-', got: {:?}",
                    provider.id
                )));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate provider id: {}",
                    provider.id
                )));
            }
            if provider.client_id.is_empty() {
                return Err(common::Error::Config(format!(
                    "provider {} has an empty client_id",
                    provider.id
                )));
            }
        }
        Ok(())
    }

    fn resolve_secrets(&mut self) -> common::Result<()> {
        let signing = Secret::resolve(SIGNING_SECRET_ENV, self.tokens.signing_secret_file.as_deref())?
            .ok_or_else(|| {
                common::Error::Config(format!(
                    "signing secret missing: set {SIGNING_SECRET_ENV} or tokens.signing_secret_file"
                ))
            })?;
        if signing.expose().len() < MIN_SIGNING_SECRET_BYTES {
            return Err(common::Error::Config(format!(
                "signing secret must be at least {MIN_SIGNING_SECRET_BYTES} bytes"
            )));
        }
        self.tokens.signing_secret = Some(signing);

        for provider in &mut self.providers {
            let env_var = provider.secret_env_var();
            let secret = Secret::resolve(&env_var, provider.client_secret_file.as_deref())?
                .ok_or_else(|| {
                    common::Error::Config(format!(
                        "client secret for provider {} missing: set {env_var} or client_secret_file",
                        provider.id
                    ))
                })?;
            provider.client_secret = Some(secret);
        }

        self.device.static_factor =
            Secret::resolve(STATIC_FACTOR_ENV, self.device.static_factor_file.as_deref())?;
        if self.device.second_factor == SecondFactorKind::Static
            && self.device.static_factor.is_none()
        {
            return Err(common::Error::Config(format!(
                "second_factor = \"static\" requires {STATIC_FACTOR_ENV} or device.static_factor_file"
            )));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-gateway.toml")
    }
}

fn is_slug(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn clear_env() {
        unsafe {
            remove_env(SIGNING_SECRET_ENV);
            remove_env(STATIC_FACTOR_ENV);
            remove_env("GITHUB_CLIENT_SECRET");
            remove_env("YA_ID_CLIENT_SECRET");
            remove_env("CONFIG_PATH");
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "https://auth.example.com/"

[[providers]]
id = "github"
kind = "github"
client_id = "gh-client"

[[providers]]
id = "ya-id"
kind = "yandex"
client_id = "ya-client"
pkce = true
scopes = ["login:email"]
"#
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("auth-gateway.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn with_all_secrets() {
        unsafe {
            set_env(SIGNING_SECRET_ENV, SECRET);
            set_env("GITHUB_CLIENT_SECRET", "gh-secret");
            set_env("YA_ID_CLIENT_SECRET", "ya-secret");
        }
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        with_all_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.request_timeout_secs, 10);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.sweep_interval_secs, 30);
        assert_eq!(config.tokens.access_ttl_secs, 60);
        assert_eq!(config.tokens.refresh_ttl_secs, 604_800);
        assert_eq!(config.login.state_ttl_secs, 300);
        assert_eq!(config.device.code_ttl_secs, 60);
        assert_eq!(config.device.exchange_ttl_secs, 300);
        assert_eq!(config.device.second_factor, SecondFactorKind::RefreshToken);
        assert_eq!(config.storage.max_refresh_tokens, 10);
        assert!(config.storage.users_path.is_none());

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].kind, ProviderKind::Yandex);
        assert!(config.providers[1].pkce);
        assert_eq!(
            config.providers[0].client_secret.as_ref().unwrap().expose(),
            "gh-secret"
        );
        assert_eq!(
            config.server.callback_url("github"),
            "https://auth.example.com/auth/github/callback"
        );
        clear_env();
    }

    #[test]
    fn test_secrets_from_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let signing = dir.path().join("signing");
        let client = dir.path().join("client");
        std::fs::write(&signing, format!("{SECRET}\n")).unwrap();
        std::fs::write(&client, "gh-file-secret\n").unwrap();

        let toml = format!(
            r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost:8080"

[tokens]
signing_secret_file = "{}"

[[providers]]
id = "github"
kind = "github"
client_id = "gh-client"
client_secret_file = "{}"
"#,
            signing.display(),
            client.display()
        );
        let path = write_config(dir.path(), &toml);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.tokens.signing_secret.as_ref().unwrap().expose(), SECRET);
        assert_eq!(
            config.providers[0].client_secret.as_ref().unwrap().expose(),
            "gh-file-secret"
        );
    }

    #[test]
    fn test_env_secret_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let signing = dir.path().join("signing");
        std::fs::write(&signing, "file-secret-file-secret-file-secret").unwrap();
        let env_secret = "env-secret-env-secret-env-secret-env";
        unsafe { set_env(SIGNING_SECRET_ENV, env_secret) };

        let toml = format!(
            r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost:8080"

[tokens]
signing_secret_file = "{}"
"#,
            signing.display()
        );
        let path = write_config(dir.path(), &toml);
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.tokens.signing_secret.as_ref().unwrap().expose(),
            env_secret
        );
        clear_env();
    }

    #[test]
    fn test_missing_or_short_signing_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost:8080"
"#;
        let path = write_config(dir.path(), toml);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("signing secret missing"), "{err}");

        unsafe { set_env(SIGNING_SECRET_ENV, "too-short") };
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"), "{err}");
        clear_env();
    }

    #[test]
    fn test_missing_client_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { set_env(SIGNING_SECRET_ENV, SECRET) };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), valid_toml());

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("GITHUB_CLIENT_SECRET"), "{err}");
        clear_env();
    }

    #[test]
    fn test_static_factor_requires_sentinel() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { set_env(SIGNING_SECRET_ENV, SECRET) };
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost:8080"

[device]
second_factor = "static"
static_email = "kiosk@example.com"
"#;
        let path = write_config(dir.path(), toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains(STATIC_FACTOR_ENV), "{err}");

        unsafe { set_env(STATIC_FACTOR_ENV, "valid-refresh-token") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.device.second_factor, SecondFactorKind::Static);
        assert_eq!(config.device.static_email, "kiosk@example.com");
        assert_eq!(
            config.device.static_factor.as_ref().unwrap().expose(),
            "valid-refresh-token"
        );
        clear_env();
    }

    #[test]
    fn test_invalid_public_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        with_all_secrets();
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "ftp://auth.example.com"
"#;
        let path = write_config(dir.path(), toml);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("public_url"), "{err}");
        clear_env();
    }

    #[test]
    fn test_zero_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        with_all_secrets();
        let dir = tempfile::tempdir().unwrap();
        for (section, key) in [
            ("server", "request_timeout_secs"),
            ("server", "max_connections"),
            ("tokens", "access_ttl_secs"),
            ("login", "state_ttl_secs"),
            ("device", "code_ttl_secs"),
            ("storage", "max_refresh_tokens"),
        ] {
            let toml = if section == "server" {
                format!(
                    "[server]\nlisten_addr = \"127.0.0.1:8080\"\npublic_url = \"http://localhost\"\n{key} = 0\n"
                )
            } else {
                format!(
                    "[server]\nlisten_addr = \"127.0.0.1:8080\"\npublic_url = \"http://localhost\"\n[{section}]\n{key} = 0\n"
                )
            };
            let path = write_config(dir.path(), &toml);
            let err = Config::load(&path).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
        clear_env();
    }

    #[test]
    fn test_provider_ids_must_be_unique_slugs() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        with_all_secrets();
        let dir = tempfile::tempdir().unwrap();

        let duplicate = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost"

[[providers]]
id = "github"
kind = "github"
client_id = "a"

[[providers]]
id = "github"
kind = "yandex"
client_id = "b"
"#;
        let path = write_config(dir.path(), duplicate);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate provider id"), "{err}");

        let bad_slug = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost"

[[providers]]
id = "Git Hub"
kind = "github"
client_id = "a"
"#;
        let path = write_config(dir.path(), bad_slug);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("provider id"), "{err}");
        clear_env();
    }

    #[test]
    fn test_unknown_provider_kind_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[server]
listen_addr = "127.0.0.1:8080"
public_url = "http://localhost"

[[providers]]
id = "gitlab"
kind = "gitlab"
client_id = "a"
"#;
        let path = write_config(dir.path(), toml);
        assert!(matches!(
            Config::load(&path),
            Err(common::Error::Toml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/auth-gateway.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("auth-gateway.toml")
        );

        unsafe { set_env("CONFIG_PATH", "/etc/auth/gateway.toml") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/etc/auth/gateway.toml")
        );
        assert_eq!(
            Config::resolve_path(Some("/tmp/cli.toml")),
            PathBuf::from("/tmp/cli.toml")
        );
        clear_env();
    }

    #[test]
    fn test_secret_env_var_name() {
        let provider: ProviderConfig = toml::from_str(
            r#"
id = "ya-id"
kind = "yandex"
client_id = "x"
"#,
        )
        .unwrap();
        assert_eq!(provider.secret_env_var(), "YA_ID_CLIENT_SECRET");
    }
}
