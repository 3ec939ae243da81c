use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main chatbridge configuration
///
/// Configuration is loaded from (in priority order):
/// 1. `chatbridge.jsonc` - JSON with comments
/// 2. `chatbridge.json` - Standard JSON
/// 3. `chatbridge.yml` / `chatbridge.yaml` - YAML format
///
/// Also checks hidden variants (`.chatbridge.*`) and `~/.config/chatbridge/`.
/// Every section is optional; environment variables override file values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatbridgeConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub credential: CredentialSettings,

    #[serde(default)]
    pub image: ImageSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ChatbridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        url::Url::parse(&self.upstream.base_url)
            .with_context(|| format!("upstream.base_url is not a URL: {}", self.upstream.base_url))?;
        if self.credential.auth_cookie.trim().is_empty() {
            bail!("credential.auth_cookie must not be empty");
        }
        if self.credential.default_ttl_secs > self.credential.max_ttl_secs {
            bail!("credential.default_ttl_secs exceeds credential.max_ttl_secs");
        }
        if self.image.max_attempts == 0 {
            bail!("image.max_attempts must be at least 1");
        }
        if let AcquirerConfig::Command { program, .. } = &self.credential.acquirer {
            if program.trim().is_empty() {
                bail!("credential.acquirer.program must not be empty");
            }
        }
        match &self.image.store {
            ImageStoreConfig::Hosted { upload_url } => {
                url::Url::parse(upload_url).with_context(|| {
                    format!("image.store.upload_url is not a URL: {}", upload_url)
                })?;
            }
            ImageStoreConfig::Fs {
                public_base_url, ..
            } => {
                url::Url::parse(public_base_url).with_context(|| {
                    format!("image.store.public_base_url is not a URL: {}", public_base_url)
                })?;
            }
            ImageStoreConfig::None => {}
        }
        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

/// HTTP listener settings
///
/// # Example
///
/// ```yaml
/// server:
///   host: 0.0.0.0
///   port: 9000
///   api_key: sk-local-123
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token callers must present. `None` accepts any bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

// ============================================================================
// Upstream
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Origin of the upstream chat service (default: https://chat.akash.network)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_top_p")]
    pub default_top_p: f32,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            default_model: default_model(),
            default_system_prompt: default_system_prompt(),
            default_temperature: default_temperature(),
            default_top_p: default_top_p(),
        }
    }
}

impl UpstreamSettings {
    pub fn base_url_trimmed(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

fn default_base_url() -> String {
    "https://chat.akash.network".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_model() -> String {
    "DeepSeek-R1".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_p() -> f32 {
    0.95
}

// ============================================================================
// Credential
// ============================================================================

/// Session credential lifecycle settings
///
/// # Example
///
/// ```yaml
/// credential:
///   auth_cookie: session_token
///   refresh_wait_secs: 30
///   acquirer:
///     kind: command
///     program: node
///     args: ["scripts/solve-challenge.js"]
///     timeout_secs: 90
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Cookie whose presence marks an authenticated session
    #[serde(default = "default_auth_cookie")]
    pub auth_cookie: String,

    /// Lifetime assumed when no cookie declares an expiry
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// Upper bound on any derived lifetime
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,

    /// How long a request waits for a refresh before failing
    #[serde(default = "default_refresh_wait")]
    pub refresh_wait_secs: u64,

    /// Background re-validation period
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Refresh ahead of expiry by this much
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    #[serde(default)]
    pub acquirer: AcquirerConfig,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            auth_cookie: default_auth_cookie(),
            default_ttl_secs: default_ttl(),
            max_ttl_secs: default_max_ttl(),
            refresh_wait_secs: default_refresh_wait(),
            check_interval_secs: default_check_interval(),
            refresh_margin_secs: default_refresh_margin(),
            acquirer: AcquirerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquirerConfig {
    /// Load the upstream origin and keep the cookies it sets
    #[default]
    Http,
    /// Run an external browser automation command that prints cookies as JSON
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
}

fn default_auth_cookie() -> String {
    "session_token".to_string()
}

fn default_ttl() -> u64 {
    30 * 60
}

fn default_max_ttl() -> u64 {
    12 * 60 * 60
}

fn default_refresh_wait() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    30
}

fn default_refresh_margin() -> u64 {
    5 * 60
}

fn default_command_timeout() -> u64 {
    120
}

// ============================================================================
// Image generation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Consecutive not-found responses tolerated before giving up
    #[serde(default = "default_not_found_tolerance")]
    pub not_found_tolerance: u32,

    /// Shortest bare base64 payload taken for an inline image
    #[serde(default = "default_min_inline_len")]
    pub min_inline_len: usize,

    /// Address used when a completed job carries no usable result.
    /// `{origin}` and `{short_id}` are substituted.
    #[serde(default = "default_fallback_url_template")]
    pub fallback_url_template: String,

    #[serde(default)]
    pub store: ImageStoreConfig,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            not_found_tolerance: default_not_found_tolerance(),
            min_inline_len: default_min_inline_len(),
            fallback_url_template: default_fallback_url_template(),
            store: ImageStoreConfig::default(),
        }
    }
}

/// Where generated images are re-hosted
///
/// # Example
///
/// ```yaml
/// image:
///   store:
///     kind: fs
///     dir: /var/lib/chatbridge/images
///     public_base_url: https://img.example.com
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageStoreConfig {
    /// Keep upstream references as they are
    #[default]
    None,
    /// Multipart upload to an image host
    Hosted { upload_url: String },
    /// Write files to a directory served elsewhere
    Fs {
        dir: PathBuf,
        public_base_url: String,
    },
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    30
}

fn default_not_found_tolerance() -> u32 {
    5
}

fn default_min_inline_len() -> usize {
    100
}

fn default_fallback_url_template() -> String {
    "{origin}/_next/image?url=/images/{short_id}.webp&w=1024&q=75".to_string()
}

// ============================================================================
// Reconciliation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Shortest suffix of already-sent text trusted as an anchor (chars)
    #[serde(default = "default_min_suffix_match")]
    pub min_suffix_match: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            min_suffix_match: default_min_suffix_match(),
        }
    }
}

fn default_min_suffix_match() -> usize {
    8
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json_output: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_output: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChatbridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.default_model, "DeepSeek-R1");
        assert_eq!(config.credential.auth_cookie, "session_token");
        assert_eq!(config.credential.acquirer, AcquirerConfig::Http);
        assert_eq!(config.image.max_attempts, 30);
        assert_eq!(config.image.store, ImageStoreConfig::None);
        assert_eq!(config.reconcile.min_suffix_match, 8);
    }

    #[test]
    fn test_tagged_sections() {
        let yaml = r#"
credential:
  acquirer:
    kind: command
    program: node
    args: ["solve.js", "--headless"]
image:
  store:
    kind: fs
    dir: /tmp/images
    public_base_url: https://img.example.com
"#;
        let config: ChatbridgeConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(
            config.credential.acquirer,
            AcquirerConfig::Command {
                program: "node".to_string(),
                args: vec!["solve.js".to_string(), "--headless".to_string()],
                timeout_secs: 120,
            }
        );
        assert_eq!(
            config.image.store,
            ImageStoreConfig::Fs {
                dir: PathBuf::from("/tmp/images"),
                public_base_url: "https://img.example.com".to_string(),
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ChatbridgeConfig::default();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = ChatbridgeConfig::default();
        config.image.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ChatbridgeConfig::default();
        config.credential.auth_cookie = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = ChatbridgeConfig::default();
        config.image.store = ImageStoreConfig::Hosted {
            upload_url: "nope".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
