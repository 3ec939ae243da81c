use crate::schema::{AcquirerConfig, ChatbridgeConfig, ImageStoreConfig};
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Jsonc,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "jsonc" => Some(Self::Jsonc),
            "json" => Some(Self::Json),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Configuration together with the file it came from, if any.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ChatbridgeConfig,
    pub path: Option<PathBuf>,
    pub format: Option<ConfigFormat>,
}

/// Load, apply environment overrides and validate.
pub fn load_config(config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let mut resolved = resolve_config(config_path)?;
    apply_env_overrides(&mut resolved.config)?;
    resolved.config.validate()?;
    Ok(resolved)
}

/// Find and parse the configuration file. Falls back to defaults when no file
/// exists and none was requested explicitly.
pub fn resolve_config(config_path: Option<&Path>) -> Result<ResolvedConfig> {
    match config_path.map(Path::to_path_buf).or_else(find_config_file) {
        Some(path) => load_config_from_file(&path),
        None => Ok(ResolvedConfig {
            config: ChatbridgeConfig::default(),
            path: None,
            format: None,
        }),
    }
}

pub fn load_config_from_file(path: &Path) -> Result<ResolvedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| anyhow!("Unknown config format for: {}", path.display()))?;

    let config = parse_config_content(&content, format)?;

    Ok(ResolvedConfig {
        config: expand_env_vars(config),
        path: Some(path.to_path_buf()),
        format: Some(format),
    })
}

fn parse_config_content(content: &str, format: ConfigFormat) -> Result<ChatbridgeConfig> {
    match format {
        ConfigFormat::Jsonc => json5::from_str(content).context("Failed to parse JSONC"),
        ConfigFormat::Json => serde_json::from_str(content).context("Failed to parse JSON"),
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).context("Failed to parse YAML"),
    }
}

const CONFIG_CANDIDATES: &[&str] = &[
    "chatbridge.jsonc",
    "chatbridge.json",
    "chatbridge.yml",
    "chatbridge.yaml",
    ".chatbridge.jsonc",
    ".chatbridge.json",
    ".chatbridge.yml",
    ".chatbridge.yaml",
];

fn find_config_file() -> Option<PathBuf> {
    for candidate in CONFIG_CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    let config_dir = dirs::home_dir()?.join(".config").join("chatbridge");
    CONFIG_CANDIDATES
        .iter()
        .map(|candidate| config_dir.join(candidate))
        .find(|path| path.exists())
}

/// Apply `HOST`, `PORT`, `OPENAI_API_KEY`, `UPSTREAM_BASE_URL`,
/// `REQUEST_TIMEOUT_SECS` and `SESSION_COMMAND` from the process environment.
pub fn apply_env_overrides(config: &mut ChatbridgeConfig) -> Result<()> {
    apply_overrides_from(config, |key| env::var(key).ok())
}

fn apply_overrides_from<F>(config: &mut ChatbridgeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = lookup("HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("PORT is not a valid port: {}", port))?;
    }
    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.server.api_key = Some(key);
    }
    if let Some(base_url) = lookup("UPSTREAM_BASE_URL") {
        config.upstream.base_url = base_url;
    }
    if let Some(timeout) = lookup("REQUEST_TIMEOUT_SECS") {
        config.upstream.request_timeout_secs = timeout
            .trim()
            .parse()
            .with_context(|| format!("REQUEST_TIMEOUT_SECS is not a number: {}", timeout))?;
    }
    if let Some(command) = lookup("SESSION_COMMAND") {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("SESSION_COMMAND is empty"))?;
        let timeout_secs = match &config.credential.acquirer {
            AcquirerConfig::Command { timeout_secs, .. } => *timeout_secs,
            AcquirerConfig::Http => 120,
        };
        config.credential.acquirer = AcquirerConfig::Command {
            program,
            args: parts.collect(),
            timeout_secs,
        };
    }
    Ok(())
}

fn expand_env_vars(mut config: ChatbridgeConfig) -> ChatbridgeConfig {
    config.server.host = expand_env_string(&config.server.host);
    config.server.api_key = config.server.api_key.as_deref().map(expand_env_string);
    config.upstream.base_url = expand_env_string(&config.upstream.base_url);
    config.upstream.default_model = expand_env_string(&config.upstream.default_model);
    config.credential.auth_cookie = expand_env_string(&config.credential.auth_cookie);

    if let AcquirerConfig::Command { program, args, .. } = &mut config.credential.acquirer {
        *program = expand_env_string(program);
        for arg in args.iter_mut() {
            *arg = expand_env_string(arg);
        }
    }

    config.image.store = match config.image.store {
        ImageStoreConfig::Hosted { upload_url } => ImageStoreConfig::Hosted {
            upload_url: expand_env_string(&upload_url),
        },
        ImageStoreConfig::Fs {
            dir,
            public_base_url,
        } => ImageStoreConfig::Fs {
            dir: PathBuf::from(expand_env_string(&dir.to_string_lossy())),
            public_base_url: expand_env_string(&public_base_url),
        },
        ImageStoreConfig::None => ImageStoreConfig::None,
    };

    config
}

fn expand_env_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            // ${VAR}
            chars.next();
            let var_name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            match env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                    result.push('}');
                }
            }
            continue;
        }

        // $VAR, stopping at the first character that cannot be part of a name
        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                var_name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if var_name.is_empty() {
            result.push('$');
        } else if let Ok(value) = env::var(&var_name) {
            result.push_str(&value);
        } else {
            result.push('$');
            result.push_str(&var_name);
        }
    }

    result
}
