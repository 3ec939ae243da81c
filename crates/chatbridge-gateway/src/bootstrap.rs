//! Wires a loaded [`ChatbridgeConfig`] into a ready [`ChatRelay`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chatbridge_auth::{
    CommandSessionAcquirer, CredentialManager, CredentialSettings, ExpiryPolicy,
    HttpSessionAcquirer, SessionAcquirer,
};
use chatbridge_config::{AcquirerConfig, ChatbridgeConfig, ImageStoreConfig};
use chatbridge_upstream::{
    ChatDefaults, ChatRelay, FsImageStore, HostedImageStore, ImagePoller, ImageStore,
    PollSettings, UpstreamClient,
};

pub fn build_relay(config: &ChatbridgeConfig) -> Result<ChatRelay> {
    let origin = config.upstream.base_url_trimmed();
    let timeout = Duration::from_secs(config.upstream.request_timeout_secs);

    let client = UpstreamClient::new(origin.as_str(), timeout)
        .context("failed to build upstream client")?;
    let credentials = CredentialManager::new(build_acquirer(config)?, credential_settings(config));
    let poller = ImagePoller::new(client.clone(), build_image_store(config)?, poll_settings(config))
        .with_credentials(credentials.clone());

    Ok(ChatRelay::new(client, credentials, chat_defaults(config))
        .with_image_poller(Arc::new(poller))
        .with_min_suffix_match(config.reconcile.min_suffix_match))
}

fn build_acquirer(config: &ChatbridgeConfig) -> Result<Arc<dyn SessionAcquirer>> {
    let acquirer: Arc<dyn SessionAcquirer> = match &config.credential.acquirer {
        AcquirerConfig::Http => {
            let timeout = Duration::from_secs(config.upstream.request_timeout_secs);
            Arc::new(
                HttpSessionAcquirer::new(config.upstream.base_url_trimmed(), timeout)
                    .context("failed to build session acquirer")?,
            )
        }
        AcquirerConfig::Command {
            program,
            args,
            timeout_secs,
        } => Arc::new(CommandSessionAcquirer::new(
            program.as_str(),
            args.clone(),
            Duration::from_secs(*timeout_secs),
        )),
    };
    tracing::debug!(acquirer = acquirer.name(), "session acquirer configured");
    Ok(acquirer)
}

fn build_image_store(config: &ChatbridgeConfig) -> Result<Option<Arc<dyn ImageStore>>> {
    let store: Option<Arc<dyn ImageStore>> = match &config.image.store {
        ImageStoreConfig::None => None,
        ImageStoreConfig::Hosted { upload_url } => Some(Arc::new(
            HostedImageStore::new(
                upload_url.as_str(),
                Duration::from_secs(config.upstream.request_timeout_secs),
            )
            .context("failed to build image upload client")?,
        )),
        ImageStoreConfig::Fs {
            dir,
            public_base_url,
        } => Some(Arc::new(FsImageStore::new(
            dir.clone(),
            public_base_url.as_str(),
        ))),
    };
    Ok(store)
}

fn credential_settings(config: &ChatbridgeConfig) -> CredentialSettings {
    let c = &config.credential;
    CredentialSettings {
        auth_cookie: c.auth_cookie.clone(),
        expiry: ExpiryPolicy {
            default_ttl: chrono::Duration::seconds(seconds(c.default_ttl_secs)),
            max_ttl: chrono::Duration::seconds(seconds(c.max_ttl_secs)),
        },
        refresh_wait: Duration::from_secs(c.refresh_wait_secs),
        check_interval: Duration::from_secs(c.check_interval_secs.max(1)),
        refresh_margin: Duration::from_secs(c.refresh_margin_secs),
    }
}

fn poll_settings(config: &ChatbridgeConfig) -> PollSettings {
    let i = &config.image;
    PollSettings {
        poll_interval: Duration::from_millis(i.poll_interval_ms),
        max_attempts: i.max_attempts,
        not_found_tolerance: i.not_found_tolerance,
        min_inline_len: i.min_inline_len,
        fallback_url_template: i.fallback_url_template.clone(),
    }
}

fn chat_defaults(config: &ChatbridgeConfig) -> ChatDefaults {
    let u = &config.upstream;
    ChatDefaults {
        model: u.default_model.clone(),
        system_prompt: u.default_system_prompt.clone(),
        temperature: u.default_temperature,
        top_p: u.default_top_p,
    }
}

/// Clamped to what `chrono::Duration::seconds` accepts.
fn seconds(secs: u64) -> i64 {
    secs.min(i64::MAX as u64 / 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_settings_follow_config() {
        let mut config = ChatbridgeConfig::default();
        config.credential.default_ttl_secs = 600;
        config.credential.check_interval_secs = 0;

        let settings = credential_settings(&config);
        assert_eq!(settings.auth_cookie, "session_token");
        assert_eq!(settings.expiry.default_ttl, chrono::Duration::minutes(10));
        assert_eq!(settings.expiry.max_ttl, chrono::Duration::hours(12));
        assert_eq!(settings.check_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_poll_settings_follow_config() {
        let mut config = ChatbridgeConfig::default();
        config.image.poll_interval_ms = 250;
        config.image.not_found_tolerance = 2;

        let settings = poll_settings(&config);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.max_attempts, 30);
        assert_eq!(settings.not_found_tolerance, 2);
    }

    #[test]
    fn test_image_store_selection() {
        let mut config = ChatbridgeConfig::default();
        assert!(build_image_store(&config).unwrap().is_none());

        config.image.store = ImageStoreConfig::Fs {
            dir: std::env::temp_dir(),
            public_base_url: "https://img.example.com".into(),
        };
        let store = build_image_store(&config).unwrap().unwrap();
        assert_eq!(store.name(), "fs");
    }

    #[test]
    fn test_command_acquirer_selected() {
        let mut config = ChatbridgeConfig::default();
        config.credential.acquirer = AcquirerConfig::Command {
            program: "node".into(),
            args: vec!["solve.js".into()],
            timeout_secs: 90,
        };
        assert_eq!(build_acquirer(&config).unwrap().name(), "command");
    }

    #[test]
    fn test_build_relay_from_defaults() {
        let relay = build_relay(&ChatbridgeConfig::default()).unwrap();
        assert_eq!(relay.defaults().model, "DeepSeek-R1");
        assert_eq!(relay.credentials().settings().auth_cookie, "session_token");
    }
}
