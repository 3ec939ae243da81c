pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_file, resolve_config, ConfigFormat,
    ResolvedConfig,
};
pub use schema::{
    AcquirerConfig, ChatbridgeConfig, CredentialSettings, ImageSettings, ImageStoreConfig,
    LoggingSettings, ReconcileSettings, ServerSettings, UpstreamSettings,
};
