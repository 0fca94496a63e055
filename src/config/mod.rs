mod app_config;

pub use app_config::{
    AppConfig, DatabaseConfig, FederationConfig, FfmpegConfig, OutboxConfig, StorageConfig,
    TransactionConfig,
};
