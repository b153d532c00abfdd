mod settings;

pub use settings::{
    CallbackSettings, ConfigError, CrawlerSettings, DatabaseBackendSetting, DatabaseSettings,
    EngineSettings, Environment, PoolSettings, ProcessorSettings, ServerSettings, Settings,
    StagingSettings,
};
