pub mod config;
pub mod credentials;
pub mod error;

pub use config::DataGateConfig;
pub use credentials::Credentials;
pub use error::{ConfigError, ConfigResult};
