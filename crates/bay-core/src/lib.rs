pub mod config;
pub mod duration;
pub mod validate;

pub use config::ConductorConfig;
pub use duration::parse_duration;
pub use validate::ValidationError;
