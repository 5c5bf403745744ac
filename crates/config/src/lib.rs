// Configuration loading

pub mod settings;

pub use settings::{write_default, ConfigError, Settings};
