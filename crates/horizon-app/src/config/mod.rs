//! Configuration file parsing for Horizon
//!
//! Supports:
//! - `<config_dir>/constella-horizon/config.toml` - Global settings
//! - `$HORIZON_CONFIG_DIR` - Directory override

pub mod settings;
pub mod types;

pub use settings::{
    config_dir, init_config_dir, load_default_settings, load_settings, save_settings,
    CONFIG_DIR_ENV,
};
pub use types::*;
