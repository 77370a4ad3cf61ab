pub mod commands;
pub mod error;
pub mod render;
pub mod settings;
pub mod terminal;

pub use error::AppError;
pub use settings::{MirrorSettings, SettingsError};
