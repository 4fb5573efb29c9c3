//! Configuration and settings management.
//!
//! Settings are stored in the user's config directory as JSON and
//! overridden by command-line flags.

mod settings;

pub use settings::{
    ExportSettings, ServerSettings, Settings, SettingsError, DEFAULT_COLLECTION,
    DEFAULT_CORPUS_MODEL, DEFAULT_CORPUS_NAME, DEFAULT_OUTPUT,
};
