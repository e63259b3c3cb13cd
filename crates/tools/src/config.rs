//! Tool configuration with an optional `mixforge-tools.toml` overlay.

use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_NAME: &str = "mixforge-tools.toml";
const DEFAULT_TRAIN_TEMPLATE: &str =
    "cargo run --release --bin train -- --config ${CONFIG} ${EXTRA_ARGS}";

#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// `${...}` template rendered into one launch command per generated config.
    pub train_template: String,
    /// Extra arguments substituted for `${EXTRA_ARGS}`.
    pub extra_args: String,
    /// Seconds to sleep between launches in the generated script.
    pub launch_stagger_secs: f32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            train_template: DEFAULT_TRAIN_TEMPLATE.to_string(),
            extra_args: String::new(),
            launch_stagger_secs: 0.1,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    train_template: Option<String>,
    extra_args: Option<String>,
    launch_stagger_secs: Option<f32>,
}

impl ToolConfig {
    /// Load `mixforge-tools.toml` from the working directory when present,
    /// falling back to defaults for anything unset.
    pub fn load() -> Self {
        Self::load_from(Path::new(DEFAULT_CONFIG_NAME))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut cfg = Self::default();
        let Ok(text) = std::fs::read_to_string(path) else {
            return cfg;
        };
        let file: ToolConfigFile = match toml::from_str(&text) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("ignoring malformed {}: {e}", path.display());
                return cfg;
            }
        };
        if let Some(template) = file.train_template {
            cfg.train_template = template;
        }
        if let Some(extra) = file.extra_args {
            cfg.extra_args = extra;
        }
        if let Some(stagger) = file.launch_stagger_secs {
            cfg.launch_stagger_secs = stagger;
        }
        cfg
    }
}
