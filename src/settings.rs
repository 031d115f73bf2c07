use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DefaultOnError};

use crate::lifecycle::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeOption {
    Light,
    Dark,
    #[default]
    System,
}

/// The `app_settings` document. Only the default lifecycle drives note
/// behaviour; keys owned by other screens are kept as-is in `extra` so a
/// rewrite never drops them.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub default_lifecycle: Lifecycle,
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub theme: ThemeOption,
    pub confirm_before_delete: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_lifecycle: Lifecycle::forever(),
            theme: ThemeOption::System,
            confirm_before_delete: true,
            extra: Map::new(),
        }
    }
}

impl AppSettings {
    /// The lifecycle applied to new notes. A stored value that fails
    /// validation falls back to Forever.
    pub fn effective_default_lifecycle(&self) -> Lifecycle {
        match self.default_lifecycle.validate() {
            Ok(()) => self.default_lifecycle,
            Err(err) => {
                tracing::warn!(
                    lifecycle = %self.default_lifecycle,
                    %err,
                    "stored default lifecycle is invalid, using forever"
                );
                Lifecycle::forever()
            }
        }
    }
}
