//! Persisted template document and its version health check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::palette::ColorId;

/// Identifier a document must carry to be imported.
pub const WHOAMI: &str = "tileplate";
pub const SCHEMA_VERSION: &str = "1.0.0";
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDocument {
    pub whoami: String,
    pub script_version: String,
    pub schema_version: String,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateEntry>,
}

impl TemplateDocument {
    pub fn new() -> Self {
        Self {
            whoami: WHOAMI.to_string(),
            script_version: SCRIPT_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            templates: BTreeMap::new(),
        }
    }

}

impl Default for TemplateDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// A document as read back from storage. Entries stay untyped so each one
/// can be checked on its own and a broken template does not sink the rest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub whoami: String,
    #[serde(default)]
    pub script_version: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub templates: BTreeMap<String, serde_json::Value>,
}

impl StoredDocument {
    /// None when `value` does not carry our `whoami`, whatever else it holds.
    pub fn recognize(value: serde_json::Value) -> Option<serde_json::Result<Self>> {
        match value.get("whoami").and_then(serde_json::Value::as_str) {
            Some(WHOAMI) => Some(serde_json::from_value(value)),
            _ => None,
        }
    }

    pub fn health(&self) -> SchemaHealth {
        SchemaHealth::classify(&self.schema_version, SCHEMA_VERSION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    /// `"tx, ty, px, py"`, empty when the template has no anchor.
    #[serde(default)]
    pub coords: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub pixels: PixelSummary,
    #[serde(default)]
    pub tiles: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSummary {
    pub total: u64,
    #[serde(default)]
    pub colors: BTreeMap<ColorId, u64>,
}

/// How usable a document is given its schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaHealth {
    /// Same major and minor version.
    Healthy,
    /// Minor drift: loaded, but the user should re-save or update.
    Degraded,
    /// Major drift or an unreadable version: not loaded.
    Unusable,
}

impl SchemaHealth {
    pub fn classify(found: &str, expected: &str) -> Self {
        match (parse_version(found), parse_version(expected)) {
            (Some(f), Some(e)) if f.0 != e.0 => SchemaHealth::Unusable,
            (Some(f), Some(e)) if f.1 != e.1 => SchemaHealth::Degraded,
            (Some(_), Some(_)) => SchemaHealth::Healthy,
            _ => SchemaHealth::Unusable,
        }
    }

    pub fn is_loadable(self) -> bool {
        self != SchemaHealth::Unusable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaHealth::Healthy => "healthy",
            SchemaHealth::Degraded => "degraded",
            SchemaHealth::Unusable => "unusable",
        }
    }
}

/// `major.minor[.patch]`, patch optional and ignored.
fn parse_version(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    if let Some(patch) = parts.next() {
        patch.parse::<u64>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor))
}
