//! Plugin definitions and their normalization

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declarative manifest entry describing one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDefinition {
    /// Unique name (synthesized when the manifest omits it)
    #[serde(default)]
    pub name: String,
    /// Human-readable description (inherited from the package when omitted)
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Names of plugins that must be loaded first
    #[serde(default)]
    pub requires: Vec<String>,
    /// Loader routing key
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Entry point reference, `[relative/file]#export`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<Value>,
    /// Type-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginDefinition {
    /// Create a definition with only a name and type set
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            requires: Vec::new(),
            plugin_type: plugin_type.into(),
            bootstrap: None,
            default_config: None,
            extra: Map::new(),
        }
    }
}

/// Definitions added, updated, and removed by one package build
#[derive(Debug, Clone, Default)]
pub struct DefinitionDiff {
    pub added: Vec<Arc<PluginDefinition>>,
    pub updated: Vec<Arc<PluginDefinition>>,
    pub removed: Vec<Arc<PluginDefinition>>,
}

impl DefinitionDiff {
    /// Compare a fresh set of definitions with the previously known set by name
    ///
    /// Every name present in both sets counts as updated, whether or not its
    /// content changed.
    #[must_use]
    pub fn between(previous: &[Arc<PluginDefinition>], next: &[Arc<PluginDefinition>]) -> Self {
        let previous_names: HashSet<&str> = previous.iter().map(|d| d.name.as_str()).collect();
        let next_names: HashSet<&str> = next.iter().map(|d| d.name.as_str()).collect();

        let (updated, added): (Vec<_>, Vec<_>) = next
            .iter()
            .cloned()
            .partition(|d| previous_names.contains(d.name.as_str()));
        let removed = previous
            .iter()
            .filter(|d| !next_names.contains(d.name.as_str()))
            .cloned()
            .collect();

        Self {
            added,
            updated,
            removed,
        }
    }

    /// A diff that removes every given definition
    #[must_use]
    pub fn removing_all(definitions: Vec<Arc<PluginDefinition>>) -> Self {
        Self {
            removed: definitions,
            ..Self::default()
        }
    }

    /// Whether the diff changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Turn raw manifest entries into validated definitions
///
/// Entries without a `type` are dropped, missing descriptions are inherited
/// from the package, missing names become `"<package> <type>"` with a numeric
/// suffix on collision, and names on the ignore list are filtered out.
#[must_use]
pub fn normalize_definitions(
    package_name: &str,
    package_description: &str,
    raw: &[Value],
    ignored: &[String],
) -> Vec<PluginDefinition> {
    let mut parsed = Vec::with_capacity(raw.len());
    for (index, entry) in raw.iter().enumerate() {
        let has_type = entry
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty());
        if !has_type {
            tracing::warn!(
                package = %package_name,
                index,
                "plugin definition has no type, skipping"
            );
            continue;
        }

        match serde_json::from_value::<PluginDefinition>(entry.clone()) {
            Ok(definition) => parsed.push(definition),
            Err(e) => tracing::warn!(
                package = %package_name,
                index,
                error = %e,
                "invalid plugin definition, skipping"
            ),
        }
    }

    let mut taken: HashSet<String> = parsed
        .iter()
        .filter(|d| !d.name.is_empty())
        .map(|d| d.name.clone())
        .collect();
    let mut seen = HashSet::new();
    let mut synthesized: HashMap<String, usize> = HashMap::new();
    let mut definitions = Vec::with_capacity(parsed.len());

    for mut definition in parsed {
        if definition.name.is_empty() {
            let base = format!("{package_name} {}", definition.plugin_type);
            let counter = synthesized.entry(base.clone()).or_insert(1);
            let mut candidate = base.clone();
            while taken.contains(&candidate) {
                *counter += 1;
                candidate = format!("{base} {counter}");
            }
            taken.insert(candidate.clone());
            definition.name = candidate;
        } else if !seen.insert(definition.name.clone()) {
            tracing::warn!(
                package = %package_name,
                plugin = %definition.name,
                "duplicate plugin name within package, skipping"
            );
            continue;
        }

        if definition.description.is_empty() {
            definition.description = package_description.to_string();
        }

        if ignored.iter().any(|name| *name == definition.name) {
            tracing::debug!(plugin = %definition.name, "plugin is on the ignore list");
            continue;
        }

        definitions.push(definition);
    }

    definitions
}
