//! Package manifest format
//!
//! A package root holds a JSON manifest (`package.json` by default). The
//! presence of the namespace key (`omni` by default) marks it as a package;
//! the plugin list lives under `<namespace>.plugins`.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Validated package manifest
#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub homepage: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    /// Shell command handed to the build collaborator
    pub build_script: Option<String>,
    /// Raw plugin entries, normalized later
    pub plugins: Vec<Value>,
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    license: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Author {
    Name(String),
    Person {
        name: String,
        #[serde(default)]
        email: Option<String>,
    },
}

impl Author {
    fn render(self) -> String {
        match self {
            Self::Name(name) => name,
            Self::Person {
                name,
                email: Some(email),
            } => format!("{name} <{email}>"),
            Self::Person { name, email: None } => name,
        }
    }
}

/// Read and parse a manifest file as JSON
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid JSON
pub async fn read_manifest(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Whether a parsed manifest carries the plugin-system namespace key
#[must_use]
pub fn has_namespace(manifest: &Value, namespace: &str) -> bool {
    manifest.get(namespace).is_some()
}

impl PackageManifest {
    /// Validate a parsed manifest
    ///
    /// `fallback_name` is used when the manifest has no `name` (usually the
    /// package folder name).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] if the namespace key is missing, or the
    /// plugin list under it is missing or not an array
    pub fn from_value(
        value: &Value,
        namespace: &str,
        path: &Path,
        fallback_name: &str,
    ) -> Result<Self> {
        let manifest_error = |message: String| Error::Manifest {
            path: path.to_path_buf(),
            message,
        };

        let Some(section) = value.get(namespace) else {
            return Err(manifest_error(format!("missing \"{namespace}\" section")));
        };

        let plugins = match section.get("plugins") {
            Some(Value::Array(plugins)) => plugins.clone(),
            Some(_) => {
                return Err(manifest_error(format!(
                    "\"{namespace}.plugins\" must be an array"
                )));
            }
            None => {
                return Err(manifest_error(format!(
                    "missing \"{namespace}.plugins\" list"
                )));
            }
        };

        let metadata: RawMetadata = serde_json::from_value(value.clone())
            .map_err(|e| manifest_error(format!("invalid package metadata: {e}")))?;

        Ok(Self {
            name: metadata
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| fallback_name.to_string()),
            version: metadata.version.unwrap_or_default(),
            description: metadata.description.unwrap_or_default(),
            homepage: metadata.homepage,
            author: metadata.author.map(Author::render),
            license: metadata.license,
            build_script: section
                .get("build")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            plugins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: &Value) -> Result<PackageManifest> {
        PackageManifest::from_value(value, "omni", Path::new("/pkg"), "pkg")
    }

    #[test]
    fn parse_full_manifest() {
        let value = json!({
            "name": "hello",
            "version": "1.2.0",
            "description": "Says hello",
            "homepage": "https://omni.dev",
            "author": {"name": "Omni", "email": "team@omni.dev"},
            "license": "MIT",
            "omni": {
                "build": "make",
                "plugins": [{"type": "endpoint"}]
            }
        });

        let manifest = parse(&value).unwrap();
        assert_eq!(manifest.name, "hello");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.author.as_deref(), Some("Omni <team@omni.dev>"));
        assert_eq!(manifest.build_script.as_deref(), Some("make"));
        assert_eq!(manifest.plugins.len(), 1);
    }

    #[test]
    fn name_falls_back_to_folder() {
        let manifest = parse(&json!({"author": "Someone", "omni": {"plugins": []}})).unwrap();
        assert_eq!(manifest.name, "pkg");
        assert_eq!(manifest.author.as_deref(), Some("Someone"));
        assert!(manifest.plugins.is_empty());
    }

    #[test]
    fn missing_namespace() {
        let err = parse(&json!({"name": "x"})).unwrap_err();
        assert!(err.to_string().contains("missing \"omni\" section"));
    }

    #[test]
    fn missing_plugin_list() {
        let err = parse(&json!({"omni": {}})).unwrap_err();
        assert!(err.to_string().contains("missing \"omni.plugins\" list"));
    }

    #[test]
    fn plugin_list_not_array() {
        let err = parse(&json!({"omni": {"plugins": {"type": "endpoint"}}})).unwrap_err();
        assert!(err.to_string().contains("must be an array"));
    }

    #[test]
    fn namespace_marker() {
        assert!(has_namespace(&json!({"omni": {}}), "omni"));
        assert!(!has_namespace(&json!({"name": "x"}), "omni"));
        assert!(!has_namespace(&json!([1, 2]), "omni"));
    }

    #[tokio::test]
    async fn read_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            read_manifest(&path).await,
            Err(Error::Serialization(_))
        ));
    }
}
