//! Engine configuration, read from YAML.

use crate::cluster::GroupVersionKind;
use crate::propagate::{Identity, DEFAULT_FIELD_MANAGER, DEFAULT_LOOP_GUARD_ANNOTATION};
use crate::schema::{SchemaError, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest field manager name an API server accepts.
pub const MAX_FIELD_MANAGER_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("schema {path}: {source}")]
    Schema {
        path: PathBuf,
        source: SchemaError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Namespace on the host cluster receiving every mirror.
    #[serde(default)]
    pub host_namespace: String,

    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    #[serde(default = "default_loop_guard_annotation")]
    pub loop_guard_annotation: String,

    /// Workers per controller.
    #[serde(default = "default_workers")]
    pub workers: usize,

    pub targets: Vec<GroupVersionKind>,

    #[serde(default)]
    pub schemas: Vec<SchemaSource>,

    /// Host-side managers whose fields are never copied into tenant status.
    #[serde(default)]
    pub exclude_managers: Vec<String>,
}

/// SchemaSource is an extra schema file and the kinds that use its types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSource {
    pub file: PathBuf,
    #[serde(default)]
    pub kinds: Vec<KindMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMapping {
    #[serde(flatten)]
    pub gvk: GroupVersionKind,
    #[serde(rename = "type")]
    pub type_name: String,
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn default_loop_guard_annotation() -> String {
    DEFAULT_LOOP_GUARD_ANNOTATION.to_string()
}

fn default_workers() -> usize {
    2
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a configuration file. It is not validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_yaml(&yaml)
    }

    /// Reports every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.host_namespace.is_empty() {
            problems.push("hostNamespace must be set".to_string());
        }
        if self.field_manager.is_empty() {
            problems.push("fieldManager must not be empty".to_string());
        } else if self.field_manager.len() > MAX_FIELD_MANAGER_LEN {
            problems.push(format!(
                "fieldManager must be at most {MAX_FIELD_MANAGER_LEN} characters"
            ));
        }
        if !is_qualified_name(&self.loop_guard_annotation) {
            problems.push(format!(
                "loopGuardAnnotation {:?} is not a valid annotation key",
                self.loop_guard_annotation
            ));
        }
        if self.workers == 0 {
            problems.push("workers must be at least 1".to_string());
        }

        if self.targets.is_empty() {
            problems.push("at least one target is required".to_string());
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.version.is_empty() || target.kind.is_empty() {
                problems.push(format!("target {target:?} needs a version and a kind"));
            } else if !seen.insert(target) {
                problems.push(format!("target {target} is listed twice"));
            }
        }

        for source in &self.schemas {
            for mapping in &source.kinds {
                if mapping.type_name.is_empty() || mapping.gvk.kind.is_empty() {
                    problems.push(format!(
                        "schema {}: kind mappings need a kind and a type",
                        source.file.display()
                    ));
                }
            }
        }

        // One identity serves both directions, so excluding it again
        // points at a manager name meant for something else.
        if self.exclude_managers.contains(&self.field_manager) {
            problems.push(format!(
                "excludeManagers must not contain the engine's own fieldManager {:?}",
                self.field_manager
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            field_manager: self.field_manager.clone(),
            loop_guard_annotation: self.loop_guard_annotation.clone(),
            host_namespace: self.host_namespace.clone(),
            exclude_managers: self.exclude_managers.clone(),
        }
    }

    /// The builtin schemas plus the configured ones. Relative schema paths
    /// are resolved against `base_dir`.
    pub fn build_registry(&self, base_dir: &Path) -> Result<SchemaRegistry, ConfigError> {
        let mut registry = builtin_registry()?;

        for source in &self.schemas {
            let path = base_dir.join(&source.file);
            let yaml = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                path: path.clone(),
                source: e,
            })?;
            let kinds = source
                .kinds
                .iter()
                .map(|m| (m.gvk.clone(), m.type_name.clone()));
            registry
                .extend(&yaml, kinds)
                .map_err(|e| ConfigError::Schema { path, source: e })?;
        }
        Ok(registry)
    }
}

/// The schemas of the configuration file at `path`, or only the builtin
/// ones when there is none. Only the `schemas` section of the file is used,
/// so it is not validated.
pub fn load_schemas(path: Option<&Path>) -> Result<SchemaRegistry, ConfigError> {
    match path {
        Some(path) => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            Config::load(path)?.build_registry(base_dir)
        }
        None => builtin_registry(),
    }
}

fn builtin_registry() -> Result<SchemaRegistry, ConfigError> {
    SchemaRegistry::builtin().map_err(|source| ConfigError::Schema {
        path: PathBuf::from("<builtin>"),
        source,
    })
}

/// Checks an annotation key: an optional DNS subdomain prefix and a slash,
/// then a name of at most 63 alphanumerics, '-', '_' or '.', starting and
/// ending with an alphanumeric.
fn is_qualified_name(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    let name_ok = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    let prefix_ok = prefix.map_or(true, |p| {
        !p.is_empty()
            && p.len() <= 253
            && p.split('.').all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            })
    });

    name_ok && prefix_ok
}
