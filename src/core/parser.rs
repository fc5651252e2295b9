//! Step reference grammar and descriptor parsing.
//!
//! A string step is one of:
//! - `./dir/name`: a local plugin under the recipe's `plugins` directory
//! - `name` / `name as alias`: an external module
//! - `name:parent` / `name:parent as alias`: a step borrowed from a parent
//!
//! Ids and parent ids are `[a-z0-9-]`; aliases may also contain dots.

use super::bag::{parse_config, patch};
use super::error::{Error, Result};
use super::types::RecipeSpec;
use regex::Regex;
use serde_yaml_ng::{Mapping, Value};
use std::path::Path;
use std::sync::LazyLock;

static STEP_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z0-9-]+)(?::([a-z0-9-]+))?(?:[ \t]+as[ \t]+([a-z0-9.-]+))?$")
        .expect("step reference pattern")
});

/// A parsed string step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRef {
    /// Path segments after `./`, e.g. `["nested", "name"]`
    Local { segments: Vec<String> },
    Module { id: String, alias: Option<String> },
    Inherited {
        id: String,
        parent: String,
        alias: Option<String>,
    },
}

impl StepRef {
    /// The id the resolved step is registered under.
    ///
    /// A local plugin is named after its last path segment and ignores any
    /// alias syntax.
    pub fn step_id(&self) -> &str {
        match self {
            StepRef::Local { segments } => segments.last().map(String::as_str).unwrap_or_default(),
            StepRef::Module { id, alias } | StepRef::Inherited { id, alias, .. } => {
                alias.as_deref().unwrap_or(id)
            }
        }
    }
}

/// Parse a string step reference.
pub fn parse_step_ref(input: &str) -> Result<StepRef> {
    let input = input.trim();

    if let Some(local) = input.strip_prefix("./") {
        let segments: Vec<String> = local
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Err(Error::InvalidStepFormat(input.to_string()));
        }
        return Ok(StepRef::Local { segments });
    }

    let caps = STEP_REF
        .captures(input)
        .ok_or_else(|| Error::InvalidStepFormat(input.to_string()))?;
    let id = caps[1].to_string();
    let alias = caps.get(3).map(|m| m.as_str().to_string());

    Ok(match caps.get(2) {
        Some(parent) => StepRef::Inherited {
            id,
            parent: parent.as_str().to_string(),
            alias,
        },
        None => StepRef::Module { id, alias },
    })
}

/// Parse a descriptor file, defaulting its `cwd` to the file's directory.
pub fn parse_descriptor_file(path: &Path, content: &str) -> Result<RecipeSpec> {
    let mut document = parse_config(path, content)?;
    if let Some(dir) = path.parent() {
        let mut defaults = Mapping::new();
        defaults.insert(
            Value::String("cwd".into()),
            Value::String(dir.display().to_string()),
        );
        patch(&mut document, Value::Mapping(defaults));
    }
    parse_descriptor(document)
}

/// Turn a descriptor document into a recipe spec.
pub fn parse_descriptor(document: Value) -> Result<RecipeSpec> {
    Ok(serde_yaml_ng::from_value(document)?)
}
