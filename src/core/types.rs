//! Recipe specification types.
//!
//! These are the inputs to recipe construction: the shape of a `sous.yaml`
//! descriptor, or the same thing built in code. Deserialization accepts the
//! loose forms a descriptor allows (`from: parent` as well as
//! `from: [a, b]`, steps as strings or `{id, value}` records).

use super::recipe::Recipe;
use super::step::StepValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Recipe specification
// ============================================================================

/// Everything needed to construct a recipe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeSpec {
    /// Registry-wide unique id
    pub id: String,

    /// Root directory (defaults to the registry's working directory)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Parent recipes, resolved before any step
    #[serde(default, deserialize_with = "one_or_many")]
    pub from: Vec<ParentSpec>,

    /// Step specifications, in declaration order
    #[serde(default)]
    pub steps: Vec<StepSpec>,

    /// Connections keyed by their primary label
    #[serde(default)]
    pub connections: Option<IndexMap<String, ConnectionSpec>>,

    /// Logical to physical path overrides
    #[serde(default)]
    pub structure: IndexMap<String, String>,
}

impl RecipeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn from(mut self, parent: impl Into<ParentSpec>) -> Self {
        self.from.push(parent.into());
        self
    }

    pub fn step(mut self, step: impl Into<StepSpec>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn connection(mut self, key: impl Into<String>, connection: ConnectionSpec) -> Self {
        self.connections
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), connection);
        self
    }

    pub fn structure(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.structure.insert(logical.into(), physical.into());
        self
    }
}

// ============================================================================
// Parents
// ============================================================================

/// A parent reference: an id, an inline spec, or an already-built recipe.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawParentSpec")]
pub enum ParentSpec {
    Id(String),
    Inline(Box<RecipeSpec>),
    Recipe(Arc<Recipe>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParentSpec {
    Id(String),
    Inline(InlineSpec),
}

/// An inline parent. Only a mapping qualifies; the derived `RecipeSpec`
/// would otherwise also accept a sequence as positional fields.
#[derive(Deserialize)]
#[serde(try_from = "serde_yaml_ng::Mapping")]
struct InlineSpec(Box<RecipeSpec>);

impl TryFrom<serde_yaml_ng::Mapping> for InlineSpec {
    type Error = serde_yaml_ng::Error;

    fn try_from(mapping: serde_yaml_ng::Mapping) -> Result<Self, Self::Error> {
        serde_yaml_ng::from_value(serde_yaml_ng::Value::Mapping(mapping))
            .map(|spec| InlineSpec(Box::new(spec)))
    }
}

impl From<RawParentSpec> for ParentSpec {
    fn from(raw: RawParentSpec) -> Self {
        match raw {
            RawParentSpec::Id(id) => ParentSpec::Id(id),
            RawParentSpec::Inline(InlineSpec(spec)) => ParentSpec::Inline(spec),
        }
    }
}

impl From<&str> for ParentSpec {
    fn from(id: &str) -> Self {
        ParentSpec::Id(id.to_string())
    }
}

impl From<String> for ParentSpec {
    fn from(id: String) -> Self {
        ParentSpec::Id(id)
    }
}

impl From<RecipeSpec> for ParentSpec {
    fn from(spec: RecipeSpec) -> Self {
        ParentSpec::Inline(Box::new(spec))
    }
}

impl From<Arc<Recipe>> for ParentSpec {
    fn from(recipe: Arc<Recipe>) -> Self {
        ParentSpec::Recipe(recipe)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(many) => many,
        OneOrMany::One(one) => vec![one],
    })
}

// ============================================================================
// Steps
// ============================================================================

/// A step as written in a recipe.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawStepSpec")]
pub enum StepSpec {
    /// `./local/plugin`, `module`, `module:parent`, `module as alias`
    Reference(String),
    /// An explicit id/value pair
    Explicit { id: String, value: StepValue },
}

impl StepSpec {
    pub fn explicit(id: impl Into<String>, value: impl Into<StepValue>) -> Self {
        StepSpec::Explicit {
            id: id.into(),
            value: value.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStepSpec {
    Reference(String),
    Explicit {
        id: String,
        value: serde_yaml_ng::Value,
    },
}

impl From<RawStepSpec> for StepSpec {
    fn from(raw: RawStepSpec) -> Self {
        match raw {
            RawStepSpec::Reference(reference) => StepSpec::Reference(reference),
            RawStepSpec::Explicit { id, value } => StepSpec::Explicit {
                id,
                value: StepValue::Constant(value),
            },
        }
    }
}

impl From<&str> for StepSpec {
    fn from(reference: &str) -> Self {
        StepSpec::Reference(reference.to_string())
    }
}

impl From<String> for StepSpec {
    fn from(reference: String) -> Self {
        StepSpec::Reference(reference)
    }
}

// ============================================================================
// Connections
// ============================================================================

/// A connection as declared in a recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Extra labels, appended after the connection key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    /// Step ids gated to this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,

    /// Everything else (host, port, ...), preserved verbatim
    #[serde(flatten)]
    pub settings: IndexMap<String, serde_yaml_ng::Value>,
}

impl ConnectionSpec {
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn plugins<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = Some(plugins.into_iter().map(Into::into).collect());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<serde_yaml_ng::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// A normalized connection: `labels[0]` is always the declaring key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,
    #[serde(flatten)]
    pub settings: IndexMap<String, serde_yaml_ng::Value>,
}

impl Connection {
    /// The primary label (the key the connection was declared under).
    pub fn label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or_default()
    }

    /// Whether `step_id` is gated to this connection.
    pub fn selects(&self, step_id: &str) -> bool {
        self.plugins
            .as_ref()
            .is_some_and(|plugins| plugins.iter().any(|p| p == step_id))
    }
}
