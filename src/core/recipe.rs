//! Recipes: an id, a root directory, parents, layered config, ordered steps
//! and optional connections.
//!
//! A recipe is built once through a [`RecipeRegistry`] and is immutable
//! afterwards, apart from the lazy realization of its steps.

use super::bag::{Bag, ConfigSource};
use super::error::{Error, Result};
use super::executor::{self, Cooked, Resolver};
use super::path::PathResolver;
use super::registry::RecipeRegistry;
use super::step::{resolve_step, Step, StepScope};
use super::types::{Connection, ConnectionSpec, RecipeSpec};
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

static CONNECTION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9]+$").expect("connection key pattern"));

/// A constructed recipe.
pub struct Recipe {
    id: String,
    parents: Vec<Arc<Recipe>>,
    path: PathResolver,
    bag: Bag,
    steps: IndexMap<String, Step>,
    connections: Option<Vec<Connection>>,
}

impl Recipe {
    /// Build a recipe from `spec`. Parents are resolved through `registry`
    /// before any step. Registration is left to the caller.
    pub(crate) async fn build(registry: &RecipeRegistry, spec: RecipeSpec) -> Result<Self> {
        let settings = registry.settings();
        let cwd = spec.cwd.unwrap_or_else(|| registry.cwd().to_path_buf());
        let path = PathResolver::labeled(
            "\"cwd\" must refer to an existing directory",
            cwd,
            &spec.structure,
        )?;

        let mut parents = Vec::with_capacity(spec.from.len());
        for parent in spec.from {
            let parent = registry
                .resolve_in(parent, Some(path.root()))
                .await
                .map_err(Error::invalid_from)?;
            parents.push(parent);
        }

        let config_dir = [settings.config_dir.as_str()];
        let mut layers = Vec::with_capacity(parents.len() + 1);
        for parent in &parents {
            layers.push(ConfigSource::Path(parent.path().resolve(&config_dir)?));
        }
        layers.push(ConfigSource::Path(path.resolve(&config_dir)?));
        let bag = Bag::layered(&layers)?;

        let connections = spec.connections.map(normalize_connections).transpose()?;

        let scope = StepScope {
            recipe_id: &spec.id,
            parents: &parents,
            path: &path,
            plugins_dir: &settings.plugins_dir,
            loader: registry.loader(),
        };
        let mut steps = IndexMap::with_capacity(spec.steps.len());
        for step_spec in spec.steps {
            let step = resolve_step(&scope, step_spec).await?;
            if steps.contains_key(step.id()) {
                return Err(Error::DuplicateStepId(step.id().to_string()));
            }
            steps.insert(step.id().to_string(), step);
        }

        Ok(Self {
            id: spec.id,
            parents,
            path,
            bag,
            steps,
            connections,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The recipe's root directory.
    pub fn cwd(&self) -> &Path {
        self.path.root()
    }

    pub fn parents(&self) -> &[Arc<Recipe>] {
        &self.parents
    }

    pub fn parent(&self, id: &str) -> Option<&Arc<Recipe>> {
        self.parents.iter().find(|p| p.id == id)
    }

    pub fn path(&self) -> &PathResolver {
        &self.path
    }

    pub fn bag(&self) -> &Bag {
        &self.bag
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &IndexMap<String, Step> {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn connections(&self) -> Option<&[Connection]> {
        self.connections.as_deref()
    }

    /// Primary labels of the connections gated to `step_id`.
    pub fn select(&self, step_id: &str) -> Vec<&str> {
        self.connections
            .iter()
            .flatten()
            .filter(|c| c.selects(step_id))
            .map(Connection::label)
            .collect()
    }

    /// Realize every step and thread it through `resolvers`.
    pub async fn cook(&self, resolvers: &[Resolver]) -> Result<Vec<Cooked>> {
        executor::cook(self, resolvers).await
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("id", &self.id)
            .field("cwd", &self.cwd())
            .field(
                "parents",
                &self.parents.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            )
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("connections", &self.connections)
            .finish()
    }
}

fn normalize_connections(specs: IndexMap<String, ConnectionSpec>) -> Result<Vec<Connection>> {
    specs
        .into_iter()
        .map(|(key, spec)| {
            if !CONNECTION_KEY.is_match(&key) {
                return Err(Error::InvalidConnection {
                    key,
                    reason: "key must only contain alpha-numeric characters".into(),
                });
            }
            if spec.labels.as_ref().is_some_and(Vec::is_empty) {
                return Err(Error::InvalidConnection {
                    key,
                    reason: "\"labels\" must contain at least 1 items".into(),
                });
            }
            let extra = spec.labels.unwrap_or_default();
            if extra.iter().any(String::is_empty) {
                return Err(Error::InvalidConnection {
                    key,
                    reason: "\"labels\" must not contain empty strings".into(),
                });
            }
            let mut labels = Vec::with_capacity(extra.len() + 1);
            labels.push(key);
            labels.extend(extra);
            Ok(Connection {
                labels,
                plugins: spec.plugins,
                settings: spec.settings,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::StepValue;
    use crate::core::types::StepSpec;
    use crate::loader::FsLoader;
    use serde_yaml_ng::Value;

    fn registry(dir: &Path) -> RecipeRegistry {
        RecipeRegistry::new(FsLoader::new().with_module("logger", Value::from("log")), dir)
    }

    #[tokio::test]
    async fn test_recipe_defaults_cwd_to_registry() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = registry(dir.path())
            .construct(RecipeSpec::new("plain"))
            .await
            .unwrap();
        assert_eq!(recipe.id(), "plain");
        assert_eq!(recipe.cwd(), dir.path());
        assert!(recipe.steps().is_empty());
        assert!(recipe.connections().is_none());
    }

    #[tokio::test]
    async fn test_recipe_missing_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let err = registry(dir.path())
            .construct(RecipeSpec::new("lost").cwd("/an/inexistant/path/on/the/file/system"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid \"lost\" recipe: \"cwd\" must refer to an existing directory: \
             Not a directory: \"/an/inexistant/path/on/the/file/system\""
        );
    }

    #[tokio::test]
    async fn test_recipe_duplicate_step_id() {
        let dir = tempfile::tempdir().unwrap();
        let err = registry(dir.path())
            .construct(
                RecipeSpec::new("dupes")
                    .step("logger")
                    .step(StepSpec::explicit("logger", Value::from(1))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::DuplicateStepId(id) if id == "logger"));
        assert!(err.to_string().ends_with("\"logger\" step is already defined"));
    }

    #[tokio::test]
    async fn test_recipe_step_order_is_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = registry(dir.path())
            .construct(
                RecipeSpec::new("ordered")
                    .step(StepSpec::explicit("zeta", Value::Null))
                    .step("logger as alpha")
                    .step(StepSpec::explicit("mid", StepValue::factory(|_| Ok(Value::Null)))),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = recipe.steps().keys().map(String::as_str).collect();
        assert_eq!(ids, ["zeta", "alpha", "mid"]);
        assert_eq!(recipe.step("alpha").unwrap().owner(), "ordered");
    }

    #[tokio::test]
    async fn test_recipe_connection_labels() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = registry(dir.path())
            .construct(
                RecipeSpec::new("served")
                    .step("logger")
                    .connection("web", ConnectionSpec::default().setting("port", 3000))
                    .connection(
                        "admin",
                        ConnectionSpec::default()
                            .labels(["x"])
                            .plugins(["logger"]),
                    ),
            )
            .await
            .unwrap();

        let connections = recipe.connections().unwrap();
        assert_eq!(connections[0].labels, ["web"]);
        assert_eq!(connections[0].settings["port"], Value::from(3000));
        assert_eq!(connections[1].labels, ["admin", "x"]);
        assert_eq!(recipe.select("logger"), ["admin"]);
        assert!(recipe.select("other").is_empty());
    }

    #[tokio::test]
    async fn test_recipe_invalid_connection_key() {
        let dir = tempfile::tempdir().unwrap();
        let err = registry(dir.path())
            .construct(RecipeSpec::new("bad").connection("not-alnum", ConnectionSpec::default()))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::InvalidConnection { key, .. } if key == "not-alnum"));
    }

    #[tokio::test]
    async fn test_recipe_invalid_connection_labels() {
        let dir = tempfile::tempdir().unwrap();
        let err = registry(dir.path())
            .construct(
                RecipeSpec::new("bad").connection("web", ConnectionSpec::default().labels([""])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::InvalidConnection { .. }));
    }

    #[tokio::test]
    async fn test_recipe_empty_connection_labels() {
        let dir = tempfile::tempdir().unwrap();
        let empty: [&str; 0] = [];
        let err = registry(dir.path())
            .construct(
                RecipeSpec::new("bad").connection("web", ConnectionSpec::default().labels(empty)),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid \"bad\" recipe: Invalid \"web\" connection: \"labels\" must contain at least 1 items"
        );
    }

    #[tokio::test]
    async fn test_recipe_config_layering() {
        let dir = tempfile::tempdir().unwrap();
        let parent_dir = dir.path().join("parent");
        let child_dir = dir.path().join("child");
        std::fs::create_dir_all(&parent_dir).unwrap();
        std::fs::create_dir_all(&child_dir).unwrap();
        std::fs::write(
            parent_dir.join("config.yaml"),
            "server:\n  host: parent.local\n  port: 80\nonly-parent: true\n",
        )
        .unwrap();
        std::fs::write(child_dir.join("config.yaml"), "server:\n  port: 8080\n").unwrap();

        let registry = registry(dir.path());
        registry
            .construct(RecipeSpec::new("parent").cwd(&parent_dir))
            .await
            .unwrap();
        let child = registry
            .construct(RecipeSpec::new("child").cwd(&child_dir).from("parent"))
            .await
            .unwrap();

        let bag = child.bag();
        assert_eq!(bag.get("server.port"), Some(&Value::from(8080)));
        assert_eq!(bag.get("server.host"), Some(&Value::from("parent.local")));
        assert_eq!(bag.get("only-parent"), Some(&Value::from(true)));
        assert_eq!(child.parent("parent").unwrap().id(), "parent");
    }
}
