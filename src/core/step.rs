//! Steps: resolution from specs and lazy value realization.
//!
//! Every step value is normalized to a factory when the step is resolved.
//! The first cook invokes the factory and stores the result; later cooks
//! reuse it.

use super::bag::Bag;
use super::error::{BoxError, Error, Result};
use super::parser::{parse_step_ref, StepRef};
use super::path::{ensure_dir, PathResolver};
use super::recipe::Recipe;
use super::types::StepSpec;
use crate::loader::ModuleLoader;
use serde_yaml_ng::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Builds a step value from its cooking context.
pub type Factory = Arc<dyn Fn(&StepContext) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// What a step is realized with, handed to its factory.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Id the step is registered under in the cooking recipe
    pub id: String,
    /// Path resolver of the recipe that defines the step
    pub path: PathResolver,
    /// The cooking recipe's config scoped to `id`
    pub bag: Bag,
}

/// A step value as declared: a constant or a factory.
#[derive(Clone)]
pub enum StepValue {
    Constant(Value),
    Factory(Factory),
}

impl StepValue {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&StepContext) -> std::result::Result<Value, BoxError> + Send + Sync + 'static,
    {
        StepValue::Factory(Arc::new(f))
    }

    /// Normalize to a factory; constants become a factory returning them.
    pub fn into_factory(self) -> Factory {
        match self {
            StepValue::Factory(f) => f,
            StepValue::Constant(value) => {
                Arc::new(move |_: &StepContext| Ok::<_, BoxError>(value.clone()))
            }
        }
    }
}

impl From<Value> for StepValue {
    fn from(value: Value) -> Self {
        StepValue::Constant(value)
    }
}

impl fmt::Debug for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepValue::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            StepValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Realization state of one step.
#[derive(Clone)]
enum Realization {
    Pending(Factory),
    Ready(Value),
}

/// A resolved step.
pub struct Step {
    id: String,
    owner: String,
    path: PathResolver,
    state: Mutex<Realization>,
}

impl Step {
    pub(crate) fn new(id: String, owner: String, path: PathResolver, value: StepValue) -> Self {
        Self {
            id,
            owner,
            path,
            state: Mutex::new(Realization::Pending(value.into_factory())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the recipe that defines this step.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Path resolver of the defining recipe.
    pub fn path(&self) -> &PathResolver {
        &self.path
    }

    pub fn is_realized(&self) -> bool {
        matches!(*self.lock(), Realization::Ready(_))
    }

    /// The realized value, if the step has been cooked.
    pub fn value(&self) -> Option<Value> {
        match &*self.lock() {
            Realization::Ready(value) => Some(value.clone()),
            Realization::Pending(_) => None,
        }
    }

    /// Copy this step under a new id. Owner and current value state carry
    /// over; the copy realizes independently from then on.
    pub(crate) fn inherit(&self, id: String) -> Self {
        Self {
            id,
            owner: self.owner.clone(),
            path: self.path.clone(),
            state: Mutex::new(self.lock().clone()),
        }
    }

    /// Invoke the factory once and memoize its result.
    ///
    /// `context` is only built when the factory actually runs.
    pub(crate) fn realize<C>(&self, context: C) -> Result<Value>
    where
        C: FnOnce() -> Result<StepContext>,
    {
        let mut state = self.lock();
        let factory = match &*state {
            Realization::Ready(value) => return Ok(value.clone()),
            Realization::Pending(factory) => factory.clone(),
        };

        let ctx = context()?;
        let value = factory(&ctx).map_err(|source| Error::Factory {
            step: self.id.clone(),
            source,
        })?;
        tracing::debug!(step = %self.id, owner = %self.owner, "realized step value");
        *state = Realization::Ready(value.clone());
        Ok(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Realization> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("realized", &self.is_realized())
            .finish()
    }
}

/// The part of a recipe under construction that step resolution needs.
pub(crate) struct StepScope<'a> {
    pub recipe_id: &'a str,
    pub parents: &'a [Arc<Recipe>],
    pub path: &'a PathResolver,
    pub plugins_dir: &'a str,
    pub loader: &'a dyn ModuleLoader,
}

/// Resolve one step spec within `scope`.
pub(crate) async fn resolve_step(scope: &StepScope<'_>, spec: StepSpec) -> Result<Step> {
    let step = match spec {
        StepSpec::Explicit { id, value } => explicit(scope, id, value)?,
        StepSpec::Reference(reference) => match parse_step_ref(&reference)? {
            StepRef::Local { segments } => local(scope, segments).await?,
            StepRef::Inherited { id, parent, alias } => inherited(scope, id, parent, alias)?,
            StepRef::Module { id, alias } => {
                let step_id = alias.unwrap_or_else(|| id.clone());
                let value = scope
                    .loader
                    .load_module(&id)
                    .await
                    .map_err(|e| Error::module_load(&step_id, e))?;
                explicit(scope, step_id, value)?
            }
        },
    };
    tracing::debug!(recipe = scope.recipe_id, step = %step.id, owner = %step.owner, "resolved step");
    Ok(step)
}

fn explicit(scope: &StepScope<'_>, id: String, value: StepValue) -> Result<Step> {
    if id.is_empty() {
        return Err(Error::InvalidArgument(
            "Invalid step: \"id\" is not allowed to be empty".into(),
        ));
    }
    Ok(Step::new(
        id,
        scope.recipe_id.to_string(),
        scope.path.clone(),
        value,
    ))
}

async fn local(scope: &StepScope<'_>, segments: Vec<String>) -> Result<Step> {
    let mut logical = Vec::with_capacity(segments.len() + 1);
    logical.push(scope.plugins_dir.to_string());
    logical.extend(segments);

    let id = logical.last().cloned().unwrap_or_default();
    let dir = scope
        .path
        .resolve(&logical[..logical.len() - 1])
        .map_err(Error::plugin_not_found)?;
    ensure_dir(&dir, None).map_err(Error::plugin_not_found)?;

    let target = scope.path.resolve(&logical).map_err(Error::plugin_not_found)?;
    let value = scope
        .loader
        .load_file(&target)
        .await
        .map_err(Error::plugin_not_found)?;

    explicit(scope, id, value)
}

fn inherited(
    scope: &StepScope<'_>,
    id: String,
    parent_id: String,
    alias: Option<String>,
) -> Result<Step> {
    let parent = scope
        .parents
        .iter()
        .find(|p| p.id() == parent_id)
        .ok_or_else(|| Error::UnknownParent {
            step: id.clone(),
            recipe: scope.recipe_id.to_string(),
            parent: parent_id.clone(),
        })?;
    let step = parent.step(&id).ok_or_else(|| Error::UnknownParentStep {
        step: id.clone(),
        parent: parent_id.clone(),
    })?;
    Ok(step.inherit(alias.unwrap_or(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::FsLoader;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scope_for<'a>(
        path: &'a PathResolver,
        loader: &'a FsLoader,
        parents: &'a [Arc<Recipe>],
    ) -> StepScope<'a> {
        StepScope {
            recipe_id: "owner",
            parents,
            path,
            plugins_dir: "plugins",
            loader,
        }
    }

    fn context(path: &PathResolver) -> Result<StepContext> {
        Ok(StepContext {
            id: "step".into(),
            path: path.clone(),
            bag: Bag::new(Value::Mapping(Default::default()))?,
        })
    }

    #[test]
    fn test_step_constant_is_pending_until_realized() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let step = Step::new("a".into(), "r".into(), path.clone(), Value::from("hi").into());
        assert!(!step.is_realized());
        assert_eq!(step.value(), None);
        assert_eq!(step.realize(|| context(&path)).unwrap(), Value::from("hi"));
        assert!(step.is_realized());
        assert_eq!(step.value(), Some(Value::from("hi")));
    }

    #[test]
    fn test_step_factory_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = StepValue::factory(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(ctx.id.clone()))
        });
        let step = Step::new("a".into(), "r".into(), path.clone(), value);

        assert_eq!(step.realize(|| context(&path)).unwrap(), Value::from("step"));
        assert_eq!(step.realize(|| context(&path)).unwrap(), Value::from("step"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_step_factory_error_names_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let value = StepValue::factory(|_| Err("boom".into()));
        let step = Step::new("broken".into(), "r".into(), path.clone(), value);
        let err = step.realize(|| context(&path)).unwrap_err();
        assert_eq!(err.to_string(), "\"broken\" step factory failed: boom");
        assert!(!step.is_realized());
    }

    #[test]
    fn test_step_inherit_copies_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let step = Step::new("a".into(), "parent".into(), path.clone(), Value::from(1).into());
        step.realize(|| context(&path)).unwrap();

        let copy = step.inherit("b".into());
        assert_eq!(copy.id(), "b");
        assert_eq!(copy.owner(), "parent");
        assert_eq!(copy.value(), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_resolve_explicit_requires_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);
        let err = resolve_step(&scope, StepSpec::explicit("", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_resolve_module_with_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new().with_module("logger", Value::from("log"));
        let scope = scope_for(&path, &loader, &[]);

        let step = resolve_step(&scope, "logger as log".into()).await.unwrap();
        assert_eq!(step.id(), "log");
        assert_eq!(step.owner(), "owner");
    }

    #[tokio::test]
    async fn test_resolve_missing_module_names_final_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let err = resolve_step(&scope, "ghost as spirit".into()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid \"spirit\" step: Cannot find module 'ghost'"
        );
    }

    #[tokio::test]
    async fn test_resolve_local_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins").join("to");
        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(plugins.join("my-plugin.yaml"), "name: my-plugin\n").unwrap();

        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let step = resolve_step(&scope, "./to/my-plugin".into()).await.unwrap();
        assert_eq!(step.id(), "my-plugin");
        let value = step.realize(|| context(&path)).unwrap();
        assert_eq!(value["name"], Value::from("my-plugin"));
    }

    #[tokio::test]
    async fn test_resolve_local_plugin_through_structure() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("auth.json"), r#"{"scheme": "jwt"}"#).unwrap();

        let mut structure = IndexMap::new();
        structure.insert("plugins".to_string(), "lib".to_string());
        let path = PathResolver::new(dir.path(), &structure).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let step = resolve_step(&scope, "./auth".into()).await.unwrap();
        assert_eq!(step.id(), "auth");
    }

    #[tokio::test]
    async fn test_resolve_local_plugin_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let err = resolve_step(&scope, "./nested/missing".into()).await.unwrap_err();
        assert!(err.to_string().starts_with("Plugin not found: Not a directory"));
        assert!(matches!(err, Error::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_local_plugin_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let err = resolve_step(&scope, "./absent".into()).await.unwrap_err();
        assert!(matches!(err, Error::PluginNotFound { .. }));
        assert!(matches!(err.root(), Error::ModuleNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_inherited_without_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathResolver::new(dir.path(), &IndexMap::new()).unwrap();
        let loader = FsLoader::new();
        let scope = scope_for(&path, &loader, &[]);

        let err = resolve_step(&scope, "logger:base".into()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid \"logger\" step: \"owner\" has no \"base\" parent"
        );
    }
}
