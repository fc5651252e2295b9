//! Cook pipeline: realize every step in declaration order and thread each
//! value through the caller's resolvers.
//!
//! Steps are processed one at a time and resolvers run in sequence per step.
//! The first failure aborts the cook; effects of resolvers that already ran
//! are not undone.

use super::error::{BoxError, Error, Result};
use super::recipe::Recipe;
use super::step::{Step, StepContext};
use futures::future::{BoxFuture, FutureExt};
use serde_yaml_ng::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Async function applied to a realized step value and its id.
pub type ResolverFn =
    Arc<dyn Fn(Value, String) -> BoxFuture<'static, std::result::Result<Value, BoxError>> + Send + Sync>;

/// One stage of the cook pipeline.
#[derive(Clone)]
pub enum Resolver {
    /// Awaited with `(value, step id)`; its output is recorded.
    Func(ResolverFn),
    /// Recorded as-is for every step.
    Constant(Value),
}

impl Resolver {
    pub fn func<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
    {
        Resolver::Func(Arc::new(move |value: Value, id: String| f(value, id).boxed()))
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Resolver::Constant(value.into())
    }

    async fn apply(&self, value: &Value, step_id: &str) -> Result<Value> {
        match self {
            Resolver::Constant(constant) => Ok(constant.clone()),
            Resolver::Func(f) => f(value.clone(), step_id.to_string())
                .await
                .map_err(|source| Error::Resolver {
                    step: step_id.to_string(),
                    source,
                }),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Func(_) => f.write_str("Func(..)"),
            Resolver::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// Per-step outcome of a cook.
#[derive(Debug, Clone, PartialEq)]
pub enum Cooked {
    /// The realized value (no resolvers were supplied).
    Value(Value),
    /// One output per resolver, in resolver order.
    Resolved(Vec<Value>),
}

impl Cooked {
    /// The realized value, or the last resolver output.
    pub fn last(&self) -> Option<&Value> {
        match self {
            Cooked::Value(value) => Some(value),
            Cooked::Resolved(outputs) => outputs.last(),
        }
    }
}

/// Cook all of `recipe`'s steps, in declaration order.
pub async fn cook(recipe: &Recipe, resolvers: &[Resolver]) -> Result<Vec<Cooked>> {
    let mut outcomes = Vec::with_capacity(recipe.steps().len());
    for step in recipe.steps().values() {
        outcomes.push(cook_step(recipe, step, resolvers).await?);
    }
    tracing::debug!(recipe = recipe.id(), steps = outcomes.len(), "cooked recipe");
    Ok(outcomes)
}

async fn cook_step(recipe: &Recipe, step: &Step, resolvers: &[Resolver]) -> Result<Cooked> {
    let value = step.realize(|| {
        Ok(StepContext {
            id: step.id().to_string(),
            path: step.path().clone(),
            bag: recipe.bag().scoped(step.id())?,
        })
    })?;

    if resolvers.is_empty() {
        return Ok(Cooked::Value(value));
    }

    let mut outputs = Vec::with_capacity(resolvers.len());
    for (index, resolver) in resolvers.iter().enumerate() {
        outputs.push(resolver.apply(&value, step.id()).await?);
        tracing::debug!(step = step.id(), resolver = index, "resolver applied");
    }
    Ok(Cooked::Resolved(outputs))
}
