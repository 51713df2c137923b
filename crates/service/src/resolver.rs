//! Dependency resolution seam
//!
//! Turning extension names into a concrete module list is the job of an
//! external resolver. The service only needs the trait.

use async_trait::async_trait;
use k6x_errors::Error;
use k6x_types::{Dependency, Module, Modules, LATEST_TAG};

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `dependencies` to modules, in request order
    ///
    /// `filter` is an extension registry filter expression; its syntax is
    /// up to the resolver.
    async fn resolve(&self, dependencies: &[Dependency], filter: &str) -> Result<Modules, Error>;
}

/// Resolver that trusts its input: constraints are used as the tag
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl Resolver for PassthroughResolver {
    async fn resolve(&self, dependencies: &[Dependency], _filter: &str) -> Result<Modules, Error> {
        Ok(dependencies
            .iter()
            .map(|dep| {
                let tag = if dep.constraints.is_empty() {
                    LATEST_TAG
                } else {
                    dep.constraints.as_str()
                };
                Module::new(dep.name.as_str(), tag)
            })
            .collect())
    }
}
