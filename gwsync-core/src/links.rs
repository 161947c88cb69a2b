//! Resolution of typed references into plain addresses.
//!
//! Resolution runs in two steps. [`ResourceKind::references`] lists the typed
//! references of a spec in document order, the resolver looks each one up in the
//! store, and [`ResourceKind::rewrite`] produces a new spec in which every typed
//! reference is replaced by its plain value and cleared. The input spec is never
//! modified, so resolving the same spec twice yields the same result.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::kinds::ResourceKind;
use crate::model::graph::merge_sdl;
use crate::model::{
    ApiDefinitionSpec, Environment, Identity, Kind, OperatorContextSpec, Resource, ResourceRef,
    SubGraphSpec, SuperGraphSpec,
};
use crate::store::ResourceStore;

/// Scheme of internal proxy addresses understood by the gateway.
pub const INTERNAL_SCHEME: &str = "tyk://";

/// A typed reference found in a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field the reference was found in, for error messages.
    pub field: &'static str,
    pub to: ResourceRef,
}

impl Reference {
    pub fn new(field: &'static str, kind: Kind, to: Identity) -> Self {
        Self {
            field,
            to: ResourceRef::new(kind, &to),
        }
    }
}

/// A reference that resolved to a plain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: ResourceRef,
    /// Value handed to the control plane in place of the reference.
    pub address: String,
    /// Human readable name of the target, e.g. an API's display name.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The referenced resource does not exist (yet).
    #[error("{field}: {target} not found")]
    NotFound { field: &'static str, target: ResourceRef },

    /// The referenced resource exists but cannot provide an address yet.
    #[error("{field}: {target} not ready: {reason}")]
    NotReady {
        field: &'static str,
        target: ResourceRef,
        reason: String,
    },

    /// The reference can never resolve.
    #[error("invalid reference: {0}")]
    Invalid(String),

    #[error("store: {0}")]
    Store(String),
}

impl LinkError {
    /// Invalid references need a spec change, everything else may heal on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkError::Invalid(_))
    }
}

/// Resolved targets keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct Addresses {
    by_ref: BTreeMap<ResourceRef, ResolvedTarget>,
}

impl Addresses {
    pub fn insert(&mut self, resolved: ResolvedTarget) {
        self.by_ref.insert(resolved.target.clone(), resolved);
    }

    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.by_ref.contains_key(target)
    }

    /// Looks up a target that the resolver must have resolved already.
    pub fn require(&self, kind: Kind, id: &Identity) -> Result<&ResolvedTarget, LinkError> {
        let key = ResourceRef::new(kind, id);
        self.by_ref
            .get(&key)
            .ok_or_else(|| LinkError::Invalid(format!("{} was not resolved", key)))
    }
}

/// Outcome of resolving a spec.
#[derive(Debug, Clone)]
pub struct Resolution<S> {
    /// Spec with every typed reference replaced by its plain value.
    pub spec: S,
    /// Distinct targets in document order, excluding the owner itself.
    pub targets: Vec<ResolvedTarget>,
    /// Environment of the referenced operator context, if any.
    pub environment: Option<Environment>,
}

pub struct LinkResolver<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> LinkResolver<'a> {
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Resolves every typed reference of `spec`, owned by `owner`.
    pub async fn resolve<K: ResourceKind>(
        &self,
        owner: &Identity,
        spec: &K::Spec,
    ) -> Result<Resolution<K::Spec>, LinkError> {
        let owner_ref = ResourceRef::new(K::KIND, owner);
        let references = K::references(spec, &owner.namespace).map_err(LinkError::Invalid)?;

        let mut addresses = Addresses::default();
        let mut targets = Vec::new();
        let mut environment = None;

        for reference in references {
            if addresses.contains(&reference.to) {
                continue;
            }

            let (resolved, env) = self.lookup(&reference).await?;
            debug!(
                "Resolved {} of {} to {}",
                reference.field, owner_ref, resolved.target
            );
            if env.is_some() {
                environment = env;
            }
            if resolved.target != owner_ref {
                targets.push(resolved.clone());
            }
            addresses.insert(resolved);
        }

        let spec = K::rewrite(spec.clone(), &owner.namespace, &addresses)?;
        Ok(Resolution {
            spec,
            targets,
            environment,
        })
    }

    async fn fetch(&self, reference: &Reference) -> Result<Resource, LinkError> {
        let id = reference.to.identity();
        self.store
            .get(reference.to.kind, &id)
            .await
            .map_err(|e| LinkError::Store(e.to_string()))?
            .ok_or_else(|| LinkError::NotFound {
                field: reference.field,
                target: reference.to.clone(),
            })
    }

    async fn lookup(
        &self,
        reference: &Reference,
    ) -> Result<(ResolvedTarget, Option<Environment>), LinkError> {
        let resource = self.fetch(reference).await?;
        let id = resource.identity();
        let not_ready = |reason: String| LinkError::NotReady {
            field: reference.field,
            target: reference.to.clone(),
            reason,
        };

        let mut environment = None;
        let (address, label) = match reference.to.kind {
            Kind::ApiDefinition => {
                let spec: ApiDefinitionSpec = resource
                    .decode_spec()
                    .map_err(|e| not_ready(format!("spec does not decode: {}", e)))?;
                (api_id(&spec, &id), spec.name)
            }
            Kind::Certificate => {
                if resource.status.remote_id.is_empty() {
                    return Err(not_ready("certificate not uploaded yet".to_string()));
                }
                (resource.status.remote_id.clone(), id.name.clone())
            }
            Kind::SubGraph => {
                let spec: SubGraphSpec = resource
                    .decode_spec()
                    .map_err(|e| not_ready(format!("spec does not decode: {}", e)))?;
                (spec.sdl, id.name.clone())
            }
            Kind::SuperGraph => {
                let spec: SuperGraphSpec = resource
                    .decode_spec()
                    .map_err(|e| not_ready(format!("spec does not decode: {}", e)))?;
                let mut sdls = Vec::with_capacity(spec.subgraph_refs.len());
                for target in &spec.subgraph_refs {
                    let sub = Reference::new(
                        reference.field,
                        Kind::SubGraph,
                        target.identity(&id.namespace),
                    );
                    let sub = self.fetch(&sub).await.map_err(|e| not_ready(e.to_string()))?;
                    let sub: SubGraphSpec = sub
                        .decode_spec()
                        .map_err(|e| not_ready(format!("subgraph spec does not decode: {}", e)))?;
                    sdls.push(sub.sdl);
                }
                (merge_sdl(sdls.iter().map(String::as_str)), id.name.clone())
            }
            Kind::OperatorContext => {
                let spec: OperatorContextSpec = resource
                    .decode_spec()
                    .map_err(|e| not_ready(format!("spec does not decode: {}", e)))?;
                environment = Some(spec.env);
                (id.to_string(), id.name.clone())
            }
            Kind::SecurityPolicy => {
                return Err(LinkError::Invalid(format!(
                    "{}: security policies cannot be referenced",
                    reference.field
                )));
            }
        };

        Ok((
            ResolvedTarget {
                target: reference.to.clone(),
                address,
                label,
            },
            environment,
        ))
    }
}

/// Remote API id of an API definition: explicit `api_id` or the encoded identity.
pub fn api_id(spec: &ApiDefinitionSpec, id: &Identity) -> String {
    if spec.api_id.is_empty() {
        id.encoded()
    } else {
        spec.api_id.clone()
    }
}

/// Internal proxy address of an API with the given remote id.
pub fn internal_address(api_id: &str) -> String {
    format!("{}{}", INTERNAL_SCHEME, api_id)
}
