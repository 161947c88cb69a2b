//! Per-kind capabilities plugged into the generic reconciler.

mod api;
mod cert;
mod context;
mod graph;
mod policy;

pub use api::ApiDefinitions;
pub use cert::Certificates;
pub use context::OperatorContexts;
pub use graph::{SubGraphs, SuperGraphs};
pub use policy::SecurityPolicies;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::RemoteKind;
use crate::hash::HashRules;
use crate::links::{Addresses, LinkError, Reference};
use crate::model::{Environment, Identity, Kind, NumberMode, Resource, Target};

/// What the reconciler needs to know about a resource kind.
pub trait ResourceKind: Send + Sync + 'static {
    const KIND: Kind;

    /// Kinds whose remote id is derived from content are replaced, not updated.
    const REPLACE_ON_CHANGE: bool = false;

    type Spec: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Remote collection. `None` for kinds that only live in the store.
    fn remote_kind() -> Option<RemoteKind> {
        None
    }

    /// Typed references of `spec` in document order.
    ///
    /// `namespace` is the owner's namespace, used for targets without one.
    /// Errors describe references that can never resolve.
    fn references(spec: &Self::Spec, namespace: &str) -> Result<Vec<Reference>, String>;

    /// Replaces every typed reference with its resolved value and clears it.
    fn rewrite(
        spec: Self::Spec,
        namespace: &str,
        addresses: &Addresses,
    ) -> Result<Self::Spec, LinkError>;

    /// Operator context the resource is pushed through.
    fn context(_spec: &Self::Spec) -> Option<&Target> {
        None
    }

    /// Fills fields derived from the identity and environment.
    fn prepare(_spec: &mut Self::Spec, _id: &Identity, _env: &Environment) {}

    /// Checks a resolved spec before it is pushed.
    fn validate(_spec: &Self::Spec) -> Result<(), String> {
        Ok(())
    }

    fn hash_rules() -> HashRules {
        HashRules::DEFAULT
    }

    /// Body sent to the control plane.
    fn wire_body(spec: &Self::Spec, _mode: NumberMode) -> serde_json::Result<Value> {
        serde_json::to_value(spec)
    }

    /// Remote id known before the first push, used to adopt existing objects.
    fn planned_remote_id(_spec: &Self::Spec, _env: &Environment) -> Option<String> {
        None
    }
}

fn references_of_kind<K: ResourceKind>(resource: &Resource) -> Vec<Reference> {
    resource
        .decode_spec::<K::Spec>()
        .ok()
        .and_then(|spec| K::references(&spec, &resource.meta.namespace).ok())
        .unwrap_or_default()
}

/// Typed references held by any stored resource. Undecodable specs hold none.
pub fn references_of(resource: &Resource) -> Vec<Reference> {
    match resource.kind {
        Kind::ApiDefinition => references_of_kind::<ApiDefinitions>(resource),
        Kind::SecurityPolicy => references_of_kind::<SecurityPolicies>(resource),
        Kind::Certificate => references_of_kind::<Certificates>(resource),
        Kind::SubGraph => references_of_kind::<SubGraphs>(resource),
        Kind::SuperGraph => references_of_kind::<SuperGraphs>(resource),
        Kind::OperatorContext => references_of_kind::<OperatorContexts>(resource),
    }
}

/// Identity of the operator context a resource names, if any.
pub fn context_of<K: ResourceKind>(resource: &Resource) -> Option<Identity> {
    let spec = resource.decode_spec::<K::Spec>().ok()?;
    K::context(&spec).map(|t| t.identity(&resource.meta.namespace))
}

/// Validates a target and turns it into a reference.
pub(crate) fn reference(
    field: &'static str,
    kind: Kind,
    target: &Target,
    namespace: &str,
) -> Result<Reference, String> {
    target
        .validate()
        .map_err(|e| format!("{}: {}", field, e))?;
    Ok(Reference::new(field, kind, target.identity(namespace)))
}
