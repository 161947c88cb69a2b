use super::{ResourceKind, reference};
use crate::links::{Addresses, LinkError, Reference};
use crate::model::graph::merge_sdl;
use crate::model::{Kind, SubGraphSpec, SuperGraphSpec};

/// Federation subgraphs. Store-only.
pub struct SubGraphs;

impl ResourceKind for SubGraphs {
    const KIND: Kind = Kind::SubGraph;

    type Spec = SubGraphSpec;

    fn references(_spec: &SubGraphSpec, _namespace: &str) -> Result<Vec<Reference>, String> {
        Ok(Vec::new())
    }

    fn rewrite(
        spec: SubGraphSpec,
        _namespace: &str,
        _addresses: &Addresses,
    ) -> Result<SubGraphSpec, LinkError> {
        Ok(spec)
    }

    fn validate(spec: &SubGraphSpec) -> Result<(), String> {
        if spec.sdl.trim().is_empty() {
            return Err("sdl is empty".to_string());
        }
        Ok(())
    }
}

/// Federation supergraphs. Store-only; the merged SDL is served by APIs referencing them.
pub struct SuperGraphs;

impl ResourceKind for SuperGraphs {
    const KIND: Kind = Kind::SuperGraph;

    type Spec = SuperGraphSpec;

    fn references(spec: &SuperGraphSpec, namespace: &str) -> Result<Vec<Reference>, String> {
        spec.subgraph_refs
            .iter()
            .map(|t| reference("subgraph_refs", Kind::SubGraph, t, namespace))
            .collect()
    }

    fn rewrite(
        mut spec: SuperGraphSpec,
        namespace: &str,
        addresses: &Addresses,
    ) -> Result<SuperGraphSpec, LinkError> {
        let mut sdls = Vec::with_capacity(spec.subgraph_refs.len());
        for target in std::mem::take(&mut spec.subgraph_refs) {
            let resolved = addresses.require(Kind::SubGraph, &target.identity(namespace))?;
            sdls.push(resolved.address.clone());
        }
        spec.merged_sdl = merge_sdl(sdls.iter().map(String::as_str));
        Ok(spec)
    }

    fn validate(spec: &SuperGraphSpec) -> Result<(), String> {
        if spec.merged_sdl.is_empty() {
            return Err("supergraph merges no subgraphs".to_string());
        }
        Ok(())
    }
}
