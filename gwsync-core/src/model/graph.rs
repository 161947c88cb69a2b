//! GraphQL federation subgraphs and supergraphs.

use serde::{Deserialize, Serialize};

use super::Target;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubGraphSpec {
    /// Federation SDL of the subgraph. APIs referencing the subgraph serve it as their schema.
    pub sdl: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuperGraphSpec {
    #[serde(default)]
    pub subgraph_refs: Vec<Target>,
    /// Subgraph SDLs joined in reference order. Filled during resolution.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub merged_sdl: String,
}

/// Joins subgraph SDLs the way a supergraph exposes them.
pub fn merge_sdl<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sdl_skips_empty() {
        assert_eq!(
            merge_sdl(["type A { id: ID }\n", "", "  type B { id: ID }"]),
            "type A { id: ID }\n\ntype B { id: ID }"
        );
        assert_eq!(merge_sdl(Vec::<&str>::new()), "");
    }
}
