//! Generation tracking for managed child resources
//!
//! After every apply the reconciler records the child's coordinates and the
//! generation it last wrote. A spec's `observedGeneration` is bumped only
//! when every recorded tuple matches the live child, which makes the pair a
//! cheap convergence signal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The generation last reconciled for one managed child resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    /// API group of the child (empty for core resources)
    pub group: String,

    /// API version of the child
    pub version: String,

    /// Plural resource name of the child
    pub resource: String,

    /// Namespace of the child (empty for cluster-scoped resources)
    #[serde(default)]
    pub namespace: String,

    /// Name of the child
    pub name: String,

    /// `metadata.generation` observed when the child was last applied
    #[serde(default)]
    pub last_generation: i64,
}

/// Coordinates of one resource a spec currently owns.
///
/// The flat list of these on a spec's status is the operator's public
/// inventory; its cardinality is a black-box correctness oracle.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelatedResourceMeta {
    /// API group of the resource (empty for core resources)
    pub group: String,

    /// API version of the resource
    pub version: String,

    /// Plural resource name
    pub resource: String,

    /// Namespace (empty for cluster-scoped resources)
    #[serde(default)]
    pub namespace: String,

    /// Resource name
    pub name: String,
}

/// Merge a generation record into a status list, keyed by coordinates
pub fn set_generation(generations: &mut Vec<GenerationStatus>, generation: GenerationStatus) {
    match generations.iter_mut().find(|g| {
        g.group == generation.group
            && g.resource == generation.resource
            && g.namespace == generation.namespace
            && g.name == generation.name
    }) {
        Some(existing) => *existing = generation,
        None => generations.push(generation),
    }
}

/// Find the recorded generation for a child by coordinates
pub fn find_generation<'a>(
    generations: &'a [GenerationStatus],
    wanted: &GenerationStatus,
) -> Option<&'a GenerationStatus> {
    generations.iter().find(|g| {
        g.group == wanted.group
            && g.resource == wanted.resource
            && g.namespace == wanted.namespace
            && g.name == wanted.name
    })
}
