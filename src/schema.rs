//! Layer schema: the structural rules each category of annotation obeys.
//!
//! A [`Layer`] declares how its annotations anchor to the timeline
//! ([`LayerAlignment`]), whether siblings are allowed and may overlap, and
//! whether children must tile their parent's span (`saturated`). Layers form
//! a hierarchy via parent references; the hierarchy is owned by a [`Schema`]
//! which interns layers and hands out [`LayerId`] handles.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Handle to a layer interned in a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub(crate) u32);

/// How annotations on a layer relate to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerAlignment {
    /// Zero-width: attached to another annotation, sharing its anchors.
    Tag,
    /// A single point in time (start and end anchors are equal).
    Instant,
    /// A proper interval between two anchors.
    Interval,
}

/// A named category of annotation with structural rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name, e.g. `"word"` or `"utterance"`.
    pub name: String,
    /// Anchoring discipline for annotations on this layer.
    pub alignment: LayerAlignment,
    /// Whether sibling annotations are allowed at all.
    pub peers: bool,
    /// Whether sibling annotations may overlap temporally.
    pub peers_overlap: bool,
    /// Whether children must tile the parent's span with no gaps and no
    /// overlap. The alignment resolver inserts empty fillers to keep
    /// saturated layers gap-free.
    pub saturated: bool,
    /// Whether annotations with empty labels may remain on this layer.
    /// Conventions tombstone empty-labelled tokens unless this is set.
    pub allow_empty_labels: bool,
    /// Parent layer, or `None` for top-level layers.
    pub parent: Option<LayerId>,
}

impl Layer {
    /// Create an interval layer with default flags (peers allowed, no
    /// overlap, not saturated).
    #[must_use]
    pub fn interval(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alignment: LayerAlignment::Interval,
            peers: true,
            peers_overlap: false,
            saturated: false,
            allow_empty_labels: false,
            parent: None,
        }
    }

    /// Create a tag layer: zero-width annotations attached to a host.
    #[must_use]
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            alignment: LayerAlignment::Tag,
            ..Self::interval(name)
        }
    }

    /// Create an instant layer: point annotations.
    #[must_use]
    pub fn instant(name: impl Into<String>) -> Self {
        Self {
            alignment: LayerAlignment::Instant,
            ..Self::interval(name)
        }
    }

    /// Set the parent layer.
    #[must_use]
    pub fn with_parent(mut self, parent: LayerId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the saturation flag.
    #[must_use]
    pub fn saturated(mut self, saturated: bool) -> Self {
        self.saturated = saturated;
        self
    }

    /// Set whether siblings may overlap.
    #[must_use]
    pub fn peers_overlap(mut self, peers_overlap: bool) -> Self {
        self.peers_overlap = peers_overlap;
        self
    }

    /// Set whether empty labels are allowed to remain.
    #[must_use]
    pub fn allow_empty_labels(mut self, allow: bool) -> Self {
        self.allow_empty_labels = allow;
        self
    }
}

/// Registry of layers for one graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    layers: Vec<Layer>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a layer definition, returning its handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        let id = LayerId(self.layers.len() as u32);
        self.layers.push(layer);
        id
    }

    /// Look up a layer definition.
    #[must_use]
    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id.0 as usize]
    }

    /// Find a layer by name.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn layer_by_name(&self, name: &str) -> Option<LayerId> {
        self.layers
            .iter()
            .position(|l| l.name == name)
            .map(|i| LayerId(i as u32))
    }

    /// Find a layer by name, erroring when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLayer`] when no layer has the given name.
    pub fn require(&self, name: &str) -> Result<LayerId> {
        self.layer_by_name(name)
            .ok_or_else(|| Error::missing_layer(name))
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the schema has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Iterate over `(id, layer)` pairs.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Layer)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, l)| (LayerId(i as u32), l))
    }
}
