//! Anchor graph: annotations anchored to points on a shared timeline.
//!
//! A [`Graph`] owns two arenas, one of [`Anchor`]s (timeline points, whose
//! offsets may be unknown) and one of [`Annotation`]s (labelled intervals
//! between two anchors, on a layer, optionally inside a parent annotation).
//! Anchors with known offsets are deduplicated: asking for an anchor at an
//! offset that already exists returns the existing handle, so simultaneous
//! events share structure by construction.
//!
//! Mutations can be tracked: between [`Graph::begin_tracking`] and
//! [`Graph::commit`] every structural change is recorded as an [`Edit`],
//! which lets a pipeline report exactly what each stage did.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{LayerAlignment, LayerId, Schema};

// ============================================================================
// Handles
// ============================================================================

/// Handle to an anchor in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub(crate) u32);

/// Handle to an annotation in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationId(pub(crate) u32);

// ============================================================================
// Confidence
// ============================================================================

/// How much an offset or label is to be trusted.
///
/// Ordered: `None < Automatic < Default < Manual`. Alignment repairs only
/// ever raise confidence, never lower it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Confidence {
    /// No information at all.
    #[default]
    None,
    /// Produced by an automatic process (forced alignment, interpolation).
    Automatic,
    /// A default assumption, e.g. evenly spread offsets.
    Default,
    /// Confirmed by a human.
    Manual,
}

// ============================================================================
// Anchors and annotations
// ============================================================================

/// Unit the anchor offsets are measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OffsetUnit {
    /// Seconds from the start of the recording.
    #[default]
    Seconds,
    /// Character positions in the source text.
    Characters,
}

/// A point on the graph's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Offset in the graph's [`OffsetUnit`], or `None` when unknown.
    pub offset: Option<f64>,
    /// Trust in the offset.
    pub confidence: Confidence,
}

/// A labelled interval between two anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Layer this annotation belongs to.
    pub layer: LayerId,
    /// The label, e.g. the orthography of a word.
    pub label: String,
    /// Start anchor.
    pub start: AnchorId,
    /// End anchor.
    pub end: AnchorId,
    /// Containing annotation, if any.
    pub parent: Option<AnnotationId>,
    /// 1-based position among live siblings (same layer, same parent).
    pub ordinal: u32,
    /// Trust in the label.
    pub confidence: Confidence,
    /// Transient per-annotation scratch used by rewrite passes. Never
    /// serialized.
    #[serde(skip)]
    pub marker: Option<String>,
    /// Tombstone flag. Destroyed annotations stay in the arena so handles
    /// remain stable; every query skips them.
    pub(crate) deleted: bool,
}

impl Annotation {
    /// Whether this annotation has been destroyed.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

// ============================================================================
// Change tracking
// ============================================================================

/// One recorded structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Edit {
    /// A new anchor was minted.
    CreateAnchor(AnchorId),
    /// An anchor's offset changed.
    SetOffset {
        anchor: AnchorId,
        old: Option<f64>,
        new: Option<f64>,
    },
    /// A new annotation was created.
    CreateAnnotation(AnnotationId),
    /// An annotation was tombstoned.
    DestroyAnnotation(AnnotationId),
    /// An annotation's label changed.
    Relabel {
        annotation: AnnotationId,
        old: String,
        new: String,
    },
    /// An annotation moved to different anchors.
    Reanchor {
        annotation: AnnotationId,
        old_start: AnchorId,
        old_end: AnchorId,
        new_start: AnchorId,
        new_end: AnchorId,
    },
    /// An annotation moved to a different parent.
    Reparent {
        annotation: AnnotationId,
        old: Option<AnnotationId>,
        new: Option<AnnotationId>,
    },
}

// ============================================================================
// Graph
// ============================================================================

/// An annotation graph over a shared timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    /// Transcript identifier.
    pub id: String,
    /// Layer definitions.
    pub schema: Schema,
    anchors: Vec<Anchor>,
    annotations: Vec<Annotation>,
    /// Known offsets, quantized to granularity ticks, mapped to their
    /// canonical anchor. This is what makes anchor creation idempotent.
    offset_index: BTreeMap<i64, AnchorId>,
    offset_unit: OffsetUnit,
    offset_granularity: f64,
    #[serde(skip)]
    tracker: Option<Vec<Edit>>,
}

impl Graph {
    /// Create an empty graph with the default granularity (a millisecond,
    /// or a thousandth of a character position).
    #[must_use]
    pub fn new(id: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: id.into(),
            schema,
            anchors: Vec::new(),
            annotations: Vec::new(),
            offset_index: BTreeMap::new(),
            offset_unit: OffsetUnit::default(),
            offset_granularity: 0.001,
            tracker: None,
        }
    }

    /// Set the offset unit.
    #[must_use]
    pub fn with_offset_unit(mut self, unit: OffsetUnit) -> Self {
        self.offset_unit = unit;
        self
    }

    /// Set the offset granularity: offsets closer than half a granularity
    /// step are treated as the same point.
    #[must_use]
    pub fn with_granularity(mut self, granularity: f64) -> Self {
        self.offset_granularity = granularity;
        self
    }

    /// The offset unit.
    #[must_use]
    pub fn offset_unit(&self) -> OffsetUnit {
        self.offset_unit
    }

    /// The offset granularity.
    #[must_use]
    pub fn offset_granularity(&self) -> f64 {
        self.offset_granularity
    }

    #[allow(clippy::cast_possible_truncation)]
    fn tick(&self, offset: f64) -> i64 {
        (offset / self.offset_granularity).round() as i64
    }

    fn record(&mut self, edit: Edit) {
        if let Some(edits) = &mut self.tracker {
            edits.push(edit);
        }
    }

    // ------------------------------------------------------------------
    // Anchors
    // ------------------------------------------------------------------

    /// The anchor behind a handle.
    #[must_use]
    pub fn anchor(&self, id: AnchorId) -> &Anchor {
        &self.anchors[id.0 as usize]
    }

    /// The offset of an anchor, if known.
    #[must_use]
    pub fn offset(&self, id: AnchorId) -> Option<f64> {
        self.anchors[id.0 as usize].offset
    }

    /// Mint a fresh anchor with no offset.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mint_anchor(&mut self, confidence: Confidence) -> AnchorId {
        let id = AnchorId(self.anchors.len() as u32);
        self.anchors.push(Anchor {
            offset: None,
            confidence,
        });
        self.record(Edit::CreateAnchor(id));
        id
    }

    /// Get the anchor at an offset, creating it if none exists yet.
    ///
    /// Offsets within half a granularity step of an existing anchor reuse
    /// it; a hit with higher confidence upgrades the stored confidence.
    /// Calling this twice with the same offset always returns the same
    /// handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn anchor_at(&mut self, offset: f64, confidence: Confidence) -> AnchorId {
        let tick = self.tick(offset);
        if let Some(&id) = self.offset_index.get(&tick) {
            let anchor = &mut self.anchors[id.0 as usize];
            if confidence > anchor.confidence {
                anchor.confidence = confidence;
            }
            return id;
        }
        let id = AnchorId(self.anchors.len() as u32);
        self.anchors.push(Anchor {
            offset: Some(offset),
            confidence,
        });
        self.offset_index.insert(tick, id);
        self.record(Edit::CreateAnchor(id));
        id
    }

    /// Set an anchor's offset, keeping the dedup index current.
    pub fn set_offset(&mut self, id: AnchorId, offset: Option<f64>, confidence: Confidence) {
        let old = self.anchors[id.0 as usize].offset;
        if let Some(o) = old {
            let tick = self.tick(o);
            if self.offset_index.get(&tick) == Some(&id) {
                self.offset_index.remove(&tick);
            }
        }
        if let Some(o) = offset {
            let tick = self.tick(o);
            self.offset_index.entry(tick).or_insert(id);
        }
        let anchor = &mut self.anchors[id.0 as usize];
        anchor.offset = offset;
        anchor.confidence = confidence;
        self.record(Edit::SetOffset {
            anchor: id,
            old,
            new: offset,
        });
    }

    /// Number of anchors ever minted, tombstoned or not.
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    // ------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------

    /// The annotation behind a handle.
    #[must_use]
    pub fn annotation(&self, id: AnnotationId) -> &Annotation {
        &self.annotations[id.0 as usize]
    }

    /// Mutable access to an annotation (for marker scratch space).
    pub fn annotation_mut(&mut self, id: AnnotationId) -> &mut Annotation {
        &mut self.annotations[id.0 as usize]
    }

    /// Create an annotation. Its ordinal is one past the current live
    /// sibling count.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_annotation(
        &mut self,
        layer: LayerId,
        label: impl Into<String>,
        start: AnchorId,
        end: AnchorId,
        parent: Option<AnnotationId>,
    ) -> AnnotationId {
        let ordinal = self
            .annotations
            .iter()
            .filter(|a| !a.deleted && a.layer == layer && a.parent == parent)
            .count() as u32
            + 1;
        let id = AnnotationId(self.annotations.len() as u32);
        self.annotations.push(Annotation {
            layer,
            label: label.into(),
            start,
            end,
            parent,
            ordinal,
            confidence: Confidence::Manual,
            marker: None,
            deleted: false,
        });
        self.record(Edit::CreateAnnotation(id));
        id
    }

    /// Change an annotation's label.
    pub fn relabel(&mut self, id: AnnotationId, label: impl Into<String>) {
        let new = label.into();
        let old = std::mem::replace(&mut self.annotations[id.0 as usize].label, new.clone());
        self.record(Edit::Relabel {
            annotation: id,
            old,
            new,
        });
    }

    /// Tombstone an annotation. The handle stays valid but every query
    /// skips it from now on.
    pub fn destroy(&mut self, id: AnnotationId) {
        if !self.annotations[id.0 as usize].deleted {
            self.annotations[id.0 as usize].deleted = true;
            self.record(Edit::DestroyAnnotation(id));
        }
    }

    /// Move an annotation to different anchors.
    pub fn reanchor(&mut self, id: AnnotationId, start: AnchorId, end: AnchorId) {
        let a = &mut self.annotations[id.0 as usize];
        let (old_start, old_end) = (a.start, a.end);
        if old_start == start && old_end == end {
            return;
        }
        a.start = start;
        a.end = end;
        self.record(Edit::Reanchor {
            annotation: id,
            old_start,
            old_end,
            new_start: start,
            new_end: end,
        });
    }

    /// Move an annotation to a different parent.
    pub fn set_parent(&mut self, id: AnnotationId, parent: Option<AnnotationId>) {
        let old = self.annotations[id.0 as usize].parent;
        if old == parent {
            return;
        }
        self.annotations[id.0 as usize].parent = parent;
        self.record(Edit::Reparent {
            annotation: id,
            old,
            new: parent,
        });
    }

    // ------------------------------------------------------------------
    // Queries (all skip tombstones)
    // ------------------------------------------------------------------

    #[allow(clippy::cast_possible_truncation)]
    fn live(&self) -> impl Iterator<Item = (AnnotationId, &Annotation)> {
        self.annotations
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.deleted)
            .map(|(i, a)| (AnnotationId(i as u32), a))
    }

    /// Live annotations on a layer, in creation order.
    #[must_use]
    pub fn annotations_in(&self, layer: LayerId) -> Vec<AnnotationId> {
        self.live()
            .filter(|(_, a)| a.layer == layer)
            .map(|(id, _)| id)
            .collect()
    }

    /// Live children of a parent on a layer, sorted by ordinal.
    #[must_use]
    pub fn children(&self, parent: AnnotationId, layer: LayerId) -> Vec<AnnotationId> {
        let mut kids: Vec<(u32, AnnotationId)> = self
            .live()
            .filter(|(_, a)| a.layer == layer && a.parent == Some(parent))
            .map(|(id, a)| (a.ordinal, id))
            .collect();
        kids.sort_unstable();
        kids.into_iter().map(|(_, id)| id).collect()
    }

    /// Live tag annotations on a layer sharing both anchors with a host.
    #[must_use]
    pub fn tags_of(&self, host: AnnotationId, layer: LayerId) -> Vec<AnnotationId> {
        let h = self.annotation(host);
        let (start, end) = (h.start, h.end);
        self.live()
            .filter(|(id, a)| {
                *id != host
                    && a.layer == layer
                    && a.start == start
                    && a.end == end
                    && self.schema.layer(a.layer).alignment == LayerAlignment::Tag
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Live annotations whose start is the given anchor.
    #[must_use]
    pub fn starting_at(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.live()
            .filter(|(_, a)| a.start == anchor)
            .map(|(id, _)| id)
            .collect()
    }

    /// Live annotations whose end is the given anchor.
    #[must_use]
    pub fn ending_at(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.live()
            .filter(|(_, a)| a.end == anchor)
            .map(|(id, _)| id)
            .collect()
    }

    /// The narrowest live annotation on a layer whose (known) offsets
    /// contain the given annotation's offsets.
    #[must_use]
    pub fn enclosing(&self, id: AnnotationId, layer: LayerId) -> Option<AnnotationId> {
        let a = self.annotation(id);
        let (start, end) = (self.offset(a.start)?, self.offset(a.end)?);
        self.live()
            .filter(|(other, _)| *other != id)
            .filter(|(_, o)| o.layer == layer)
            .filter_map(|(oid, o)| {
                let (os, oe) = (self.offset(o.start)?, self.offset(o.end)?);
                (os <= start && end <= oe).then_some((oe - os, oid))
            })
            .min_by(|(w1, _), (w2, _)| w1.total_cmp(w2))
            .map(|(_, oid)| oid)
    }

    // ------------------------------------------------------------------
    // Bulk anchor surgery
    // ------------------------------------------------------------------

    /// Rewrite every live reference to one anchor so it points at another.
    pub fn redirect_anchor(&mut self, from: AnchorId, to: AnchorId) {
        if from == to {
            return;
        }
        let ids: Vec<AnnotationId> = self
            .live()
            .filter(|(_, a)| a.start == from || a.end == from)
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let a = self.annotation(id);
            let start = if a.start == from { to } else { a.start };
            let end = if a.end == from { to } else { a.end };
            self.reanchor(id, start, end);
        }
    }

    /// Move the start of every live annotation starting at one anchor to
    /// another.
    pub fn move_starting_annotations(&mut self, from: AnchorId, to: AnchorId) {
        if from == to {
            return;
        }
        for id in self.starting_at(from) {
            let end = self.annotation(id).end;
            self.reanchor(id, to, end);
        }
    }

    /// Move the end of every live annotation ending at one anchor to
    /// another.
    pub fn move_ending_annotations(&mut self, from: AnchorId, to: AnchorId) {
        if from == to {
            return;
        }
        for id in self.ending_at(from) {
            let start = self.annotation(id).start;
            self.reanchor(id, start, to);
        }
    }

    // ------------------------------------------------------------------
    // Tagging and spanning helpers
    // ------------------------------------------------------------------

    /// Attach a tag to a host annotation: same anchors, destination layer.
    ///
    /// The tag's parent is inferred: the host itself when the destination
    /// layer is a child of the host's layer, otherwise the host's parent
    /// when the destination shares it.
    pub fn create_tag(
        &mut self,
        host: AnnotationId,
        layer: LayerId,
        label: impl Into<String>,
    ) -> AnnotationId {
        let h = self.annotation(host);
        let (start, end, host_layer, host_parent) = (h.start, h.end, h.layer, h.parent);
        let parent = self.infer_parent(layer, host, host_layer, host_parent);
        self.add_annotation(layer, label, start, end, parent)
    }

    /// Create a spanning annotation from one annotation's start to
    /// another's end, with the same parent inference as [`Self::create_tag`]
    /// applied to the first annotation.
    pub fn create_span(
        &mut self,
        from: AnnotationId,
        to: AnnotationId,
        layer: LayerId,
        label: impl Into<String>,
    ) -> AnnotationId {
        let f = self.annotation(from);
        let (start, from_layer, from_parent) = (f.start, f.layer, f.parent);
        let end = self.annotation(to).end;
        let parent = self.infer_parent(layer, from, from_layer, from_parent);
        self.add_annotation(layer, label, start, end, parent)
    }

    fn infer_parent(
        &self,
        dest: LayerId,
        host: AnnotationId,
        host_layer: LayerId,
        host_parent: Option<AnnotationId>,
    ) -> Option<AnnotationId> {
        let dest_parent = self.schema.layer(dest).parent;
        if dest_parent == Some(host_layer) {
            Some(host)
        } else if dest_parent.is_some() && dest_parent == host_parent.map(|p| self.annotation(p).layer) {
            host_parent
        } else {
            None
        }
    }

    /// Renumber the live children of a parent on a layer 1..=n, preserving
    /// their current ordinal order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn recompact_ordinals(&mut self, parent: Option<AnnotationId>, layer: LayerId) {
        let mut kids: Vec<(u32, AnnotationId)> = self
            .live()
            .filter(|(_, a)| a.layer == layer && a.parent == parent)
            .map(|(id, a)| (a.ordinal, id))
            .collect();
        kids.sort_unstable();
        for (i, (_, id)) in kids.into_iter().enumerate() {
            self.annotations[id.0 as usize].ordinal = i as u32 + 1;
        }
    }

    // ------------------------------------------------------------------
    // Change tracking
    // ------------------------------------------------------------------

    /// Start recording edits. Any edits already recorded are discarded.
    pub fn begin_tracking(&mut self) {
        self.tracker = Some(Vec::new());
    }

    /// Stop recording and return the edits made since
    /// [`Self::begin_tracking`].
    pub fn commit(&mut self) -> Vec<Edit> {
        self.tracker.take().unwrap_or_default()
    }

    /// Whether edits are currently being recorded.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
