//! # anchorage
//!
//! Transcript annotation graphs for Rust.
//!
//! Turns linear, human-authored transcript text with inline micro-syntax
//! (disfluencies, corrections, morphology, time codes) into a multi-layered,
//! time-anchored annotation graph:
//!
//! - **Graph**: anchors on a shared timeline, labelled annotations between
//!   them, layers with structural rules, offset dedup, change tracking
//! - **Conventions**: single-token rewrites ([`Convention`]) and open/close
//!   delimiter spans ([`SpanningConvention`])
//! - **Alignment**: time-code resolution with overlap and gap repair
//!   ([`AlignmentResolver`])
//! - **Pipelines**: composable [`Transform`] stages, batch progress and
//!   cooperative cancellation
//!
//! ## Quick start
//!
//! ```rust
//! use anchorage::prelude::*;
//!
//! let mut schema = Schema::new();
//! let utterance = schema.add_layer(Layer::interval("utterance"));
//! let word = schema.add_layer(Layer::interval("word").with_parent(utterance));
//!
//! let mut graph = Graph::new("session-1", schema);
//! let start = graph.anchor_at(0.0, Confidence::Manual);
//! let end = graph.anchor_at(2.5, Confidence::Manual);
//! graph.add_annotation(utterance, "the baby/s smiled", start, end, None);
//!
//! let pipeline = Pipeline::new()
//!     .stage(Tokenizer::new(utterance, word)?)
//!     .stage(Convention::new(word, r"(.+)y/s", "${1}ies")?);
//! let warnings = pipeline.run(&mut graph)?;
//! assert!(warnings.is_empty());
//!
//! let words: Vec<&str> = graph
//!     .annotations_in(word)
//!     .into_iter()
//!     .map(|w| graph.annotation(w).label.as_str())
//!     .collect();
//! assert_eq!(words, vec!["the", "babies", "smiled"]);
//! # Ok::<(), anchorage::Error>(())
//! ```
//!
//! ## Layers and anchors
//!
//! Offsets are deduplicated per graph: two annotations anchored at the same
//! time share the same [`AnchorId`], so simultaneity is structural rather
//! than a floating-point comparison. Anchors without offsets chain
//! annotations whose order is known but whose times are not; the
//! [`AlignmentResolver`] fills them in from time codes and repairs the
//! inconsistencies real transcripts contain.

pub mod align;
pub mod convention;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod schema;
pub mod spanning;
pub mod tokenizer;

pub use align::{chat_sync_parser, AlignmentResolver, SyncCode, SyncParser};
pub use convention::Convention;
pub use error::{AlignmentError, Error, Result, Warning};
pub use graph::{
    Anchor, AnchorId, Annotation, AnnotationId, Confidence, Edit, Graph, OffsetUnit,
};
pub use pipeline::{Batch, Pipeline, Transform};
pub use schema::{Layer, LayerAlignment, LayerId, Schema};
pub use spanning::SpanningConvention;
pub use tokenizer::Tokenizer;

pub mod prelude {
    //! Commonly used items, re-exported for convenience.
    //!
    //! ```rust
    //! use anchorage::prelude::*;
    //!
    //! let mut schema = Schema::new();
    //! let word = schema.add_layer(Layer::interval("word"));
    //! let mut graph = Graph::new("t", schema);
    //! let start = graph.anchor_at(0.0, Confidence::Manual);
    //! let end = graph.anchor_at(1.0, Confidence::Manual);
    //! graph.add_annotation(word, "hello", start, end, None);
    //! assert_eq!(graph.annotations_in(word).len(), 1);
    //! ```
    pub use crate::align::{AlignmentResolver, SyncCode};
    pub use crate::convention::Convention;
    pub use crate::error::{AlignmentError, Error, Result, Warning};
    pub use crate::graph::{
        Anchor, AnchorId, Annotation, AnnotationId, Confidence, Edit, Graph, OffsetUnit,
    };
    pub use crate::pipeline::{Batch, Pipeline, Transform};
    pub use crate::schema::{Layer, LayerAlignment, LayerId, Schema};
    pub use crate::spanning::SpanningConvention;
    pub use crate::tokenizer::Tokenizer;
}
