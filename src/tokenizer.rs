//! Whitespace tokenizer: splits span labels into word annotations.

use log::debug;

use crate::error::{Error, Result, Warning};
use crate::graph::{AnnotationId, Confidence, Graph};
use crate::schema::LayerId;

/// Splits the labels of annotations on a source layer into tokens on a
/// destination layer.
///
/// Each token becomes an annotation chained between fresh unknown-offset
/// anchors, except that the first token reuses the span's start anchor and
/// the last token reuses its end anchor, so tokens tile the span exactly.
/// The span annotation itself is left in place with its label intact.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    source: LayerId,
    destination: LayerId,
}

impl Tokenizer {
    /// Create a tokenizer from one layer to another.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SameLayer`] when source and destination coincide.
    pub fn new(source: LayerId, destination: LayerId) -> Result<Self> {
        if source == destination {
            return Err(Error::SameLayer(
                "tokenizer source and destination must differ".into(),
            ));
        }
        Ok(Self {
            source,
            destination,
        })
    }

    /// Tokenize every live annotation on the source layer.
    ///
    /// A span whose label contains no tokens (empty or all whitespace,
    /// such as the fillers alignment inserts on saturated layers) is left
    /// in place and contributes no words.
    ///
    /// # Errors
    ///
    /// Infallible today; the `Result` is the
    /// [`Transform`](crate::pipeline::Transform) contract.
    pub fn apply(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        let spans = graph.annotations_in(self.source);
        debug!(
            "tokenizing {} span(s) on layer {:?}",
            spans.len(),
            self.source
        );
        for span in spans {
            if !self.tokenize_one(graph, span) {
                debug!("span {span:?} has no tokens, skipped");
            }
        }
        Ok(Vec::new())
    }

    /// Tokenize one span. Returns false when the label has no tokens.
    fn tokenize_one(&self, graph: &mut Graph, span: AnnotationId) -> bool {
        let a = graph.annotation(span);
        let label = a.label.clone();
        let (span_start, span_end, span_layer, span_parent) = (a.start, a.end, a.layer, a.parent);
        let tokens: Vec<&str> = label.split_whitespace().collect();
        if tokens.is_empty() {
            return false;
        }

        // Tokens parent to the span itself when the destination layer is a
        // child of the source layer, otherwise to the span's parent.
        let parent = if graph.schema.layer(self.destination).parent == Some(span_layer) {
            Some(span)
        } else {
            span_parent
        };

        let last = tokens.len() - 1;
        let mut start = span_start;
        for (i, token) in tokens.iter().enumerate() {
            let end = if i == last {
                span_end
            } else {
                graph.mint_anchor(Confidence::Automatic)
            };
            graph.add_annotation(self.destination, *token, start, end, parent);
            start = end;
        }
        true
    }
}
