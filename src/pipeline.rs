//! Transform composition and batch execution.
//!
//! Every rewrite component implements [`Transform`]; a [`Pipeline`] runs
//! an ordered list of them over one graph, committing a change-tracking
//! transaction per stage. [`Batch`] drives a pipeline over many
//! transcripts with progress counters and cooperative cancellation,
//! checked only at transcript boundaries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, info};

use crate::align::AlignmentResolver;
use crate::convention::Convention;
use crate::error::{Result, Warning};
use crate::graph::Graph;
use crate::spanning::SpanningConvention;
use crate::tokenizer::Tokenizer;

/// A graph rewrite stage.
pub trait Transform {
    /// Rewrite the graph, returning any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Implementations return their component's fatal errors; the graph
    /// may be partially rewritten when they do.
    fn transform(&self, graph: &mut Graph) -> Result<Vec<Warning>>;
}

impl Transform for Tokenizer {
    fn transform(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        self.apply(graph)
    }
}

impl Transform for Convention {
    fn transform(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        self.apply(graph)
    }
}

impl Transform for SpanningConvention {
    fn transform(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        self.apply(graph)
    }
}

impl Transform for AlignmentResolver {
    fn transform(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        self.apply(graph)
    }
}

/// An ordered sequence of transforms.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform + Send + Sync>>,
}

impl Pipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, transform: impl Transform + Send + Sync + 'static) -> Self {
        self.stages.push(Box::new(transform));
        self
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage over one graph. Each stage runs inside its own
    /// change-tracking transaction, committed before the next stage
    /// starts.
    ///
    /// # Errors
    ///
    /// Stops at the first failing stage and returns its error; earlier
    /// stages' edits remain applied and committed.
    pub fn run(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            graph.begin_tracking();
            let result = stage.transform(graph);
            let edits = graph.commit();
            debug!("stage {i} on {:?}: {} edit(s)", graph.id, edits.len());
            warnings.extend(result?);
        }
        Ok(warnings)
    }
}

/// Progress and cancellation state for a run over many transcripts.
///
/// Counters are plain atomics so a host can watch progress (or request
/// cancellation) from another thread while [`Batch::run`] works through
/// the transcripts.
#[derive(Debug, Default)]
pub struct Batch {
    total: AtomicUsize,
    processed: AtomicUsize,
    cancelled: AtomicBool,
}

impl Batch {
    /// A fresh batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(processed, total)` transcript counts.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        (
            self.processed.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }

    /// Request cancellation; honoured at the next transcript boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Run a pipeline over every graph, one transcript at a time.
    ///
    /// A transcript that fails yields an `Err` in its slot and the batch
    /// moves on; cancellation stops the run, leaving the remaining
    /// transcripts untouched and unreported.
    pub fn run(&self, pipeline: &Pipeline, graphs: &mut [Graph]) -> Vec<Result<Vec<Warning>>> {
        self.total.store(graphs.len(), Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        let mut results = Vec::with_capacity(graphs.len());
        for graph in graphs.iter_mut() {
            if self.is_cancelled() {
                info!("batch cancelled after {} transcript(s)", results.len());
                break;
            }
            results.push(pipeline.run(graph));
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::graph::Confidence;
    use crate::schema::{Layer, LayerId, Schema};

    fn word_graph(id: &str, text: &str) -> (Graph, LayerId, LayerId) {
        let mut schema = Schema::new();
        let utterance = schema.add_layer(Layer::interval("utterance"));
        let word = schema.add_layer(Layer::interval("word").with_parent(utterance));
        let mut g = Graph::new(id, schema);
        let s = g.anchor_at(0.0, Confidence::Manual);
        let e = g.anchor_at(5.0, Confidence::Manual);
        g.add_annotation(utterance, text, s, e, None);
        (g, utterance, word)
    }

    #[test]
    fn test_pipeline_runs_stages_in_order() {
        let (mut g, utterance, word) = word_graph("t", "the baby/s");

        let pipeline = Pipeline::new()
            .stage(Tokenizer::new(utterance, word).unwrap())
            .stage(Convention::new(word, r"(.+)y/s", "${1}ies").unwrap());
        let warnings = pipeline.run(&mut g).unwrap();

        assert!(warnings.is_empty());
        assert!(!g.is_tracking());
        let labels: Vec<String> = g
            .annotations_in(word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(labels, vec!["the", "babies"]);
    }

    fn turn_graph(id: &str, line: &str) -> (Graph, LayerId, LayerId) {
        let mut schema = Schema::new();
        let turn = schema.add_layer(Layer::interval("turn"));
        let utterance = schema.add_layer(Layer::interval("utterance").with_parent(turn));
        let mut g = Graph::new(id, schema);
        let s = g.mint_anchor(Confidence::None);
        let e = g.mint_anchor(Confidence::None);
        let t = g.add_annotation(turn, "A", s, e, None);
        g.add_annotation(utterance, line, s, e, Some(t));
        (g, turn, utterance)
    }

    #[test]
    fn test_batch_counts_and_continues_past_failures() {
        let (g1, turn, utterance) = turn_graph("one", "hello there 0_2000");
        let (g2, _, _) = turn_graph("two", "backwards 5000_3000");
        let (g3, _, _) = turn_graph("three", "more words 0_1000");
        let mut graphs = vec![g1, g2, g3];

        let pipeline =
            Pipeline::new().stage(AlignmentResolver::chat_style(turn, utterance).unwrap());
        let batch = Batch::new();
        let results = batch.run(&pipeline, &mut graphs);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Alignment { .. })));
        assert!(results[2].is_ok());
        assert_eq!(batch.progress(), (3, 3));
    }

    #[test]
    fn test_cancellation_stops_at_transcript_boundary() {
        let (g1, utterance, word) = word_graph("one", "hello");
        let (g2, _, _) = word_graph("two", "there");
        let mut graphs = vec![g1, g2];

        let pipeline = Pipeline::new().stage(Tokenizer::new(utterance, word).unwrap());
        let batch = Batch::new();
        batch.cancel();
        let results = batch.run(&pipeline, &mut graphs);

        assert!(results.is_empty());
        assert_eq!(batch.progress(), (0, 2));
        assert!(batch.is_cancelled());
    }
}
