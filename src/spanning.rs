//! Spanning convention rewrites: open/close delimiters across token runs.
//!
//! Conventions like CHAT retraces mark a run of tokens with an opening
//! token (`<picnic>`) and a closing token (`[//]`). A [`SpanningConvention`]
//! scans each parent's token sequence for such runs, builds one destination
//! annotation covering the run, and rewrites or removes the delimiter
//! tokens (and, when collapsing, the tokens in between).

use std::collections::BTreeMap;

use log::debug;
use regex::{Captures, Regex};

use crate::error::{Error, Result, Warning};
use crate::graph::{AnchorId, AnnotationId, Graph};
use crate::schema::LayerId;

/// An open/close rewrite rule over token runs.
///
/// Freshly constructed, the rule deletes the delimiter tokens and nothing
/// else; builders opt into destination annotations, source rewrites,
/// collapsing, and gap closing.
#[derive(Debug, Clone)]
pub struct SpanningConvention {
    source: LayerId,
    open: Regex,
    close: Regex,
    /// Label template for the opening token, or `None` to delete it.
    open_rewrite: Option<String>,
    /// Label template for the closing token, or `None` to delete it.
    close_rewrite: Option<String>,
    destination: Option<LayerId>,
    /// Template contributing the opening token's material to the
    /// destination label.
    open_label: Option<String>,
    /// Template contributing the closing token's material to the
    /// destination label.
    close_label: Option<String>,
    /// Whether tokens strictly between the delimiters are removed from the
    /// source layer (their labels then feed the destination label).
    collapse: bool,
    delimiter: String,
    /// Annotate the token before the opening match instead of spanning.
    annotate_previous: bool,
    /// After deleting tokens, extend the previous surviving token over the
    /// hole.
    close_gaps: bool,
}

impl SpanningConvention {
    /// Create a rule on a source layer. Both patterns must match a whole
    /// token label; they are anchored here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] when either pattern does not parse.
    pub fn new(source: LayerId, open: &str, close: &str) -> Result<Self> {
        Ok(Self {
            source,
            open: Regex::new(&format!(r"\A(?:{open})\z"))?,
            close: Regex::new(&format!(r"\A(?:{close})\z"))?,
            open_rewrite: None,
            close_rewrite: None,
            destination: None,
            open_label: None,
            close_label: None,
            collapse: false,
            delimiter: " ".into(),
            annotate_previous: false,
            close_gaps: false,
        })
    }

    /// Keep the opening token, relabelled by this template (empty
    /// expansion still deletes it).
    #[must_use]
    pub fn rewrite_open(mut self, template: impl Into<String>) -> Self {
        self.open_rewrite = Some(template.into());
        self
    }

    /// Keep the closing token, relabelled by this template (empty
    /// expansion still deletes it).
    #[must_use]
    pub fn rewrite_close(mut self, template: impl Into<String>) -> Self {
        self.close_rewrite = Some(template.into());
        self
    }

    /// Create one annotation per run on this layer.
    #[must_use]
    pub fn with_destination(mut self, layer: LayerId) -> Self {
        self.destination = Some(layer);
        self
    }

    /// Template over the opening match contributing to the destination
    /// label.
    #[must_use]
    pub fn with_open_label(mut self, template: impl Into<String>) -> Self {
        self.open_label = Some(template.into());
        self
    }

    /// Template over the closing match contributing to the destination
    /// label.
    #[must_use]
    pub fn with_close_label(mut self, template: impl Into<String>) -> Self {
        self.close_label = Some(template.into());
        self
    }

    /// Remove intervening tokens from the source layer, folding their
    /// labels into the destination label.
    #[must_use]
    pub fn collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }

    /// Delimiter between concatenated labels in the destination.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Attach the destination annotation to the token before the opening
    /// match (sharing its anchors) instead of spanning the run.
    #[must_use]
    pub fn annotate_previous(mut self, annotate_previous: bool) -> Self {
        self.annotate_previous = annotate_previous;
        self
    }

    /// Extend the previous surviving token over holes left by deletion.
    #[must_use]
    pub fn close_gaps(mut self, close_gaps: bool) -> Self {
        self.close_gaps = close_gaps;
        self
    }

    /// Apply the rule to every parent group on the source layer.
    ///
    /// A run still open at a parent boundary is left untouched and
    /// surfaced as [`Warning::UnclosedSpan`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SameLayer`] when the destination layer coincides
    /// with the source layer.
    pub fn apply(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        if self.destination == Some(self.source) {
            return Err(Error::SameLayer(
                "spanning destination must differ from source".into(),
            ));
        }
        let mut groups: BTreeMap<Option<AnnotationId>, Vec<(u32, AnnotationId)>> = BTreeMap::new();
        for id in graph.annotations_in(self.source) {
            let a = graph.annotation(id);
            groups.entry(a.parent).or_default().push((a.ordinal, id));
        }

        let mut warnings = Vec::new();
        for (parent, mut tokens) in groups {
            tokens.sort_unstable();
            let tokens: Vec<AnnotationId> = tokens.into_iter().map(|(_, id)| id).collect();
            self.apply_group(graph, &tokens, &mut warnings);
            graph.recompact_ordinals(parent, self.source);
        }
        debug!(
            "spanning convention done on {:?}: {} warning(s)",
            self.source,
            warnings.len()
        );
        Ok(warnings)
    }

    /// One parent's ordered token run.
    fn apply_group(&self, graph: &mut Graph, tokens: &[AnnotationId], warnings: &mut Vec<Warning>) {
        let mut span: Vec<AnnotationId> = Vec::new();
        let mut in_span = false;
        let mut previous: Option<AnnotationId> = None;

        for &token in tokens {
            let label = graph.annotation(token).label.clone();
            if !in_span {
                if self.open.is_match(&label) {
                    in_span = true;
                    span.clear();
                } else if !graph.annotation(token).is_deleted() {
                    previous = Some(token);
                }
            }
            if in_span {
                span.push(token);
                if self.close.is_match(&label) {
                    self.close_span(graph, &span, previous);
                    in_span = false;
                }
            }
        }

        if in_span {
            let label = graph.annotation(span[0]).label.clone();
            warnings.push(Warning::UnclosedSpan { label });
        }
    }

    /// A complete run from opening to closing token, inclusive.
    fn close_span(&self, graph: &mut Graph, span: &[AnnotationId], previous: Option<AnnotationId>) {
        let open_token = span[0];
        let close_token = span[span.len() - 1];
        let open_text = graph.annotation(open_token).label.clone();
        let close_text = graph.annotation(close_token).label.clone();

        if let Some(dest) = self.destination {
            let label = self.destination_label(graph, span, &open_text, &close_text);
            let (from, to) = match (self.annotate_previous, previous) {
                (true, Some(prev)) => (prev, prev),
                _ => (open_token, close_token),
            };
            graph.create_span(from, to, dest, label);
        }

        // Source rewrites. Track the end of the hole left by deletions so
        // gap closing knows where the previous token should now end.
        let mut end_of_gap: Option<AnchorId> = None;
        let rewrite = |graph: &mut Graph,
                           token: AnnotationId,
                           template: Option<&str>,
                           caps: Option<&Captures<'_>>,
                           end_of_gap: &mut Option<AnchorId>| {
            let new_label = match (template, caps) {
                (Some(t), Some(c)) => expand(c, t),
                _ => String::new(),
            };
            if new_label.is_empty() {
                *end_of_gap = Some(graph.annotation(token).end);
                graph.destroy(token);
            } else if new_label != graph.annotation(token).label {
                graph.relabel(token, new_label);
            }
        };

        let open_caps = self.open.captures(&open_text);
        rewrite(
            graph,
            open_token,
            self.open_rewrite.as_deref(),
            open_caps.as_ref(),
            &mut end_of_gap,
        );
        if self.collapse && span.len() > 1 {
            for &mid in &span[1..span.len() - 1] {
                end_of_gap = Some(graph.annotation(mid).end);
                graph.destroy(mid);
            }
        }
        if span.len() > 1 {
            let close_caps = self.close.captures(&close_text);
            rewrite(
                graph,
                close_token,
                self.close_rewrite.as_deref(),
                close_caps.as_ref(),
                &mut end_of_gap,
            );
        }

        if self.close_gaps && self.collapse {
            if let (Some(end_of_gap), Some(prev)) = (end_of_gap, previous) {
                let old_end = graph.annotation(prev).end;
                if old_end != end_of_gap {
                    graph.move_ending_annotations(old_end, end_of_gap);
                }
            }
        }
    }

    /// Destination label: opening material, then (when collapsing)
    /// intervening labels, then closing material, delimiter-joined. A
    /// single-token run applies the closing template to the opening
    /// expansion instead.
    fn destination_label(
        &self,
        graph: &Graph,
        span: &[AnnotationId],
        open_text: &str,
        close_text: &str,
    ) -> String {
        let mut label = String::new();
        if let (Some(template), Some(caps)) = (&self.open_label, self.open.captures(open_text)) {
            label = expand(&caps, template);
        }
        if span.len() == 1 {
            if let Some(template) = &self.close_label {
                let open_expanded = label.clone();
                if let Some(caps) = self.close.captures(&open_expanded) {
                    label = expand(&caps, template);
                }
            }
            return label;
        }
        if self.collapse {
            for &mid in &span[1..span.len() - 1] {
                let mid_label = &graph.annotation(mid).label;
                if !mid_label.is_empty() {
                    if !label.is_empty() {
                        label.push_str(&self.delimiter);
                    }
                    label.push_str(mid_label);
                }
            }
        }
        if let (Some(template), Some(caps)) = (&self.close_label, self.close.captures(close_text)) {
            let close_part = expand(&caps, template);
            if !close_part.is_empty() {
                if !label.is_empty() {
                    label.push_str(&self.delimiter);
                }
                label.push_str(&close_part);
            }
        }
        label
    }
}

fn expand(caps: &Captures<'_>, template: &str) -> String {
    let mut out = String::new();
    caps.expand(template, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Confidence;
    use crate::schema::{Layer, Schema};
    use crate::tokenizer::Tokenizer;

    /// turn > utterance, words parented to the turn, retrace spans too.
    fn retrace_graph(text: &str) -> (Graph, AnnotationId, LayerId, LayerId) {
        let mut schema = Schema::new();
        let turn = schema.add_layer(Layer::interval("turn"));
        let word = schema.add_layer(Layer::interval("word").with_parent(turn));
        let retrace = schema.add_layer(Layer::interval("retrace").with_parent(turn));
        let mut g = Graph::new("t", schema);
        let s = g.anchor_at(0.0, Confidence::Manual);
        let e = g.anchor_at(10.0, Confidence::Manual);
        let t = g.add_annotation(turn, text, s, e, None);
        Tokenizer::new(turn, word).unwrap().apply(&mut g).unwrap();
        (g, t, word, retrace)
    }

    #[test]
    fn test_retrace_collapse() {
        let (mut g, t, word, retrace) = retrace_graph("the <picnic> [//] picnic");

        let warnings = SpanningConvention::new(word, r"<(.*)>", r"\[//\]")
            .unwrap()
            .with_destination(retrace)
            .with_open_label("$1")
            .collapse(true)
            .close_gaps(true)
            .apply(&mut g)
            .unwrap();
        assert!(warnings.is_empty());

        let words: Vec<String> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(words, vec!["the", "picnic"]);

        let retraces = g.children(t, retrace);
        assert_eq!(retraces.len(), 1);
        assert_eq!(g.annotation(retraces[0]).label, "picnic");

        // surviving words are renumbered contiguously
        let ordinals: Vec<u32> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).ordinal)
            .collect();
        assert_eq!(ordinals, vec![1, 2]);
    }

    #[test]
    fn test_span_shares_delimiter_anchors() {
        let (mut g, t, word, noise) = retrace_graph("well &=laughs foo &=end done");
        let words = g.children(t, word);
        let open_start = g.annotation(words[1]).start;
        let close_end = g.annotation(words[3]).end;

        SpanningConvention::new(word, r"&=laughs", r"&=end")
            .unwrap()
            .with_destination(noise)
            .with_open_label("laughs")
            .collapse(true)
            .apply(&mut g)
            .unwrap();

        let spans = g.children(t, noise);
        assert_eq!(spans.len(), 1);
        assert_eq!(g.annotation(spans[0]).start, open_start);
        assert_eq!(g.annotation(spans[0]).end, close_end);
        assert_eq!(g.annotation(spans[0]).label, "laughs foo");
    }

    #[test]
    fn test_single_token_span() {
        let (mut g, t, word, pause) = retrace_graph("one [pause] two");

        SpanningConvention::new(word, r"\[(.*)\]", r"\[.*\]")
            .unwrap()
            .with_destination(pause)
            .with_open_label("$1")
            .apply(&mut g)
            .unwrap();

        let words: Vec<String> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(words, vec!["one", "two"]);
        let spans = g.children(t, pause);
        assert_eq!(spans.len(), 1);
        assert_eq!(g.annotation(spans[0]).label, "pause");
    }

    #[test]
    fn test_single_token_span_while_collapsing() {
        // a token matching both patterns is a complete run on its own,
        // even with collapsing on
        let (mut g, t, word, pause) = retrace_graph("one [pause] two");

        SpanningConvention::new(word, r"\[(.*)\]", r"\[.*\]")
            .unwrap()
            .with_destination(pause)
            .with_open_label("$1")
            .collapse(true)
            .close_gaps(true)
            .apply(&mut g)
            .unwrap();

        let words = g.children(t, word);
        let labels: Vec<&str> = words.iter().map(|w| g.annotation(*w).label.as_str()).collect();
        assert_eq!(labels, vec!["one", "two"]);
        let spans = g.children(t, pause);
        assert_eq!(spans.len(), 1);
        assert_eq!(g.annotation(spans[0]).label, "pause");
        // the hole left by the deleted token is closed
        assert_eq!(g.annotation(words[0]).end, g.annotation(words[1]).start);
    }

    #[test]
    fn test_annotate_previous() {
        let (mut g, t, word, repeat) = retrace_graph("no [/] way");
        let words = g.children(t, word);
        let no_start = g.annotation(words[0]).start;
        let no_end = g.annotation(words[0]).end;

        SpanningConvention::new(word, r"\[/\]", r"\[/\]")
            .unwrap()
            .with_destination(repeat)
            .with_open_label("repeat")
            .annotate_previous(true)
            .apply(&mut g)
            .unwrap();

        let spans = g.children(t, repeat);
        assert_eq!(spans.len(), 1);
        assert_eq!(g.annotation(spans[0]).start, no_start);
        assert_eq!(g.annotation(spans[0]).end, no_end);
        let words: Vec<String> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(words, vec!["no", "way"]);
    }

    #[test]
    fn test_rewrite_keeps_delimiter_tokens() {
        let (mut g, t, word, _) = retrace_graph("say &b word &e end");

        SpanningConvention::new(word, r"&b", r"&e")
            .unwrap()
            .rewrite_open("(")
            .rewrite_close(")")
            .apply(&mut g)
            .unwrap();

        let words: Vec<String> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(words, vec!["say", "(", "word", ")", "end"]);
    }

    #[test]
    fn test_unclosed_span_left_untouched() {
        let (mut g, t, word, retrace) = retrace_graph("the <picnic never closes");

        let warnings = SpanningConvention::new(word, r"<(.*)", r".*\]")
            .unwrap()
            .with_destination(retrace)
            .collapse(true)
            .apply(&mut g)
            .unwrap();

        assert!(matches!(&warnings[0], Warning::UnclosedSpan { label } if label == "<picnic"));
        let words: Vec<String> = g
            .children(t, word)
            .into_iter()
            .map(|w| g.annotation(w).label.clone())
            .collect();
        assert_eq!(words, vec!["the", "<picnic", "never", "closes"]);
        assert!(g.children(t, retrace).is_empty());
    }

    #[test]
    fn test_close_gaps_extends_previous_token() {
        let (mut g, t, word, _) = retrace_graph("the <um uh> cat");
        let words = g.children(t, word);
        let gap_end = g.annotation(words[2]).end;

        SpanningConvention::new(word, r"<.*", r".*>")
            .unwrap()
            .collapse(true)
            .close_gaps(true)
            .apply(&mut g)
            .unwrap();

        let words = g.children(t, word);
        let labels: Vec<&str> = words.iter().map(|w| g.annotation(*w).label.as_str()).collect();
        assert_eq!(labels, vec!["the", "cat"]);
        // "the" now ends where the deleted run ended, which is where "cat"
        // starts
        assert_eq!(g.annotation(words[0]).end, gap_end);
        assert_eq!(g.annotation(words[0]).end, g.annotation(words[1]).start);
    }
}
