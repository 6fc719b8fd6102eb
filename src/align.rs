//! Alignment resolution: reconciling partially-timed spans into a
//! consistent timeline.
//!
//! Transcripts carry time codes on some spans (utterances) and none on
//! others. The [`AlignmentResolver`] walks each turn's span sequence,
//! applies the time codes it can parse out of span labels, and repairs the
//! inconsistencies human-aligned transcripts actually contain: overlapping
//! spans, gaps on saturated layers, instantaneous spans, and trailing
//! spans with no end time.
//!
//! Out-of-order codes (start after end) are fatal for the transcript, but
//! the scan continues so every such error is reported at once.

use std::fmt;

use log::{debug, warn};
use regex::Regex;

use crate::error::{AlignmentError, Error, Result, Warning};
use crate::graph::{AnchorId, AnnotationId, Confidence, Graph};
use crate::schema::LayerId;

/// A parsed time code: start and end offsets for one span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCode {
    pub start: f64,
    pub end: f64,
}

/// Label parser: given a span label, return the label with the code
/// stripped plus the code, or `None` when the span carries no code.
pub type SyncParser = Box<dyn Fn(&str) -> Option<(String, SyncCode)> + Send + Sync>;

/// Parser for CHAT-style trailing codes: `some words 12345_67890`, with
/// offsets in milliseconds.
///
/// # Errors
///
/// Never fails in practice; the `Result` covers regex construction.
pub fn chat_sync_parser() -> Result<SyncParser> {
    let pattern = Regex::new(r"^(.*?)(\d+)_(\d+)$")?;
    Ok(Box::new(move |label: &str| {
        let caps = pattern.captures(label)?;
        let start = caps[2].parse::<f64>().ok()? / 1000.0;
        let end = caps[3].parse::<f64>().ok()? / 1000.0;
        Some((caps[1].trim().to_string(), SyncCode { start, end }))
    }))
}

/// Resolves time codes on a span layer, turn by turn.
pub struct AlignmentResolver {
    turn_layer: LayerId,
    span_layer: LayerId,
    parser: SyncParser,
    duration_hint: Option<f64>,
    known_speakers: Option<Vec<String>>,
}

impl fmt::Debug for AlignmentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignmentResolver")
            .field("turn_layer", &self.turn_layer)
            .field("span_layer", &self.span_layer)
            .field("duration_hint", &self.duration_hint)
            .field("known_speakers", &self.known_speakers)
            .finish_non_exhaustive()
    }
}

impl AlignmentResolver {
    /// Create a resolver with a custom label parser.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SameLayer`] when turn and span layers coincide.
    pub fn new(
        turn_layer: LayerId,
        span_layer: LayerId,
        parser: impl Fn(&str) -> Option<(String, SyncCode)> + Send + Sync + 'static,
    ) -> Result<Self> {
        if turn_layer == span_layer {
            return Err(Error::SameLayer(
                "alignment turn and span layers must differ".into(),
            ));
        }
        Ok(Self {
            turn_layer,
            span_layer,
            parser: Box::new(parser),
            duration_hint: None,
            known_speakers: None,
        })
    }

    /// Create a resolver for CHAT-style trailing millisecond codes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SameLayer`] when turn and span layers coincide.
    pub fn chat_style(turn_layer: LayerId, span_layer: LayerId) -> Result<Self> {
        let parser = chat_sync_parser()?;
        if turn_layer == span_layer {
            return Err(Error::SameLayer(
                "alignment turn and span layers must differ".into(),
            ));
        }
        Ok(Self {
            turn_layer,
            span_layer,
            parser,
            duration_hint: None,
            known_speakers: None,
        })
    }

    /// Offset used for a trailing unaligned end when nothing better is
    /// known (typically the media duration).
    #[must_use]
    pub fn with_duration_hint(mut self, duration: f64) -> Self {
        self.duration_hint = Some(duration);
        self
    }

    /// Declare the expected speakers; turns labelled with anyone else are
    /// surfaced as [`Warning::UnknownSpeaker`].
    #[must_use]
    pub fn with_known_speakers<I, S>(mut self, speakers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_speakers = Some(speakers.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve every turn in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Alignment`] carrying every out-of-order code found;
    /// all other inconsistencies are repaired and reported as warnings.
    pub fn apply(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        for turn in graph.annotations_in(self.turn_layer) {
            if let Some(known) = &self.known_speakers {
                let speaker = &graph.annotation(turn).label;
                if !known.iter().any(|s| s == speaker) {
                    warn!("undeclared speaker {speaker:?}");
                    warnings.push(Warning::UnknownSpeaker {
                        id: speaker.clone(),
                    });
                }
            }
            self.resolve_turn(graph, turn, &mut warnings, &mut errors);
        }
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(Error::Alignment { errors })
        }
    }

    fn resolve_turn(
        &self,
        graph: &mut Graph,
        turn: AnnotationId,
        warnings: &mut Vec<Warning>,
        errors: &mut Vec<AlignmentError>,
    ) {
        let spans = graph.children(turn, self.span_layer);
        debug!("resolving {} span(s) in turn {turn:?}", spans.len());
        let saturated = graph.schema.layer(self.span_layer).saturated;
        let peers_overlap = graph.schema.layer(self.span_layer).peers_overlap;

        let mut prev: Option<AnnotationId> = None;
        let mut last_aligned: Option<AnchorId> = None;

        for &span in &spans {
            let label = graph.annotation(span).label.clone();
            if let Some((stripped, code)) = (self.parser)(&label) {
                graph.relabel(span, stripped.clone());
                let start = graph.anchor_at(code.start, Confidence::Manual);
                if let Some(p) = prev {
                    self.avoid_instantaneous(graph, start, p, warnings);
                }
                let end = graph.anchor_at(code.end, Confidence::Manual);

                let mut effective = start;
                if code.start > code.end {
                    errors.push(AlignmentError {
                        label: stripped,
                        start: code.start,
                        end: code.end,
                    });
                } else if let Some(p) = prev {
                    effective = self.check_against_previous(
                        graph, turn, span, p, start, code, saturated, peers_overlap, warnings,
                    );
                }
                seat(graph, span, effective, end);
                last_aligned = Some(end);
            }
            prev = Some(span);
        }

        self.finish_turn(graph, turn, last_aligned, warnings);
    }

    /// Compare a newly aligned span against its predecessor, filling gaps
    /// and resolving overlaps. Returns the start anchor the span should
    /// actually use.
    #[allow(clippy::too_many_arguments)]
    fn check_against_previous(
        &self,
        graph: &mut Graph,
        turn: AnnotationId,
        span: AnnotationId,
        prev: AnnotationId,
        start: AnchorId,
        code: SyncCode,
        saturated: bool,
        peers_overlap: bool,
        warnings: &mut Vec<Warning>,
    ) -> AnchorId {
        let prev_end = graph.annotation(prev).end;
        let Some(pe) = graph.offset(prev_end) else {
            // The previous span had no end time; everything ending there
            // now ends where this span starts. When spans are chained the
            // seat step handles it through the shared anchor.
            if prev_end != graph.annotation(span).start {
                graph.move_ending_annotations(prev_end, start);
            }
            return start;
        };

        if saturated && code.start - pe > graph.offset_granularity() {
            warn!("gap {pe}-{} on saturated layer, filling", code.start);
            graph.add_annotation(self.span_layer, "", prev_end, start, Some(turn));
            warnings.push(Warning::GapFilled {
                from: pe,
                to: code.start,
            });
        }

        if !peers_overlap && code.start < pe {
            if code.end > pe {
                // partial overlap: trust the earlier end time
                warn!(
                    "span {}-{} overlaps previous ending {pe}, snapping start",
                    code.start, code.end
                );
                warnings.push(Warning::Overlap {
                    start: code.start,
                    end: code.end,
                    snapped_to: pe,
                });
                return prev_end;
            }
            // full overlap: split the difference between the two starts
            let midpoint = pe + (code.start - pe) / 2.0;
            let middle = graph.mint_anchor(Confidence::Automatic);
            graph.set_offset(middle, Some(midpoint), Confidence::Automatic);
            graph.move_ending_annotations(prev_end, middle);
            warn!(
                "span {}-{} fully overlaps previous ending {pe}, chaining at {midpoint}",
                code.start, code.end
            );
            warnings.push(Warning::FullOverlap {
                start: code.start,
                end: code.end,
                midpoint,
            });
            return middle;
        }
        start
    }

    /// A timed span about to start at `start` with an untimed predecessor
    /// that also starts there would make the predecessor instantaneous.
    /// Manufacture a start for it halfway back into the span before it.
    fn avoid_instantaneous(
        &self,
        graph: &mut Graph,
        start: AnchorId,
        prev: AnnotationId,
        warnings: &mut Vec<Warning>,
    ) {
        let p = graph.annotation(prev);
        if p.start != start || graph.offset(p.end).is_some() {
            return;
        }
        let penultimate = graph
            .ending_at(start)
            .into_iter()
            .find(|id| graph.annotation(*id).layer == self.span_layer);
        let midpoint = penultimate.and_then(|pen| {
            let ps = graph.offset(graph.annotation(pen).start)?;
            let so = graph.offset(start)?;
            Some(ps + (so - ps) / 2.0)
        });
        let middle = graph.mint_anchor(Confidence::Default);
        if let Some(m) = midpoint {
            graph.set_offset(middle, Some(m), Confidence::Default);
        }
        warn!("instantaneous span repaired, start moved to {midpoint:?}");
        warnings.push(Warning::Instantaneous { midpoint });
        graph.move_ending_annotations(start, middle);
        graph.move_starting_annotations(start, middle);
    }

    /// End-of-turn repairs: a trailing span with no end time gets one, and
    /// the turn is re-seated on its (possibly moved) children.
    fn finish_turn(
        &self,
        graph: &mut Graph,
        turn: AnnotationId,
        last_aligned: Option<AnchorId>,
        warnings: &mut Vec<Warning>,
    ) {
        let spans = graph.children(turn, self.span_layer);
        let (Some(&first), Some(&last)) = (spans.first(), spans.last()) else {
            return;
        };

        let last_end = graph.annotation(last).end;
        if graph.offset(last_end).is_none() {
            if let Some(aligned) = last_aligned {
                if graph.annotation(last).start == aligned {
                    // the trailing span starts at the final time code
                    self.avoid_instantaneous(graph, aligned, last, warnings);
                    graph.move_ending_annotations(last_end, aligned);
                } else {
                    let offset = self
                        .duration_hint
                        .or_else(|| graph.offset(aligned).map(|o| o + 1.0));
                    if let Some(offset) = offset {
                        graph.set_offset(last_end, Some(offset), Confidence::Automatic);
                        warn!("extrapolated trailing end at {offset}");
                        warnings.push(Warning::ExtrapolatedEnd { offset });
                    }
                }
            } else if let Some(offset) = self.duration_hint {
                graph.set_offset(last_end, Some(offset), Confidence::Automatic);
                warnings.push(Warning::ExtrapolatedEnd { offset });
            }
        }

        // repairs may have moved the children out from under the turn
        let turn_start = graph.annotation(turn).start;
        let turn_end = graph.annotation(turn).end;
        let new_start = if graph.offset(turn_start).is_none() {
            graph.annotation(first).start
        } else {
            turn_start
        };
        let new_end = if graph.offset(turn_end).is_none() {
            graph.annotation(last).end
        } else {
            turn_end
        };
        graph.reanchor(turn, new_start, new_end);
    }
}

/// Move a span onto resolved anchors. Stale anchors with no offset carry
/// their other referents along (chained skeletons, wrapper spans, words);
/// anchors that were already aligned belong to neighbours, so only the
/// span itself moves.
fn seat(graph: &mut Graph, span: AnnotationId, new_start: AnchorId, new_end: AnchorId) {
    let (old_start, old_end) = {
        let a = graph.annotation(span);
        (a.start, a.end)
    };
    if old_start != new_start {
        if graph.offset(old_start).is_none() {
            graph.redirect_anchor(old_start, new_start);
        } else {
            let end = graph.annotation(span).end;
            graph.reanchor(span, new_start, end);
        }
    }
    if old_end != new_end {
        if graph.offset(old_end).is_none() {
            graph.redirect_anchor(old_end, new_end);
        } else {
            let start = graph.annotation(span).start;
            graph.reanchor(span, start, new_end);
        }
    }
}
