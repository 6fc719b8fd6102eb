//! Error types for anchorage.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for anchorage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for anchorage operations.
///
/// Alignment errors are accumulated across a whole resolution pass and raised
/// together, so one run surfaces every alignment problem in a transcript at
/// once. Everything else fails fast.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// One or more fatal alignment errors for a transcript.
    #[error("{} alignment error(s): {}", errors.len(), first_of(errors))]
    Alignment {
        /// Every alignment problem found during the pass.
        errors: Vec<AlignmentError>,
    },

    /// A layer referenced by a transform does not exist in the graph schema.
    #[error("Missing layer: {0}")]
    MissingLayer(String),

    /// Source and destination layer of a transform are the same.
    #[error("Source and destination layer are the same: {0}")]
    SameLayer(String),

    /// Recoverable extraction error, reported per unit by format adapters
    /// (e.g. a dependent tier whose token count does not match the words
    /// it annotates).
    #[error("Tokenization error: {0}")]
    Tokenization(String),

    /// A convention pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    /// Create a missing layer error.
    #[must_use]
    pub fn missing_layer(name: impl Into<String>) -> Self {
        Self::MissingLayer(name.into())
    }

    /// Create a tokenization error.
    #[must_use]
    pub fn tokenization(msg: impl Into<String>) -> Self {
        Self::Tokenization(msg.into())
    }
}

fn first_of(errors: &[AlignmentError]) -> String {
    errors
        .first()
        .map_or_else(String::new, ToString::to_string)
}

/// A fatal alignment problem: a synchronization code whose start follows its
/// end. Fatal for the transcript, but accumulated rather than thrown, so the
/// caller sees the complete set.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("span start {start} is after end {end}: {label:?}")]
pub struct AlignmentError {
    /// The (stripped) label of the offending span.
    pub label: String,
    /// Start offset from the synchronization code.
    pub start: f64,
    /// End offset from the synchronization code.
    pub end: f64,
}

/// A non-fatal, user-visible structural warning.
///
/// Warnings never halt processing; a transcript with only warnings still
/// yields a usable graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Warning {
    /// A span partially overlapped its predecessor; its start was snapped to
    /// the predecessor's aligned end.
    Overlap {
        /// Start offset the span claimed.
        start: f64,
        /// End offset the span claimed.
        end: f64,
        /// Offset the start was snapped to.
        snapped_to: f64,
    },
    /// A span was entirely inside its predecessor; both were re-pointed at a
    /// synthetic midpoint anchor.
    FullOverlap {
        /// Start offset the span claimed.
        start: f64,
        /// End offset the span claimed.
        end: f64,
        /// Offset of the manufactured midpoint anchor.
        midpoint: f64,
    },
    /// A gap on a saturated layer was filled with an empty annotation.
    GapFilled {
        /// Offset where the gap opened.
        from: f64,
        /// Offset where the gap closed.
        to: f64,
    },
    /// An instantaneous span was repaired with a manufactured midpoint.
    Instantaneous {
        /// Offset of the midpoint anchor, when one could be computed.
        midpoint: Option<f64>,
    },
    /// A spanning convention opened but never closed before the parent
    /// boundary; the opening token was left unmodified.
    UnclosedSpan {
        /// Label of the unmatched opening token.
        label: String,
    },
    /// The final anchor had no offset; one was extrapolated or taken from a
    /// duration hint.
    ExtrapolatedEnd {
        /// The offset assigned to the final anchor.
        offset: f64,
    },
    /// A speaker appeared in the body without being declared; an adapter
    /// auto-declared it.
    UnknownSpeaker {
        /// The undeclared speaker's identifier.
        id: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap {
                start,
                end,
                snapped_to,
            } => write!(
                f,
                "span at {start}-{end} overlaps previous: using {snapped_to} as start"
            ),
            Self::FullOverlap {
                start,
                end,
                midpoint,
            } => write!(
                f,
                "span at {start}-{end} completely overlaps previous: \
                 using midpoint {midpoint} as boundary"
            ),
            Self::GapFilled { from, to } => {
                write!(f, "gap between {from} and {to} filled with empty span")
            }
            Self::Instantaneous { midpoint: Some(m) } => {
                write!(f, "instantaneous span repaired: using {m} as boundary")
            }
            Self::Instantaneous { midpoint: None } => {
                write!(f, "instantaneous span repaired with an unaligned boundary")
            }
            Self::UnclosedSpan { label } => {
                write!(f, "span opened at {label:?} was never closed")
            }
            Self::ExtrapolatedEnd { offset } => {
                write!(f, "final anchor had no offset: set to {offset}")
            }
            Self::UnknownSpeaker { id } => write!(f, "undeclared speaker: {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_error_display() {
        let err = Error::Alignment {
            errors: vec![AlignmentError {
                label: "so then".into(),
                start: 5.0,
                end: 3.0,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 alignment error"));
        assert!(msg.contains("5 is after end 3"));
    }

    #[test]
    fn test_warning_display() {
        let w = Warning::GapFilled { from: 2.0, to: 5.0 };
        assert_eq!(w.to_string(), "gap between 2 and 5 filled with empty span");
    }
}
