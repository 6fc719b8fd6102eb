//! Single-token convention rewrites.
//!
//! Transcription conventions pack extra information into individual token
//! labels, e.g. `baby/s` meaning "pronounced as written, standard form
//! babies". A [`Convention`] recognizes such tokens with a pattern that
//! must cover the whole label, copies material into tags on destination
//! layers, and rewrites (or removes) the token itself.

use log::debug;
use regex::{Captures, Regex};

use crate::error::{Result, Warning};
use crate::graph::Graph;
use crate::schema::LayerId;

/// A single-token rewrite rule.
#[derive(Debug, Clone)]
pub struct Convention {
    source: LayerId,
    pattern: Regex,
    relabel: String,
    destinations: Vec<(LayerId, String)>,
}

impl Convention {
    /// Create a convention on a source layer.
    ///
    /// The pattern must match the whole token label; it is anchored here so
    /// callers write it unanchored, as in `(.+)y/s`. The relabel template
    /// may reference capture groups (`${1}ies`); the template `$0` leaves
    /// the label unchanged, and a template that expands to the empty string
    /// removes the token (unless its layer allows empty labels).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Pattern`] when the pattern does not parse.
    pub fn new(source: LayerId, pattern: &str, relabel: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(&format!(r"\A(?:{pattern})\z"))?;
        Ok(Self {
            source,
            pattern,
            relabel: relabel.into(),
            destinations: Vec::new(),
        })
    }

    /// Add a destination: matching tokens get a tag on `layer` whose label
    /// is the expansion of `template`. Templates expanding to the empty
    /// string produce no tag.
    #[must_use]
    pub fn with_destination(mut self, layer: LayerId, template: impl Into<String>) -> Self {
        self.destinations.push((layer, template.into()));
        self
    }

    /// Apply the convention to every live token on the source layer.
    ///
    /// # Errors
    ///
    /// Currently infallible after construction; the `Result` return keeps
    /// the transform signature uniform.
    pub fn apply(&self, graph: &mut Graph) -> Result<Vec<Warning>> {
        let tokens = graph.annotations_in(self.source);
        let mut matched = 0usize;
        for token in tokens {
            let label = graph.annotation(token).label.clone();
            let Some(caps) = self.pattern.captures(&label) else {
                continue;
            };
            matched += 1;

            // Tags first, so destinations see the pre-rewrite anchors.
            for (layer, template) in &self.destinations {
                let expanded = expand(&caps, template);
                if !expanded.is_empty() {
                    graph.create_tag(token, *layer, expanded);
                }
            }

            let new_label = expand(&caps, &self.relabel);
            if new_label == label {
                continue;
            }
            if new_label.is_empty()
                && !graph
                    .schema
                    .layer(graph.annotation(token).layer)
                    .allow_empty_labels
            {
                graph.destroy(token);
            } else {
                graph.relabel(token, new_label);
            }
        }
        debug!("convention matched {matched} token(s) on {:?}", self.source);
        Ok(Vec::new())
    }
}

fn expand(caps: &Captures<'_>, template: &str) -> String {
    let mut out = String::new();
    caps.expand(template, &mut out);
    out
}
