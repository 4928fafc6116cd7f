//! Known-face table and nearest-neighbour labelling.

use crate::types::Embedding;
use std::fmt;

/// Maximum cosine distance at which two embeddings are considered the same person.
///
/// Equivalent to a cosine similarity of at least 0.40.
pub const MATCH_TOLERANCE: f32 = 0.6;

/// The enrolled names and their embeddings, held as parallel sequences.
///
/// Entries are only ever added in pairs, so both sequences always have the
/// same length.
#[derive(Debug, Clone, Default)]
pub struct KnownFaces {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl KnownFaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, embedding: Embedding) {
        self.names.push(name.into());
        self.embeddings.push(embedding);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }
}

impl<S: Into<String>> FromIterator<(S, Embedding)> for KnownFaces {
    fn from_iter<I: IntoIterator<Item = (S, Embedding)>>(iter: I) -> Self {
        let mut known = KnownFaces::new();
        for (name, embedding) in iter {
            known.push(name, embedding);
        }
        known
    }
}

/// Label attached to a face in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// Recognized enrollee; the name is already uppercased for display.
    Known(String),
    Unknown,
}

impl Label {
    pub fn name(&self) -> Option<&str> {
        match self {
            Label::Known(name) => Some(name),
            Label::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Label::Known(_))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(name) => f.write_str(name),
            Label::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Strategy for comparing a query embedding against the known embeddings.
pub trait Matcher {
    /// One boolean per known embedding: is it within the matcher's tolerance?
    fn compare_faces(&self, known: &[Embedding], query: &Embedding) -> Vec<bool>;
    /// One distance per known embedding, in the same order.
    fn face_distance(&self, known: &[Embedding], query: &Embedding) -> Vec<f32>;
}

/// Cosine-distance matcher with the fixed [`MATCH_TOLERANCE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare_faces(&self, known: &[Embedding], query: &Embedding) -> Vec<bool> {
        self.face_distance(known, query)
            .into_iter()
            .map(|d| d <= MATCH_TOLERANCE)
            .collect()
    }

    fn face_distance(&self, known: &[Embedding], query: &Embedding) -> Vec<f32> {
        known.iter().map(|k| k.distance(query)).collect()
    }
}

/// Outcome of labelling one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub label: Label,
    /// Distance to the nearest known embedding, if the table was non-empty.
    pub distance: Option<f32>,
}

/// Label a query with the nearest known name, or [`Label::Unknown`].
///
/// The nearest entry wins only if the matcher also reports it as a match and
/// its distance is strictly below [`MATCH_TOLERANCE`]. Ties go to the entry
/// enrolled first.
pub fn identify<M: Matcher + ?Sized>(
    matcher: &M,
    known: &KnownFaces,
    query: &Embedding,
) -> Identification {
    let matches = matcher.compare_faces(known.embeddings(), query);
    let distances = matcher.face_distance(known.embeddings(), query);

    let Some((idx, best)) = argmin(&distances) else {
        return Identification {
            label: Label::Unknown,
            distance: None,
        };
    };

    let matched = matches.get(idx).copied().unwrap_or(false);
    let label = match known.names().get(idx) {
        Some(name) if matched && best < MATCH_TOLERANCE => Label::Known(name.to_uppercase()),
        _ => Label::Unknown,
    };

    Identification {
        label,
        distance: Some(best),
    }
}

/// Index and value of the smallest non-NaN element; first one wins on ties.
fn argmin(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v >= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}
