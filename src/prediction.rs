use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

use crate::oracle::ProbabilityVector;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelSetError {
    #[error("label set is empty")]
    Empty,
    #[error("label at index {0} is blank")]
    Blank(usize),
    #[error("duplicate label '{0}'")]
    Duplicate(String),
}

/// Length disagreement between a probability vector and the label set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("probability vector has {actual} entries but the label set has {expected}")]
pub struct LabelMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Ordered class names. Index `i` names index `i` of every [`ProbabilityVector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self, LabelSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|l| l.into().trim().to_string())
            .collect();
        if labels.is_empty() {
            return Err(LabelSetError::Empty);
        }
        for (idx, label) in labels.iter().enumerate() {
            if label.is_empty() {
                return Err(LabelSetError::Blank(idx));
            }
            if labels[..idx].contains(label) {
                return Err(LabelSetError::Duplicate(label.clone()));
            }
        }
        Ok(Self(labels))
    }

    /// One label per non-empty line; `#` starts a comment line.
    pub fn parse_lines(text: &str) -> Result<Self, LabelSetError> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = LabelSetError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.0
    }
}

/// Label to percentage pairs, serialized as a JSON object in descending order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities(Vec<(String, f64)>);

impl ClassProbabilities {
    pub fn entries(&self) -> &[(String, f64)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, p)| *p)
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, percent) in &self.0 {
            map.serialize_entry(label, percent)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
}

/// Probability in [0, 1] as a percentage rounded to two decimals.
fn to_percent(p: f32) -> f64 {
    (p as f64 * 100.0 * 100.0).round() / 100.0
}

/// Turn raw model scores into a labelled, sorted prediction.
///
/// The predicted class is the first index holding the maximum score. The
/// per-class listing is sorted by rounded percentage, descending; entries that
/// round to the same percentage keep label order.
pub fn format_prediction(
    probs: &ProbabilityVector,
    labels: &LabelSet,
) -> Result<PredictionResult, LabelMismatch> {
    let values = probs.as_slice();
    if values.is_empty() || values.len() != labels.len() {
        return Err(LabelMismatch {
            expected: labels.len(),
            actual: values.len(),
        });
    }

    let mut best = 0;
    for (idx, &p) in values.iter().enumerate().skip(1) {
        if p > values[best] {
            best = idx;
        }
    }

    let mut ranked: Vec<(usize, f64)> = values
        .iter()
        .map(|&p| to_percent(p))
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let class_probabilities = ranked
        .into_iter()
        .map(|(idx, percent)| (labels.as_slice()[idx].clone(), percent))
        .collect();

    Ok(PredictionResult {
        predicted_class: labels.as_slice()[best].clone(),
        confidence: to_percent(values[best]),
        class_probabilities: ClassProbabilities(class_probabilities),
    })
}
