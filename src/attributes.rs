//! The 44 voice attributes and the score vector the model emits.
//!
//! Attribute order is part of the model contract: output dimension `i` of the
//! classifier is the score for `ATTRIBUTES[i]`.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Number of attribute dimensions produced by the model.
pub const NUM_ATTRIBUTES: usize = 44;

/// Attribute names in output order.
pub const ATTRIBUTES: [&str; NUM_ATTRIBUTES] = [
    "adult-like",
    "bright",
    "calm",
    "clear",
    "cool",
    "cute",
    "dark",
    "elegant",
    "feminine",
    "fluent",
    "friendly",
    "gender-neutral",
    "halting",
    "hard",
    "intellectual",
    "intense",
    "kind",
    "light",
    "lively",
    "masculine",
    "mature",
    "middle-aged",
    "modest",
    "muffled",
    "nasal",
    "old",
    "powerful",
    "raspy",
    "reassuring",
    "refreshing",
    "relaxed",
    "sexy",
    "sharp",
    "sincere",
    "soft",
    "strict",
    "sweet",
    "tensed",
    "thick",
    "thin",
    "unique",
    "weak",
    "wild",
    "young",
];

/// Index of an attribute name in [`ATTRIBUTES`].
pub fn attribute_index(name: &str) -> Option<usize> {
    ATTRIBUTES.iter().position(|&a| a == name)
}

/// One named score, used for serialized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeScore {
    pub attribute: String,
    pub score: f32,
}

/// Attribute scores for one utterance, in [`ATTRIBUTES`] order.
///
/// The length is fixed by the type, so a vector can never disagree with the
/// attribute list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeVector {
    scores: [f32; NUM_ATTRIBUTES],
}

impl AttributeVector {
    pub fn new(scores: [f32; NUM_ATTRIBUTES]) -> Self {
        Self { scores }
    }

    /// Build from a model output row. Fails unless exactly 44 values are given.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        let scores: [f32; NUM_ATTRIBUTES] = values.try_into().map_err(|_| {
            crate::Error::ArchitectureMismatch(format!(
                "expected {} attribute scores, got {}",
                NUM_ATTRIBUTES,
                values.len()
            ))
        })?;
        Ok(Self { scores })
    }

    pub fn scores(&self) -> &[f32; NUM_ATTRIBUTES] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        NUM_ATTRIBUTES
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Score for a named attribute.
    pub fn get(&self, name: &str) -> Option<f32> {
        attribute_index(name).map(|i| self.scores[i])
    }

    /// `(name, score)` pairs in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        ATTRIBUTES.iter().copied().zip(self.scores.iter().copied())
    }

    /// All attributes sorted by descending score.
    ///
    /// Ties keep attribute order.
    pub fn ranked(&self) -> Vec<(&'static str, f32)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        pairs
    }

    /// The `n` highest-scoring attributes.
    pub fn top(&self, n: usize) -> Vec<(&'static str, f32)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    pub fn to_records(&self) -> Vec<AttributeScore> {
        self.iter()
            .map(|(attribute, score)| AttributeScore {
                attribute: attribute.to_string(),
                score,
            })
            .collect()
    }

    /// Cosine similarity between two attribute vectors.
    ///
    /// Returns 0.0 if either vector has zero norm.
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        let dot: f32 = self
            .scores
            .iter()
            .zip(other.scores.iter())
            .map(|(a, b)| a * b)
            .sum();
        let norm_a = self.scores.iter().map(|a| a * a).sum::<f32>().sqrt();
        let norm_b = other.scores.iter().map(|b| b * b).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    pub fn euclidean_distance(&self, other: &Self) -> f32 {
        self.scores
            .iter()
            .zip(other.scores.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    /// Per-attribute `other - self`.
    pub fn difference(&self, other: &Self) -> [f32; NUM_ATTRIBUTES] {
        let mut diff = [0.0f32; NUM_ATTRIBUTES];
        for (d, (a, b)) in diff
            .iter_mut()
            .zip(self.scores.iter().zip(other.scores.iter()))
        {
            *d = b - a;
        }
        diff
    }
}

impl Serialize for AttributeVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_records().serialize(serializer)
    }
}

impl std::ops::Index<usize> for AttributeVector {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.scores[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> AttributeVector {
        let mut scores = [0.0f32; NUM_ATTRIBUTES];
        for (i, s) in scores.iter_mut().enumerate() {
            *s = i as f32 / NUM_ATTRIBUTES as f32;
        }
        AttributeVector::new(scores)
    }

    #[test]
    fn test_attribute_list_is_unique_and_ordered() {
        assert_eq!(ATTRIBUTES.len(), 44);
        assert_eq!(ATTRIBUTES[0], "adult-like");
        assert_eq!(ATTRIBUTES[19], "masculine");
        assert_eq!(ATTRIBUTES[27], "raspy");
        assert_eq!(ATTRIBUTES[43], "young");
        let mut sorted = ATTRIBUTES.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), NUM_ATTRIBUTES);
    }

    #[test]
    fn test_attribute_index() {
        assert_eq!(attribute_index("bright"), Some(1));
        assert_eq!(attribute_index("gender-neutral"), Some(11));
        assert_eq!(attribute_index("loud"), None);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(AttributeVector::from_slice(&[0.5; 43]).is_err());
        assert!(AttributeVector::from_slice(&[0.5; 45]).is_err());
        let v = AttributeVector::from_slice(&[0.5; 44]).unwrap();
        assert_eq!(v.len(), 44);
    }

    #[test]
    fn test_get_and_index() {
        let v = ramp();
        assert_eq!(v.get("adult-like"), Some(0.0));
        assert_eq!(v.get("young"), Some(v[43]));
        assert_eq!(v.get("unknown"), None);
    }

    #[test]
    fn test_iter_follows_attribute_order() {
        let names: Vec<&str> = ramp().iter().map(|(n, _)| n).collect();
        assert_eq!(names, ATTRIBUTES.to_vec());
    }

    #[test]
    fn test_ranked_descending() {
        let ranked = ramp().ranked();
        assert_eq!(ranked[0].0, "young");
        assert_eq!(ranked[43].0, "adult-like");
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_top() {
        let top = ramp().top(3);
        let names: Vec<&str> = top.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["young", "wild", "weak"]);
    }

    #[test]
    fn test_similarity_and_distance() {
        let a = ramp();
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);

        let zero = AttributeVector::new([0.0; NUM_ATTRIBUTES]);
        assert_eq!(a.cosine_similarity(&zero), 0.0);

        let ones = AttributeVector::new([1.0; NUM_ATTRIBUTES]);
        let diff = zero.difference(&ones);
        assert!(diff.iter().all(|&d| (d - 1.0).abs() < 1e-6));
        assert!((zero.euclidean_distance(&ones) - (44.0f32).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_serialize_as_ordered_records() {
        let json = serde_json::to_value(ramp()).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 44);
        assert_eq!(arr[0]["attribute"], "adult-like");
        assert_eq!(arr[43]["attribute"], "young");
    }
}
