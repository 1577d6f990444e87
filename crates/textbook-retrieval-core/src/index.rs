//! Build-once nearest-neighbour index over embedding vectors.
//!
//! [`EmbeddingIndex`] stores one fixed-length vector per row in a flat
//! buffer and answers exact top-k queries by scanning every row. It has no
//! insert or delete: an index is built once, from rows in a fixed order, and
//! row `i` stays row `i` for the life of the process.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::embedding::{cosine_similarity, squared_l2, Embedder};

/// Distance function used to rank rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance, as reported by a flat L2 index.
    #[default]
    L2,
    /// `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => squared_l2(a, b),
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l2" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => bail!("Unknown distance metric: {}. Use l2 or cosine.", other),
        }
    }
}

/// One query result: a row id and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: f32,
}

/// Immutable row → vector index with exact k-nearest-neighbour search.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    dims: usize,
    metric: DistanceMetric,
    data: Vec<f32>,
}

impl EmbeddingIndex {
    /// Build from per-row vectors.
    ///
    /// # Errors
    ///
    /// Fails if any vector's length differs from `dims`.
    pub fn build(dims: usize, metric: DistanceMetric, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut data = Vec::with_capacity(vectors.len() * dims);
        for (row, v) in vectors.into_iter().enumerate() {
            if v.len() != dims {
                bail!(
                    "embedding for row {} has {} dimensions, expected {}",
                    row,
                    v.len(),
                    dims
                );
            }
            data.extend(v);
        }
        Ok(Self { dims, metric, data })
    }

    /// Build from a flat row-major buffer (as read back from an index file).
    pub fn from_flat(dims: usize, metric: DistanceMetric, data: Vec<f32>) -> Result<Self> {
        if dims == 0 && !data.is_empty() {
            bail!("index has zero dimensions but a non-empty payload");
        }
        if dims > 0 && data.len() % dims != 0 {
            bail!(
                "index payload of {} floats is not a multiple of {} dimensions",
                data.len(),
                dims
            );
        }
        Ok(Self { dims, metric, data })
    }

    /// Embed `texts` in order with `embedder`, `batch_size` texts per call,
    /// and build an index whose row `i` is `texts[i]`.
    pub fn embed_texts(
        embedder: &dyn Embedder,
        texts: &[String],
        metric: DistanceMetric,
        batch_size: usize,
    ) -> Result<Self> {
        let dims = embedder.dims();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            let embedded = embedder
                .embed(batch)
                .with_context(|| format!("Failed to embed {} index rows", batch.len()))?;
            if embedded.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }
        tracing::debug!(
            rows = vectors.len(),
            dims,
            model = embedder.model_name(),
            "embedded index rows"
        );
        Self::build(dims, metric, vectors)
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        if row >= self.len() {
            return None;
        }
        let start = row * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// The row-major payload, for serialization.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// The `k` rows nearest to `query`, by ascending distance.
    ///
    /// Ties are broken by ascending row id so results are deterministic.
    /// Returns fewer than `k` neighbours when the index is smaller than `k`.
    ///
    /// # Errors
    ///
    /// Fails if `query` has the wrong dimensionality.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dims {
            bail!(
                "query vector has {} dimensions but the index has {}",
                query.len(),
                self.dims
            );
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(row, v)| Neighbor {
                row,
                distance: self.metric.distance(query, v),
            })
            .collect();

        let by_distance = |a: &Neighbor, b: &Neighbor| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.row.cmp(&b.row))
        };
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, by_distance);
            neighbors.truncate(k);
        }
        neighbors.sort_by(by_distance);
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn grid_index(metric: DistanceMetric) -> EmbeddingIndex {
        EmbeddingIndex::build(
            2,
            metric,
            vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 2.0],
                vec![3.0, 3.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_query_orders_by_ascending_distance() {
        let index = grid_index(DistanceMetric::L2);
        let result = index.query(&[0.9, 0.1], 3).unwrap();
        let rows: Vec<usize> = result.iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![1, 0, 2]);
        assert!(result.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!((result[0].distance - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_query_returns_at_most_k() {
        let index = grid_index(DistanceMetric::L2);
        assert_eq!(index.query(&[0.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(index.query(&[0.0, 0.0], 10).unwrap().len(), 4);
        assert!(index.query(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_query_ties_break_by_row() {
        let index = EmbeddingIndex::build(
            1,
            DistanceMetric::L2,
            vec![vec![1.0], vec![-1.0], vec![1.0]],
        )
        .unwrap();
        let rows: Vec<usize> = index
            .query(&[0.0], 3)
            .unwrap()
            .iter()
            .map(|n| n.row)
            .collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn test_cosine_metric_ignores_magnitude() {
        let index = EmbeddingIndex::build(
            2,
            DistanceMetric::Cosine,
            vec![vec![10.0, 0.0], vec![0.5, 0.5]],
        )
        .unwrap();
        let result = index.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(result[0].row, 0);
        assert!(result[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_build_rejects_wrong_dimensions() {
        let err = EmbeddingIndex::build(2, DistanceMetric::L2, vec![vec![1.0, 2.0], vec![1.0]])
            .unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_query_rejects_wrong_dimensions() {
        let index = grid_index(DistanceMetric::L2);
        assert!(index.query(&[1.0, 2.0, 3.0], 1).is_err());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = EmbeddingIndex::build(4, DistanceMetric::L2, Vec::new()).unwrap();
        assert!(index.is_empty());
        assert!(index.query(&[0.0; 4], 1).unwrap().is_empty());
    }

    #[test]
    fn test_rows_returned_are_in_range() {
        let index = grid_index(DistanceMetric::L2);
        for n in index.query(&[5.0, -5.0], 4).unwrap() {
            assert!(index.vector(n.row).is_some());
        }
        assert!(index.vector(4).is_none());
    }

    #[test]
    fn test_from_flat_validates_payload() {
        assert!(EmbeddingIndex::from_flat(3, DistanceMetric::L2, vec![0.0; 7]).is_err());
        let index = EmbeddingIndex::from_flat(3, DistanceMetric::L2, vec![0.0; 6]).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_embed_texts_batches_in_row_order() {
        let embedder = HashingEmbedder::new(256);
        let texts: Vec<String> = [
            "Atoms and their structure",
            "Molecules in living things",
            "Cells divide by mitosis",
            "Tissues of flowering plants",
            "Organs of the human body",
        ]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let index = EmbeddingIndex::embed_texts(&embedder, &texts, DistanceMetric::L2, 2).unwrap();
        assert_eq!(index.len(), 5);
        let cells = embedder.embed_one("Cells divide by mitosis").unwrap();
        assert_eq!(index.vector(2).unwrap(), cells.as_slice());
        assert_eq!(index.query(&cells, 1).unwrap()[0].row, 2);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert_eq!(
            "cosine".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Cosine
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
