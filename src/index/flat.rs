//! Exact L2 Vector Index
//!
//! Brute-force nearest-neighbor search over a row-major matrix. Positions
//! are insertion order, which is the join key to the chunk manifest.

use std::cmp::Ordering;
use thiserror::Error;

const INDEX_MAGIC: u32 = 0x3246_4c46; // "FLF2"
const INDEX_VERSION: u16 = 1;
/// magic (4) + version (2) + dimension (4) + count (8)
const HEADER_LEN: usize = 18;

#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("Dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Index dimension must be at least 1")]
    ZeroDimension,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Squared Euclidean distance.
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| {
        let d = x - y;
        d * d
    }).sum()
}

/// Append-only flat index
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self { dimension, data: Vec::new() })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector stored at `position`
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Append vectors in order. Nothing is added if any vector has the wrong
    /// dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// The `k` nearest vectors as `(position, squared distance)`, closest
    /// first, ties broken by lower position.
    ///
    /// With fewer than `k` vectors in the index every vector is returned;
    /// results are never padded.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self.data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(pos, v)| (pos, l2_squared(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        buffer.extend_from_slice(&INDEX_MAGIC.to_le_bytes());
        buffer.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buffer.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        buffer.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for &val in &self.data {
            buffer.extend_from_slice(&val.to_le_bytes());
        }
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Serialization("file too short".to_string()));
        }

        let magic = u32::from_le_bytes(read_array(bytes, 0));
        if magic != INDEX_MAGIC {
            return Err(IndexError::Serialization("invalid magic".to_string()));
        }
        let version = u16::from_le_bytes(read_array(bytes, 4));
        if version != INDEX_VERSION {
            return Err(IndexError::Serialization(format!("unsupported version {}", version)));
        }
        let dimension = u32::from_le_bytes(read_array(bytes, 6)) as usize;
        let count = u64::from_le_bytes(read_array(bytes, 10)) as usize;
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }

        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| IndexError::Serialization("header overflows".to_string()))?;
        if bytes.len() != expected {
            return Err(IndexError::Serialization(format!(
                "expected {} bytes for {} vectors of dimension {}, found {}",
                expected,
                count,
                dimension,
                bytes.len()
            )));
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self { dimension, data })
    }
}

/// Copy `N` bytes at `offset`. Caller guarantees the slice is long enough.
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatL2Index {
        let mut index = FlatL2Index::new(3).unwrap();
        index.add(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.6, 0.4, 0.0],
        ]).unwrap();
        index
    }

    #[test]
    fn test_l2_squared() {
        assert_eq!(l2_squared(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(l2_squared(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = sample();
        let results = index.search(&[0.9, 0.1, 0.0], 4).unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 3);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_self_query_returns_own_position() {
        let index = sample();
        for pos in 0..index.len() {
            let query = index.vector(pos).unwrap().to_vec();
            let top = index.search(&query, 1).unwrap();
            assert_eq!(top[0].0, pos);
            assert!(top[0].1.abs() < 1e-6);
        }
    }

    #[test]
    fn test_search_truncates_when_k_exceeds_len() {
        let index = sample();
        assert_eq!(index.search(&[0.0, 0.0, 0.0], 10).unwrap().len(), 4);
        assert!(index.search(&[0.0, 0.0, 0.0], 0).unwrap().is_empty());
        assert!(FlatL2Index::new(3).unwrap().search(&[0.0; 3], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_prefer_lower_position() {
        let mut index = FlatL2Index::new(2).unwrap();
        index.add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 2, 1]);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut index = sample();
        let err = index.add(&[vec![1.0, 1.0, 1.0], vec![1.0]]).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 3, actual: 1 });
        assert_eq!(index.len(), 4);
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_roundtrip_search_consistency() {
        let index = sample();
        let restored = FlatL2Index::from_bytes(&index.to_bytes()).unwrap();

        assert_eq!(restored, index);
        let query = [0.6, 0.4, 0.0];
        assert_eq!(index.search(&query, 2).unwrap(), restored.search(&query, 2).unwrap());
    }

    #[test]
    fn test_invalid_magic_fails() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x00;
        assert!(FlatL2Index::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_body_fails() {
        let bytes = sample().to_bytes();
        assert!(FlatL2Index::from_bytes(&bytes[..bytes.len() - 4]).is_err());
        assert!(FlatL2Index::from_bytes(&bytes[..10]).is_err());
    }
}
