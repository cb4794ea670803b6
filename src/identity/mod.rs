//! IdentityIndex - Enrolled identity store with similarity queries
//!
//! ## Responsibilities
//!
//! - Hold enrolled identities (employee id, unit-norm embedding, metadata)
//! - Exact add/remove, top-k cosine queries with deterministic ordering
//! - Persist to a self-describing binary file, independent of the
//!   attendance database
//!
//! Readers run concurrently; writers take the exclusive guard. All
//! cross-pipeline mutation goes through the controller, which serializes
//! enroll/remove calls.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use tokio::sync::RwLock;

/// File magic for the persisted index
const INDEX_MAGIC: &[u8; 4] = b"FTIX";
/// Current on-disk format version
const INDEX_VERSION: u16 = 1;

/// One enrolled identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub employee_id: String,
    /// Unit-norm embedding of dimension D
    pub embedding: Vec<f32>,
    pub display_name: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Query result entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub employee_id: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

#[derive(Debug)]
struct IndexInner {
    dimension: usize,
    entries: Vec<Identity>,
    by_id: HashMap<String, usize>,
}

/// IdentityIndex instance
#[derive(Debug)]
pub struct IdentityIndex {
    inner: RwLock<IndexInner>,
}

impl IdentityIndex {
    /// Empty index for embeddings of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                dimension,
                entries: Vec::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    pub async fn dimension(&self) -> usize {
        self.inner.read().await.dimension
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Add an identity. The vector is validated against D and normalized;
    /// an existing id is rejected, never silently mutated.
    pub async fn add(
        &self,
        employee_id: &str,
        embedding: Vec<f32>,
        display_name: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;

        if embedding.len() != inner.dimension {
            return Err(Error::DimensionMismatch {
                expected: inner.dimension,
                actual: embedding.len(),
            });
        }
        if inner.by_id.contains_key(employee_id) {
            return Err(Error::Duplicate(employee_id.to_string()));
        }

        let embedding = normalize(embedding)?;
        let identity = Identity {
            employee_id: employee_id.to_string(),
            embedding,
            display_name: display_name.to_string(),
            enrolled_at: Utc::now(),
        };

        inner.entries.push(identity);
        let idx = inner.entries.len() - 1;
        inner.by_id.insert(employee_id.to_string(), idx);

        tracing::info!(employee_id = %employee_id, total = inner.entries.len(), "Identity enrolled");
        Ok(())
    }

    /// Remove an identity; returns whether it existed
    pub async fn remove(&self, employee_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(idx) = inner.by_id.remove(employee_id) else {
            return false;
        };

        inner.entries.remove(idx);
        // Positions after the removed entry shift down by one
        for slot in inner.by_id.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }

        tracing::info!(employee_id = %employee_id, total = inner.entries.len(), "Identity removed");
        true
    }

    pub async fn get(&self, employee_id: &str) -> Option<Identity> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .get(employee_id)
            .map(|&idx| inner.entries[idx].clone())
    }

    pub async fn list(&self) -> Vec<Identity> {
        self.inner.read().await.entries.clone()
    }

    /// Top-k matches by cosine similarity, descending; ties broken by the
    /// lexicographically lower id. Deterministic for identical inputs and
    /// index state.
    pub async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<QueryMatch>> {
        let inner = self.inner.read().await;

        if embedding.len() != inner.dimension {
            return Err(Error::DimensionMismatch {
                expected: inner.dimension,
                actual: embedding.len(),
            });
        }

        let probe = normalize(embedding.to_vec())?;

        let mut matches: Vec<QueryMatch> = inner
            .entries
            .iter()
            .map(|identity| QueryMatch {
                employee_id: identity.employee_id.clone(),
                score: dot(&probe, &identity.embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.employee_id.cmp(&b.employee_id))
        });
        matches.truncate(k);

        Ok(matches)
    }

    /// Write the index to `path` atomically (temp file + rename)
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read().await;

        let mut buf = Vec::with_capacity(16 + inner.entries.len() * (inner.dimension * 4 + 32));
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&(inner.dimension as u32).to_le_bytes());
        buf.extend_from_slice(&(inner.entries.len() as u32).to_le_bytes());

        for identity in &inner.entries {
            let id_bytes = identity.employee_id.as_bytes();
            buf.extend_from_slice(&(id_bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(id_bytes);
            for value in &identity.embedding {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }

        let tmp = path.with_extension("idx.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            identities = inner.entries.len(),
            "Identity index persisted"
        );
        Ok(())
    }

    /// Load an index from `path`, rejecting a mismatched dimension.
    /// Display names and enrollment times are not part of the binary
    /// format; loaded entries carry the id and vector only.
    pub fn load(path: &Path, expected_dimension: usize) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut cursor = 0usize;
        let magic = take(&data, &mut cursor, 4)?;
        if magic != INDEX_MAGIC {
            return Err(Error::Internal(format!(
                "not an identity index file: {}",
                path.display()
            )));
        }

        let version = u16::from_le_bytes(take(&data, &mut cursor, 2)?.try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(Error::Internal(format!(
                "unsupported index version {version}"
            )));
        }

        let dimension =
            u32::from_le_bytes(take(&data, &mut cursor, 4)?.try_into().unwrap()) as usize;
        if dimension != expected_dimension {
            return Err(Error::DimensionMismatch {
                expected: expected_dimension,
                actual: dimension,
            });
        }

        let count = u32::from_le_bytes(take(&data, &mut cursor, 4)?.try_into().unwrap()) as usize;

        let mut entries = Vec::with_capacity(count);
        let mut by_id = HashMap::with_capacity(count);
        for _ in 0..count {
            let id_len =
                u16::from_le_bytes(take(&data, &mut cursor, 2)?.try_into().unwrap()) as usize;
            let id = String::from_utf8(take(&data, &mut cursor, id_len)?.to_vec())
                .map_err(|e| Error::Internal(format!("corrupt identity id: {e}")))?;

            let mut embedding = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                let raw = take(&data, &mut cursor, 4)?;
                embedding.push(f32::from_le_bytes(raw.try_into().unwrap()));
            }

            by_id.insert(id.clone(), entries.len());
            entries.push(Identity {
                employee_id: id,
                embedding,
                display_name: String::new(),
                enrolled_at: Utc::now(),
            });
        }

        tracing::info!(
            path = %path.display(),
            identities = entries.len(),
            dimension,
            "Identity index loaded"
        );

        Ok(Self {
            inner: RwLock::new(IndexInner {
                dimension,
                entries,
                by_id,
            }),
        })
    }
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *cursor + len > data.len() {
        return Err(Error::Internal("truncated identity index file".to_string()));
    }
    let slice = &data[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize in place; zero vectors are rejected
fn normalize(mut v: Vec<f32>) -> Result<Vec<f32>> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return Err(Error::Internal("zero-norm embedding rejected".to_string()));
    }
    for value in &mut v {
        *value /= norm;
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_add_normalizes() {
        let index = IdentityIndex::new(4);
        index.add("E001", vec![0.0, 3.0, 0.0, 4.0], "A").await.unwrap();

        let stored = index.get("E001").await.unwrap();
        let norm: f32 = stored.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_dimension() {
        let index = IdentityIndex::new(4);
        let err = index.add("E001", vec![1.0, 0.0], "A").await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate() {
        let index = IdentityIndex::new(2);
        index.add("E001", vec![1.0, 0.0], "A").await.unwrap();
        let err = index.add("E001", vec![0.0, 1.0], "A2").await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_query_orders_by_score_then_id() {
        let index = IdentityIndex::new(2);
        // Two identical vectors force the id tiebreak
        index.add("E002", vec![1.0, 0.0], "B").await.unwrap();
        index.add("E001", vec![1.0, 0.0], "A").await.unwrap();
        index.add("E003", vec![0.0, 1.0], "C").await.unwrap();

        let matches = index.query(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(matches[0].employee_id, "E001");
        assert_eq!(matches[1].employee_id, "E002");
        assert_eq!(matches[2].employee_id, "E003");
        assert!((matches[0].score - 1.0).abs() < 1e-6);
        assert!(matches[2].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_truncates_to_k() {
        let index = IdentityIndex::new(3);
        for i in 0..3 {
            index.add(&format!("E{i}"), unit(3, i), "x").await.unwrap();
        }
        let matches = index.query(&unit(3, 0), 2).await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_keeps_lookup_consistent() {
        let index = IdentityIndex::new(2);
        index.add("E001", vec![1.0, 0.0], "A").await.unwrap();
        index.add("E002", vec![0.0, 1.0], "B").await.unwrap();

        assert!(index.remove("E001").await);
        assert!(!index.remove("E001").await);
        assert_eq!(index.len().await, 1);

        // E002 still resolves after the shift
        let found = index.get("E002").await.unwrap();
        assert_eq!(found.employee_id, "E002");
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip_query_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.idx");

        let index = IdentityIndex::new(4);
        index.add("E001", vec![1.0, 0.5, 0.0, 0.0], "A").await.unwrap();
        index.add("E002", vec![0.0, 1.0, 1.0, 0.0], "B").await.unwrap();
        index.persist(&path).await.unwrap();

        let loaded = IdentityIndex::load(&path, 4).unwrap();
        assert_eq!(loaded.len().await, 2);

        let probe = vec![0.3, 0.9, 0.2, 0.1];
        let before = index.query(&probe, 2).await.unwrap();
        let after = loaded.query(&probe, 2).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_load_rejects_mismatched_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.idx");

        let index = IdentityIndex::new(4);
        index.add("E001", vec![1.0, 0.0, 0.0, 0.0], "A").await.unwrap();
        index.persist(&path).await.unwrap();

        let err = IdentityIndex::load(&path, 8).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 4 }));
    }

    #[tokio::test]
    async fn test_zero_vector_rejected() {
        let index = IdentityIndex::new(2);
        assert!(index.add("E001", vec![0.0, 0.0], "A").await.is_err());
    }
}
