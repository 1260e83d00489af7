//! Index Persistence
//!
//! Saves and loads the four artifacts of an index build: the embedding
//! matrix, the serialized index, the ordered chunk manifest and the build
//! metadata. Position `i` in the matrix and the index joins to line `i` of
//! the manifest; loading refuses any set where those disagree.
//!
//! The metadata file is written last and carries a build id plus a CRC32 of
//! every data file, so files left behind by an interrupted save, or copied in
//! from another build, are rejected on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::flat::{FlatL2Index, IndexError};
use super::npy;
use crate::documents::embeddings::Embedding;

pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const INDEX_FILE: &str = "index.bin";
pub const MANIFEST_FILE: &str = "chunks.txt";
pub const META_FILE: &str = "index_meta.json";

const TMP_SUFFIX: &str = ".tmp";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Missing artifact: {0}")]
    MissingArtifact(PathBuf),
    #[error("Length mismatch: {artifact} has {actual} entries, manifest has {expected}")]
    LengthMismatch {
        artifact: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Dimension mismatch: {artifact} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        artifact: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Build metadata persisted next to the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    /// Embedding model id the vectors were produced with
    pub model: String,
    pub dimension: usize,
    pub count: usize,
    /// Unique per build; ties the artifact files to one save
    pub build_id: String,
    pub created_at: DateTime<Utc>,
}

/// CRC32 of each data file, as written by the build in the metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactChecksums {
    embeddings: u32,
    index: u32,
    manifest: u32,
}

/// On-disk form of `index_meta.json`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMeta {
    #[serde(flatten)]
    meta: IndexMeta,
    checksums: ArtifactChecksums,
}

/// Everything one index build produces
#[derive(Debug, Clone, PartialEq)]
pub struct IndexArtifacts {
    pub embeddings: Vec<Embedding>,
    pub index: FlatL2Index,
    pub chunk_ids: Vec<String>,
    pub meta: IndexMeta,
}

impl IndexArtifacts {
    /// Index `embeddings` in order, pairing row `i` with `chunk_ids[i]`.
    pub fn build(
        model: &str,
        dimension: usize,
        chunk_ids: Vec<String>,
        embeddings: Vec<Embedding>,
    ) -> Result<Self, StoreError> {
        if embeddings.len() != chunk_ids.len() {
            return Err(StoreError::LengthMismatch {
                artifact: "embeddings",
                expected: chunk_ids.len(),
                actual: embeddings.len(),
            });
        }

        let mut index = FlatL2Index::new(dimension)?;
        index.add(&embeddings)?;

        Ok(Self {
            meta: IndexMeta {
                model: model.to_string(),
                dimension,
                count: chunk_ids.len(),
                build_id: Ulid::new().to_string(),
                created_at: Utc::now(),
            },
            embeddings,
            index,
            chunk_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }
}

/// Directory holding one index build
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", name, TMP_SUFFIX))
    }

    /// True when every artifact file is present.
    pub fn exists(&self) -> bool {
        [MANIFEST_FILE, EMBEDDINGS_FILE, INDEX_FILE, META_FILE]
            .iter()
            .all(|name| self.path(name).is_file())
    }

    /// Write all artifacts. Each file is staged under a temporary name and
    /// only renamed into place once every file has been written.
    pub fn save(&self, artifacts: &IndexArtifacts) -> Result<(), StoreError> {
        let count = artifacts.chunk_ids.len();
        if artifacts.index.len() != count {
            return Err(StoreError::LengthMismatch {
                artifact: "index",
                expected: count,
                actual: artifacts.index.len(),
            });
        }
        if artifacts.embeddings.len() != count {
            return Err(StoreError::LengthMismatch {
                artifact: "embeddings",
                expected: count,
                actual: artifacts.embeddings.len(),
            });
        }

        fs::create_dir_all(&self.dir)?;

        let mut manifest = String::new();
        for id in &artifacts.chunk_ids {
            manifest.push_str(id);
            manifest.push('\n');
        }

        let embeddings = npy::encode(&artifacts.embeddings, artifacts.index.dimension());
        let index = artifacts.index.to_bytes();
        let manifest = manifest.into_bytes();
        let stored = StoredMeta {
            meta: artifacts.meta.clone(),
            checksums: ArtifactChecksums {
                embeddings: crc32fast::hash(&embeddings),
                index: crc32fast::hash(&index),
                manifest: crc32fast::hash(&manifest),
            },
        };

        // Metadata goes last: until it is renamed, the old metadata no
        // longer matches the new data files and load refuses the set.
        let staged: [(&str, Vec<u8>); 4] = [
            (EMBEDDINGS_FILE, embeddings),
            (INDEX_FILE, index),
            (MANIFEST_FILE, manifest),
            (META_FILE, serde_json::to_vec_pretty(&stored)?),
        ];

        if let Err(e) = self.write_staged(&staged) {
            for (name, _) in &staged {
                let tmp = self.staging_path(name);
                if tmp.exists() {
                    if let Err(cleanup) = fs::remove_file(&tmp) {
                        warn!(path = %tmp.display(), error = %cleanup, "Failed to remove staged file");
                    }
                }
            }
            return Err(e.into());
        }

        info!(dir = %self.dir.display(), count, model = %artifacts.meta.model, "Index saved");
        Ok(())
    }

    fn write_staged(&self, staged: &[(&str, Vec<u8>)]) -> std::io::Result<()> {
        for (name, bytes) in staged {
            fs::write(self.staging_path(name), bytes)?;
        }
        for (name, _) in staged {
            fs::rename(self.staging_path(name), self.path(name))?;
        }
        Ok(())
    }

    /// Load and cross-check all artifacts.
    pub fn load(&self) -> Result<IndexArtifacts, StoreError> {
        for name in [MANIFEST_FILE, EMBEDDINGS_FILE, INDEX_FILE, META_FILE] {
            let path = self.path(name);
            if !path.is_file() {
                return Err(StoreError::MissingArtifact(path));
            }
        }

        let manifest_path = self.path(MANIFEST_FILE);
        let manifest = fs::read(&manifest_path)?;
        let chunk_ids: Vec<String> = std::str::from_utf8(&manifest)
            .map_err(|_| StoreError::Corrupt {
                path: manifest_path.clone(),
                reason: "manifest is not valid UTF-8".to_string(),
            })?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let embeddings_path = self.path(EMBEDDINGS_FILE);
        let matrix = fs::read(&embeddings_path)?;
        let (embeddings, matrix_dim) = npy::decode(&matrix)
            .map_err(|reason| StoreError::Corrupt { path: embeddings_path.clone(), reason })?;

        let index_path = self.path(INDEX_FILE);
        let index_bytes = fs::read(&index_path)?;
        let index = FlatL2Index::from_bytes(&index_bytes)
            .map_err(|e| StoreError::Corrupt { path: index_path.clone(), reason: e.to_string() })?;

        let stored: StoredMeta = serde_json::from_slice(&fs::read(self.path(META_FILE))?)?;
        let meta = stored.meta;

        let expected = chunk_ids.len();
        for (artifact, actual) in [
            ("embeddings", embeddings.len()),
            ("index", index.len()),
            ("metadata", meta.count),
        ] {
            if actual != expected {
                return Err(StoreError::LengthMismatch { artifact, expected, actual });
            }
        }
        for (artifact, actual) in [("embeddings", matrix_dim), ("index", index.dimension())] {
            if actual != meta.dimension {
                return Err(StoreError::DimensionMismatch {
                    artifact,
                    expected: meta.dimension,
                    actual,
                });
            }
        }

        // Same shapes can still come from different builds.
        for (path, bytes, recorded) in [
            (embeddings_path, &matrix, stored.checksums.embeddings),
            (index_path, &index_bytes, stored.checksums.index),
            (manifest_path, &manifest, stored.checksums.manifest),
        ] {
            let actual = crc32fast::hash(bytes);
            if actual != recorded {
                return Err(StoreError::Corrupt {
                    path,
                    reason: format!(
                        "checksum {:08x} does not match build {} ({:08x})",
                        actual, meta.build_id, recorded
                    ),
                });
            }
        }

        debug!(dir = %self.dir.display(), count = expected, "Index loaded");
        Ok(IndexArtifacts { embeddings, index, chunk_ids, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> IndexArtifacts {
        IndexArtifacts::build(
            "test-model",
            3,
            vec!["a_chunk1.txt".into(), "a_chunk2.txt".into(), "b_chunk1.txt".into()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.5, 0.5, 0.5]],
        )
        .unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("embeddings"));
        let original = artifacts();
        store.save(&original).unwrap();

        assert!(store.exists());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.embeddings, original.embeddings);
        assert_eq!(loaded.chunk_ids, original.chunk_ids);
        assert_eq!(loaded.meta, original.meta);

        for (pos, vector) in original.embeddings.iter().enumerate() {
            let top = loaded.index.search(vector, 1).unwrap();
            assert_eq!(top[0].0, pos);
            assert!(top[0].1.abs() < 1e-6);
        }
    }

    #[test]
    fn test_manifest_is_one_id_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&artifacts()).unwrap();

        let manifest = fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest, "a_chunk1.txt\na_chunk2.txt\nb_chunk1.txt\n");
        assert!(!dir.path().join(format!("{}{}", INDEX_FILE, TMP_SUFFIX)).exists());
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(store.load(), Err(StoreError::MissingArtifact(_))));

        store.save(&artifacts()).unwrap();
        fs::remove_file(dir.path().join(INDEX_FILE)).unwrap();
        match store.load() {
            Err(StoreError::MissingArtifact(path)) => assert!(path.ends_with(INDEX_FILE)),
            other => panic!("expected MissingArtifact, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_manifest_is_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&artifacts()).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "a_chunk1.txt\na_chunk2.txt\n").unwrap();

        assert!(matches!(
            store.load(),
            Err(StoreError::LengthMismatch { artifact: "embeddings", expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_index_from_other_build_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&artifacts()).unwrap();

        let mut other = FlatL2Index::new(3).unwrap();
        other.add(&[vec![1.0, 1.0, 1.0]]).unwrap();
        fs::write(dir.path().join(INDEX_FILE), other.to_bytes()).unwrap();

        assert!(matches!(
            store.load(),
            Err(StoreError::LengthMismatch { artifact: "index", .. })
        ));
    }

    #[test]
    fn test_index_swapped_from_same_size_build_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = IndexStore::new(dir.path().join("first"));
        let second = IndexStore::new(dir.path().join("second"));
        let ids = vec!["a_chunk1.txt".to_string(), "a_chunk2.txt".to_string()];
        first
            .save(&IndexArtifacts::build("m", 2, ids.clone(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap())
            .unwrap();
        second
            .save(&IndexArtifacts::build("m", 2, ids, vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap())
            .unwrap();

        fs::copy(second.dir().join(INDEX_FILE), first.dir().join(INDEX_FILE)).unwrap();

        match first.load() {
            Err(StoreError::Corrupt { path, .. }) => assert!(path.ends_with(INDEX_FILE)),
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_from_other_build_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = IndexStore::new(dir.path().join("first"));
        let second = IndexStore::new(dir.path().join("second"));
        first.save(&artifacts()).unwrap();

        let mut other = artifacts();
        other.embeddings[0] = vec![0.0, 0.0, 1.0];
        other.index = FlatL2Index::new(3).unwrap();
        other.index.add(&other.embeddings).unwrap();
        second.save(&other).unwrap();
        fs::copy(second.dir().join(META_FILE), first.dir().join(META_FILE)).unwrap();

        assert!(matches!(first.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_failed_save_leaves_no_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        fs::create_dir_all(dir.path().join(META_FILE).join("blocker")).unwrap();

        assert!(store.save(&artifacts()).is_err());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "staged files left: {:?}", leftovers);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_corrupt_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&artifacts()).unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"garbage").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_build_rejects_misaligned_inputs() {
        let err = IndexArtifacts::build("m", 2, vec!["x_chunk1.txt".into()], vec![]).unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn test_empty_build_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&IndexArtifacts::build("m", 4, vec![], vec![]).unwrap()).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.index.dimension(), 4);
    }
}
