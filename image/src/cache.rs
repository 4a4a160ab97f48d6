use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::stage::StageKey;

const INDEX_FILE: &str = "index.json";
const IMAGES_DIR: &str = "images";
const LAYERS_DIR: &str = "layers";

/**
    A completed stage output, addressed by its key.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub key: StageKey,
    pub stage: String,
    pub created_at: DateTime<Utc>,
}

/**
    Immutable description of a built image. A rebuild writes a new manifest
    rather than changing an existing one.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub id: String,
    pub base: String,
    pub layers: Vec<StageKey>,
    pub workdir: String,
    pub exposed_port: u16,
    pub command: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ImageManifest {
    pub fn short_id(&self) -> &str {
        let hex = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        &hex[..12.min(hex.len())]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    layers: BTreeMap<StageKey, LayerRecord>,
}

/**
    On-disk layer cache: an index of completed stages, a snapshot directory
    per stage holding that stage's output, and the manifests of produced
    images.
*/
pub struct LayerCache {
    root: PathBuf,
    index: Index,
}

impl LayerCache {
    /**
        Open (or create) a cache rooted at `root`.
    */
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        for dir in [IMAGES_DIR, LAYERS_DIR] {
            std::fs::create_dir_all(root.join(dir)).map_err(|e| BuildError::io(&root, e))?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BuildError::Cache(format!("corrupt index {}: {e}", index_path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(BuildError::io(&index_path, e)),
        };

        Ok(Self { root, index })
    }

    /**
        Whether the stage keyed `key` completed and its snapshot is still on
        disk. An index entry without a snapshot cannot be reused.
    */
    pub fn contains(&self, key: &StageKey) -> bool {
        self.index.layers.contains_key(key) && self.layer_dir(key).is_dir()
    }

    /**
        Snapshot directory of the stage keyed `key`.
    */
    pub fn layer_dir(&self, key: &StageKey) -> PathBuf {
        self.root.join(LAYERS_DIR).join(key.as_str())
    }

    /**
        Empty directory for a snapshot that is being written. It is removed on
        drop unless [`LayerCache::insert`] moves it into place.
    */
    pub fn stage_layer(&self) -> Result<tempfile::TempDir, BuildError> {
        let dir = self.root.join(LAYERS_DIR);
        tempfile::Builder::new()
            .prefix(".partial-")
            .tempdir_in(&dir)
            .map_err(|e| BuildError::io(&dir, e))
    }

    pub fn layer(&self, key: &StageKey) -> Option<&LayerRecord> {
        self.index.layers.get(key)
    }

    pub fn layer_count(&self) -> usize {
        self.index.layers.len()
    }

    /**
        Move a finished snapshot into place, then record the stage and persist
        the index.
    */
    pub fn insert(
        &mut self,
        record: LayerRecord,
        snapshot: tempfile::TempDir,
    ) -> Result<(), BuildError> {
        let dest = self.layer_dir(&record.key);
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(|e| BuildError::io(&dest, e))?;
        }
        std::fs::rename(snapshot.path(), &dest).map_err(|e| BuildError::io(&dest, e))?;

        self.index.layers.insert(record.key.clone(), record);
        let bytes = serde_json::to_vec_pretty(&self.index)
            .map_err(|e| BuildError::Cache(format!("serialize index: {e}")))?;
        write_atomic(&self.root, &self.root.join(INDEX_FILE), &bytes)
    }

    /**
        Write an image manifest. Returns the path it was written to.
    */
    pub fn record_image(&self, image: &ImageManifest) -> Result<PathBuf, BuildError> {
        let path = self.image_path(&image.id);
        let bytes = serde_json::to_vec_pretty(image)
            .map_err(|e| BuildError::Cache(format!("serialize image: {e}")))?;
        write_atomic(&self.root, &path, &bytes)?;
        Ok(path)
    }

    pub fn image(&self, id: &str) -> Result<Option<ImageManifest>, BuildError> {
        let path = self.image_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BuildError::Cache(format!("corrupt image {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BuildError::io(&path, e)),
        }
    }

    /**
        Number of image manifests in the cache.
    */
    pub fn image_count(&self) -> Result<usize, BuildError> {
        let dir = self.root.join(IMAGES_DIR);
        let entries = std::fs::read_dir(&dir).map_err(|e| BuildError::io(&dir, e))?;
        Ok(entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count())
    }

    fn image_path(&self, id: &str) -> PathBuf {
        let name = id.strip_prefix("sha256:").unwrap_or(id);
        self.root.join(IMAGES_DIR).join(format!("{name}.json"))
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| BuildError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| BuildError::io(path, e))?;
    file.persist(path)
        .map_err(|e| BuildError::io(path, e.error))?;
    Ok(())
}
