//! Build cache store.
//!
//! A build orchestrator records which image a given build step produced so
//! the step can be skipped when nothing changed. Keys are composite: a hash
//! of the parent image id plus every pending instruction text (copy/extract
//! instructions embed the archive's aggregate digest, which is what makes
//! the key content-addressed). The store itself is a plain string-to-string
//! map persisted as a JSON object in a single file.

use crate::digest::hex_string;
use crate::error::CacheError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// JSON-file-backed map from composite cache keys to image ids.
pub struct BuildCache {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl BuildCache {
    /// Load the cache file at `path`. A missing file is an empty cache.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let entries = match File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "build cache loaded");
        Ok(Self { path, entries })
    }

    /// Composite cache key: hex SHA-256 of the parent image id followed by
    /// each pending instruction text.
    pub fn cache_key<'a>(
        parent_image_id: &str,
        commands: impl IntoIterator<Item = &'a str>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parent_image_id.as_bytes());
        for command in commands {
            hasher.update(command.as_bytes());
        }
        hex_string(&hasher.finalize())
    }

    /// Image id recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Record `image_id` under `key` and persist the cache file.
    pub fn set(&mut self, key: String, image_id: String) -> Result<(), CacheError> {
        self.entries.insert(key, image_id);
        self.save()
    }

    /// Write the current map back to the cache file.
    pub fn save(&self) -> Result<(), CacheError> {
        let file = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(file), &self.entries)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "build cache saved");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
