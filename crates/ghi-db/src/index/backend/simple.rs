//! Simple file-based index backend.
//!
//! Documents live in one JSONL file and are held in memory keyed by
//! `(source_key, id)`. Intended for tests and small local indexes where a
//! real search service is not justified.

use super::super::config::{IndexConfig, DATA_FILENAME};
use super::super::traits::{IndexDocument, IndexQueryPort};
use crate::error::{DbError, DbResult};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, trace};

type DocumentKey = (String, String);

/// Simple file-based index.
pub struct SimpleFileIndex {
    /// Path to the index directory.
    path: PathBuf,

    /// Existence query cap.
    max_ids_per_query: Option<usize>,

    /// In-memory document store.
    documents: RwLock<HashMap<DocumentKey, IndexDocument>>,
}

impl SimpleFileIndex {
    /// Open or create a simple file index.
    pub fn open(config: &IndexConfig) -> DbResult<Self> {
        debug!("Opening SimpleFileIndex at {:?}", config.path);

        let index = Self {
            path: config.path.clone(),
            max_ids_per_query: config.max_ids_per_query,
            documents: RwLock::new(HashMap::new()),
        };

        let data_path = config.data_path();
        if data_path.exists() {
            index.load_from_file(&data_path)?;
        }

        Ok(index)
    }

    /// Load documents from a JSONL file.
    fn load_from_file(&self, path: &Path) -> DbResult<()> {
        debug!("Loading documents from {:?}", path);

        let file = File::open(path).map_err(|e| DbError::index_io(path, e.to_string()))?;
        let reader = BufReader::new(file);

        let mut documents = self
            .documents
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))?;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<IndexDocument>(&line) {
                Ok(doc) => {
                    documents.insert((doc.source_key.clone(), doc.id.clone()), doc);
                }
                Err(e) => {
                    debug!("Skipping invalid line {}: {}", line_num + 1, e);
                }
            }
        }

        debug!("Loaded {} documents", documents.len());
        Ok(())
    }

    /// Rewrite the JSONL file through a temp file and rename.
    fn save_to_file(&self) -> DbResult<()> {
        let data_path = self.path.join(DATA_FILENAME);
        let temp_path = self.path.join(format!("{}.tmp", DATA_FILENAME));
        debug!("Saving documents to {:?}", data_path);

        let documents = self
            .documents
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let file =
            File::create(&temp_path).map_err(|e| DbError::index_io(&temp_path, e.to_string()))?;
        let mut writer = BufWriter::new(file);
        for doc in documents.values() {
            let line = serde_json::to_string(doc)?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, &data_path)
            .map_err(|e| DbError::index_io(&data_path, e.to_string()))?;

        debug!("Saved {} documents", documents.len());
        Ok(())
    }
}

impl IndexQueryPort for SimpleFileIndex {
    fn exists_any(&self, source_key: &str, ids: &[String]) -> DbResult<HashSet<String>> {
        trace!("Existence query for {} ids in {}", ids.len(), source_key);

        if let Some(max) = self.max_ids_per_query {
            if ids.len() > max {
                return Err(DbError::QueryTooLarge {
                    requested: ids.len(),
                    max,
                });
            }
        }

        let documents = self
            .documents
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;

        let found = ids
            .iter()
            .filter(|id| documents.contains_key(&(source_key.to_string(), (*id).clone())))
            .cloned()
            .collect();

        Ok(found)
    }

    fn upsert(&self, documents: &[IndexDocument]) -> DbResult<()> {
        debug!("Upserting {} documents", documents.len());

        let mut stored = self
            .documents
            .write()
            .map_err(|e| DbError::internal(format!("Failed to acquire write lock: {}", e)))?;

        for doc in documents {
            stored.insert((doc.source_key.clone(), doc.id.clone()), doc.clone());
        }

        // Persist immediately
        drop(stored);
        self.save_to_file()
    }

    fn count(&self, source_key: &str) -> DbResult<usize> {
        let stored = self
            .documents
            .read()
            .map_err(|e| DbError::internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(stored.keys().filter(|(key, _)| key == source_key).count())
    }

    fn flush(&self) -> DbResult<()> {
        self.save_to_file()
    }

    fn max_ids_per_query(&self) -> Option<usize> {
        self.max_ids_per_query
    }
}

// ============================================================================
// Tests
// ============================================================================
