use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{record_model, CollectionInfo, Distance, IndexRecord, ScoredRecord, VectorIndex};
use crate::error::{Error, Result};

/// On-disk form of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    dimension: usize,
    distance: Distance,
    records: Vec<IndexRecord>,
}

struct Collection {
    file: CollectionFile,
    /// Record id -> position in `file.records`
    positions: HashMap<Uuid, usize>,
}

/// In-memory vector collection with disk persistence and brute-force search.
pub struct LocalIndex {
    collection: RwLock<Collection>,
    persist_path: PathBuf,
}

impl LocalIndex {
    /// Open `<vector_dir>/<name>.json`. A missing collection is created with
    /// the given dimension and metric when `create` is set.
    pub fn open(
        vector_dir: &Path,
        name: &str,
        dimension: usize,
        distance: Distance,
        create: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(vector_dir)?;
        let persist_path = vector_dir.join(format!("{name}.json"));

        let file = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)?;
            serde_json::from_str(&data).map_err(|e| {
                Error::Index(format!(
                    "Failed to read collection {}: {e}",
                    persist_path.display()
                ))
            })?
        } else if create {
            tracing::info!("Creating collection '{name}' ({dimension} dims, {distance})");
            let file = CollectionFile {
                name: name.to_string(),
                dimension,
                distance,
                records: Vec::new(),
            };
            write_atomic(&persist_path, &file)?;
            file
        } else {
            return Err(Error::CollectionNotFound(name.to_string()));
        };

        let positions = file
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();

        Ok(Self {
            collection: RwLock::new(Collection { file, positions }),
            persist_path,
        })
    }

    pub fn len(&self) -> usize {
        self.collection.read().file.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write via temp file + rename so a crash never leaves a torn collection.
fn write_atomic(path: &Path, file: &CollectionFile) -> Result<()> {
    let data = serde_json::to_string(file)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn describe(&self) -> Result<CollectionInfo> {
        let collection = self.collection.read();
        Ok(CollectionInfo {
            name: collection.file.name.clone(),
            dimension: collection.file.dimension,
            distance: collection.file.distance,
            points: collection.file.records.len(),
        })
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut collection = self.collection.write();

        let dimension = collection.file.dimension;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            return Err(Error::IndexConfiguration(format!(
                "record {} has {} dimensions, collection expects {dimension}",
                bad.id,
                bad.vector.len()
            )));
        }

        let previous_len = collection.file.records.len();
        let mut replaced = Vec::new();
        for record in records {
            match collection.positions.get(&record.id).copied() {
                Some(pos) => {
                    let old = std::mem::replace(&mut collection.file.records[pos], record);
                    replaced.push((pos, old));
                }
                None => {
                    let pos = collection.file.records.len();
                    collection.positions.insert(record.id, pos);
                    collection.file.records.push(record);
                }
            }
        }

        if let Err(e) = write_atomic(&self.persist_path, &collection.file) {
            // Roll back so memory matches disk
            for (pos, old) in replaced.into_iter().rev() {
                collection.file.records[pos] = old;
            }
            let added: Vec<Uuid> = collection.file.records[previous_len..]
                .iter()
                .map(|r| r.id)
                .collect();
            for id in added {
                collection.positions.remove(&id);
            }
            collection.file.records.truncate(previous_len);
            return Err(e);
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        embedding_model: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Err(Error::Validation("k must be at least 1".into()));
        }
        let collection = self.collection.read();
        if vector.len() != collection.file.dimension {
            return Err(Error::IndexConfiguration(format!(
                "query vector has {} dimensions, collection expects {}",
                vector.len(),
                collection.file.dimension
            )));
        }

        let distance = collection.file.distance;
        let mut scored: Vec<(f32, &IndexRecord)> = collection
            .file
            .records
            .iter()
            .filter(|r| embedding_model.map_or(true, |m| record_model(&r.metadata) == Some(m)))
            .map(|r| (distance.score(vector, &r.vector), r))
            .collect();

        // Sort descending by score
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, r)| ScoredRecord {
                id: r.id,
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score,
            })
            .collect())
    }
}
