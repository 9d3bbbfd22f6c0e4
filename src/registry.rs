//! The registry adapter: the bridge between encoded vector ids and
//! external record ids.
//!
//! The association is kept in both directions. One record owns one
//! internal id per embedding, so the external side maps to a list;
//! deleting a record unindexes all of them. The maps never outlive the
//! table: both are rebuilt together at open by replaying the record
//! store and reinserting every embedding of matching dimension.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{CacheError, Result};
use crate::id::VectorId;
use crate::kernel::Mode;
use crate::record::Record;
use crate::store::RecordStore;
use crate::table::Table;

/// A table plus its record store and the id association between them.
pub struct Registry<S: RecordStore> {
    table: Table,
    store: S,
    maps: RwLock<IdMaps>,
}

#[derive(Default)]
struct IdMaps {
    external_of: HashMap<VectorId, String>,
    internals_of: HashMap<String, Vec<VectorId>>,
}

impl IdMaps {
    fn bind(&mut self, id: VectorId, external: &str) {
        self.external_of.insert(id, external.to_string());
        self.internals_of
            .entry(external.to_string())
            .or_default()
            .push(id);
    }
}

impl<S: RecordStore> Registry<S> {
    /// Open a registry over `store`, replaying every record into a fresh
    /// table. Embeddings whose dimension does not match `dims` are
    /// logged and skipped, not fatal; a record whose file has vanished
    /// between list and get is skipped the same way.
    pub fn open(store: S, dims: usize, mode: Mode) -> Result<Registry<S>> {
        let table = Table::open(dims, mode)?;
        let mut maps = IdMaps::default();

        let mut replayed = 0usize;
        for external in store.list()? {
            let Some(record) = store.get(&external)? else {
                continue;
            };
            for embedding in &record.embeddings {
                if embedding.len() != dims {
                    warn!(
                        "record {}: skipping embedding of dimension {} (table dimension {})",
                        record.id,
                        embedding.len(),
                        dims
                    );
                    continue;
                }
                let id = table.insert(embedding)?;
                maps.bind(id, &record.id);
            }
            replayed += 1;
        }
        info!(
            "replayed {replayed} records, {} live vectors, mode {mode}",
            table.len()
        );

        Ok(Registry {
            table,
            store,
            maps: RwLock::new(maps),
        })
    }

    /// Persist and index a new record built from `embeddings` and
    /// `data`. Returns the derived external id.
    ///
    /// Every embedding must match the table dimension; nothing is
    /// persisted or indexed otherwise. If indexing fails partway (for
    /// example at capacity), the embeddings already placed are deleted
    /// again before the error is returned.
    pub fn insert_record(
        &self,
        embeddings: Vec<Vec<f32>>,
        data: serde_json::Value,
    ) -> Result<String> {
        let dims = self.table.dims();
        if embeddings.is_empty() {
            return Err(CacheError::InvalidDims {
                expected: dims,
                got: 0,
            });
        }
        for embedding in &embeddings {
            if embedding.len() != dims {
                return Err(CacheError::InvalidDims {
                    expected: dims,
                    got: embedding.len(),
                });
            }
        }

        let record = Record::new(embeddings, data);

        let mut ids = Vec::with_capacity(record.embeddings.len());
        for embedding in &record.embeddings {
            match self.table.insert(embedding) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        self.table.delete(id);
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.store.put(&record) {
            for id in ids {
                self.table.delete(id);
            }
            return Err(e);
        }

        let mut maps = self.maps.write();
        for id in ids {
            maps.bind(id, &record.id);
        }
        Ok(record.id)
    }

    /// Delete a record by external id: remove the record file, then
    /// unindex every embedding. An unknown id yields `Ok(false)`.
    ///
    /// The file goes first: if the store fails, no index state has
    /// changed and the registry still agrees with the filesystem, so
    /// the delete can simply be retried.
    pub fn delete_by_external(&self, external_id: &str) -> Result<bool> {
        let mut maps = self.maps.write();
        if !maps.internals_of.contains_key(external_id) {
            return Ok(false);
        }
        self.store.remove(external_id)?;

        let ids = maps.internals_of.remove(external_id).unwrap_or_default();
        for id in &ids {
            maps.external_of.remove(id);
        }
        drop(maps);
        for id in ids {
            self.table.delete(id);
        }
        Ok(true)
    }

    /// Nearest record to `query`, with its score. `None` when the table
    /// holds no live vectors.
    pub fn search_by_vector(&self, query: &[f32]) -> Result<Option<(Record, f32)>> {
        let best = self.table.search(query)?;
        if best.is_none() {
            return Ok(None);
        }
        let external = match self.maps.read().external_of.get(&best.id) {
            Some(external) => external.clone(),
            None => return Ok(None),
        };
        Ok(self
            .store
            .get(&external)?
            .map(|record| (record, best.score)))
    }

    /// Nearest `n` records, best-first, sentinel tail trimmed. A record
    /// matched by several of its embeddings appears once per matching
    /// embedding, mirroring the underlying id ranking.
    pub fn search_n_by_vector(&self, query: &[f32], n: usize) -> Result<Vec<(Record, f32)>> {
        let matches = self.table.search_n(query, n)?;
        let maps = self.maps.read();

        let mut out = Vec::with_capacity(n);
        for m in matches.iter().take_while(|m| !m.is_none()) {
            let Some(external) = maps.external_of.get(&m.id) else {
                continue;
            };
            if let Some(record) = self.store.get(external)? {
                out.push((record, m.score));
            }
        }
        Ok(out)
    }

    /// External ids of every stored record.
    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// The underlying table, for id-level operations.
    pub fn table(&self) -> &Table {
        &self.table
    }
}
