//! Pluggable record stores.
//!
//! The engine rebuilds its index at startup by replaying whatever store
//! it is given; the store itself is dumb keyed persistence. The stock
//! implementation keeps one `<external_id>.rec` JSON file per record in
//! a flat directory.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::record::Record;

/// Keyed persistence for records. Not on the search hot path.
pub trait RecordStore {
    /// Persist a record under its external id, replacing any previous
    /// version.
    fn put(&self, record: &Record) -> Result<()>;

    /// Fetch a record, `None` if absent.
    fn get(&self, external_id: &str) -> Result<Option<Record>>;

    /// Remove a record. Returns whether it existed.
    fn remove(&self, external_id: &str) -> Result<bool>;

    /// External ids of every stored record, in no particular order.
    fn list(&self) -> Result<Vec<String>>;
}

/// Directory-of-JSON-files record store.
pub struct FsRecordStore {
    dir: PathBuf,
}

impl FsRecordStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<FsRecordStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("opened record store at {}", dir.display());
        Ok(FsRecordStore { dir })
    }

    fn path_of(&self, external_id: &str) -> PathBuf {
        self.dir.join(format!("{external_id}.rec"))
    }
}

impl RecordStore for FsRecordStore {
    fn put(&self, record: &Record) -> Result<()> {
        let path = self.path_of(&record.id);
        let file = File::create(&path)?;
        serde_json::to_writer(BufWriter::new(file), record)?;
        debug!("wrote record {}", record.id);
        Ok(())
    }

    fn get(&self, external_id: &str) -> Result<Option<Record>> {
        let file = match File::open(self.path_of(external_id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(record))
    }

    fn remove(&self, external_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_of(external_id)) {
            Ok(()) => {
                debug!("removed record {external_id}");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rec") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }
}
