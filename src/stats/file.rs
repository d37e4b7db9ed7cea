//! JSON file backed counter store

use anyhow::Context;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use super::{CounterDocument, CounterKind, CounterStore};
use crate::Result;

/// Counters persisted as one JSON document.
///
/// Each update re-reads the file, applies the change and replaces the file
/// through a temporary sibling and an atomic rename. Updates racing from
/// other processes may be lost; the document is never torn.
#[derive(Debug)]
pub struct JsonFileCounterStore {
    path: PathBuf,
    doc: Mutex<CounterDocument>,
}

impl JsonFileCounterStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match read_document(&path)? {
            Some(doc) => doc,
            None => {
                debug!("Counter file {} does not exist yet", path.display());
                CounterDocument::default()
            }
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of every counter as last read or written
    pub fn document(&self) -> CounterDocument {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, apply: impl FnOnce(&mut CounterDocument)) -> Result<()> {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);

        match read_document(&self.path) {
            Ok(Some(on_disk)) => *doc = on_disk,
            Ok(None) => {}
            Err(e) => warn!("Keeping in-memory counters, {:#}", e),
        }

        let mut next = doc.clone();
        apply(&mut next);

        if let Err(e) = write_document(&self.path, &next) {
            error!("Failed to persist counters to {}: {:#}", self.path.display(), e);
            return Err(e);
        }
        *doc = next;
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<Option<CounterDocument>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read counter file: {}", path.display()))
        }
    };

    if content.trim().is_empty() {
        return Ok(None);
    }

    let doc = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse counter file: {}", path.display()))?;
    Ok(Some(doc))
}

fn write_document(path: &Path, doc: &CounterDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create counter directory: {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, doc).context("Failed to serialize counters")?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace counter file: {}", path.display()))?;
    Ok(())
}

impl CounterStore for JsonFileCounterStore {
    fn increment(&self, kind: CounterKind, key: &str) -> Result<()> {
        self.update(|doc| doc.increment(kind, key))
    }

    fn snapshot(&self, kind: CounterKind) -> BTreeMap<String, u64> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(kind)
            .clone()
    }

    fn record_last_country(&self, identity: &str, country_code: &str) -> Result<()> {
        self.update(|doc| {
            doc.last_login_country
                .insert(identity.to_string(), country_code.to_string());
        })
    }

    fn last_country(&self, identity: &str) -> Option<String> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_login_country
            .get(identity)
            .cloned()
    }
}
