//! Candidate database discovery for operator convenience.
//!
//! Never used on the authentication path.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::database::{looks_like_geo_database, DatabaseFormat, DatabaseInspector};

/// Default recursion depth below each search root
pub const DEFAULT_SEARCH_DEPTH: usize = 4;

/// A valid database found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCandidate {
    pub path: PathBuf,
    pub format: DatabaseFormat,
    pub publish_date: DateTime<Utc>,
}

/// Walk `roots` looking for valid GeoIP databases.
///
/// Directories are visited in name order, at most `max_depth` levels below
/// each root. Dotfiles are skipped. A file reachable from several roots is
/// reported once, at its first discovery.
pub fn discover_candidate_databases(
    roots: &[PathBuf],
    max_depth: usize,
    inspector: &DatabaseInspector,
) -> Vec<DatabaseCandidate> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for root in roots {
        if !root.is_dir() {
            debug!("Skipping search root {}: not a directory", root.display());
            continue;
        }
        walk(root, 0, max_depth, inspector, &mut seen, &mut found);
    }

    found
}

fn walk(
    dir: &Path,
    depth: usize,
    max_depth: usize,
    inspector: &DatabaseInspector,
    seen: &mut HashSet<PathBuf>,
    found: &mut Vec<DatabaseCandidate>,
) {
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).collect(),
        Err(e) => {
            debug!("Cannot read directory {}: {}", dir.display(), e);
            return;
        }
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if depth < max_depth {
                walk(&path, depth + 1, max_depth, inspector, seen, found);
            }
            continue;
        }

        if !looks_like_geo_database(&path) {
            continue;
        }

        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !seen.insert(key) {
            continue;
        }

        match inspector.validate(&path) {
            Ok(handle) => found.push(DatabaseCandidate {
                path,
                format: handle.format(),
                publish_date: handle.build_date(),
            }),
            Err(e) => debug!("Discarding candidate {}: {}", path.display(), e),
        }
    }
}
