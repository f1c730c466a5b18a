//! Graph Snapshots
//!
//! Persists the incremental cache so a new process can start warm.
//!
//! Entries holding a cacheable value are written, including stale ones: a
//! stale entry's old value still lets its dependents be verified clean
//! when it recomputes to the same bytes. Failed and uncacheable entries
//! are left out. The file is MessagePack, written to a temporary sibling,
//! synced, and renamed over the target, so a crash leaves either the old
//! snapshot or the new one, never a torn file.
//!
//! On load, entries that recorded a dependency which is missing from the
//! snapshot or not up to date are marked dirty together with their
//! transitive dependents; they are re-verified on the next evaluation.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::entry::{NodeState, Version};
use super::store::InMemoryGraph;
use crate::error::SnapshotError;
use crate::invalidation::Invalidator;
use crate::node::{GroupedDeps, NodeKey, NodeValue};

/// Current on-disk format.
pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    version: Version,
    entries: Vec<SnapshotEntry>,
}

/// Which state a saved entry is restored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SavedState {
    Done,
    Dirty,
    Changed,
}

impl From<SavedState> for NodeState {
    fn from(state: SavedState) -> Self {
        match state {
            SavedState::Done => NodeState::Done,
            SavedState::Dirty => NodeState::Dirty,
            SavedState::Changed => NodeState::Changed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: NodeKey,
    state: SavedState,
    value: NodeValue,
    deps: GroupedDeps,
    changed_at: Version,
    verified_at: Version,
}

/// What a save or load did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Entries written or read.
    pub entries: usize,
    /// Entries skipped on save, or marked dirty on load.
    pub skipped: usize,
}

/// Write the cacheable part of `graph` to `path`.
///
/// Must not run concurrently with an evaluation: building entries are
/// skipped.
pub fn save(graph: &InMemoryGraph, path: &Path) -> Result<SnapshotStats, SnapshotError> {
    let mut stats = SnapshotStats::default();
    let mut entries = Vec::new();

    for (key, entry) in graph.entries() {
        let data = entry.lock();
        let state = match data.state {
            NodeState::Done => Some(SavedState::Done),
            NodeState::Dirty => Some(SavedState::Dirty),
            NodeState::Changed => Some(SavedState::Changed),
            _ => None,
        };
        match (state, &data.value) {
            (Some(state), Some(value)) if value.is_cacheable() => {
                entries.push(SnapshotEntry {
                    key,
                    state,
                    value: value.clone(),
                    deps: data.direct_deps.clone(),
                    changed_at: data.changed_at,
                    verified_at: data.verified_at,
                });
            }
            _ => stats.skipped += 1,
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    stats.entries = entries.len();

    let file = SnapshotFile {
        format: SNAPSHOT_FORMAT,
        version: graph.version(),
        entries,
    };

    let tmp = temp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        rmp_serde::encode::write_named(&mut writer, &file)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;

    tracing::info!(
        path = %path.display(),
        entries = stats.entries,
        skipped = stats.skipped,
        "graph snapshot saved"
    );
    Ok(stats)
}

/// Read a graph previously written by [`save`].
pub fn load(path: &Path) -> Result<(InMemoryGraph, SnapshotStats), SnapshotError> {
    let reader = BufReader::new(File::open(path)?);
    let file: SnapshotFile = rmp_serde::from_read(reader)?;
    if file.format != SNAPSHOT_FORMAT {
        return Err(SnapshotError::UnsupportedFormat {
            found: file.format,
            expected: SNAPSHOT_FORMAT,
        });
    }

    let graph = InMemoryGraph::new();
    graph.set_version(file.version);
    for entry in &file.entries {
        graph.restore(
            &entry.key,
            entry.state.into(),
            entry.value.clone(),
            entry.deps.clone(),
            entry.changed_at,
            entry.verified_at,
        );
    }

    let mut incomplete = Vec::new();
    for entry in &file.entries {
        let mut complete = true;
        for dep in entry.deps.iter() {
            if !graph.get(dep).is_some_and(|dep_entry| dep_entry.is_done()) {
                complete = false;
            }
            graph.restore_reverse_dep(dep, &entry.key);
        }
        if !complete && entry.state == SavedState::Done {
            incomplete.push(entry.key.clone());
        }
    }

    let summary = Invalidator::new(&graph).dirty(incomplete)?;
    let stats = SnapshotStats {
        entries: file.entries.len(),
        skipped: summary.dirtied,
    };
    tracing::info!(
        path = %path.display(),
        entries = stats.entries,
        dirtied = stats.skipped,
        "graph snapshot loaded"
    );
    Ok((graph, stats))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::{ComputationError, ErrorInfo};
    use crate::graph::DirtyType;

    fn key(name: &str) -> NodeKey {
        NodeKey::new("test", name)
    }

    fn build(graph: &InMemoryGraph, name: &str, value: NodeValue, deps: &[&str]) {
        let k = key(name);
        graph.activate(&k);
        let deps: GroupedDeps = deps.iter().map(|d| key(d)).collect();
        graph.set_value(&k, value, deps).unwrap();
    }

    #[test]
    fn round_trip_keeps_values_edges_and_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");

        let graph = InMemoryGraph::new();
        graph.advance_version();
        build(&graph, "leaf", NodeValue::text("v1"), &[]);
        build(&graph, "parse", NodeValue::text("parsed(v1)"), &["leaf"]);

        let saved = save(&graph, &path).unwrap();
        assert_eq!(saved.entries, 2);
        assert!(!temp_path(&path).exists());

        let (loaded, stats) = load(&path).unwrap();
        assert_eq!(stats, SnapshotStats { entries: 2, skipped: 0 });
        assert_eq!(loaded.version(), graph.version());

        let parse = loaded.get(&key("parse")).unwrap();
        assert_eq!(parse.value(), Some(NodeValue::text("parsed(v1)")));
        assert_eq!(parse.direct_deps().to_vec(), vec![key("leaf")]);
        assert_eq!(loaded.get_reverse_deps(&key("leaf")), vec![key("parse")]);
    }

    #[test]
    fn uncacheable_values_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");

        let graph = InMemoryGraph::new();
        build(&graph, "clock", NodeValue::text("12:00").uncacheable(), &[]);
        build(&graph, "stamp", NodeValue::text("built at 12:00"), &["clock"]);
        build(&graph, "top", NodeValue::text("top"), &["stamp"]);

        let saved = save(&graph, &path).unwrap();
        assert_eq!(saved, SnapshotStats { entries: 2, skipped: 1 });

        let (loaded, stats) = load(&path).unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(loaded.get(&key("clock")).unwrap().state(), NodeState::NotYetEvaluated);
        assert_eq!(loaded.get(&key("stamp")).unwrap().state(), NodeState::Dirty);
        assert_eq!(loaded.get(&key("top")).unwrap().state(), NodeState::Dirty);
    }

    #[test]
    fn stale_entries_keep_their_state_and_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");

        let graph = InMemoryGraph::new();
        build(&graph, "a", NodeValue::text("a"), &[]);
        build(&graph, "b", NodeValue::text("b"), &["a"]);
        graph.mark_dirty(&key("a"), DirtyType::Changed).unwrap();
        graph.mark_dirty(&key("b"), DirtyType::Dirty).unwrap();

        let saved = save(&graph, &path).unwrap();
        assert_eq!(saved, SnapshotStats { entries: 2, skipped: 0 });

        let (loaded, _) = load(&path).unwrap();
        let a = loaded.get(&key("a")).unwrap();
        assert_eq!(a.state(), NodeState::Changed);
        assert_eq!(a.last_value(), Some(NodeValue::text("a")));
        assert_eq!(loaded.get(&key("b")).unwrap().state(), NodeState::Dirty);
    }

    #[test]
    fn failed_entries_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");

        let graph = InMemoryGraph::new();
        graph.activate(&key("bad"));
        let error = ErrorInfo::computation(key("bad"), ComputationError::new("boom"));
        graph
            .set_error(&key("bad"), Arc::new(error), GroupedDeps::new())
            .unwrap();

        let saved = save(&graph, &path).unwrap();
        assert_eq!(saved, SnapshotStats { entries: 0, skipped: 1 });
    }

    #[test]
    fn rejects_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.snapshot");
        let file = SnapshotFile {
            format: SNAPSHOT_FORMAT + 1,
            version: Version::INITIAL,
            entries: Vec::new(),
        };
        fs::write(&path, rmp_serde::to_vec_named(&file).unwrap()).unwrap();

        assert!(matches!(
            load(&path),
            Err(SnapshotError::UnsupportedFormat { found, .. }) if found == SNAPSHOT_FORMAT + 1
        ));
    }
}
