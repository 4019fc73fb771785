//! In-memory table of managed processes.
//!
//! The map is guarded by a readers/writer lock; per-process mutable fields
//! live behind each process's own mutex. The per-process snapshot rings
//! share the registry lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::metrics::{MetricsSnapshot, SnapshotRing};
use crate::process::ManagedProcess;

/// Error type for registry mutations.
#[derive(Debug)]
pub enum RegistryError {
    /// A process with this name is already registered.
    NameExists(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NameExists(name) => {
                write!(f, "process '{}' already exists", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

struct RegistryInner {
    procs: HashMap<String, Arc<ManagedProcess>>,
    rings: HashMap<String, SnapshotRing>,
    next_id: u64,
}

/// Name-keyed table of managed processes with monotonic id assignment.
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                procs: HashMap::new(),
                rings: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Checks name uniqueness and reserves the next id. Callers spawn the
    /// process outside the lock and then `insert` it.
    pub fn reserve(&self, name: &str) -> Result<u64, RegistryError> {
        let mut inner = self.inner.write().unwrap();
        if inner.procs.contains_key(name) {
            return Err(RegistryError::NameExists(name.to_string()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    /// Inserts a process built from a prior `reserve`. Fails when a
    /// same-name create raced in between.
    pub fn insert(&self, proc_: Arc<ManagedProcess>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap();
        if inner.procs.contains_key(&proc_.name) {
            return Err(RegistryError::NameExists(proc_.name.clone()));
        }
        inner.procs.insert(proc_.name.clone(), proc_);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedProcess>> {
        self.inner.read().unwrap().procs.get(name).cloned()
    }

    /// Removes the process and its snapshot ring.
    pub fn remove(&self, name: &str) -> Option<Arc<ManagedProcess>> {
        let mut inner = self.inner.write().unwrap();
        inner.rings.remove(name);
        inner.procs.remove(name)
    }

    /// All registered processes ordered by id.
    pub fn list(&self) -> Vec<Arc<ManagedProcess>> {
        let inner = self.inner.read().unwrap();
        let mut procs: Vec<_> = inner.procs.values().cloned().collect();
        procs.sort_by_key(|p| p.id);
        procs
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().procs.len()
    }

    /// Resolves a target string: the literal `all` selects every process,
    /// then name lookup, then numeric id lookup. Misses yield an empty set.
    pub fn resolve(&self, target: &str) -> Vec<Arc<ManagedProcess>> {
        if target == "all" {
            return self.list();
        }
        let inner = self.inner.read().unwrap();
        if let Some(p) = inner.procs.get(target) {
            return vec![Arc::clone(p)];
        }
        if let Ok(id) = target.parse::<u64>() {
            if let Some(p) = inner.procs.values().find(|p| p.id == id) {
                return vec![Arc::clone(p)];
            }
        }
        Vec::new()
    }

    /// Appends a snapshot to the named ring, creating it on first use.
    /// Unregistered names are ignored.
    pub fn push_snapshot(&self, name: &str, snapshot: MetricsSnapshot) {
        let mut inner = self.inner.write().unwrap();
        if !inner.procs.contains_key(name) {
            return;
        }
        inner
            .rings
            .entry(name.to_string())
            .or_default()
            .push(snapshot);
    }

    /// Retained snapshots for `name` with `ts >= cutoff`, chronological.
    pub fn snapshots_since(&self, name: &str, cutoff: i64) -> Vec<MetricsSnapshot> {
        let inner = self.inner.read().unwrap();
        inner
            .rings
            .get(name)
            .map(|r| r.since(cutoff))
            .unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::{test_logs, test_spec};
    use crate::process::{RestartPolicy, Status};

    fn registered(reg: &Registry, dir: &std::path::Path, name: &str) -> Arc<ManagedProcess> {
        let id = reg.reserve(name).unwrap();
        let p = Arc::new(ManagedProcess::new(
            id,
            name.to_string(),
            test_spec("/bin/sleep", &["60"]),
            RestartPolicy::default(),
            test_logs(dir, name),
        ));
        reg.insert(Arc::clone(&p)).unwrap();
        p
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        registered(&reg, dir.path(), "web");

        let err = reg.reserve("web").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        let a = registered(&reg, dir.path(), "a");
        let b = registered(&reg, dir.path(), "b");
        reg.remove("a");
        let c = registered(&reg, dir.path(), "c");

        assert!(a.id < b.id);
        assert!(b.id < c.id);
    }

    #[test]
    fn test_resolve_by_name_id_and_all() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        let a = registered(&reg, dir.path(), "alpha");
        registered(&reg, dir.path(), "beta");

        assert_eq!(reg.resolve("alpha")[0].name, "alpha");
        assert_eq!(reg.resolve(&a.id.to_string())[0].name, "alpha");
        assert_eq!(reg.resolve("all").len(), 2);
        assert!(reg.resolve("missing").is_empty());
        assert!(reg.resolve("999").is_empty());
    }

    #[test]
    fn test_numeric_name_wins_over_id() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        registered(&reg, dir.path(), "first"); // id 1
        registered(&reg, dir.path(), "1"); // name "1"

        // Name lookup is tried before id parsing.
        assert_eq!(reg.resolve("1")[0].name, "1");
    }

    #[test]
    fn test_list_sorted_by_id() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        for name in ["z", "m", "a"] {
            registered(&reg, dir.path(), name);
        }

        let ids: Vec<u64> = reg.list().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_drops_ring() {
        let reg = Registry::new();
        let dir = tempfile::tempdir().unwrap();
        registered(&reg, dir.path(), "gone");

        reg.push_snapshot(
            "gone",
            MetricsSnapshot {
                ts: 1,
                cpu: 0.0,
                memory: 0,
                restarts: 0,
                status: Status::Online,
                uptime: 0,
            },
        );
        assert_eq!(reg.snapshots_since("gone", 0).len(), 1);

        reg.remove("gone");
        assert!(reg.snapshots_since("gone", 0).is_empty());
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_push_snapshot_ignores_unknown_names() {
        let reg = Registry::new();
        reg.push_snapshot(
            "phantom",
            MetricsSnapshot {
                ts: 1,
                cpu: 0.0,
                memory: 0,
                restarts: 0,
                status: Status::Stopped,
                uptime: 0,
            },
        );
        assert!(reg.snapshots_since("phantom", 0).is_empty());
    }
}
