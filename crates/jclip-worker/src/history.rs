//! Artifacts in the output directory and the jobs that produced them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

use jclip_models::JobId;

/// Suffixes of bookkeeping files that are never listed.
const HIDDEN_SUFFIXES: [&str; 3] = [".log", ".success", ".encoding"];

/// One finished clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// A job that wrote, or is writing, an artifact.
#[derive(Debug, Clone)]
struct Owner {
    job_id: JobId,
    job_dir: PathBuf,
    gate: Arc<AsyncMutex<()>>,
}

/// Side index from artifact path to the jobs that target it.
///
/// Identical requests share an artifact path, so a file is only removed on
/// behalf of a job once no other job claims it. Each claim also carries the
/// job's gate: the runner holds it for its terminal writes and cancellation
/// holds it while tearing the job down.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    entries: Mutex<HashMap<PathBuf, Vec<Owner>>>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Vec<Owner>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that `job_id` targets `artifact`. Returns the job's gate.
    pub fn claim(&self, artifact: &Path, job_id: &JobId, job_dir: &Path) -> Arc<AsyncMutex<()>> {
        let gate = Arc::new(AsyncMutex::new(()));
        let mut entries = self.entries();
        let owners = entries.entry(artifact.to_path_buf()).or_default();
        owners.retain(|o| &o.job_id != job_id);
        owners.push(Owner {
            job_id: job_id.clone(),
            job_dir: job_dir.to_path_buf(),
            gate: Arc::clone(&gate),
        });
        gate
    }

    pub fn gate(&self, artifact: &Path, job_id: &JobId) -> Option<Arc<AsyncMutex<()>>> {
        self.entries()
            .get(artifact)
            .and_then(|owners| owners.iter().find(|o| &o.job_id == job_id))
            .map(|o| Arc::clone(&o.gate))
    }

    /// Drop `job_id`'s claim on `artifact`.
    ///
    /// Returns `true` when no other job claims the artifact any more, i.e.
    /// the file may be deleted on this job's behalf. Idempotent.
    pub fn release(&self, artifact: &Path, job_id: &JobId) -> bool {
        let mut entries = self.entries();
        let Some(owners) = entries.get_mut(artifact) else {
            return true;
        };
        owners.retain(|o| &o.job_id != job_id);
        if owners.is_empty() {
            entries.remove(artifact);
            true
        } else {
            false
        }
    }

    /// Forget `artifact`, returning the directories of every job that targeted it.
    pub fn remove(&self, artifact: &Path) -> Vec<PathBuf> {
        self.entries()
            .remove(artifact)
            .map(|owners| owners.into_iter().map(|o| o.job_dir).collect())
            .unwrap_or_default()
    }

    /// Number of jobs claiming `artifact`.
    pub fn owners(&self, artifact: &Path) -> usize {
        self.entries().get(artifact).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// List finished artifacts in `output_dir`, sorted by name.
pub async fn list_artifacts(output_dir: &Path) -> io::Result<Vec<HistoryEntry>> {
    let mut read_dir = match tokio::fs::read_dir(output_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if HIDDEN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        entries.push(HistoryEntry {
            path: entry.path(),
            name,
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Lexically check that `path` names a file directly or deeper inside `output_dir`.
pub fn is_within(output_dir: &Path, path: &Path) -> bool {
    path.is_absolute()
        && path != output_dir
        && path.starts_with(output_dir)
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_skips_bookkeeping_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"1234").unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"12").unwrap();
        std::fs::write(dir.path().join("a.mp3.log"), b"log").unwrap();
        std::fs::write(dir.path().join("x.encoding"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let entries = list_artifacts(dir.path()).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp3", "b.mp4"]);
        assert_eq!(entries[1].size, 4);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let entries = list_artifacts(&dir.path().join("nope")).await.unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_is_within() {
        let out = Path::new("/output");
        assert!(is_within(out, Path::new("/output/clip.mp4")));
        assert!(!is_within(out, Path::new("/output")));
        assert!(!is_within(out, Path::new("/output/../etc/passwd")));
        assert!(!is_within(out, Path::new("/outputs/clip.mp4")));
        assert!(!is_within(out, Path::new("clip.mp4")));
    }

    #[test]
    fn test_shared_artifact_released_by_last_owner() {
        let index = HistoryIndex::new();
        let artifact = Path::new("/output/a.mp4");
        let (first, second) = (JobId::new(), JobId::new());

        index.claim(artifact, &first, Path::new("/tmp/j/1"));
        index.claim(artifact, &second, Path::new("/tmp/j/2"));
        assert_eq!(index.owners(artifact), 2);

        assert!(!index.release(artifact, &first));
        assert!(!index.release(artifact, &first));
        assert!(index.gate(artifact, &first).is_none());
        assert!(index.gate(artifact, &second).is_some());

        assert!(index.release(artifact, &second));
        assert!(index.is_empty());
        assert!(index.release(Path::new("/output/unknown.mp4"), &second));
    }

    #[test]
    fn test_remove_returns_every_job_dir() {
        let index = HistoryIndex::new();
        let artifact = Path::new("/output/a.mp4");
        index.claim(artifact, &JobId::new(), Path::new("/tmp/j/1"));
        index.claim(artifact, &JobId::new(), Path::new("/tmp/j/2"));
        index.claim(Path::new("/output/b.mp4"), &JobId::new(), Path::new("/tmp/j/3"));

        let mut dirs = index.remove(artifact);
        dirs.sort();
        assert_eq!(dirs, vec![PathBuf::from("/tmp/j/1"), PathBuf::from("/tmp/j/2")]);
        assert!(index.remove(artifact).is_empty());
        assert_eq!(index.len(), 1);

        index.clear();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_gate_is_shared_between_claim_and_lookup() {
        let index = HistoryIndex::new();
        let artifact = Path::new("/output/a.mp4");
        let job = JobId::new();

        let held = index.claim(artifact, &job, Path::new("/tmp/j/1"));
        let _guard = held.lock().await;
        let looked_up = index.gate(artifact, &job).unwrap();
        assert!(looked_up.try_lock().is_err());
    }
}
