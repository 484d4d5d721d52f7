//! Durable storage of project records.
//!
//! The orchestrator never touches storage. A subscriber task (see
//! `runtime::spawn_persistence`) saves a project's record whenever one of
//! its events goes by.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use forge_common::{ProjectId, ProjectRecord};

/// Storage backend for project records.
/// Real implementation: `JsonFileRepository`.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn save(&self, record: &ProjectRecord) -> Result<()>;

    async fn load(&self, id: ProjectId) -> Result<Option<ProjectRecord>>;

    /// Every stored record, ordered by project id.
    async fn load_all(&self) -> Result<Vec<ProjectRecord>>;

    /// Ids of every stored record, without reading the records.
    async fn ids(&self) -> Result<Vec<ProjectId>>;

    /// Returns false when there was nothing to remove.
    async fn remove(&self, id: ProjectId) -> Result<bool>;
}

/// One pretty-printed JSON file per project: `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: ProjectId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read_record(path: &Path) -> Result<ProjectRecord> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse project record {}", path.display()))
    }
}

#[async_trait]
impl ProjectRepository for JsonFileRepository {
    async fn save(&self, record: &ProjectRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(record.project.id);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize project record")?;

        // Write-then-rename so a crash never leaves a half-written record.
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, id: ProjectId) -> Result<Option<ProjectRecord>> {
        let path = self.path_for(id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::read_record(&path).await.map(Some)
    }

    async fn load_all(&self) -> Result<Vec<ProjectRecord>> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable project record"),
            }
        }
        records.sort_by_key(|r| r.project.id);
        Ok(records)
    }

    async fn ids(&self) -> Result<Vec<ProjectId>> {
        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn remove(&self, id: ProjectId) -> Result<bool> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_common::{Job, JobState, Project};
    use tempfile::tempdir;

    fn record(id: ProjectId, name: &str) -> ProjectRecord {
        let mut job = Job::new(id * 10, id, "template");
        job.state = JobState::Completed;
        ProjectRecord {
            project: Project::new(id, name),
            jobs: vec![job],
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path().join("projects"));

        repo.save(&record(1, "alpha")).await.unwrap();
        let loaded = repo.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.project.name, "alpha");
        assert_eq!(loaded.jobs[0].state, JobState::Completed);
        assert!(!dir.path().join("projects/1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path());
        assert!(repo.load(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_sorted_and_skips_garbage() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path());
        repo.save(&record(3, "c")).await.unwrap();
        repo.save(&record(1, "a")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<_> = repo
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.project.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_load_all_without_directory() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path().join("never-created"));
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_lists_record_files_only() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path());
        assert!(repo.ids().await.unwrap().is_empty());

        repo.save(&record(4, "d")).await.unwrap();
        repo.save(&record(2, "b")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("9.txt"), "ignored").unwrap();

        assert_eq!(repo.ids().await.unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path());
        repo.save(&record(2, "b")).await.unwrap();
        assert!(repo.remove(2).await.unwrap());
        assert!(!repo.remove(2).await.unwrap());
        assert!(repo.load(2).await.unwrap().is_none());
    }
}
