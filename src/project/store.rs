//! Project store
//!
//! Holds the current snapshot of every project. When opened on a directory,
//! each project is also written as `<id>.json` and reloaded on the next
//! open, so separate CLI invocations see the same projects.
//!
//! Stages that mutate a project take its lease first; two mix or normalize
//! requests on one project run one after the other, never interleaved.
//!
//! Leases only exclude work inside one process. Across processes sharing a
//! directory, `update` compares the record on disk with the snapshot it
//! replaces and refuses to overwrite a newer one with `Conflict`. The check
//! and the rename are not atomic, so two writers racing within that window
//! can still both succeed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use super::model::{Project, ProjectId};
use crate::error::{AlchemyError, Result};

/// Exclusive right to run a mutating stage on one project.
pub struct ProjectLease {
    id: ProjectId,
    _guard: OwnedMutexGuard<()>,
}

impl ProjectLease {
    pub fn id(&self) -> ProjectId {
        self.id
    }
}

pub struct ProjectStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
    leases: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
    dir: Option<PathBuf>,
}

impl ProjectStore {
    /// A store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            dir: None,
        }
    }

    /// Open a persistent store, loading every project file in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| AlchemyError::File {
            path: dir.clone(),
            source: e,
        })?;

        let mut projects = HashMap::new();
        let entries = fs::read_dir(&dir).map_err(|e| AlchemyError::File {
            path: dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_project(&path) {
                Ok(project) => {
                    projects.insert(project.id, project);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable project file"),
            }
        }
        debug!(dir = %dir.display(), count = projects.len(), "Project store opened");

        Ok(Self {
            projects: RwLock::new(projects),
            leases: Mutex::new(HashMap::new()),
            dir: Some(dir),
        })
    }

    pub async fn insert(&self, project: Project) -> Result<()> {
        self.persist(&project).await?;
        self.projects.write().await.insert(project.id, project);
        Ok(())
    }

    pub async fn get(&self, id: ProjectId) -> Result<Project> {
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AlchemyError::ProjectNotFound { id })
    }

    /// Replace the stored snapshot of an existing project.
    ///
    /// Fails with `Conflict` when another process rewrote the project file
    /// since this store last saw it; the newer record is loaded instead.
    pub async fn update(&self, project: Project) -> Result<Project> {
        let seen = match self.projects.read().await.get(&project.id) {
            Some(current) => current.updated_at,
            None => return Err(AlchemyError::ProjectNotFound { id: project.id }),
        };
        if let Some(newer) = self.newer_on_disk(project.id, seen) {
            warn!(project = %project.id, "Project file changed by another process");
            self.projects.write().await.insert(newer.id, newer);
            return Err(AlchemyError::Conflict { id: project.id });
        }
        self.persist(&project).await?;
        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        Ok(project)
    }

    /// All projects, oldest first.
    pub async fn list(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.read().await.values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    /// Wait for exclusive access to one project.
    pub async fn lease(&self, id: ProjectId) -> Result<ProjectLease> {
        if !self.projects.read().await.contains_key(&id) {
            return Err(AlchemyError::ProjectNotFound { id });
        }
        let lock = {
            let mut leases = self.leases.lock().await;
            // Only the map holds an idle lock; holders and waiters keep a clone.
            leases.retain(|_, lock| Arc::strong_count(lock) > 1);
            leases
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        Ok(ProjectLease { id, _guard: guard })
    }

    fn project_path(dir: &Path, id: ProjectId) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    /// The on-disk record, when it is not the snapshot last seen here.
    fn newer_on_disk(
        &self,
        id: ProjectId,
        seen: chrono::DateTime<chrono::Utc>,
    ) -> Option<Project> {
        let dir = self.dir.as_ref()?;
        let path = Self::project_path(dir, id);
        match load_project(&path) {
            Ok(on_disk) if on_disk.updated_at != seen => Some(on_disk),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable record to compare against");
                None
            }
        }
    }

    async fn persist(&self, project: &Project) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = Self::project_path(dir, project.id);
        let scratch = dir.join(format!(".{}.json.tmp", project.id));
        let content = serde_json::to_string_pretty(project)?;

        tokio::fs::write(&scratch, content)
            .await
            .map_err(|e| AlchemyError::File {
                path: scratch.clone(),
                source: e,
            })?;
        tokio::fs::rename(&scratch, &path)
            .await
            .map_err(|e| AlchemyError::File { path, source: e })
    }
}

fn load_project(path: &Path) -> Result<Project> {
    let content = fs::read_to_string(path).map_err(|e| AlchemyError::File {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::model::{ProjectStatus, StemFile};
    use std::time::Duration;

    fn project() -> Project {
        Project::new("Demo", "modern", vec![StemFile::new("/s/a.wav", "vocals")])
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = ProjectStore::in_memory();
        let id = uuid::Uuid::new_v4();
        assert!(matches!(
            store.get(id).await,
            Err(AlchemyError::ProjectNotFound { id: missing }) if missing == id
        ));
        assert!(store.lease(id).await.is_err());
    }

    #[tokio::test]
    async fn test_persisted_projects_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = project();
        {
            let store = ProjectStore::open(dir.path()).unwrap();
            store.insert(p.clone()).await.unwrap();
            p.status = ProjectStatus::Processing;
            store.update(p.clone()).await.unwrap();
        }
        std::fs::write(dir.path().join("broken.json"), b"{").unwrap();

        let store = ProjectStore::open(dir.path()).unwrap();
        assert_eq!(store.get(p.id).await.unwrap(), p);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_refuses_newer_record_from_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProjectStore::open(dir.path()).unwrap();
        let p = project();
        first.insert(p.clone()).await.unwrap();
        let second = ProjectStore::open(dir.path()).unwrap();

        let mut ahead = p.clone();
        ahead.status = ProjectStatus::Processing;
        ahead.updated_at = chrono::Utc::now() + chrono::Duration::seconds(1);
        first.update(ahead.clone()).await.unwrap();

        let mut stale = p.clone();
        stale.status = ProjectStatus::Error;
        stale.updated_at = chrono::Utc::now() + chrono::Duration::seconds(2);
        let err = second.update(stale).await.unwrap_err();

        assert!(matches!(err, AlchemyError::Conflict { id } if id == p.id));
        assert_eq!(second.get(p.id).await.unwrap(), ahead);
        assert_eq!(ProjectStore::open(dir.path()).unwrap().get(p.id).await.unwrap(), ahead);

        let mut next = ahead.clone();
        next.status = ProjectStatus::Ready;
        next.updated_at = ahead.updated_at + chrono::Duration::seconds(1);
        assert!(second.update(next).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_leases_are_pruned() {
        let store = ProjectStore::in_memory();
        let projects: Vec<Project> = (0..3).map(|_| project()).collect();
        for p in &projects {
            store.insert(p.clone()).await.unwrap();
        }

        for p in &projects {
            drop(store.lease(p.id).await.unwrap());
        }
        let held = store.lease(projects[0].id).await.unwrap();
        assert_eq!(store.leases.lock().await.len(), 1);

        let other = store.lease(projects[1].id).await.unwrap();
        assert_eq!(store.leases.lock().await.len(), 2);
        drop((held, other));
    }

    #[tokio::test]
    async fn test_update_unknown_project() {
        let store = ProjectStore::in_memory();
        assert!(store.update(project()).await.is_err());
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let store = Arc::new(ProjectStore::in_memory());
        let p = project();
        store.insert(p.clone()).await.unwrap();

        let first = store.lease(p.id).await.unwrap();
        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.lease(p.id).await.map(|l| l.id()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        let id = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(id, p.id);
    }
}
