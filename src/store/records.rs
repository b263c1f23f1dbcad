//! Record persistence for models, predictions and jobs.

use crate::error::{Result, ServeError};
use crate::types::{Job, JobId, JobStatus, Model, ModelId, ModelStatus, Page, PageRequest, Prediction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Filter for model listings.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub status: Option<ModelStatus>,
    pub name: Option<String>,
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub model_id: Option<ModelId>,
}

/// Persistent store of serving records.
///
/// Listings are ordered newest first.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a model. Fails with `DuplicateVersion` if `(name, version)` exists.
    async fn insert_model(&self, model: Model) -> Result<Model>;
    async fn get_model(&self, id: ModelId) -> Result<Option<Model>>;
    /// Replaces an existing model row. The (name, version) pair stays unique.
    async fn update_model(&self, model: Model) -> Result<Model>;
    /// Deletes a model together with its prediction history.
    async fn delete_model(&self, id: ModelId) -> Result<bool>;
    async fn find_model(&self, name: &str, version: &str) -> Result<Option<Model>>;
    async fn models_by_name(&self, name: &str) -> Result<Vec<Model>>;
    async fn list_models(&self, filter: ModelFilter, page: PageRequest) -> Result<Page<Model>>;

    async fn insert_prediction(&self, prediction: Prediction) -> Result<Prediction>;
    async fn list_predictions(&self, model_id: ModelId, page: PageRequest) -> Result<Page<Prediction>>;

    async fn insert_job(&self, job: Job) -> Result<Job>;
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;
    async fn update_job(&self, job: Job) -> Result<Job>;
    async fn delete_job(&self, id: JobId) -> Result<bool>;
    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> Result<Page<Job>>;
    /// Number of non-terminal jobs referencing a model.
    async fn count_active_jobs(&self, model_id: ModelId) -> Result<usize>;
    /// Terminal jobs completed strictly before `cutoff`.
    async fn expired_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

/// In-process record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    models: RwLock<HashMap<ModelId, Model>>,
    predictions: RwLock<HashMap<Uuid, Prediction>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServeError::Unavailable("record store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_model(&self, model: Model) -> Result<Model> {
        self.check()?;
        let mut models = self.models.write().await;
        if models
            .values()
            .any(|m| m.name == model.name && m.version == model.version)
        {
            return Err(ServeError::DuplicateVersion {
                name: model.name,
                version: model.version,
            });
        }
        models.insert(model.id, model.clone());
        Ok(model)
    }

    async fn get_model(&self, id: ModelId) -> Result<Option<Model>> {
        self.check()?;
        Ok(self.models.read().await.get(&id).cloned())
    }

    async fn update_model(&self, model: Model) -> Result<Model> {
        self.check()?;
        let mut models = self.models.write().await;
        if models
            .values()
            .any(|m| m.id != model.id && m.name == model.name && m.version == model.version)
        {
            return Err(ServeError::DuplicateVersion {
                name: model.name,
                version: model.version,
            });
        }
        match models.get_mut(&model.id) {
            Some(slot) => {
                *slot = model.clone();
                Ok(model)
            }
            None => Err(ServeError::NotFound(format!("model {}", model.id))),
        }
    }

    async fn delete_model(&self, id: ModelId) -> Result<bool> {
        self.check()?;
        let removed = self.models.write().await.remove(&id).is_some();
        if removed {
            self.predictions.write().await.retain(|_, p| p.model_id != id);
        }
        Ok(removed)
    }

    async fn find_model(&self, name: &str, version: &str) -> Result<Option<Model>> {
        self.check()?;
        Ok(self
            .models
            .read()
            .await
            .values()
            .find(|m| m.name == name && m.version == version)
            .cloned())
    }

    async fn models_by_name(&self, name: &str) -> Result<Vec<Model>> {
        self.check()?;
        Ok(self
            .models
            .read()
            .await
            .values()
            .filter(|m| m.name == name)
            .cloned()
            .collect())
    }

    async fn list_models(&self, filter: ModelFilter, page: PageRequest) -> Result<Page<Model>> {
        self.check()?;
        let mut items: Vec<Model> = self
            .models
            .read()
            .await
            .values()
            .filter(|m| filter.status.map_or(true, |s| m.status == s))
            .filter(|m| filter.name.as_deref().map_or(true, |n| m.name == n))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_vec(items, page))
    }

    async fn insert_prediction(&self, prediction: Prediction) -> Result<Prediction> {
        self.check()?;
        self.predictions
            .write()
            .await
            .insert(prediction.id, prediction.clone());
        Ok(prediction)
    }

    async fn list_predictions(&self, model_id: ModelId, page: PageRequest) -> Result<Page<Prediction>> {
        self.check()?;
        let mut items: Vec<Prediction> = self
            .predictions
            .read()
            .await
            .values()
            .filter(|p| p.model_id == model_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_vec(items, page))
    }

    async fn insert_job(&self, job: Job) -> Result<Job> {
        self.check()?;
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.check()?;
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update_job(&self, job: Job) -> Result<Job> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(job)
            }
            None => Err(ServeError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        self.check()?;
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> Result<Page<Job>> {
        self.check()?;
        let mut items: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.model_id.map_or(true, |id| j.model_id == id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_vec(items, page))
    }

    async fn count_active_jobs(&self, model_id: ModelId) -> Result<usize> {
        self.check()?;
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.model_id == model_id && !j.status.is_terminal())
            .count())
    }

    async fn expired_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>> {
        self.check()?;
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status.is_terminal())
            .filter(|j| j.completed_at.map_or(false, |at| at < cutoff))
            .map(|j| j.id)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
