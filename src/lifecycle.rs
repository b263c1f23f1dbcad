//! Model lifecycle controller.
//!
//! Owns every model status transition and the commitment boundary. A model
//! becomes servable only through [`LifecycleController::commit`], and every
//! consumer checks [`LifecycleController::assert_committed`] before touching
//! a session.
//!
//! ```text
//! PENDING ──upload──▶ UPLOADED ──commit──▶ VALIDATING ──▶ READY ──▶ ARCHIVED
//!                        ▲                      │
//!                        └──────re-upload── ERROR ◀┘
//! ```

use crate::cache::{ModelCache, PredictionCache};
use crate::compute::InferenceEngine;
use crate::config::StorageConfig;
use crate::error::{Result, ServeError};
use crate::lock::{KeyGuard, LockTable};
use crate::observability;
use crate::store::{file_extension, ArtifactStore, ModelFilter, RecordStore};
use crate::types::{Model, ModelId, ModelStatus, Page, PageRequest, DEFAULT_MODEL_VERSION};
use chrono::Utc;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_NAME_LEN: usize = 255;
const MAX_VERSION_LEN: usize = 50;

/// Gatekeeper of model state.
pub struct LifecycleController {
    records: Arc<dyn RecordStore>,
    artifacts: Arc<dyn ArtifactStore>,
    engine: Arc<InferenceEngine>,
    cache: Arc<PredictionCache>,
    storage: StorageConfig,
    warmup_on_commit: bool,
    models: Option<Arc<ModelCache>>,
    locks: LockTable<ModelId>,
}

/// Editable fields of a model. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ModelUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl LifecycleController {
    pub fn new(
        records: Arc<dyn RecordStore>,
        artifacts: Arc<dyn ArtifactStore>,
        engine: Arc<InferenceEngine>,
        cache: Arc<PredictionCache>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            records,
            artifacts,
            engine,
            cache,
            storage,
            warmup_on_commit: true,
            models: None,
            locks: LockTable::new(),
        }
    }

    /// Enables or disables the warmup run after a successful commit.
    pub fn with_warmup(mut self, enabled: bool) -> Self {
        self.warmup_on_commit = enabled;
        self
    }

    /// Serves [`LifecycleController::get_cached`] from `models`.
    pub fn with_model_cache(mut self, models: Arc<ModelCache>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn model_cache(&self) -> Option<&Arc<ModelCache>> {
        self.models.as_ref()
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Holds the transition lock of a model.
    ///
    /// Work done under the guard cannot interleave with an upload, commit,
    /// archive or delete of the same model.
    pub async fn lock_model(&self, model_id: ModelId) -> KeyGuard<ModelId> {
        self.locks.lock(model_id).await
    }

    /// Registers a new model version in `PENDING`.
    pub async fn register(
        &self,
        name: &str,
        version: Option<&str>,
        description: Option<String>,
    ) -> Result<Model> {
        let name = check_name(name)?;
        let version = check_version(version.unwrap_or(DEFAULT_MODEL_VERSION))?;

        let model = self
            .records
            .insert_model(Model::new(name, version).with_description(description))
            .await?;
        info!(model_id = %model.id, name = %model.name, version = %model.version, "Model registered");
        Ok(model)
    }

    /// Renames, re-versions or re-describes a model. Status only moves through
    /// upload, commit and archive.
    pub async fn update(&self, model_id: ModelId, changes: ModelUpdate) -> Result<Model> {
        let name = changes.name.as_deref().map(check_name).transpose()?;
        let version = changes.version.as_deref().map(check_version).transpose()?;

        let _guard = self.locks.lock(model_id).await;
        let mut model = self.get(model_id).await?;
        if let Some(name) = name {
            model.name = name.to_string();
        }
        if let Some(version) = version {
            model.version = version.to_string();
        }
        if changes.description.is_some() {
            model.description = changes.description;
        }
        model.updated_at = Utc::now();

        let model = self.records.update_model(model).await?;
        self.forget_record(model_id).await;
        info!(model_id = %model_id, name = %model.name, version = %model.version, "Model updated");
        Ok(model)
    }

    /// Stores an artifact for a `PENDING` or `ERROR` model and moves it to `UPLOADED`.
    pub async fn attach_artifact(&self, model_id: ModelId, filename: &str, bytes: &[u8]) -> Result<Model> {
        let size = bytes.len() as u64;
        if size > self.storage.max_artifact_bytes {
            return Err(ServeError::PayloadTooLarge {
                size,
                limit: self.storage.max_artifact_bytes,
            });
        }
        let extension = self.allowed_extension(filename)?;

        let _guard = self.locks.lock(model_id).await;
        let mut model = self.get(model_id).await?;
        if !matches!(model.status, ModelStatus::Pending | ModelStatus::Error) {
            return Err(ServeError::InvalidState(format!(
                "cannot upload an artifact for model {} in status '{}'; only pending or error models accept uploads",
                model_id, model.status
            )));
        }

        let stored = self
            .artifacts
            .save(model_id, &extension, bytes)
            .await
            .map_err(|e| match e {
                ServeError::StorageFailure(_) => e,
                other => ServeError::StorageFailure(other.to_string()),
            })?;

        model.file_path = Some(stored.path);
        model.file_size_bytes = Some(stored.size_bytes);
        model.file_hash = Some(stored.sha256);
        model.error_message = None;
        model.input_schema = None;
        model.output_schema = None;
        model.model_metadata = None;
        let model = self.transition(model, ModelStatus::Uploaded).await?;

        self.engine.invalidate(model_id);
        self.cache.invalidate_model(model_id).await;

        info!(
            model_id = %model_id,
            size = size,
            hash = model.file_hash.as_deref().unwrap_or_default(),
            "Artifact uploaded"
        );
        Ok(model)
    }

    /// The single commitment point: validates the artifact and moves the model
    /// to `READY` or `ERROR`.
    ///
    /// A validation failure is not an error of this call; the returned model
    /// carries `ERROR` and the reason.
    ///
    /// A model found in `VALIDATING` is left over from a commit whose final
    /// write failed, since commits hold the model lock throughout. It is
    /// validated again.
    pub async fn commit(&self, model_id: ModelId) -> Result<Model> {
        let _guard = self.locks.lock(model_id).await;
        let model = self.get(model_id).await?;
        let mut model = match model.status {
            ModelStatus::Uploaded => self.transition(model, ModelStatus::Validating).await?,
            ModelStatus::Validating => {
                warn!(model_id = %model_id, "Resuming interrupted validation");
                model
            }
            status => {
                return Err(ServeError::InvalidState(format!(
                    "model {} cannot be validated in status '{}'; upload an artifact first",
                    model_id, status
                )))
            }
        };

        let validated = match model.file_path.as_deref() {
            Some(path) => match self.artifacts.read(path).await {
                Ok(bytes) => self.engine.validate(&bytes),
                Err(e) => Err(e),
            },
            None => Err(ServeError::LoadError("model has no artifact".into())),
        };

        match validated {
            Ok(artifact) => {
                model.input_schema = Some(artifact.input_schema);
                model.output_schema = Some(artifact.output_schema);
                model.model_metadata = Some(artifact.metadata);
                model.error_message = None;
                let model = self
                    .transition(model, ModelStatus::Ready)
                    .await
                    .map_err(|e| self.interrupted(model_id, e))?;

                self.engine.invalidate(model_id);
                self.cache.invalidate_model(model_id).await;
                info!(model_id = %model_id, name = %model.name, version = %model.version, "Model committed");

                if self.warmup_on_commit {
                    self.warmup(&model).await;
                }
                Ok(model)
            }
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "Model validation failed");
                model.error_message = Some(e.to_string());
                self.transition(model, ModelStatus::Error)
                    .await
                    .map_err(|e| self.interrupted(model_id, e))
            }
        }
    }

    fn interrupted(&self, model_id: ModelId, e: ServeError) -> ServeError {
        error!(
            model_id = %model_id,
            error = %e,
            "Failed to record validation outcome; model stays validating until committed again"
        );
        e
    }

    async fn warmup(&self, model: &Model) {
        let result = match self.engine.get_or_load_session(model, self.artifacts.as_ref()).await {
            Ok(session) => self.engine.warmup(&session),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(model_id = %model.id, error = %e, "Warmup failed");
        }
    }

    /// Returns the model if it has crossed the commitment boundary.
    pub async fn assert_committed(&self, model_id: ModelId) -> Result<Model> {
        let model = self.get(model_id).await?;
        if model.status != ModelStatus::Ready {
            return Err(ServeError::NotCommitted {
                model_id,
                status: model.status,
            });
        }
        Ok(model)
    }

    /// Retires a `READY` model from serving.
    pub async fn archive(&self, model_id: ModelId) -> Result<Model> {
        let _guard = self.locks.lock(model_id).await;
        let model = self.get(model_id).await?;
        if model.status != ModelStatus::Ready {
            return Err(ServeError::InvalidState(format!(
                "only ready models can be archived; model {} is '{}'",
                model_id, model.status
            )));
        }
        let model = self.transition(model, ModelStatus::Archived).await?;
        self.engine.invalidate(model_id);
        self.cache.invalidate_model(model_id).await;
        info!(model_id = %model_id, "Model archived");
        Ok(model)
    }

    /// Deletes a model, its artifact, session and cached results.
    pub async fn delete(&self, model_id: ModelId) -> Result<()> {
        let _guard = self.locks.lock(model_id).await;
        self.get(model_id).await?;

        let count = self.records.count_active_jobs(model_id).await?;
        if count > 0 {
            return Err(ServeError::HasActiveJobs { model_id, count });
        }

        if let Err(e) = self.artifacts.delete_model(model_id).await {
            error!(model_id = %model_id, error = %e, "Failed to remove artifact");
            return Err(e);
        }
        self.engine.invalidate(model_id);
        self.cache.invalidate_model(model_id).await;
        self.records.delete_model(model_id).await?;
        self.forget_record(model_id).await;
        info!(model_id = %model_id, "Model deleted");
        Ok(())
    }

    pub async fn get(&self, model_id: ModelId) -> Result<Model> {
        self.records
            .get_model(model_id)
            .await?
            .ok_or_else(|| ServeError::NotFound(format!("model {}", model_id)))
    }

    /// Like [`LifecycleController::get`], but served from the model cache when
    /// possible. The flag reports a cache hit.
    pub async fn get_cached(&self, model_id: ModelId) -> Result<(Model, bool)> {
        let Some(models) = &self.models else {
            return Ok((self.get(model_id).await?, false));
        };
        if let Some(model) = models.get(model_id).await {
            return Ok((model, true));
        }
        let generation = models.generation();
        let model = self.get(model_id).await?;
        models.put(&model, generation).await;
        Ok((model, false))
    }

    pub async fn list(&self, status: Option<ModelStatus>, page: PageRequest) -> Result<Page<Model>> {
        self.records
            .list_models(
                ModelFilter {
                    status,
                    ..Default::default()
                },
                page,
            )
            .await
    }

    /// All versions of `name`, highest semantic version first.
    pub async fn versions(&self, name: &str) -> Result<Vec<Model>> {
        let mut models = self.records.models_by_name(name).await?;
        models.sort_by(|a, b| compare_versions(&b.version, &a.version));
        Ok(models)
    }

    /// Highest version of `name`, optionally restricted to `READY` models.
    pub async fn latest(&self, name: &str, ready_only: bool) -> Result<Model> {
        self.versions(name)
            .await?
            .into_iter()
            .find(|m| !ready_only || m.status == ModelStatus::Ready)
            .ok_or_else(|| {
                if ready_only {
                    ServeError::NotFound(format!("no ready model named '{}'", name))
                } else {
                    ServeError::NotFound(format!("no model named '{}'", name))
                }
            })
    }

    fn allowed_extension(&self, filename: &str) -> Result<String> {
        let extension = file_extension(filename).ok_or_else(|| {
            ServeError::InvalidInput(format!("file '{}' has no extension", filename))
        })?;
        if !self
            .storage
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(ServeError::InvalidInput(format!(
                "extension '{}' is not allowed; expected one of {:?}",
                extension, self.storage.allowed_extensions
            )));
        }
        Ok(extension)
    }

    async fn transition(&self, mut model: Model, next: ModelStatus) -> Result<Model> {
        let from = model.status;
        if !from.can_transition_to(next) {
            return Err(ServeError::InvalidState(format!(
                "illegal model transition {} -> {}",
                from, next
            )));
        }
        model.status = next;
        model.updated_at = Utc::now();
        let model = self.records.update_model(model).await?;
        self.forget_record(model.id).await;
        observability::record_lifecycle_transition(from.as_str(), next.as_str());
        Ok(model)
    }

    async fn forget_record(&self, model_id: ModelId) {
        if let Some(models) = &self.models {
            models.invalidate(model_id).await;
        }
    }
}

fn check_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ServeError::InvalidInput(format!(
            "name must be 1 to {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name)
}

fn check_version(version: &str) -> Result<&str> {
    let version = version.trim();
    if version.is_empty() || version.chars().count() > MAX_VERSION_LEN {
        return Err(ServeError::InvalidInput(format!(
            "version must be 1 to {} characters",
            MAX_VERSION_LEN
        )));
    }
    Ok(version)
}

/// Parsed `MAJOR.MINOR.PATCH[-PRE]` version.
#[derive(Debug, PartialEq, Eq)]
struct SemVer {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Option<String>,
}

impl SemVer {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches('v');
        let raw = raw.split('+').next()?;
        let (core, pre) = match raw.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (raw, None),
        };
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // A release outranks its pre-releases.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

/// Orders version strings; anything that is not semver sorts below every semver.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (SemVer::parse(a), SemVer::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
