//! Pipeline orchestration
//!
//! Wires the stages together and exposes the project-level operations:
//! create, get, process, mix, normalize and measure. Every operation that
//! changes a project holds that project's lease for its whole run and moves
//! status only through `project::apply`. Holding the lease and still finding
//! `processing` means the run that set it is gone; that record is settled in
//! `error` first so the request can proceed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::analysis::AnalysisEngine;
use crate::config::PipelineConfig;
use crate::enhance::{decide, EnhancementProcessor, FilterChain};
use crate::error::{AlchemyError, MixError, Result};
use crate::gateway::{ProcessGateway, ProcessRunner};
use crate::layout::Layout;
use crate::loudness::{validate_target, LoudnessService, Measurement};
use crate::mix::{MixInput, MixOptions, MixReport, Mixer};
use crate::project::{
    apply, Event, LoudnessInfo, MixedFile, Project, ProjectId, ProjectStatus, ProjectStore,
    StemFile, StemProcessing,
};

/// Most stems accepted in one project.
pub const MAX_STEMS: usize = 10;
/// Largest accepted stem, in bytes.
pub const MAX_STEM_BYTES: u64 = 100 * 1024 * 1024;

pub const DEFAULT_PROJECT_NAME: &str = "Untitled Project";
pub const DEFAULT_MIX_STYLE: &str = "pop";

/// A stem already written to `stems/`, ready to join a project.
#[derive(Debug, Clone, PartialEq)]
pub struct StemUpload {
    pub path: PathBuf,
    pub declared_type: String,
    pub size: u64,
    pub stem_type: String,
    pub volume: f64,
}

impl StemUpload {
    pub fn new(path: impl Into<PathBuf>, declared_type: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            declared_type: declared_type.into(),
            size,
            stem_type: "other".to_string(),
            volume: 1.0,
        }
    }

    /// Describe a file on disk, deriving its MIME type from the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)
            .map_err(|e| AlchemyError::File {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();
        let declared_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_for_extension)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(path, declared_type, size))
    }

    pub fn with_stem_type(mut self, stem_type: impl Into<String>) -> Self {
        self.stem_type = stem_type.into();
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.declared_type.starts_with("audio/") {
            return Err(AlchemyError::validation(format!(
                "{} is not an audio file ({})",
                self.path.display(),
                self.declared_type
            )));
        }
        if self.size > MAX_STEM_BYTES {
            return Err(AlchemyError::validation(format!(
                "{} exceeds the {} MB stem limit",
                self.path.display(),
                MAX_STEM_BYTES / (1024 * 1024)
            )));
        }
        if !(self.volume.is_finite() && self.volume >= 0.0) {
            return Err(AlchemyError::validation(format!(
                "stem volume must be a non-negative number, got {}",
                self.volume
            )));
        }
        Ok(())
    }

    fn into_stem(self) -> StemFile {
        StemFile {
            original_path: self.path,
            processed_path: None,
            declared_type: self.declared_type,
            size: self.size,
            stem_type: self.stem_type,
            volume: self.volume,
            processing: None,
        }
    }
}

/// A rendered master and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixOutcome {
    pub mixed_file: MixedFile,
    pub report: MixReport,
}

/// MIME type for an accepted audio extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "wav" => Some("audio/wav"),
        "aif" | "aiff" => Some("audio/aiff"),
        "flac" => Some("audio/flac"),
        "mp3" => Some("audio/mpeg"),
        "ogg" => Some("audio/ogg"),
        "m4a" => Some("audio/m4a"),
        _ => None,
    }
}

pub struct Pipeline<R> {
    layout: Layout,
    store: ProjectStore,
    analysis: Arc<AnalysisEngine<R>>,
    processor: Arc<EnhancementProcessor<R>>,
    mixer: Mixer<R>,
    loudness: LoudnessService<R>,
}

impl Pipeline<ProcessGateway> {
    /// Bootstrap the directory layout and open the persistent store under it.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let layout = Layout::new(&config.root_dir);
        layout.bootstrap()?;
        let store = ProjectStore::open(layout.projects_dir())?;
        let runner = Arc::new(ProcessGateway::from_config(config));
        Ok(Self::new(config, runner, store))
    }
}

impl<R: ProcessRunner> Pipeline<R> {
    pub fn new(config: &PipelineConfig, runner: Arc<R>, store: ProjectStore) -> Self {
        Self {
            layout: Layout::new(&config.root_dir),
            store,
            analysis: Arc::new(AnalysisEngine::from_config(runner.clone(), config)),
            processor: Arc::new(EnhancementProcessor::from_config(runner.clone(), config)),
            mixer: Mixer::from_config(runner.clone(), config),
            loudness: LoudnessService::from_config(runner, config),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Register a new project in `uploading`.
    pub async fn create_project(
        &self,
        name: &str,
        mix_style: &str,
        uploads: Vec<StemUpload>,
    ) -> Result<Project> {
        if uploads.is_empty() {
            return Err(AlchemyError::validation("a project needs at least one stem"));
        }
        if uploads.len() > MAX_STEMS {
            return Err(AlchemyError::validation(format!(
                "at most {} stems per project, got {}",
                MAX_STEMS,
                uploads.len()
            )));
        }
        for upload in &uploads {
            upload.validate()?;
        }

        let name = if name.trim().is_empty() {
            DEFAULT_PROJECT_NAME
        } else {
            name.trim()
        };
        let mix_style = if mix_style.trim().is_empty() {
            DEFAULT_MIX_STYLE
        } else {
            mix_style.trim()
        };

        let stems = uploads.into_iter().map(StemUpload::into_stem).collect();
        let project = Project::new(name, mix_style, stems);
        self.store.insert(project.clone()).await?;

        info!(project = %project.id, stems = project.stems.len(), "Project created");
        Ok(project)
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.store.get(id).await
    }

    /// Run analysis, enhancement and mixing for a freshly uploaded project.
    ///
    /// A failed mix is recorded on the project, which is returned in `error`.
    /// A project left in `processing` by an interrupted run is processed
    /// again from the start.
    pub async fn process_project(&self, id: ProjectId) -> Result<Project> {
        let _lease = self.store.lease(id).await?;
        let project = self.store.get(id).await?;
        let event = if project.status == ProjectStatus::Processing {
            Event::Retry
        } else {
            Event::Submit
        };
        let project = self.settle_interrupted(project).await?;
        let mut project = self.store.update(apply(project, event)?).await?;

        info!(project = %id, stems = project.stems.len(), "Processing project");

        let mut tasks = JoinSet::new();
        for (index, stem) in project.stems.iter().enumerate() {
            let analysis = self.analysis.clone();
            let processor = self.processor.clone();
            let input = stem.original_path.clone();
            let dest = self.layout.processed_path(index, &input);
            tasks.spawn(async move {
                let result = enhance_stem(&analysis, &processor, &input, &dest).await;
                (index, result)
            });
        }

        let mut unavailable = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok((processed_path, processing)))) => {
                    project = apply(
                        project,
                        Event::StemProcessed {
                            index,
                            processed_path,
                            processing,
                        },
                    )?;
                }
                Ok((index, Err(e))) => {
                    warn!(project = %id, stem = index, error = %e, "Stem has no processed file");
                    unavailable.insert(index, e.to_string());
                }
                Err(e) => {
                    warn!(project = %id, error = %e, "Stem task aborted");
                }
            }
        }
        let project = self.store.update(project).await?;

        if let Some((index, reason)) = unavailable.into_iter().next() {
            let err = AlchemyError::from(MixError::StemUnavailable {
                index,
                path: project.stems[index].original_path.clone(),
                reason,
            });
            self.record_failure(project, "Mixing failed", &err).await?;
            return self.store.get(id).await;
        }

        match self.render_mix(project, &MixOptions::default()).await {
            Ok(_) | Err(AlchemyError::Mix(_)) => self.store.get(id).await,
            Err(e) => Err(e),
        }
    }

    /// Re-mix a finished project from its processed stems.
    pub async fn request_mix(&self, id: ProjectId, options: MixOptions) -> Result<MixOutcome> {
        let _lease = self.store.lease(id).await?;
        let project = self.settle_interrupted(self.store.get(id).await?).await?;
        let project = self.store.update(apply(project, Event::Retry)?).await?;
        self.render_mix(project, &options).await
    }

    /// Render a loudness-normalized copy of the current master and make it
    /// the project's master.
    pub async fn request_normalize(&self, id: ProjectId, target_lufs: f64) -> Result<MixedFile> {
        validate_target(target_lufs)?;

        let _lease = self.store.lease(id).await?;
        let project = self.settle_interrupted(self.store.get(id).await?).await?;
        let project = apply(project, Event::Retry)?;
        let Some(current) = project.mixed_file.clone() else {
            return Err(AlchemyError::validation("project has no master to normalize"));
        };
        let project = self.store.update(project).await?;

        let dest = self
            .layout
            .normalized_path(&project.file_tag(), target_lufs);

        match self.loudness.normalize(&current.path, &dest, target_lufs).await {
            Ok(outcome) => {
                let mixed = MixedFile::new(outcome.output).with_loudness(LoudnessInfo {
                    target_lufs: outcome.target_lufs,
                    original_lufs: outcome.original_loudness,
                    adjustment: outcome.adjusted_by,
                });
                self.store
                    .update(apply(
                        project,
                        Event::Completed {
                            mixed_file: mixed.clone(),
                        },
                    )?)
                    .await?;
                info!(
                    project = %id,
                    target_lufs,
                    adjusted_by = outcome.adjusted_by,
                    "Master normalized"
                );
                Ok(mixed)
            }
            Err(e) => {
                self.record_failure(project, "Normalization failed", &e).await?;
                Err(e)
            }
        }
    }

    /// Measure the current master. Never changes the project.
    pub async fn request_loudness_measurement(&self, id: ProjectId) -> Result<Measurement> {
        let project = self.store.get(id).await?;
        let Some(mixed) = project.mixed_file else {
            return Err(AlchemyError::validation("project has no master to measure"));
        };
        Ok(self.loudness.measure(&mixed.path).await?)
    }

    /// Mix a project that is in `processing` and settle it in `ready` or `error`.
    async fn render_mix(&self, project: Project, options: &MixOptions) -> Result<MixOutcome> {
        let unprocessed = project
            .stems
            .iter()
            .enumerate()
            .find(|(_, stem)| stem.processed_path.is_none());
        if let Some((index, stem)) = unprocessed {
            let e = AlchemyError::from(MixError::StemUnavailable {
                index,
                path: stem.original_path.clone(),
                reason: "stem was never processed".to_string(),
            });
            self.record_failure(project, "Mixing failed", &e).await?;
            return Err(e);
        }

        let inputs: Vec<MixInput> = project
            .stems
            .iter()
            .filter_map(|stem| {
                let path = stem.processed_path.clone()?;
                Some(MixInput::new(path).with_volume(stem.volume))
            })
            .collect();
        let dest = self.layout.mix_path(&project.file_tag());

        match self.mixer.mix(&inputs, &dest, options).await {
            Ok(report) => {
                let mixed = MixedFile::new(report.output.clone());
                self.store
                    .update(apply(
                        project,
                        Event::Completed {
                            mixed_file: mixed.clone(),
                        },
                    )?)
                    .await?;
                info!(file = %mixed.file_name, graph = %report.filter_graph, "Project ready");
                Ok(MixOutcome {
                    mixed_file: mixed,
                    report,
                })
            }
            Err(e) => {
                let e = AlchemyError::from(e);
                self.record_failure(project, "Mixing failed", &e).await?;
                Err(e)
            }
        }
    }

    /// Settle a `processing` record whose run no longer holds the lease.
    async fn settle_interrupted(&self, project: Project) -> Result<Project> {
        if project.status != ProjectStatus::Processing {
            return Ok(project);
        }
        warn!(project = %project.id, "Found an interrupted run, marking it failed");
        self.store.update(apply(project, Event::Interrupted)?).await
    }

    async fn record_failure(&self, project: Project, stage: &str, err: &AlchemyError) -> Result<()> {
        error!(
            project = %project.id,
            code = err.error_code(),
            error = %err,
            "{}", stage
        );
        let event = Event::Failed {
            message: format!("{}: {}", stage, err),
            detail: err.diagnostic(),
        };
        self.store.update(apply(project, event)?).await?;
        Ok(())
    }
}

/// Analyze, decide and enhance one stem.
///
/// Analysis failure degrades to an empty chain; only a failed identity copy
/// leaves the stem without a processed file.
async fn enhance_stem<R: ProcessRunner>(
    analysis: &AnalysisEngine<R>,
    processor: &EnhancementProcessor<R>,
    input: &Path,
    dest: &Path,
) -> Result<(PathBuf, StemProcessing)> {
    let (chain, issues) = match analysis.analyze(input).await {
        Ok(result) => (
            decide(&result),
            result
                .issues
                .raised()
                .into_iter()
                .map(String::from)
                .collect(),
        ),
        Err(e) => {
            warn!(stem = %input.display(), error = %e, "Analysis unavailable, copying stem through");
            (FilterChain::new(), Vec::new())
        }
    };

    let outcome = processor.enhance(input, &chain, dest).await?;
    let processing = StemProcessing {
        filters: outcome.applied,
        fell_back: outcome.fell_back,
        failure: outcome.failure,
        analysis_issues: issues,
        output_sha256: outcome.output_sha256,
        processed_at: Utc::now(),
    };
    Ok((outcome.output, processing))
}
