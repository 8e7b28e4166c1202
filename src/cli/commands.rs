//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::analysis::AnalysisEngine;
use crate::config::PipelineConfig;
use crate::enhance::{decide, EnhancementProcessor, FilterChain};
use crate::error::{AlchemyError, Result};
use crate::gateway::ProcessGateway;
use crate::layout::Layout;
use crate::mix::MixOptions;
use crate::pipeline::{mime_for_extension, Pipeline, StemUpload};
use crate::project::{Project, ProjectId};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_id(id: &str) -> Result<ProjectId> {
    ProjectId::parse_str(id)
        .map_err(|e| AlchemyError::validation(format!("invalid project id '{}': {}", id, e)))
}

/// Create the directory layout.
pub fn init(config: &PipelineConfig) -> Result<()> {
    let layout = Layout::new(&config.root_dir);
    layout.bootstrap()?;
    println!("Initialized: {}", layout.root().display());
    Ok(())
}

/// Analyze one file and show the chain that would be applied.
pub async fn analyze(config: &PipelineConfig, file: &Path) -> Result<()> {
    let runner = Arc::new(ProcessGateway::from_config(config));
    let engine = AnalysisEngine::from_config(runner, config);

    let result = engine.analyze(file).await?;
    let chain = decide(&result);

    print_json(&serde_json::json!({
        "analysis": result,
        "filters": chain,
        "filterGraph": chain.to_graph(),
    }))
}

/// Enhance a single file outside any project.
pub async fn enhance(config: &PipelineConfig, file: &Path, output: &Path) -> Result<()> {
    let runner = Arc::new(ProcessGateway::from_config(config));
    let engine = AnalysisEngine::from_config(runner.clone(), config);
    let processor = EnhancementProcessor::from_config(runner, config);

    let chain = match engine.analyze(file).await {
        Ok(result) => decide(&result),
        Err(e) => {
            warn!(error = %e, "Analysis unavailable, copying through");
            FilterChain::new()
        }
    };

    let outcome = processor.enhance(file, &chain, output).await?;
    print_json(&serde_json::json!({
        "output": outcome.output,
        "applied": outcome.applied,
        "fellBack": outcome.fell_back,
        "failure": outcome.failure,
        "sha256": outcome.output_sha256,
    }))
}

/// Expand files and directories into the audio files they name.
pub fn collect_audio_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| is_audio_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(AlchemyError::validation(format!(
                "no such file or directory: {}",
                path.display()
            )));
        }
    }
    Ok(files)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
        .is_some()
}

/// Copy stems into the layout, create the project and process it.
///
/// Returns the processed project, which may have ended in `error`.
pub async fn create(
    config: &PipelineConfig,
    name: &str,
    style: &str,
    paths: &[PathBuf],
) -> Result<Project> {
    let pipeline = Pipeline::open(config)?;
    let files = collect_audio_files(paths)?;

    let mut uploads = Vec::with_capacity(files.len());
    for file in &files {
        let dest = pipeline.layout().upload_path(file);
        tokio::fs::copy(file, &dest)
            .await
            .map_err(|e| AlchemyError::File {
                path: file.clone(),
                source: e,
            })?;
        uploads.push(StemUpload::from_file(&dest)?);
    }

    let project = pipeline.create_project(name, style, uploads).await?;
    info!(project = %project.id, "Uploaded {} stems", project.stems.len());

    let project = pipeline.process_project(project.id).await?;
    print_json(&project)?;
    Ok(project)
}

pub async fn show(config: &PipelineConfig, id: &str) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    print_json(&pipeline.get_project(parse_id(id)?).await?)
}

pub async fn list(config: &PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    let projects = pipeline.store().list().await;
    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for project in projects {
        println!(
            "{}  {:<10}  {:>2} stems  {}",
            project.id,
            project.status.as_str(),
            project.stems.len(),
            project.name
        );
    }
    Ok(())
}

pub async fn mix(config: &PipelineConfig, id: &str, gain_db: f64, loudnorm: bool) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    let mut options = MixOptions::default().with_gain_db(gain_db);
    if !loudnorm {
        options = options.without_loudnorm();
    }
    let outcome = pipeline.request_mix(parse_id(id)?, options).await?;
    print_json(&outcome)
}

pub async fn normalize(config: &PipelineConfig, id: &str, target: f64) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    let mixed = pipeline.request_normalize(parse_id(id)?, target).await?;
    print_json(&mixed)
}

pub async fn measure(config: &PipelineConfig, id: &str) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    let measurement = pipeline.request_loudness_measurement(parse_id(id)?).await?;
    print_json(&measurement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("session").join("drums");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["kick.wav", "snare.FLAC", "notes.txt"] {
            std::fs::write(nested.join(name), b"x").unwrap();
        }
        let single = dir.path().join("vocals.mp3");
        std::fs::write(&single, b"x").unwrap();

        let files = collect_audio_files(&[dir.path().join("session"), single.clone()]).unwrap();
        assert_eq!(
            files,
            vec![nested.join("kick.wav"), nested.join("snare.FLAC"), single]
        );
    }

    #[test]
    fn test_missing_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_audio_files(&[dir.path().join("nope")]).is_err());
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
