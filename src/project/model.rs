//! Project records
//!
//! The serialized shape uses camelCase keys so stored projects read the same
//! as the documents the upload service produces.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enhance::FilterChain;

/// Stable project identifier.
pub type ProjectId = Uuid;

/// Lifecycle status, driven only through `state::apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Uploading => "uploading",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Error => "error",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics for one enhanced stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemProcessing {
    /// Filters actually rendered into the processed file.
    pub filters: FilterChain,
    pub fell_back: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Issue flags raised by analysis; empty when analysis was unavailable.
    #[serde(default)]
    pub analysis_issues: Vec<String>,
    pub output_sha256: String,
    pub processed_at: DateTime<Utc>,
}

/// One uploaded stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemFile {
    pub original_path: PathBuf,
    #[serde(default)]
    pub processed_path: Option<PathBuf>,
    /// MIME type as declared by the uploader.
    pub declared_type: String,
    pub size: u64,
    pub stem_type: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub processing: Option<StemProcessing>,
}

fn default_volume() -> f64 {
    1.0
}

impl StemFile {
    pub fn new(original_path: impl Into<PathBuf>, stem_type: impl Into<String>) -> Self {
        Self {
            original_path: original_path.into(),
            processed_path: None,
            declared_type: "audio/wav".to_string(),
            size: 0,
            stem_type: stem_type.into(),
            volume: 1.0,
            processing: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessInfo {
    #[serde(rename = "targetLUFS")]
    pub target_lufs: f64,
    #[serde(rename = "originalLUFS")]
    pub original_lufs: f64,
    /// Gain applied, in dB.
    pub adjustment: f64,
}

/// The current master of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedFile {
    pub file_name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Describes `path` only; dropped whenever the master is replaced.
    #[serde(default)]
    pub loudness: Option<LoudnessInfo>,
}

impl MixedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            file_name,
            path,
            created_at: Utc::now(),
            loudness: None,
        }
    }

    pub fn with_loudness(mut self, loudness: LoudnessInfo) -> Self {
        self.loudness = Some(loudness);
        self
    }
}

/// Error payload recorded when a project enters `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectError {
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub mix_style: String,
    pub stems: Vec<StemFile>,
    #[serde(default)]
    pub mixed_file: Option<MixedFile>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub error: Option<ProjectError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A fresh project in `uploading`.
    pub fn new(name: impl Into<String>, mix_style: impl Into<String>, stems: Vec<StemFile>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            mix_style: mix_style.into(),
            stems,
            mixed_file: None,
            status: ProjectStatus::Uploading,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Indices of stems that have no processed file yet.
    pub fn unprocessed_stems(&self) -> Vec<usize> {
        self.stems
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_processed())
            .map(|(i, _)| i)
            .collect()
    }

    /// Short tag used in output file names.
    pub fn file_tag(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let mut project = Project::new("Demo", "modern", vec![StemFile::new("/s/vox.wav", "vocals")]);
        project.mixed_file = Some(MixedFile::new("/m/mix.wav").with_loudness(LoudnessInfo {
            target_lufs: -16.0,
            original_lufs: -20.0,
            adjustment: 4.0,
        }));

        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["status"], "uploading");
        assert_eq!(json["mixStyle"], "modern");
        assert_eq!(json["stems"][0]["stemType"], "vocals");
        assert_eq!(json["mixedFile"]["fileName"], "mix.wav");
        assert_eq!(json["mixedFile"]["loudness"]["targetLUFS"], -16.0);

        let back: Project = serde_json::from_value(json).unwrap();
        assert_eq!(back, project);
    }

    #[test]
    fn test_volume_defaults_to_unity() {
        let stem: StemFile = serde_json::from_str(
            r#"{"originalPath":"/s/a.wav","declaredType":"audio/wav","size":10,"stemType":"drums"}"#,
        )
        .unwrap();
        assert_eq!(stem.volume, 1.0);
        assert!(!stem.is_processed());
    }

    #[test]
    fn test_unprocessed_stems() {
        let mut project = Project::new(
            "Demo",
            "modern",
            vec![StemFile::new("/a.wav", "vocals"), StemFile::new("/b.wav", "bass")],
        );
        project.stems[0].processed_path = Some("/p/a.wav".into());
        project.stems[1].processed_path = Some(PathBuf::new());
        assert_eq!(project.unprocessed_stems(), vec![1]);
        assert_eq!(project.file_tag().len(), 8);
    }
}
