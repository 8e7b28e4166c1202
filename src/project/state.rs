//! Project State Controller
//!
//! ```text
//! uploading --Submit--> processing --Completed--> ready
//!                           |  ^                    |
//!                        Failed +------Retry--------+
//!                           v  |
//!                          error
//! ```
//!
//! `apply` is the only way a project's status changes. It is pure: the
//! caller persists the returned project.
//!
//! A `processing` record found by a caller that holds the project's lease
//! belongs to a run that is gone (crash, killed CLI, dropped future).
//! `Interrupted` settles it in `error` so the project can be retried.

use std::path::PathBuf;

use chrono::Utc;

use super::model::{MixedFile, Project, ProjectError, ProjectStatus, StemProcessing};
use crate::error::StateError;

/// Something that happened to a project.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// All stems are uploaded; start the pipeline.
    Submit,
    /// A new mix or normalize request on a finished project.
    Retry,
    /// One stem has a processed file.
    StemProcessed {
        index: usize,
        processed_path: PathBuf,
        processing: StemProcessing,
    },
    /// A master was rendered.
    Completed { mixed_file: MixedFile },
    /// Mixing or normalization failed.
    Failed {
        message: String,
        detail: Option<String>,
    },
    /// The run that moved the project into `processing` no longer exists.
    Interrupted,
}

/// Error message recorded for a run that never finished.
pub const INTERRUPTED_MESSAGE: &str = "Processing was interrupted before it finished";

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Submit => "submit",
            Event::Retry => "retry",
            Event::StemProcessed { .. } => "stem_processed",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Interrupted => "interrupted",
        }
    }
}

/// Apply `event` to `project`, returning the updated record.
pub fn apply(mut project: Project, event: Event) -> Result<Project, StateError> {
    use ProjectStatus::*;

    match (project.status, event) {
        (Processing, Event::Submit | Event::Retry) => return Err(StateError::Busy),

        (Uploading, Event::Submit) => {
            if project.stems.is_empty() {
                return Err(StateError::NoStems);
            }
            project.status = Processing;
        }

        (Ready | Error, Event::Retry) => {
            project.status = Processing;
            project.error = None;
        }

        (
            Processing,
            Event::StemProcessed {
                index,
                processed_path,
                processing,
            },
        ) => {
            let len = project.stems.len();
            let stem = project
                .stems
                .get_mut(index)
                .ok_or(StateError::StemIndexOutOfRange { index, len })?;
            stem.processed_path = Some(processed_path);
            stem.processing = Some(processing);
        }

        (Processing, Event::Completed { mixed_file }) => {
            let missing = project.unprocessed_stems();
            if !missing.is_empty() {
                return Err(StateError::StemsNotProcessed { missing });
            }
            project.mixed_file = Some(mixed_file);
            project.status = Ready;
            project.error = None;
        }

        (Processing, Event::Failed { message, detail }) => {
            project.status = Error;
            project.error = Some(ProjectError { message, detail });
        }

        (Processing, Event::Interrupted) => {
            project.status = Error;
            project.error = Some(ProjectError {
                message: INTERRUPTED_MESSAGE.to_string(),
                detail: None,
            });
        }

        (from, event) => {
            return Err(StateError::InvalidTransition {
                from: from.to_string(),
                event: event.name(),
            })
        }
    }

    project.updated_at = Utc::now();
    Ok(project)
}
