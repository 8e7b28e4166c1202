//! Projects: records, the status state machine, and their store.

pub mod model;
pub mod state;
pub mod store;

pub use model::{
    LoudnessInfo, MixedFile, Project, ProjectError, ProjectId, ProjectStatus, StemFile,
    StemProcessing,
};
pub use state::{apply, Event, INTERRUPTED_MESSAGE};
pub use store::{ProjectLease, ProjectStore};
