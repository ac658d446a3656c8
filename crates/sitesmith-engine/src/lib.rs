//! The workspace pipeline: intent classification, rate-limited generation,
//! output normalization and the per-session registry that ties them together.

pub mod error;
pub mod generation;
pub mod intent;
pub mod normalize;
pub mod registry;
pub mod workspace;

pub use error::WorkspaceError;
pub use generation::{GenerationClient, GenerationConfig};
pub use intent::{Intent, IntentClassifier};
pub use normalize::normalize;
pub use registry::SessionRegistry;
pub use workspace::{preview_path, CommandOutcome, Workspace, WorkspaceSnapshot, WorkspaceState};
