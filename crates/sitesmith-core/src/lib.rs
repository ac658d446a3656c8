//! Shared vocabulary for the sitesmith crates: session identifiers, the
//! generation error taxonomy, the provider seam and workspace history records.

pub mod errors;
pub mod history;
pub mod ids;
pub mod provider;

pub use errors::GenerationError;
pub use history::{Action, HistoryRecord};
pub use ids::SessionId;
pub use provider::{GenerationProvider, GenerationRequest};
