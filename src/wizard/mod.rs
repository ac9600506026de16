//! Wizard flow: step machine, AI recommendation correlation and the session
//! that ties the allocation tree to its collaborators.

mod config;
mod payload;
mod recommendation;
mod session;
mod state;

pub use config::WizardConfig;
pub use payload::SubmissionPayload;
pub use recommendation::RecommendationOutcome;
pub use session::{Collaborators, WizardSession};
pub use state::WizardStep;
