//! Validation: structured checking, adversarial audits, deterministic
//! rules, and evidence grounding.

pub mod audit;
pub mod checker;
pub mod ground;
pub mod models;
pub mod rules;

pub use audit::{FieldAudit, FieldAuditor, high_severity_failures};
pub use checker::{StructuredChecker, format_revision_prompt};
pub use ground::{find_best_match, ground_evidence};
pub use models::CheckerResponse;
pub use rules::run_rules;
