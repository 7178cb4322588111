pub mod generator;
pub mod store;
pub mod types;

pub use generator::severity_for;
pub use store::AlertStore;
pub use types::{Alert, AlertFilter, AlertOutcome, AlertStatus, AlertType, Severity};
