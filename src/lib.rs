//! Transaction risk and alert engine for tracked blockchain wallets.
//!
//! Transactions flow through a classifier (wallet-threshold and fund
//! dispersion rules), a statistical scorer, and an optional model-based
//! scorer; detections become deduplicated alerts with a read/resolve
//! lifecycle. Per-address analytics rebuild an investigation view
//! (activity distributions, flow graph, risk score) from observed
//! history on demand.

pub mod alert;
pub mod analytics;
pub mod config;
pub mod detect;
pub mod error;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod registry;

pub use error::{EngineError, Result};
pub use pipeline::{IngestReport, TransactionPipeline};
