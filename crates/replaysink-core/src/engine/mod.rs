//! Ingestion engine and per-partition workers.

mod failure;
mod ingestion;
mod worker;

pub use failure::{FailureAction, FailureBudget};
pub use ingestion::IngestionEngine;
pub use worker::{CommittedBatch, FlushOutcome, PartitionWorker};
