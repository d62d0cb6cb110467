//! Event processing runtime for prmoji.
//!
//! Wires the pure classifiers in `prmoji-core` to the mapping store and the
//! Slack reaction API: chat ingestion, reaction dispatch, and retention sweeps.

pub mod dispatcher;
pub mod ignore_list;
pub mod ingestion;
pub mod retention;

pub use dispatcher::{DispatchError, DispatchOutcome, DispatchReport, ReactionDispatcher};
pub use ignore_list::IgnoredCommenters;
pub use ingestion::{ingest_chat_message, IngestReport};
pub use retention::{
    cutoff_date_utc, start_retention_sweeper, sweep, RetentionSweeper, RetentionSweeperConfig,
    RetentionSweeperHandle, SweepError, SweepReport, DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL,
    DEFAULT_SWEEP_TIMEOUT,
};
