//! Domain model types for the pipeline engine

pub mod contract;
pub mod forecast;
pub mod record;
pub mod run;

pub use contract::{FieldDef, FieldType, LookupDef, SchemaContract, ValidationRule};
pub use forecast::{ArtifactStatus, EvalMetrics, ForecastState, ModelArtifact, ModelParams};
pub use record::{RawRecord, RecordStatus, ValidatedRecord};
pub use run::{DomainRun, RunCounters, RunError, RunState, RunTrigger, Stage, StageStatus};
