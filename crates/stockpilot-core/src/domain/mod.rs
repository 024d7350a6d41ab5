//! Domain model (ids, task record, state machine, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod task;

pub use errors::{ControlOp, ErrorKind, TaskError};
pub use ids::{ParseTaskIdError, TaskId};
pub use outcome::Outcome;
pub use spec::{SubmitOptions, SubmitRequest, Subject};
pub use state::{SubjectStatus, TaskKind, TaskStatus};
pub use task::{
    InvalidTransition, Progress, RetryEntry, SubjectResult, SubjectState, TaskRecord, Timestamps,
};
