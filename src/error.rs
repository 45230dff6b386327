use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackError>;

/// Error taxonomy for the tracking engine. Quota denials are deliberately not
/// here: `reserve_send_slot` returns them as ordinary `SlotDecision` values
/// because they are expected, recoverable outcomes rather than faults.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("application {0} not found")]
    ApplicationNotFound(i64),

    #[error("recruiter {0} not found")]
    RecruiterNotFound(i64),

    /// A sent first-contact record already exists for this pair. Recording a
    /// second one would break the at-most-once guarantee.
    #[error("first contact already sent to recruiter {recruiter_id} for application {application_id}")]
    DuplicateSend {
        application_id: i64,
        recruiter_id: i64,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
