use thiserror::Error;

/// Failure to produce a usable question bank from the backing store.
///
/// Any of these at startup aborts the process; an empty bank is worse
/// than no bot at all.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("question data not found at '{0}'")]
    NotFound(String),
    #[error("question data at '{0}' is empty")]
    EmptyData(String),
    #[error("failed to parse question data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error while loading question data: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot resolve correct option for question '{0}'")]
    Restructure(String),
}

/// Score persistence failure. The in-memory board stays authoritative
/// until the next successful save.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error while saving: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error while saving: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound message delivery failure after the outbox gave up.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("rate limited, retry exhausted: {0}")]
    RateLimited(teloxide::RequestError),
    #[error("send failed: {0}")]
    Other(teloxide::RequestError),
    #[error("outbox worker is gone")]
    QueueClosed,
}

/// A post trigger fired but the bank has no question left for the slot.
#[derive(Debug, Error)]
#[error("not enough questions for session '{session}': {remaining} remaining, {needed} needed")]
pub struct ScheduleGapError {
    pub session: String,
    pub remaining: usize,
    pub needed: usize,
}
