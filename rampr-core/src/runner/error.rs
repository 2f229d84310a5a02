pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`stages` must be a non-empty list of {{ duration, target }} with a total duration > 0")]
    InvalidStages,

    #[error("scenario has no steps")]
    NoSteps,

    #[error("scenario has no request step; nothing would be measured")]
    NoRequestStep,

    #[error("invalid base url: `{0}` (expected an absolute http:// URL)")]
    InvalidBaseUrl(String),

    #[error("a step uses random endpoint selection but `endpoints` is empty")]
    NoEndpoints,

    #[error("`request_timeout` must be a positive duration")]
    InvalidTimeout,

    #[error("`reconcile_interval` must be a positive duration")]
    InvalidReconcileInterval,

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("invalid threshold on `{metric}`: {reason}")]
    InvalidThreshold { metric: String, reason: String },
}
