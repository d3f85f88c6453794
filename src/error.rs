use thiserror::Error;

/// Lightweight, `Clone + PartialEq` classification of an [`AgentError`].
///
/// `RecoveryResult.final_error` and the `Result::Err` returned by the same
/// call are always produced from the same [`AgentError::kind`] projection, so
/// the two can never disagree about what happened.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    OptionViolation,
    MountInUse { pids: Vec<u32> },
    TransientUtility,
    ResolveFailed,
    DeviceGone,
    Cancelled,
    MountStorm,
    Malformed,
    Fatal,
}

/// Rich, public error type for this crate.
///
/// Internal helpers build up context with `anyhow` before the call boundary
/// maps the result into one of these typed variants.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("mount option {which:?} rejected: {reason}")]
    BadOption { which: String, reason: String },

    #[error("mount point {target} is in use by {pids:?}")]
    MountInUse { target: String, pids: Vec<u32> },

    #[error("{util} failed for {target}: {detail}")]
    UtilityFailed {
        util: &'static str,
        target: String,
        detail: String,
    },

    #[error("{util} timed out after {deadline_secs}s for {target}")]
    UtilityTimedOut {
        util: &'static str,
        target: String,
        deadline_secs: u64,
    },

    #[error("unable to resolve nqn {nqn}: {source}")]
    ResolveFailed {
        nqn: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("device {device} no longer exists")]
    DeviceGone { device: String },

    #[error("operation on {target} was cancelled")]
    Cancelled { target: String },

    #[error("mount storm detected for {device}: {count} mounts ({hint})")]
    MountStorm {
        device: String,
        count: usize,
        hint: String,
    },

    #[error("malformed mount-info line: {line}")]
    Malformed { line: String },

    #[error("unsupported filesystem type {fs_type}")]
    UnsupportedFs { fs_type: String },

    #[error("{context}: {source}")]
    Fatal {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AgentError {
    /// Project this error onto the lightweight, matchable [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::BadOption { .. } => ErrorKind::OptionViolation,
            AgentError::MountInUse { pids, .. } => ErrorKind::MountInUse { pids: pids.clone() },
            AgentError::UtilityFailed { .. } | AgentError::UtilityTimedOut { .. } => {
                ErrorKind::TransientUtility
            }
            AgentError::ResolveFailed { .. } => ErrorKind::ResolveFailed,
            AgentError::DeviceGone { .. } => ErrorKind::DeviceGone,
            AgentError::Cancelled { .. } => ErrorKind::Cancelled,
            AgentError::MountStorm { .. } => ErrorKind::MountStorm,
            AgentError::Malformed { .. } => ErrorKind::Malformed,
            AgentError::UnsupportedFs { .. } | AgentError::Fatal { .. } => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
