use std::fmt;

/// Coarse result of one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    /// Real content was returned
    Success,

    /// An anti-automation challenge was returned instead of content
    Blocked,

    /// Nothing usable was returned
    Failed,
}

/// Why a fetch ended in [`FetchStatus::Failed`] or [`FetchStatus::Blocked`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// HTTP 404/410: the page does not exist, never retried
    NotFound,

    /// 5xx, 429, timeouts and connection errors: retried with backoff
    Transient,

    /// Bot challenge page or mitigation header
    Challenge,

    /// Any other client error, not retried
    Rejected,

    /// The channel cannot serve requests (stopped instance, empty pool)
    Unavailable,
}

/// Result of a fetch as seen by the orchestrator that issued it
///
/// Outcomes are never persisted; only records derived from a successful
/// body are.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,

    /// Response body; present on success and, for diagnostics, on challenges
    pub body: Option<String>,

    /// HTTP status of the page, when known
    pub status_code: Option<u16>,

    pub failure: Option<FailureKind>,

    /// Free-form error description for logs
    pub message: Option<String>,

    /// Number of attempts made, including retries
    pub attempts: u32,

    /// Name of the channel that produced the outcome
    pub channel: String,
}

impl FetchOutcome {
    pub fn success(body: String, status_code: u16) -> Self {
        Self {
            status: FetchStatus::Success,
            body: Some(body),
            status_code: Some(status_code),
            failure: None,
            message: None,
            attempts: 1,
            channel: String::new(),
        }
    }

    pub fn blocked(body: Option<String>, status_code: Option<u16>) -> Self {
        Self {
            status: FetchStatus::Blocked,
            body,
            status_code,
            failure: Some(FailureKind::Challenge),
            message: Some("bot challenge detected".to_string()),
            attempts: 1,
            channel: String::new(),
        }
    }

    pub fn failed(kind: FailureKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status: FetchStatus::Failed,
            body: None,
            status_code,
            failure: Some(kind),
            message: Some(message.into()),
            attempts: 1,
            channel: String::new(),
        }
    }

    /// Tags the outcome with the channel that produced it
    pub fn via(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    pub fn is_blocked(&self) -> bool {
        self.status == FetchStatus::Blocked
    }

    /// True for failures worth another attempt on the same channel
    pub fn is_transient(&self) -> bool {
        self.status == FetchStatus::Failed && self.failure == Some(FailureKind::Transient)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
