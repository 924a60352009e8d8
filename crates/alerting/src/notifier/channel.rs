use crate::routing::Notification;

/// A delivery integration. One instance per configured receiver.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Connection, DNS or timeout failure.
    Unreachable(String),
    /// The receiver answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The message could not be built; retrying cannot help.
    Build(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Build(_) => false,
        }
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(e) => write!(f, "receiver unreachable: {e}"),
            Self::Rejected { status, body } => write!(f, "receiver rejected with {status}: {body}"),
            Self::Build(e) => write!(f, "cannot build message: {e}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Build(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

const MAX_ERROR_BODY: usize = 512;

/// Maps a non-2xx response to `Rejected`, keeping the start of the body.
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<(), DeliveryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}
