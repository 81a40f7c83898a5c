use async_trait::async_trait;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The outstanding-request limit was reached.
    QueueFull {
        /// Configured limit.
        limit: usize,
    },
    /// The overload probe reported the host as overloaded.
    Overloaded,
}

impl RejectReason {
    /// Human-readable description, also used as the default response body.
    pub fn describe(&self) -> String {
        match self {
            RejectReason::QueueFull { limit } => {
                format!("request queue limit of {limit} has been exceeded.")
            }
            RejectReason::Overloaded => "host is overloaded.".to_string(),
        }
    }
}

/// Response sent back for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status code (429 by default).
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Builds the response for a rejected request.
pub trait RejectionHandler: Send + Sync + 'static {
    /// Produces the rejection for `reason`.
    fn reject(&self, reason: RejectReason) -> Rejection;
}

/// Answers every rejection with a fixed status and the reason as body.
#[derive(Debug, Clone, Copy)]
pub struct StatusRejection {
    status: u16,
}

impl StatusRejection {
    /// Rejects with `status`.
    pub fn new(status: u16) -> Self {
        Self { status }
    }
}

impl RejectionHandler for StatusRejection {
    fn reject(&self, reason: RejectReason) -> Rejection {
        Rejection {
            status: self.status,
            body: reason.describe(),
        }
    }
}

/// Reports whether the host is currently overloaded.
#[async_trait]
pub trait OverloadProbe: Send + Sync + 'static {
    /// `true` if new requests should be rejected.
    async fn is_overloaded(&self) -> bool;
}

/// Probe that never reports overload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverloaded;

#[async_trait]
impl OverloadProbe for NeverOverloaded {
    async fn is_overloaded(&self) -> bool {
        false
    }
}
