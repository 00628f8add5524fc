use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceGraphError {
    #[error("Malformed trace {trace_id}: {reason}")]
    MalformedTrace { trace_id: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Service not found: {0}")]
    NotFound(String),
}

impl TraceGraphError {
    pub fn malformed(trace_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTrace {
            trace_id: trace_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_malformed_trace(&self) -> bool {
        matches!(self, Self::MalformedTrace { .. })
    }
}

pub type Result<T> = std::result::Result<T, TraceGraphError>;
