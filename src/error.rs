// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::fmt;

/// Coarse failure classes the rest of the bridge reacts to.
///
/// Config flow, entry setup and the coordinator only ever branch on this,
/// never on individual [`AlulaError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad credentials or a revoked session. Never retried.
    Authentication,
    /// Network, timeout or server-side failure. Retried on the next poll.
    Connectivity,
    /// The cloud refused an arm/disarm request.
    Command,
    /// Everything else (malformed data, local I/O, shutdown).
    Other,
}

impl ErrorKind {
    /// Error key shown in the config flow form.
    pub fn form_error(&self) -> &'static str {
        match self {
            Self::Authentication => "invalid_auth",
            _ => "cannot_connect",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Connectivity => "connectivity",
            Self::Command => "command",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// All errors that can occur in the alula-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum AlulaError {
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout: {operation}")]
    Timeout { operation: String },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Command rejected for device {device_id}: {reason}")]
    CommandRejected { device_id: String, reason: String },

    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Update failed ({kind}): {message}")]
    UpdateFailed { kind: ErrorKind, message: String },

    #[error("Coordinator shut down")]
    Shutdown,
}

impl AlulaError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlulaError::Authentication { .. } => ErrorKind::Authentication,
            AlulaError::Http(e) if is_auth_status(e.status()) => ErrorKind::Authentication,
            AlulaError::Http(_)
            | AlulaError::Io(_)
            | AlulaError::Timeout { .. }
            | AlulaError::Server { .. } => ErrorKind::Connectivity,
            AlulaError::CommandRejected { .. } | AlulaError::UnknownDevice { .. } => {
                ErrorKind::Command
            }
            AlulaError::UpdateFailed { kind, .. } => *kind,
            AlulaError::InvalidResponse { .. } | AlulaError::Json(_) | AlulaError::Shutdown => {
                ErrorKind::Other
            }
        }
    }

    /// Whether this error is transient and the call may succeed on a later poll.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }

    pub(crate) fn authentication(reason: impl Into<String>) -> Self {
        AlulaError::Authentication {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_response(details: impl Into<String>) -> Self {
        AlulaError::InvalidResponse {
            details: details.into(),
        }
    }
}

fn is_auth_status(status: Option<reqwest::StatusCode>) -> bool {
    matches!(status.map(|s| s.as_u16()), Some(401) | Some(403))
}

pub type Result<T> = std::result::Result<T, AlulaError>;
