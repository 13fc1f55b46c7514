use derive_more::Display;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy. Variants map onto the kinds in the error
/// handling design: leaf adapters fail fast with one of these and perform
/// no recovery of their own; the HTTP layer is the only place they get
/// translated to status codes.
#[derive(Debug, Display)]
pub enum Error {
    #[display("invalid input: {msg}")]
    InvalidInput { msg: String },

    #[display("not found: {what}")]
    NotFound { what: String },

    #[display("payload too large: {msg}")]
    PayloadTooLarge { msg: String },

    #[display("authorization denied: {message}")]
    AuthorizationDenied {
        message: String,
        action: String,
        resource_id: Option<String>,
    },

    #[display("unauthorized")]
    Unauthorized,

    #[display("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[display("integrity violation: {msg}")]
    Integrity { msg: String },

    #[display("transport error: {msg}")]
    Transport { msg: String },

    #[display("internal error: {msg}")]
    Internal { msg: String },

    #[display("io error at {path}: {error}")]
    Io { error: std::io::Error, path: String },

    #[display("configuration error: {msg}")]
    Config { msg: String },
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io {
            error,
            path: "<unknown>".to_string(),
        }
    }
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput { msg: msg.into() }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity { msg: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal { msg: msg.into() }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport { msg: msg.into() }
    }

    pub fn invalid_status_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Error::InvalidStatusTransition { from: from.into(), to: to.into() }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, code, message) = match &self {
            Error::InvalidInput { msg } => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            Error::NotFound { what } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("not found: {what}"),
            ),
            Error::PayloadTooLarge { msg } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            Error::AuthorizationDenied { message, .. } => (
                StatusCode::FORBIDDEN,
                "AUTHORIZATION_ERROR",
                message.clone(),
            ),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "authentication required".to_string(),
            ),
            Error::InvalidStatusTransition { from, to } => (
                StatusCode::BAD_REQUEST,
                "INVALID_STATUS_TRANSITION",
                format!("Invalid status transition from {from} to {to}"),
            ),
            Error::Integrity { msg } => {
                tracing::error!(error = %msg, "integrity violation");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_ERROR", msg.clone())
            }
            Error::Transport { msg } => {
                tracing::error!(error = %msg, "transport error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TRANSPORT_ERROR",
                    "upstream storage error".to_string(),
                )
            }
            Error::Internal { msg } => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal server error".to_string(),
                )
            }
            Error::Io { error, path } => {
                tracing::error!(error = %error, path, "io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal server error".to_string(),
                )
            }
            Error::Config { msg } => {
                tracing::error!(error = %msg, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "configuration error".to_string(),
                )
            }
        };

        let body = axum::Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Extension trait mirroring the teacher's `ResultIoExt`: attach a path to
/// an I/O error so `Error::Io` carries useful context in logs.
pub trait ResultIoExt<T> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            path: path.display().to_string(),
        })
    }
}
