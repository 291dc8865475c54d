//! Error types for the posting and generative pipelines.

use thiserror::Error;

use crate::transport::TransportError;

/// Human-facing category of an upstream HTTP failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    AuthFailed,
    Forbidden,
    RateLimited,
    BadRequest,
    UnprocessableEntity,
    Other,
}

impl ErrorCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCategory::AuthFailed,
            403 => ErrorCategory::Forbidden,
            429 => ErrorCategory::RateLimited,
            400 => ErrorCategory::BadRequest,
            422 => ErrorCategory::UnprocessableEntity,
            _ => ErrorCategory::Other,
        }
    }
}

/// Failure of a single call through the rate-limited client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("no credentials configured")]
    NoCredentials,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.status().map(ErrorCategory::from_status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Whether another attempt with a different credential can change the
    /// outcome. Payload rejections (400/422) and local errors cannot.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Network(_) => true,
            RequestError::Upstream { status, .. } => !matches!(status, 400 | 422),
            RequestError::NoCredentials
            | RequestError::InvalidEndpoint(_)
            | RequestError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("File is empty (0 bytes)")]
    EmptyFile,
    #[error("File is too large ({size} bytes, limit is {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Upload failed: {status} - {message}")]
    Upstream { status: u16, message: String },
    #[error("Upload response malformed: {0}")]
    MalformedResponse(String),
}

impl From<RequestError> for UploadError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Upstream { status, message } => {
                UploadError::Upstream { status, message }
            }
            RequestError::Decode(msg) => UploadError::MalformedResponse(msg),
            RequestError::Network(TransportError::Timeout) => UploadError::Network(
                "upload timed out; try a smaller file".to_string(),
            ),
            other => UploadError::Network(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Authentication failed: please check your API key ({0})")]
    AuthFailed(String),
    #[error("Access denied: please check your API permissions ({0})")]
    Forbidden(String),
    #[error("Rate limit exceeded: please wait a moment and try again ({0})")]
    RateLimited(String),
    #[error("Invalid request: please check your post content and channel settings ({0})")]
    BadRequest(String),
    #[error("Invalid data: the request contains invalid fields or values ({0})")]
    UnprocessableEntity(String),
    #[error("Network error: unable to reach the posting service ({0})")]
    Network(String),
    #[error("Invalid API response format: {0}")]
    MalformedResponse(String),
    #[error("Post scheduling error ({status}): {message}")]
    Unknown { status: u16, message: String },
    #[error("Media upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("Item has no media to upload and is not marked text-only")]
    MissingMedia,
    #[error("Posting API key not configured")]
    NotAuthenticated,
    #[error("No channels selected: at least one channel id is required")]
    EmptyChannels,
}

impl ScheduleError {
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ScheduleError::AuthFailed(_) => Some(ErrorCategory::AuthFailed),
            ScheduleError::Forbidden(_) => Some(ErrorCategory::Forbidden),
            ScheduleError::RateLimited(_) => Some(ErrorCategory::RateLimited),
            ScheduleError::BadRequest(_) => Some(ErrorCategory::BadRequest),
            ScheduleError::UnprocessableEntity(_) => Some(ErrorCategory::UnprocessableEntity),
            ScheduleError::Unknown { .. } => Some(ErrorCategory::Other),
            _ => None,
        }
    }
}

impl From<RequestError> for ScheduleError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Upstream { status, message } => match ErrorCategory::from_status(status) {
                ErrorCategory::AuthFailed => ScheduleError::AuthFailed(message),
                ErrorCategory::Forbidden => ScheduleError::Forbidden(message),
                ErrorCategory::RateLimited => ScheduleError::RateLimited(message),
                ErrorCategory::BadRequest => ScheduleError::BadRequest(message),
                ErrorCategory::UnprocessableEntity => ScheduleError::UnprocessableEntity(message),
                ErrorCategory::Other => ScheduleError::Unknown { status, message },
            },
            RequestError::Decode(msg) => ScheduleError::MalformedResponse(msg),
            RequestError::NoCredentials => ScheduleError::NotAuthenticated,
            other => ScheduleError::Network(other.to_string()),
        }
    }
}
