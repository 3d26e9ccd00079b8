use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorReason {
    None = 0,
    RpcError = 1,
    BadJson = 2,
    HttpError = 3,
    Timeout = 4,
    BadStatus = 5,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::None => "-",
            ErrorReason::RpcError => "rpc_error",
            ErrorReason::BadJson => "bad_json",
            ErrorReason::HttpError => "http_error",
            ErrorReason::Timeout => "timeout",
            ErrorReason::BadStatus => "bad_status",
        }
    }
}

/// Why a relayed request counted as a failure.
#[derive(Debug)]
pub struct UpstreamFailure {
    pub reason: ErrorReason,
    pub detail: String,
}

impl UpstreamFailure {
    pub fn new(reason: ErrorReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.detail)
    }
}

impl std::error::Error for UpstreamFailure {}
