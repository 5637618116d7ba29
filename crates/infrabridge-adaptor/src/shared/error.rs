use crate::bus::BusError;
use infrabridge_core::{ApiResponse, CoreError};
use infrabridge_wrappers::WrapperError;
use thiserror::Error;

/// Adaptor specific errors
#[derive(Debug, Error)]
pub enum AdaptorError {
    #[error("Unable to parse API payload: {0}")]
    Parse(String),
    #[error("VIM not found: {0}")]
    BackendNotFound(String),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Bus error: {0}")]
    Bus(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<BusError> for AdaptorError {
    fn from(err: BusError) -> Self {
        AdaptorError::Bus(err.to_string())
    }
}

impl From<CoreError> for AdaptorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Parse(msg) => AdaptorError::Parse(msg),
            other => AdaptorError::Wrapper(WrapperError::Core(other)),
        }
    }
}

impl From<AdaptorError> for ApiResponse {
    fn from(err: AdaptorError) -> Self {
        match err {
            AdaptorError::Parse(_) => ApiResponse::error("Unable to parse API payload"),
            AdaptorError::BackendNotFound(_) => ApiResponse::error("VIM not found"),
            other => ApiResponse::error(other.to_string()),
        }
    }
}

pub type AdaptorResult<T> = std::result::Result<T, AdaptorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use infrabridge_core::RequestStatus;

    #[test]
    fn test_parse_error_reply_hides_details() {
        let response: ApiResponse = AdaptorError::Parse("missing field `vim_uuid`".into()).into();
        assert_eq!(response.request_status, RequestStatus::Error);
        assert_eq!(response.message, "Unable to parse API payload");
    }

    #[test]
    fn test_backend_not_found_reply() {
        let response: ApiResponse = AdaptorError::BackendNotFound("vim-1".into()).into();
        assert_eq!(response.message, "VIM not found");
    }

    #[test]
    fn test_wrapper_error_is_transparent() {
        let err: AdaptorError =
            WrapperError::Configuration("no compute driver for vendor 'x'".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: no compute driver for vendor 'x'"
        );
        let response: ApiResponse = err.into();
        assert!(response.message.contains("vendor 'x'"));
    }

    #[test]
    fn test_core_parse_error_becomes_parse() {
        let err: AdaptorError = CoreError::Parse("eof".into()).into();
        assert!(matches!(err, AdaptorError::Parse(_)));
    }

    #[test]
    fn test_core_errors_pass_through_wrapper() {
        let err: AdaptorError = CoreError::InvalidCidr("x".into()).into();
        assert!(matches!(err, AdaptorError::Wrapper(WrapperError::Core(_))));
    }

    #[test]
    fn test_timeout_error() {
        let err = AdaptorError::Timeout("registration".to_string());
        assert_eq!(err.to_string(), "Timeout: registration");
    }

    #[test]
    fn test_adaptor_result_type() {
        let ok: AdaptorResult<String> = Ok("success".to_string());
        let err: AdaptorResult<String> = Err(AdaptorError::Bus("closed".to_string()));
        assert!(ok.is_ok());
        assert_eq!(err.unwrap_err().to_string(), "Bus error: closed");
    }
}
