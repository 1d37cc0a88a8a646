//! Response envelope separating transport failures from application errors.

use crate::error::ServiceError;

/// Outcome of one service call: at most one of `result`, `execution_error`
/// (transport) and `application_error` (HTTP-level) is set.
#[derive(Debug)]
pub struct ServiceResponse<T> {
    pub result: Option<T>,
    pub execution_error: Option<ServiceError>,
    pub application_error: Option<ServiceError>,
}

impl<T> ServiceResponse<T> {
    pub fn for_result(result: T) -> Self {
        Self {
            result: Some(result),
            execution_error: None,
            application_error: None,
        }
    }

    pub fn for_execution_error(error: ServiceError) -> Self {
        Self {
            result: None,
            execution_error: Some(error),
            application_error: None,
        }
    }

    pub fn for_application_error(error: ServiceError) -> Self {
        Self {
            result: None,
            execution_error: None,
            application_error: Some(error),
        }
    }

    /// Normalize into a plain result. Execution errors outrank application
    /// errors; callers intercept the application-error subtypes they care
    /// about (`CaptchaRequired`, `Locked`) before treating the rest as I/O
    /// failures.
    pub fn into_result(self) -> Result<T, ServiceError> {
        if let Some(error) = self.execution_error {
            return Err(error);
        }
        if let Some(error) = self.application_error {
            return Err(error);
        }
        self.result.ok_or(ServiceError::Api {
            status: 0,
            message: "empty service response".into(),
        })
    }
}
