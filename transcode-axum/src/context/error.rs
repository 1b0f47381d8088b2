//! Classification of handler failures.

use transcode_axum_core::{Status, flatten_error_chain};

use crate::error::BoxError;

const HANDLER_EXCEPTION: &str = "Exception was thrown by handler.";

/// Turn a handler error into the status reported to the caller.
///
/// A [`Status`] (or, with the `tonic` feature, a `tonic::Status`) is passed
/// through as declared. Anything else is reported as `Unknown`; its error
/// chain is only included when `detailed` is set.
pub fn classify_error(err: BoxError, method: &str, detailed: bool) -> Status {
    let err = match err.downcast::<Status>() {
        Ok(status) => return declared(*status),
        Err(err) => err,
    };

    #[cfg(feature = "tonic")]
    let err = match err.downcast::<tonic::Status>() {
        Ok(status) => return declared(Status::from(*status)),
        Err(err) => err,
    };

    tracing::error!(method, error = %err, "Error when executing service method '{method}'.");

    if detailed {
        Status::unknown(format!("{HANDLER_EXCEPTION} {}", flatten_error_chain(&*err)))
    } else {
        Status::unknown(HANDLER_EXCEPTION)
    }
}

/// Log a status the handler chose to return.
pub fn declared(status: Status) -> Status {
    tracing::info!(
        code = %status.code(),
        "Error status code '{}' with detail '{}' raised.",
        status.code(),
        status.message()
    );
    status
}
