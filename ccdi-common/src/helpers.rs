use std::fmt::Debug;

use log::error;

// ============================================ PUBLIC =============================================

pub fn to_string<T: Debug>(value: T) -> String {
    format!("{:?}", value)
}

/// Log the error with a context and keep only the success value.
pub fn log_err<T, E: Debug>(context: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            error!("{}: {:?}", context, error);
            None
        }
    }
}
