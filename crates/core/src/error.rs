use std::error::Error;
use std::fmt;

/// A type of error which can be returned whenever requests are made to a
/// session that has stopped.
pub struct SessionDeadError;

impl fmt::Debug for SessionDeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDeadError").finish()
    }
}

impl fmt::Display for SessionDeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "the session has stopped".fmt(f)
    }
}

impl Error for SessionDeadError {}
