//! Result and error types representing the outcome of compiling a graph.

use crate::verifier::VerifierErrors;
use core::fmt;

/// A compilation error.
///
/// When a compilation function fails, it will return one of these error codes.
#[derive(Debug)]
pub enum CodegenError {
    /// A list of errors detected by the verifier.
    ///
    /// The verifier reports, rather than aborts, so the list may describe more than one problem.
    Verifier(VerifierErrors),

    /// An implementation limit was exceeded.
    ImplLimitExceeded,

    /// The code size for the graph is too large.
    CodeTooLarge,

    /// The requested target, or a feature of it, is not supported.
    Unsupported(String),

    /// An I/O error happened while emitting code to the output stream.
    Io(std::io::Error),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error type.
pub type CodegenResult<T> = Result<T, CodegenError>;

// This is manually implementing Error and Display instead of using thiserror to reduce the amount
// of dependencies used by this crate.
impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Verifier(errors) => Some(errors),
            Self::Io(error) => Some(error),
            Self::ImplLimitExceeded | Self::CodeTooLarge | Self::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Verifier(e) => write!(f, "Verifier errors: {}", e),
            Self::ImplLimitExceeded => write!(f, "Implementation limit exceeded"),
            Self::CodeTooLarge => write!(f, "Code for graph is too large"),
            Self::Unsupported(feature) => write!(f, "Unsupported: {}", feature),
            Self::Io(e) => write!(f, "I/O error during emission: {}", e),
        }
    }
}

impl From<VerifierErrors> for CodegenError {
    fn from(e: VerifierErrors) -> Self {
        Self::Verifier(e)
    }
}

impl From<std::io::Error> for CodegenError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
