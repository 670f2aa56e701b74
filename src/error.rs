//! rnntr error types

use numr::dtype::DType;

/// rnntr result type
pub type Result<T> = std::result::Result<T, Error>;

/// rnntr errors
///
/// Every variant is a whole-call failure: no costs or gradients are produced.
/// Malformed individual batch elements are not errors, they surface as an
/// infinite cost for that element.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Activation element type has no loss kernel
    #[error("{op}: unsupported dtype {dtype:?} (expected F32 or F64)")]
    UnsupportedDType {
        /// Operation that rejected the dtype
        op: &'static str,
        /// The offending dtype
        dtype: DType,
    },

    /// Floating-point width other than 4 or 8 bytes
    #[error("unsupported precision: {bytes}-byte floats")]
    UnsupportedPrecision {
        /// Requested element width in bytes
        bytes: usize,
    },

    /// Caller-supplied workspace is smaller than the sizing query demands
    #[error("workspace too small: required {required} bytes, got {got}")]
    WorkspaceTooSmall {
        /// Bytes needed for this shape/precision/target
        required: usize,
        /// Bytes supplied
        got: usize,
    },

    /// Host workspace base address cannot hold the float regions
    #[error("workspace base address is not {align}-byte aligned")]
    WorkspaceMisaligned {
        /// Required alignment in bytes
        align: usize,
    },

    /// Execution target does not match the runtime client
    #[error("invalid device: {reason}")]
    InvalidDevice {
        /// Description of the mismatch
        reason: String,
    },

    /// Kernel loading, launch, or worker pool failure
    #[error("kernel error: {reason}")]
    KernelError {
        /// Description of what went wrong
        reason: String,
    },
}
