use arrow::error::ArrowError;

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TensorArrayError {
    /// Tensor metadata is structurally invalid (empty or non-positive shape,
    /// length mismatch between optional fields, non-bijective permutation).
    #[error("Invalid tensor metadata: {0}")]
    InvalidMetadata(String),

    /// The extension metadata JSON payload could not be decoded.
    #[error("Failed to decode extension metadata JSON: {0}")]
    MetadataDecode(#[from] serde_json::Error),

    /// The field metadata carries no `ARROW:extension:metadata` entry.
    #[error("Missing ARROW:extension:metadata entry in field metadata")]
    MissingExtensionMetadata,

    /// A constructor was called with arguments that contradict each other or
    /// the supplied metadata.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The physical Arrow storage does not match the expected extension layout.
    #[error("Invalid extension storage: {0}")]
    InvalidStorage(String),

    /// Checked element access past the end of the array.
    #[error("Index {index} out of bounds for tensor array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// An extension factory with the same storage kind and name already exists.
    #[error("Extension already registered: {0}")]
    AlreadyRegistered(String),

    /// Wrapper around Arrow-level failures.
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
}
