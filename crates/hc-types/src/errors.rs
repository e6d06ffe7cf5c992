use thiserror::Error;

/// Main error type for the HyperCut system
#[derive(Error, Debug)]
pub enum HcError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl HcError {
    /// True for errors raised while parsing or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, HcError::Config(_))
    }

    /// True when a cut referenced a variable the event collection does not have.
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, HcError::Data(DataError::FieldNotFound { .. }))
    }
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Field not found: {path} (unresolved segment '{segment}')")]
    FieldNotFound { path: String, segment: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Unsupported column type for {column}: {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("Schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },
}

/// Errors raised while turning a cut vector into an event mask
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("cut {key} is neither min nor max")]
    InvalidCutKey { key: String },

    #[error("unsupported variable shape for {variable}: nesting depth {depth}")]
    UnsupportedShape { variable: String, depth: usize },

    #[error("field {variable} is a record, not a value array")]
    NotAValue { variable: String },
}

/// Result type alias for HyperCut operations
pub type HcResult<T> = Result<T, HcError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HcError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HcError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HcError::Config(format!($($arg)*))
    };
}
