use plinth_llm::GenerationError;
use plinth_storage::StorageError;
use snafu::Snafu;

/// Caller-visible failure class; the web layer maps these onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    ServiceUnavailable,
    Internal,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("message text is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("required field '{field}' is missing"))]
    MissingField {
        stage: &'static str,
        field: &'static str,
    },
    #[snafu(display("file '{original_filename}' has a disallowed type"))]
    UnsupportedFileType {
        stage: &'static str,
        original_filename: String,
    },
    #[snafu(display(
        "file '{original_filename}' is {size_bytes} bytes, over the {limit_bytes} byte limit"
    ))]
    FileTooLarge {
        stage: &'static str,
        original_filename: String,
        size_bytes: u64,
        limit_bytes: u64,
    },
    #[snafu(display("{entity} '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("generation service is unavailable"))]
    GenerationUnavailable {
        stage: &'static str,
        source: GenerationError,
    },
    #[snafu(display("generation failed: {source}"))]
    GenerationFailed {
        stage: &'static str,
        source: GenerationError,
    },
    #[snafu(display("persistence failed at {stage}: {source}"))]
    Persist {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to store uploaded bytes at {path}"))]
    StoreUpload {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to load platform configuration"))]
    ConfigLoad {
        stage: &'static str,
        source: figment::Error,
    },
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::EmptyMessage { .. }
            | CoreError::MissingField { .. }
            | CoreError::UnsupportedFileType { .. }
            | CoreError::FileTooLarge { .. } => ErrorClass::Validation,
            CoreError::NotFound { .. } => ErrorClass::NotFound,
            CoreError::GenerationUnavailable { .. } | CoreError::GenerationFailed { .. } => {
                ErrorClass::ServiceUnavailable
            }
            CoreError::Persist { .. }
            | CoreError::StoreUpload { .. }
            | CoreError::ConfigLoad { .. } => ErrorClass::Internal,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Storage not-found keeps its class; every other storage fault is an
/// internal persistence failure.
pub(crate) fn map_storage(stage: &'static str) -> impl FnOnce(StorageError) -> CoreError {
    move |source| match source {
        StorageError::NotFound { entity, id, .. } => CoreError::NotFound { stage, entity, id },
        other => CoreError::Persist {
            stage,
            source: other,
        },
    }
}

pub(crate) fn map_generation(stage: &'static str) -> impl FnOnce(GenerationError) -> CoreError {
    move |source| match source {
        unconfigured @ GenerationError::Unavailable { .. } => CoreError::GenerationUnavailable {
            stage,
            source: unconfigured,
        },
        other => CoreError::GenerationFailed {
            stage,
            source: other,
        },
    }
}
