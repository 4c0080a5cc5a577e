pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod files;
pub mod service;
pub mod turn;

pub use config::{GenerationSettings, PlatformConfig};
pub use context::FILE_CONTEXT_PREAMBLE;
pub use error::{CoreError, CoreResult, ErrorClass};
pub use extract::{
    DocumentParseError, DocumentParser, FILE_SUMMARY_BYTE_CAP, NoDocumentParser, PDF_PAGE_LIMIT,
};
pub use files::{ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES};
pub use service::ChatService;
pub use turn::{TITLE_TOKEN_LIMIT, TurnOutcome, auto_title};
