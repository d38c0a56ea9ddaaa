//! Converts HTML objects stored in S3 into PDFs and hands back a presigned
//! download link. Runs as an API Gateway backed Lambda function.

pub mod config;
pub mod handler;
pub mod renderer;
pub mod storage;

pub use config::{ChromeConfig, Config, ConfigError};
pub use handler::{function_handler, ConversionError, ConversionRequest, Converter, SignedLink};
pub use renderer::{ChromeRenderer, PdfRenderer, RenderError};
pub use storage::{MemoryStore, ObjectStore, S3Store, StorageError};
