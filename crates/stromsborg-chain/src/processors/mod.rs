#![forbid(unsafe_code)]

//! Generic processors: the chain endpoints and a few utilities.

pub mod logging;
pub mod operation;
pub mod passthrough;
pub mod reader;
pub mod rewrite;
pub mod writer;

pub use logging::EventLoggingProcessor;
pub use operation::OperationInputProcessor;
pub use passthrough::PassThroughProcessor;
pub use reader::DocumentReaderProcessor;
pub use rewrite::RewriteOutputProcessor;
pub use writer::DocumentWriterProcessor;
