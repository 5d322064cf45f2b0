//! glimpse-io — Concrete frame sources and display sinks.
//!
//! Reads frames from a directory of still images and renders results either
//! to the log or to annotated image files on disk.

pub mod directory;
pub mod sink;

pub use directory::{DirectoryError, DirectorySource};
pub use sink::{AnnotatingSink, LogSink, SinkError};
