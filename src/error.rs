//! Error types for bookpack operations.

use thiserror::Error;

/// Errors that can occur while reading, validating, repairing, or writing
/// a book package.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("Invalid grammar: {0}")]
    InvalidGrammar(String),

    #[error("Missing required element: {0}")]
    MissingElement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
