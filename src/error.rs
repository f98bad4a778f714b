//! Error types for redcapfs.
//!
//! Only [`VaultError::Decryption`] and mount establishment are fatal to the
//! process. Everything raised inside a per-event pipeline is reported for
//! that event and the mount keeps running.

use crate::records::ExportFormat;
use thiserror::Error;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential vault failed
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// Remote service request failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A file name matched no instrument or measure
    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// Writing an export failed
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// The filesystem bridge never acknowledged a new directory
    #[error("directory not materialized: {0}")]
    DirNotReady(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Router created outside a Tokio runtime
    #[error("no async runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Credential vault errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Authentication of the stored blob failed (wrong passphrase or tampering)
    #[error("decryption failed: wrong passphrase or corrupted token store")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("corrupt token store: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Remote service errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered with an `{"error": ...}` document
    #[error("remote service error: {0}")]
    Remote(String),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("no base URL configured")]
    NoBaseUrl,
}

/// Name classification errors.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("'{0}' is neither an instrument nor a measure")]
    Unknown(String),
}

/// Export errors.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{format} export needs at least {required} records, got {actual}")]
    InsufficientRows {
        format: ExportFormat,
        required: usize,
        actual: usize,
    },

    #[error("record set too large for {format}: {reason}")]
    TooLarge {
        format: ExportFormat,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Result type alias for redcapfs operations.
pub type Result<T> = std::result::Result<T, Error>;
