//! Typed error hierarchy for orderdesk.
//!
//! One enum per subsystem:
//! - `ConfigError`: dashboard config file and environment settings
//! - `StoreError`: document store reads and writes
//! - `AgentError`: remote agent calls and log records
//! - `BlobError`: blob uploads and signed URLs
//! - `OrderError`: order placement and lookups
//! - `ValidationError`: human validation and content-check reports
//! - `UploadError`: document upload fan-out
//! - `KycError`: KYC document extraction
//! - `ResearchError`: company research reports

use thiserror::Error;

/// Errors loading the dashboard configuration. These block the operation
/// that needed the configuration; there is no fallback.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing required config key '{0}'")]
    MissingKey(String),

    #[error("Missing required environment variable '{0}'")]
    MissingEnv(String),
}

/// Errors from a document store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document store error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("Document store lock poisoned")]
    LockPoisoned,

    #[error("Document key '_id' cannot be modified")]
    ImmutableKey,

    #[error("Cannot set path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("Document is not a mapping")]
    NotAMapping,

    #[error("A document with key {0} already exists")]
    DuplicateKey(String),

    #[error("Failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the remote agent client.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Agent endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Malformed log record for thread {thread_id}: {source}")]
    MalformedLog {
        thread_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Agent call cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Invalid blob connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Blob request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Blob service returned status {status} for {blob}")]
    Status { status: u16, blob: String },

    #[error("Blob name '{0}' must be a relative path without '..'")]
    InvalidBlobName(String),

    #[error("Failed to write blob at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order ID and (phone number or email) are required fields.")]
    MissingFields,

    #[error("An order with this ID already exists.")]
    AlreadyExists { order: String },

    #[error("Order ID {order} not found.")]
    NotFound { order: String },

    #[error("Order ID '{0}' may not contain '/', '\\' or '..'")]
    InvalidOrderId(String),

    #[error("Unknown country '{0}'")]
    UnknownCountry(String),

    #[error("Unknown document type '{0}'")]
    UnknownDocumentType(String),

    #[error("Select at least one document type.")]
    NoDocuments,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from human validation and report review.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Document {id} not found")]
    NotFound { id: String },

    #[error("Report has no rule '{0}'")]
    UnknownRule(String),

    #[error(transparent)]
    Edit(#[from] crate::editor::EditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Errors from the document upload flow.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No outstanding document '{document}' on order {order}")]
    NotRequested { order: String, document: String },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Upload worker failed: {0}")]
    Worker(String),
}

/// Errors from KYC document extraction.
#[derive(Debug, Error)]
pub enum KycError {
    #[error("Order ID is required.")]
    MissingOrder,

    #[error("Order ID '{0}' may not contain '/', '\\' or '..'")]
    InvalidOrder(String),

    #[error("Unknown nation '{0}'")]
    UnknownNation(String),

    #[error("Document type '{document}' is not issued in {nation}")]
    UnknownDocumentType { nation: String, document: String },

    #[error("Select at least one document type.")]
    NoDocumentTypes,

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from company research requests.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("Company name is required.")]
    MissingCompany,

    #[error("Number of news results must be between 1 and 100, got {0}")]
    NewsCount(u32),

    #[error("Select at least one research language.")]
    NoLanguages,

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
