use std::path::PathBuf;
use thiserror::Error;

/// Errors that make a feed document unusable as a whole
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed feed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Feed document ended inside <{element}>")]
    UnexpectedEof { element: String },

    #[error("Feed document contains no elements")]
    EmptyDocument,
}

/// Errors raised by the remote loader
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("HTTP request failed for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Response from {url} exceeds the load limit of {limit} bytes")]
    LimitExceeded { url: String, limit: u64 },

    #[error("Load was cancelled")]
    Cancelled,

    #[error("No cached copy of {url} available while offline")]
    Offline { url: String },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse feed: {0}")]
    Parse(#[from] FeedError),
}

impl LoadError {
    /// Whether the load stopped because somebody cancelled it
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

/// Errors that can occur during metadata persistence
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to read metadata file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write metadata file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse metadata JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Errors from reading or writing the podcast list file
#[derive(Error, Debug)]
pub enum OpmlError {
    #[error("Failed to read podcast list {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write podcast list {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed podcast list XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Errors while loading the suggestions document
#[derive(Error, Debug)]
pub enum SuggestionError {
    #[error("Failed to load suggestions: {0}")]
    Load(#[from] LoadError),

    #[error("Malformed suggestions document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by a download backend
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Unknown download id {0}")]
    UnknownId(u64),

    #[error("Failed to remove {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while reading the settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings in {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons a podcast cannot enter a podcast list
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    #[error("Podcast has no name")]
    Unnamed,

    #[error("Podcast is already in the list")]
    Duplicate,
}
