use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FerryError {
    #[error("catalog communication failed: {0}")]
    Comm(String),

    #[error("catalog rejected record: {0}")]
    Validation(String),

    #[error("cannot access remote file {remote_path}: {message}")]
    FileNotAccessible {
        remote_path: String,
        message: String,
    },

    #[error("unable to {action} files for dataset: no suitable file transfer available")]
    #[diagnostic(help("every configured transfer failed to connect, see the related errors"))]
    NoSuitableTransfer {
        action: &'static str,
        remote_path: String,
        #[related]
        errors: Vec<FerryError>,
    },

    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error(
        "failed to upload {stage} for dataset {pid}: {message}. The dataset and data files \
         were uploaded but are not linked with each other"
    )]
    #[diagnostic(help("manual reconciliation of the dataset in the catalog is required"))]
    PartialUpload {
        pid: String,
        stage: &'static str,
        message: String,
    },

    #[error("duplicate remote path: {0}")]
    DuplicateRemotePath(String),

    #[error("multiple selected files would be downloaded to the same local file: {0}")]
    DuplicateLocalName(String),

    #[error("conflicting checksum algorithms: {existing} and {incoming}")]
    ChecksumAlgorithmConflict { existing: String, incoming: String },

    #[error("datablock not found: {0}")]
    BlockNotFound(String),

    #[error("file {0} exists both locally and remotely, refusing to upload it")]
    #[diagnostic(help("remove the remote metadata or the local path from the file"))]
    AmbiguousFile(String),

    #[error(
        "cannot determine source folder for dataset: neither the dataset nor the file \
         transfer provides one"
    )]
    MissingSourceFolder,

    #[error("file has no local path: {0}")]
    MissingLocalFile(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid dataset id: {0}")]
    InvalidPid(String),

    #[error("invalid source folder pattern: {0}")]
    InvalidPattern(String),

    #[error("operation not supported by file transfer: {0}")]
    TransferNotSupported(String),

    #[error("remote shell command failed: {0}")]
    RemoteShell(String),

    #[error("missing config file ferry.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid transfer configuration: {0}")]
    InvalidTransfer(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FerryError {
    pub fn not_accessible(remote_path: impl ToString, message: impl Into<String>) -> Self {
        FerryError::FileNotAccessible {
            remote_path: remote_path.to_string(),
            message: message.into(),
        }
    }
}
