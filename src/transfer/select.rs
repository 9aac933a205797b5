use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::domain::RemotePath;
use crate::error::FerryError;
use crate::formatter::SourceFolderPattern;
use crate::transfer::{DownloadConnection, Downloader, FileTransfer, UploadConnection, Uploader};

/// Delegates to the first of several transfers that manages to connect.
///
/// Children are tried in order. Only errors while connecting move on to the
/// next child; once a connection is handed out, errors from transferring
/// files go straight to the caller.
pub struct SelectFileTransfer {
    children: Vec<Box<dyn FileTransfer>>,
    source_folder: Option<SourceFolderPattern>,
}

impl std::fmt::Debug for SelectFileTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectFileTransfer")
            .field("children", &self.children.len())
            .field("source_folder", &self.source_folder)
            .finish()
    }
}

impl SelectFileTransfer {
    pub fn new(children: Vec<Box<dyn FileTransfer>>) -> Result<Self, FerryError> {
        if children.is_empty() {
            return Err(FerryError::InvalidTransfer(
                "at least one child transfer must be provided".to_string(),
            ));
        }
        Ok(Self {
            children,
            source_folder: None,
        })
    }

    /// Upload into this folder for every child, overriding their own folders.
    pub fn with_source_folder(mut self, pattern: impl Into<SourceFolderPattern>) -> Self {
        self.source_folder = Some(pattern.into());
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn connect_first<'a, C: ?Sized>(
        &'a self,
        action: &'static str,
        representative: &RemotePath,
        mut connect: impl FnMut(&'a dyn FileTransfer) -> Result<Box<C>, FerryError>,
    ) -> Result<Box<C>, FerryError> {
        let mut errors = Vec::new();
        for (index, child) in self.children.iter().enumerate() {
            match connect(&**child) {
                Ok(connection) => {
                    info!(action, child = index, "selected file transfer");
                    return Ok(connection);
                }
                Err(err) => {
                    debug!(action, child = index, error = %err, "file transfer cannot connect");
                    errors.push(err);
                }
            }
        }
        Err(FerryError::NoSuitableTransfer {
            action,
            remote_path: representative.to_string(),
            errors,
        })
    }
}

impl Downloader for SelectFileTransfer {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        self.connect_first("download", representative, |child| {
            child.connect_for_download(dataset, representative)
        })
    }
}

impl Uploader for SelectFileTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        if let Some(pattern) = &self.source_folder {
            return pattern.format(dataset);
        }
        let mut last_error = None;
        for child in &self.children {
            match child.source_folder_for(dataset) {
                Ok(folder) => return Ok(folder),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or(FerryError::MissingSourceFolder))
    }

    fn connect_for_upload(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        match &self.source_folder {
            Some(pattern) => {
                let source_folder = pattern.format(dataset)?;
                self.connect_for_upload_to(dataset, &source_folder, representative)
            }
            None => self.connect_first("upload", representative, |child| {
                child.connect_for_upload(dataset, representative)
            }),
        }
    }

    fn connect_for_upload_to(
        &self,
        dataset: &Dataset,
        source_folder: &RemotePath,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        self.connect_first("upload", representative, |child| {
            child.connect_for_upload_to(dataset, source_folder, representative)
        })
    }
}
