//! File transfer backends.
//!
//! A transfer opens a connection for one orchestrated operation. Opening the
//! connection probes a representative file so that an unusable backend fails
//! before any file is moved. Connections release their resources on drop.

use camino::Utf8PathBuf;

use crate::dataset::Dataset;
use crate::domain::RemotePath;
use crate::error::FerryError;
use crate::file::FileDescriptor;

pub mod copy;
pub mod link;
pub mod select;
pub mod ssh;

pub use copy::CopyFileTransfer;
pub use link::LinkFileTransfer;
pub use select::SelectFileTransfer;
pub use ssh::{LocalShell, OpenSsh, RemoteShell, SshFileTransfer};

pub trait DownloadConnection {
    /// Download `remote[i]` to `local[i]`. Remote paths are absolute, i.e.
    /// already joined with the source folder.
    fn download_files(
        &mut self,
        remote: &[RemotePath],
        local: &[Utf8PathBuf],
    ) -> Result<(), FerryError>;
}

impl std::fmt::Debug for dyn DownloadConnection + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DownloadConnection")
    }
}

pub trait UploadConnection {
    /// The folder files are uploaded into.
    fn source_folder(&self) -> &RemotePath;

    /// Upload local files. Returns the files marked as uploaded.
    fn upload_files(&mut self, files: Vec<FileDescriptor>)
    -> Result<Vec<FileDescriptor>, FerryError>;

    /// Remove previously uploaded files.
    fn revert_upload(&mut self, files: &[FileDescriptor]) -> Result<(), FerryError>;
}

pub trait Downloader {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError>;
}

pub trait Uploader {
    /// The folder this transfer would upload `dataset` into.
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError>;

    fn connect_for_upload(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        let source_folder = self.source_folder_for(dataset)?;
        self.connect_for_upload_to(dataset, &source_folder, representative)
    }

    /// Connect for uploading into an already resolved `source_folder`.
    fn connect_for_upload_to(
        &self,
        dataset: &Dataset,
        source_folder: &RemotePath,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError>;
}

pub trait FileTransfer: Downloader + Uploader {}

impl<T: Downloader + Uploader> FileTransfer for T {}

impl<T: Downloader + ?Sized> Downloader for Box<T> {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        (**self).connect_for_download(dataset, representative)
    }
}

impl<T: Uploader + ?Sized> Uploader for Box<T> {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        (**self).source_folder_for(dataset)
    }

    fn connect_for_upload(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        (**self).connect_for_upload(dataset, representative)
    }

    fn connect_for_upload_to(
        &self,
        dataset: &Dataset,
        source_folder: &RemotePath,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        (**self).connect_for_upload_to(dataset, source_folder, representative)
    }
}
