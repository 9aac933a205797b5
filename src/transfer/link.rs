//! "Download" by symlinking files of a locally mounted file server.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::dataset::Dataset;
use crate::domain::RemotePath;
use crate::error::FerryError;
use crate::formatter::{self, SourceFolderPattern};
use crate::fs_util;
use crate::transfer::{DownloadConnection, Downloader, UploadConnection, Uploader};

/// Creates symlinks in the download folder that point at the remote files.
///
/// Cannot upload. Uploads fail when connecting, so a [`SelectFileTransfer`]
/// moves on to its next transfer.
///
/// [`SelectFileTransfer`]: crate::transfer::SelectFileTransfer
#[derive(Debug, Clone, Default)]
pub struct LinkFileTransfer {
    source_folder: Option<SourceFolderPattern>,
}

impl LinkFileTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_folder(mut self, pattern: impl Into<SourceFolderPattern>) -> Self {
        self.source_folder = Some(pattern.into());
        self
    }
}

impl Downloader for LinkFileTransfer {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        let source_folder = dataset
            .source_folder()
            .ok_or(FerryError::MissingSourceFolder)?;
        let probe = source_folder.join(representative.as_str());
        if !probe.to_local().as_std_path().exists() {
            return Err(FerryError::not_accessible(
                &probe,
                "cannot directly access the file",
            ));
        }
        Ok(Box::new(LinkDownloadConnection))
    }
}

impl Uploader for LinkFileTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        formatter::source_folder_for(dataset, self.source_folder.as_ref())
    }

    fn connect_for_upload_to(
        &self,
        _dataset: &Dataset,
        _source_folder: &RemotePath,
        _representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        Err(FerryError::TransferNotSupported(
            "the link transfer cannot upload files; copy the files into the source folder \
             or write them there directly"
                .to_string(),
        ))
    }
}

struct LinkDownloadConnection;

impl DownloadConnection for LinkDownloadConnection {
    fn download_files(
        &mut self,
        remote: &[RemotePath],
        local: &[Utf8PathBuf],
    ) -> Result<(), FerryError> {
        for (remote, local) in remote.iter().zip(local) {
            let target = remote.to_local();
            if !target.as_std_path().exists() {
                return Err(FerryError::not_accessible(
                    remote,
                    "file does not exist, the file server may not be mounted on this machine",
                ));
            }
            info!(remote = %remote, local = %local, "linking file");
            symlink(&target, local)?;
        }
        Ok(())
    }
}

fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<(), FerryError> {
    if let Some(parent) = link.parent() {
        fs_util::ensure_dir(parent)?;
    }
    if fs::symlink_metadata(link.as_std_path()).is_ok() {
        fs::remove_file(link.as_std_path())
            .map_err(|err| FerryError::Filesystem(format!("remove {link}: {err}")))?;
    }
    create_symlink(target, link)
        .map_err(|err| FerryError::Filesystem(format!("link {link} to {target}: {err}")))
}

#[cfg(unix)]
fn create_symlink(target: &Utf8Path, link: &Utf8Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path())
}

#[cfg(windows)]
fn create_symlink(target: &Utf8Path, link: &Utf8Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target.as_std_path(), link.as_std_path())
}
