//! Transfer by copying files on a file server that is mounted locally.

use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::domain::RemotePath;
use crate::error::FerryError;
use crate::file::{FileDescriptor, RemoteAccess, UploadedMetadata};
use crate::formatter::{self, SourceFolderPattern};
use crate::fs_util;
use crate::transfer::{DownloadConnection, Downloader, UploadConnection, Uploader};

/// Copies files between the local file system and a file server that is
/// reachable through the same file system.
///
/// With `hard_link`, files are hard linked instead of copied, so the local
/// and remote file share their bytes.
#[derive(Debug, Clone, Default)]
pub struct CopyFileTransfer {
    source_folder: Option<SourceFolderPattern>,
    hard_link: bool,
}

impl CopyFileTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload into this folder instead of the dataset's source folder.
    pub fn with_source_folder(mut self, pattern: impl Into<SourceFolderPattern>) -> Self {
        self.source_folder = Some(pattern.into());
        self
    }

    pub fn with_hard_link(mut self, hard_link: bool) -> Self {
        self.hard_link = hard_link;
        self
    }
}

impl Downloader for CopyFileTransfer {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        let source_folder = self.source_folder_for(dataset)?;
        if !source_folder.to_local().as_std_path().exists() {
            return Err(FerryError::not_accessible(
                &source_folder,
                "cannot directly access the source folder",
            ));
        }
        let probe = source_folder.join(representative.as_str());
        if !probe.to_local().as_std_path().exists() {
            return Err(FerryError::not_accessible(
                &probe,
                "cannot directly access the file",
            ));
        }
        Ok(Box::new(CopyDownloadConnection {
            hard_link: self.hard_link,
        }))
    }
}

impl Uploader for CopyFileTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        formatter::source_folder_for(dataset, self.source_folder.as_ref())
    }

    fn connect_for_upload_to(
        &self,
        _dataset: &Dataset,
        source_folder: &RemotePath,
        _representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        // The source folder itself may not exist yet, so only the top level
        // directory is probed.
        let top = top_level(&source_folder.to_local());
        if !top.as_std_path().exists() {
            return Err(FerryError::not_accessible(
                source_folder,
                format!("cannot directly access {top}"),
            ));
        }
        Ok(Box::new(CopyUploadConnection {
            source_folder: source_folder.clone(),
            hard_link: self.hard_link,
        }))
    }
}

fn top_level(path: &Utf8Path) -> Utf8PathBuf {
    let mut top = Utf8PathBuf::new();
    for component in path.components() {
        top.push(component.as_str());
        if matches!(component, Utf8Component::Normal(_)) {
            break;
        }
    }
    top
}

struct CopyDownloadConnection {
    hard_link: bool,
}

impl DownloadConnection for CopyDownloadConnection {
    fn download_files(
        &mut self,
        remote: &[RemotePath],
        local: &[Utf8PathBuf],
    ) -> Result<(), FerryError> {
        for (remote, local) in remote.iter().zip(local) {
            let source = remote.to_local();
            if !source.as_std_path().exists() {
                return Err(FerryError::not_accessible(
                    remote,
                    "file does not exist, the file server may not be mounted on this machine",
                ));
            }
            info!(remote = %remote, local = %local, "copying file");
            if self.hard_link {
                link_file(&source, local)?;
            } else {
                fs_util::copy_file_atomic(&source, local)?;
            }
        }
        Ok(())
    }
}

fn link_file(source: &Utf8Path, dest: &Utf8Path) -> Result<(), FerryError> {
    if let Some(parent) = dest.parent() {
        fs_util::ensure_dir(parent)?;
    }
    if dest.as_std_path().exists() {
        fs::remove_file(dest.as_std_path())
            .map_err(|err| FerryError::Filesystem(format!("remove {dest}: {err}")))?;
    }
    fs::hard_link(source.as_std_path(), dest.as_std_path())
        .map_err(|err| FerryError::Filesystem(format!("link {source} to {dest}: {err}")))
}

struct CopyUploadConnection {
    source_folder: RemotePath,
    hard_link: bool,
}

impl CopyUploadConnection {
    fn upload_file(&self, file: FileDescriptor) -> Result<FileDescriptor, FerryError> {
        let local = file
            .local_path()
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| FerryError::MissingLocalFile(file.remote_path().to_string()))?;
        let remote = self.source_folder.join(file.remote_path().as_str());
        let dest = remote.to_local();
        if dest.as_std_path().exists() {
            return Err(FerryError::Upload(format!(
                "refusing to upload {local}: file already exists at {remote}"
            )));
        }
        if let Some(parent) = dest.parent() {
            fs_util::ensure_dir(parent).map_err(|err| FerryError::Upload(err.to_string()))?;
        }

        info!(local = %local, remote = %remote, "copying file");
        let result = if self.hard_link {
            fs::hard_link(local.as_std_path(), dest.as_std_path())
        } else {
            fs::copy(local.as_std_path(), dest.as_std_path()).map(|_| ())
        };
        result.map_err(|err| FerryError::Upload(format!("copy {local} to {remote}: {err}")))?;

        let metadata = fs::metadata(local.as_std_path())
            .map_err(|err| FerryError::Filesystem(format!("stat {local}: {err}")))?;
        file.uploaded(UploadedMetadata {
            size: metadata.len(),
            creation_time: Utc::now(),
            access: access_of(&metadata),
        })
    }

    fn revert_file(&self, file: &FileDescriptor) {
        let remote = self.source_folder.join(file.remote_path().as_str());
        info!(remote = %remote, "reverting upload");
        let path = remote.to_local();
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(remote = %remote, error = %err, "failed to revert file");
                return;
            }
        }
        let root = self.source_folder.to_local();
        let stop_at = root.parent().unwrap_or(&root);
        if let Some(parent) = path.parent() {
            for dir in fs_util::remove_empty_dirs(parent, stop_at) {
                info!(dir = %dir, "removed empty remote directory");
            }
        }
    }
}

impl UploadConnection for CopyUploadConnection {
    fn source_folder(&self) -> &RemotePath {
        &self.source_folder
    }

    fn upload_files(
        &mut self,
        files: Vec<FileDescriptor>,
    ) -> Result<Vec<FileDescriptor>, FerryError> {
        let folder = self.source_folder.to_local();
        fs_util::ensure_dir(&folder).map_err(|err| {
            FerryError::Upload(format!("failed to create source folder {folder}: {err}"))
        })?;

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            match self.upload_file(file) {
                Ok(file) => uploaded.push(file),
                Err(err) => {
                    self.revert_upload(&uploaded)?;
                    return Err(err);
                }
            }
        }
        Ok(uploaded)
    }

    fn revert_upload(&mut self, files: &[FileDescriptor]) -> Result<(), FerryError> {
        for file in files {
            self.revert_file(file);
        }
        let folder = self.source_folder.to_local();
        if matches!(fs_util::dir_is_empty(&folder), Ok(true)) {
            info!(dir = %folder, "removing empty remote directory");
            if let Err(err) = fs::remove_dir(folder.as_std_path()) {
                warn!(dir = %folder, error = %err, "failed to remove empty remote directory");
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn access_of(metadata: &fs::Metadata) -> RemoteAccess {
    use std::os::unix::fs::MetadataExt;

    RemoteAccess {
        uid: Some(metadata.uid().to_string()),
        gid: Some(metadata.gid().to_string()),
        perm: Some(format!("{:o}", metadata.mode() & 0o7777)),
    }
}

#[cfg(not(unix))]
fn access_of(_metadata: &fs::Metadata) -> RemoteAccess {
    RemoteAccess::default()
}
