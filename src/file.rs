//! A single data file that may exist locally, on the file server, or both.

use chrono::{DateTime, Utc};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, warn};

use crate::checksum::ChecksumCache;
use crate::domain::{ChecksumAlgorithm, RemotePath};
use crate::error::FerryError;
use crate::fs_util;
use crate::model::DataFileRecord;

/// What is known about a file once it exists on the file server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub creation_time: DateTime<Utc>,
    pub checksum: Option<String>,
}

/// Ownership and permissions of the remote copy, as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAccess {
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub perm: Option<String>,
}

/// Metadata a transfer stamps onto a file after copying it to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMetadata {
    pub size: u64,
    pub creation_time: DateTime<Utc>,
    pub access: RemoteAccess,
}

#[derive(Debug, Clone)]
pub struct FileDescriptor {
    local_path: Option<Utf8PathBuf>,
    remote_path: RemotePath,
    access: RemoteAccess,
    checksum_algorithm: Option<ChecksumAlgorithm>,
    remote: Option<RemoteMetadata>,
    cache: ChecksumCache,
}

impl FileDescriptor {
    /// A file that only exists locally. Its remote path is the file name.
    pub fn from_local(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let remote_path = RemotePath::new(path.file_name().unwrap_or(path.as_str()));
        Self {
            local_path: Some(path),
            remote_path,
            access: RemoteAccess::default(),
            checksum_algorithm: None,
            remote: None,
            cache: ChecksumCache::new(),
        }
    }

    /// A file that only exists on the server and whose metadata is known.
    pub fn from_remote(
        remote_path: RemotePath,
        metadata: RemoteMetadata,
        checksum_algorithm: Option<ChecksumAlgorithm>,
    ) -> Self {
        Self {
            local_path: None,
            remote_path,
            access: RemoteAccess::default(),
            checksum_algorithm,
            remote: Some(metadata),
            cache: ChecksumCache::new(),
        }
    }

    /// A file described by a data-file record of a downloaded datablock.
    pub fn from_catalog(
        record: &DataFileRecord,
        checksum_algorithm: Option<ChecksumAlgorithm>,
    ) -> Self {
        Self {
            local_path: None,
            remote_path: record.path.clone(),
            access: RemoteAccess {
                uid: record.uid.clone(),
                gid: record.gid.clone(),
                perm: record.perm.clone(),
            },
            checksum_algorithm,
            remote: Some(RemoteMetadata {
                size: record.size,
                creation_time: record.time,
                checksum: record.chk.clone(),
            }),
            cache: ChecksumCache::new(),
        }
    }

    pub fn with_remote_path(mut self, remote_path: impl Into<RemotePath>) -> Self {
        self.remote_path = remote_path.into();
        self
    }

    /// Use the local path relative to `base` as the remote path.
    pub fn relative_to(self, base: &Utf8Path) -> Result<Self, FerryError> {
        let local = self
            .local_path
            .as_ref()
            .ok_or_else(|| FerryError::MissingLocalFile(self.remote_path.to_string()))?;
        let relative = local.strip_prefix(base).map_err(|_| {
            FerryError::Filesystem(format!("{local} is not located under {base}"))
        })?;
        let remote = relative
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join("/");
        Ok(self.with_remote_path(remote))
    }

    pub fn with_checksum_algorithm(mut self, algorithm: Option<ChecksumAlgorithm>) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    pub fn with_remote_access(mut self, access: RemoteAccess) -> Self {
        self.access = access;
        self
    }

    pub fn local_path(&self) -> Option<&Utf8Path> {
        self.local_path.as_deref()
    }

    pub fn remote_path(&self) -> &RemotePath {
        &self.remote_path
    }

    pub fn remote_access(&self) -> &RemoteAccess {
        &self.access
    }

    pub fn remote_metadata(&self) -> Option<&RemoteMetadata> {
        self.remote.as_ref()
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum_algorithm
    }

    pub fn is_on_local(&self) -> bool {
        self.local_path.is_some()
    }

    pub fn is_on_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn has_cached_checksum(&self) -> bool {
        !self.cache.is_empty()
    }

    pub fn size(&self) -> Result<u64, FerryError> {
        match (&self.local_path, &self.remote) {
            (Some(local), _) => fs_util::file_size(local),
            (None, Some(remote)) => Ok(remote.size),
            (None, None) => Err(FerryError::MissingLocalFile(self.remote_path.to_string())),
        }
    }

    pub fn creation_time(&self) -> Result<DateTime<Utc>, FerryError> {
        match (&self.local_path, &self.remote) {
            (Some(local), _) => fs_util::modified_time(local).map(DateTime::<Utc>::from),
            (None, Some(remote)) => Ok(remote.creation_time),
            (None, None) => Err(FerryError::MissingLocalFile(self.remote_path.to_string())),
        }
    }

    /// Checksum under the file's algorithm.
    ///
    /// Remote-only files report the checksum recorded in the catalog, local
    /// files are hashed from disk (cached until the file changes).
    pub fn checksum(&mut self) -> Result<Option<String>, FerryError> {
        if self.local_path.is_none() {
            return Ok(self.remote_checksum().map(str::to_string));
        }
        let Some(algorithm) = self.checksum_algorithm else {
            return Ok(None);
        };
        self.local_checksum(algorithm).map(Some)
    }

    fn local_checksum(&mut self, algorithm: ChecksumAlgorithm) -> Result<String, FerryError> {
        let local = self
            .local_path
            .as_ref()
            .ok_or_else(|| FerryError::MissingLocalFile(self.remote_path.to_string()))?;
        self.cache.get_or_compute(local, algorithm)
    }

    fn remote_checksum(&self) -> Option<&str> {
        self.remote.as_ref().and_then(|remote| remote.checksum.as_deref())
    }

    /// Whether the local copy matches the remote file.
    ///
    /// Files unknown to the server are trivially up to date; files that are
    /// known remotely but have no local copy are not.
    pub fn local_is_up_to_date(&mut self) -> Result<bool, FerryError> {
        if !self.is_on_remote() {
            return Ok(true);
        }
        if !self.is_on_local() {
            return Ok(false);
        }
        let algorithm = match self.checksum_algorithm {
            Some(algorithm) => algorithm,
            None => {
                warn!(
                    remote_path = %self.remote_path,
                    default = %ChecksumAlgorithm::DEFAULT,
                    "file has no checksum algorithm, comparing with the default algorithm; \
                     this may report an outdated file as up to date"
                );
                ChecksumAlgorithm::DEFAULT
            }
        };
        let Some(remote_checksum) = self.remote_checksum().map(str::to_string) else {
            return Ok(false);
        };
        let local_checksum = self.local_checksum(algorithm)?;
        Ok(local_checksum == remote_checksum)
    }

    /// Compare a freshly downloaded file against its catalog record.
    ///
    /// A checksum mismatch is an integrity error. A size mismatch is only
    /// logged because file systems may report different sizes for the same
    /// content.
    pub fn validate_after_download(&mut self) -> Result<(), FerryError> {
        let local = self
            .local_path
            .clone()
            .ok_or_else(|| FerryError::MissingLocalFile(self.remote_path.to_string()))?;
        let Some(remote) = self.remote.clone() else {
            return Ok(());
        };

        if let (Some(algorithm), Some(expected)) = (self.checksum_algorithm, &remote.checksum) {
            let actual = self.local_checksum(algorithm)?;
            if &actual != expected {
                let message = format!(
                    "checksum of file '{local}' ({actual}) does not match checksum stored in \
                     dataset ({expected}) using algorithm '{algorithm}'"
                );
                error!("{message}");
                return Err(FerryError::Integrity(message));
            }
        } else {
            info!(
                local_path = %local,
                "no checksum or checksum algorithm recorded, skipping checksum validation"
            );
        }

        let actual_size = fs_util::file_size(&local)?;
        if actual_size != remote.size {
            warn!(
                local_path = %local,
                local_size = actual_size,
                remote_size = remote.size,
                "size of downloaded file does not match size stored in dataset"
            );
        }
        Ok(())
    }

    /// The file after it was copied to the server.
    ///
    /// The local path stays and the remote checksum is frozen to the local
    /// checksum at this point in time.
    pub fn uploaded(mut self, metadata: UploadedMetadata) -> Result<Self, FerryError> {
        if self.local_path.is_none() {
            return Err(FerryError::MissingLocalFile(self.remote_path.to_string()));
        }
        let checksum = self.checksum()?;
        self.access = metadata.access;
        self.remote = Some(RemoteMetadata {
            size: metadata.size,
            creation_time: metadata.creation_time,
            checksum,
        });
        Ok(self)
    }

    /// The file after it was copied from the server to `local_path`.
    pub fn downloaded(mut self, local_path: impl Into<Utf8PathBuf>) -> Self {
        self.local_path = Some(local_path.into());
        self.cache.clear();
        self
    }

    /// Record describing this file for a datablock upload.
    pub fn make_record(&self) -> Result<DataFileRecord, FerryError> {
        let remote = self.remote.as_ref().ok_or_else(|| {
            FerryError::Upload(format!(
                "file {} has not been uploaded to the file server",
                self.remote_path
            ))
        })?;
        Ok(DataFileRecord {
            path: self.remote_path.clone(),
            size: remote.size,
            time: remote.creation_time,
            chk: remote.checksum.clone(),
            uid: self.access.uid.clone(),
            gid: self.access.gid.clone(),
            perm: self.access.perm.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::checksum::checksum_of_file;

    fn local_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path()).unwrap();
        }
        std::fs::write(path.as_std_path(), content).unwrap();
        path
    }

    fn uploaded_metadata(size: u64) -> UploadedMetadata {
        UploadedMetadata {
            size,
            creation_time: Utc::now(),
            access: RemoteAccess {
                uid: Some("1000".to_string()),
                gid: Some("1000".to_string()),
                perm: Some("644".to_string()),
            },
        }
    }

    #[test]
    fn from_local_is_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let file = FileDescriptor::from_local(&path);
        assert!(file.is_on_local());
        assert!(!file.is_on_remote());
        assert_eq!(file.remote_path().as_str(), "scan.nxs");
        assert_eq!(file.size().unwrap(), 8);
    }

    #[test]
    fn relative_to_keeps_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "sub/dir/scan.nxs", b"neutrons");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let file = FileDescriptor::from_local(&path).relative_to(&base).unwrap();
        assert_eq!(file.remote_path().as_str(), "sub/dir/scan.nxs");
    }

    #[test]
    fn uploaded_is_on_both_and_freezes_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let file = FileDescriptor::from_local(&path)
            .with_checksum_algorithm(Some(ChecksumAlgorithm::Sha256))
            .uploaded(uploaded_metadata(8))
            .unwrap();
        assert!(file.is_on_local());
        assert!(file.is_on_remote());
        let expected = checksum_of_file(&path, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(
            file.remote_metadata().unwrap().checksum.as_deref(),
            Some(expected.as_str())
        );
        let record = file.make_record().unwrap();
        assert_eq!(record.perm.as_deref(), Some("644"));
        assert_eq!(record.size, 8);
    }

    #[test]
    fn remote_only_reports_catalog_values() {
        let created = Utc::now();
        let mut file = FileDescriptor::from_remote(
            RemotePath::new("raw/scan.nxs"),
            RemoteMetadata {
                size: 1234,
                creation_time: created,
                checksum: Some("abcd".to_string()),
            },
            Some(ChecksumAlgorithm::Blake2b),
        );
        assert!(file.is_on_remote());
        assert!(!file.is_on_local());
        assert_eq!(file.size().unwrap(), 1234);
        assert_eq!(file.creation_time().unwrap(), created);
        assert_eq!(file.checksum().unwrap().as_deref(), Some("abcd"));
        assert!(!file.local_is_up_to_date().unwrap());
    }

    #[test]
    fn downloaded_resets_checksum_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let expected = checksum_of_file(&path, ChecksumAlgorithm::Sha256).unwrap();
        let record = DataFileRecord {
            path: RemotePath::new("scan.nxs"),
            size: 8,
            time: Utc::now(),
            chk: Some(expected.clone()),
            uid: None,
            gid: None,
            perm: None,
        };
        let remote = FileDescriptor::from_catalog(&record, Some(ChecksumAlgorithm::Sha256));
        assert!(!remote.has_cached_checksum());

        let mut file = remote.downloaded(&path);
        assert!(file.is_on_local());
        assert!(file.is_on_remote());
        assert!(!file.has_cached_checksum());
        assert_eq!(file.checksum().unwrap(), Some(expected));
        assert!(file.has_cached_checksum());
        assert!(file.local_is_up_to_date().unwrap());
        file.validate_after_download().unwrap();
    }

    #[test]
    fn local_only_is_trivially_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let mut file = FileDescriptor::from_local(&path);
        assert!(file.local_is_up_to_date().unwrap());
        assert_eq!(file.checksum().unwrap(), None);
    }

    #[test]
    fn up_to_date_falls_back_to_default_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let checksum = checksum_of_file(&path, ChecksumAlgorithm::DEFAULT).unwrap();
        let mut file = FileDescriptor::from_remote(
            RemotePath::new("scan.nxs"),
            RemoteMetadata {
                size: 8,
                creation_time: Utc::now(),
                checksum: Some(checksum),
            },
            None,
        )
        .downloaded(&path);
        assert!(file.local_is_up_to_date().unwrap());
    }

    #[test]
    fn validate_detects_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let mut file = FileDescriptor::from_remote(
            RemotePath::new("scan.nxs"),
            RemoteMetadata {
                size: 8,
                creation_time: Utc::now(),
                checksum: Some("not-the-checksum".to_string()),
            },
            Some(ChecksumAlgorithm::Sha256),
        )
        .downloaded(&path);
        assert_matches!(
            file.validate_after_download(),
            Err(FerryError::Integrity(_))
        );
        assert!(!file.local_is_up_to_date().unwrap());
    }

    #[test]
    fn validate_tolerates_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = local_file(&dir, "scan.nxs", b"neutrons");
        let checksum = checksum_of_file(&path, ChecksumAlgorithm::Sha256).unwrap();
        let mut file = FileDescriptor::from_remote(
            RemotePath::new("scan.nxs"),
            RemoteMetadata {
                size: 4096,
                creation_time: Utc::now(),
                checksum: Some(checksum),
            },
            Some(ChecksumAlgorithm::Sha256),
        )
        .downloaded(&path);
        file.validate_after_download().unwrap();
    }

    #[test]
    fn remote_only_checksum_without_algorithm() {
        let mut file = FileDescriptor::from_remote(
            RemotePath::new("a.dat"),
            RemoteMetadata {
                size: 6,
                creation_time: Utc::now(),
                checksum: Some("abc123".to_string()),
            },
            None,
        );
        assert_eq!(file.checksum().unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn uploaded_requires_local_file() {
        let file = FileDescriptor::from_remote(
            RemotePath::new("scan.nxs"),
            RemoteMetadata {
                size: 8,
                creation_time: Utc::now(),
                checksum: None,
            },
            None,
        );
        assert_matches!(
            file.uploaded(uploaded_metadata(8)),
            Err(FerryError::MissingLocalFile(_))
        );
    }
}
