use std::fmt;

use crate::domain::{ChecksumAlgorithm, Pid};
use crate::error::FerryError;
use crate::file::FileDescriptor;
use crate::model::{DownloadDatablock, ServerFields, UploadDatablock};

/// Selects a datablock of a dataset, either by position or by catalog id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKey {
    Index(usize),
    Id(String),
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKey::Index(index) => write!(f, "index {index}"),
            BlockKey::Id(id) => write!(f, "id {id}"),
        }
    }
}

impl From<usize> for BlockKey {
    fn from(index: usize) -> Self {
        BlockKey::Index(index)
    }
}

impl From<&str> for BlockKey {
    fn from(id: &str) -> Self {
        BlockKey::Id(id.to_string())
    }
}

/// A group of files in a dataset that share one checksum algorithm.
#[derive(Debug, Clone, Default)]
pub struct Datablock {
    checksum_algorithm: Option<ChecksumAlgorithm>,
    files: Vec<FileDescriptor>,
    pub owner_group: Option<String>,
    pub access_groups: Option<Vec<String>>,
    id: Option<String>,
    dataset_id: Option<Pid>,
    server: ServerFields,
}

impl Datablock {
    pub fn new(checksum_algorithm: Option<ChecksumAlgorithm>) -> Self {
        Self {
            checksum_algorithm,
            ..Self::default()
        }
    }

    pub fn from_download_model(model: DownloadDatablock) -> Self {
        let algorithm = model.fields.chk_alg;
        let files = model
            .fields
            .data_file_list
            .iter()
            .map(|record| FileDescriptor::from_catalog(record, algorithm))
            .collect();
        Self {
            checksum_algorithm: algorithm,
            files,
            owner_group: Some(model.fields.owner_group),
            access_groups: Some(model.fields.access_groups),
            id: Some(model.id),
            dataset_id: Some(model.fields.dataset_id),
            server: model.server,
        }
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum_algorithm
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dataset_id(&self) -> Option<&Pid> {
        self.dataset_id.as_ref()
    }

    pub fn server_fields(&self) -> &ServerFields {
        &self.server
    }

    pub fn files(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size in bytes of all files in the block.
    pub fn size(&self) -> Result<u64, FerryError> {
        self.files.iter().map(FileDescriptor::size).sum()
    }

    /// Whether files carrying `incoming` may be added to this block.
    pub fn accepts(&self, incoming: Option<ChecksumAlgorithm>) -> bool {
        incoming.is_none() || incoming == self.checksum_algorithm
    }

    pub(crate) fn push_files(&mut self, files: Vec<FileDescriptor>) {
        let algorithm = self.checksum_algorithm;
        self.files.extend(files.into_iter().map(|file| {
            if file.checksum_algorithm().is_none() {
                file.with_checksum_algorithm(algorithm)
            } else {
                file
            }
        }));
    }

    /// Hands `file` back if the block has no file with the same remote path.
    pub(crate) fn replace_file(
        &mut self,
        file: FileDescriptor,
    ) -> Result<FileDescriptor, FileDescriptor> {
        match self
            .files
            .iter_mut()
            .find(|existing| existing.remote_path() == file.remote_path())
        {
            Some(slot) => Ok(std::mem::replace(slot, file)),
            None => Err(file),
        }
    }

    pub(crate) fn assign(&mut self, model: &DownloadDatablock) {
        self.id = Some(model.id.clone());
        self.dataset_id = Some(model.fields.dataset_id.clone());
        self.server = model.server.clone();
    }

    pub fn make_upload_model(
        &self,
        dataset_id: &Pid,
        default_owner_group: &str,
        default_access_groups: &[String],
    ) -> Result<UploadDatablock, FerryError> {
        let data_file_list = self
            .files
            .iter()
            .map(FileDescriptor::make_record)
            .collect::<Result<Vec<_>, FerryError>>()?;
        let size = data_file_list.iter().map(|record| record.size).sum();
        Ok(UploadDatablock {
            dataset_id: dataset_id.clone(),
            chk_alg: self.checksum_algorithm,
            size,
            data_file_list,
            owner_group: self
                .owner_group
                .clone()
                .unwrap_or_else(|| default_owner_group.to_string()),
            access_groups: self
                .access_groups
                .clone()
                .unwrap_or_else(|| default_access_groups.to_vec()),
        })
    }
}
