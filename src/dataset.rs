//! The dataset aggregate: catalog metadata plus the files of its datablocks.

use std::collections::{BTreeSet, HashSet};

use camino::Utf8Path;
use chrono::{DateTime, Utc};

use crate::datablock::{BlockKey, Datablock};
use crate::domain::{ChecksumAlgorithm, DatasetType, Pid, RemotePath};
use crate::error::FerryError;
use crate::file::FileDescriptor;
use crate::model::{
    DownloadAttachment, DownloadDatablock, DownloadDataset, ServerFields, UploadAttachment,
    UploadDatablock, UploadDataset,
};

/// Dataset metadata that callers may set freely.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFields {
    pub dataset_type: DatasetType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner: String,
    pub owner_group: String,
    pub access_groups: Vec<String>,
    pub contact_email: String,
    pub creation_time: DateTime<Utc>,
    pub source_folder: Option<RemotePath>,
    pub principal_investigator: Option<String>,
    pub scientific_metadata: serde_json::Map<String, serde_json::Value>,
}

impl DatasetFields {
    pub fn new(
        dataset_type: DatasetType,
        owner: impl Into<String>,
        owner_group: impl Into<String>,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            dataset_type,
            name: None,
            description: None,
            owner: owner.into(),
            owner_group: owner_group.into(),
            access_groups: Vec::new(),
            contact_email: contact_email.into(),
            creation_time: Utc::now(),
            source_folder: None,
            principal_investigator: None,
            scientific_metadata: serde_json::Map::new(),
        }
    }

    fn from_upload_model(model: UploadDataset) -> Self {
        Self {
            dataset_type: model.dataset_type,
            name: model.name,
            description: model.description,
            owner: model.owner,
            owner_group: model.owner_group,
            access_groups: model.access_groups,
            contact_email: model.contact_email,
            creation_time: model.creation_time,
            source_folder: Some(model.source_folder),
            principal_investigator: model.principal_investigator,
            scientific_metadata: model.scientific_metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub caption: String,
    pub thumbnail: String,
    pub owner_group: Option<String>,
    pub access_groups: Option<Vec<String>>,
    id: Option<String>,
    dataset_id: Option<Pid>,
    server: ServerFields,
}

impl Attachment {
    pub fn new(caption: impl Into<String>, thumbnail: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            thumbnail: thumbnail.into(),
            owner_group: None,
            access_groups: None,
            id: None,
            dataset_id: None,
            server: ServerFields::default(),
        }
    }

    pub fn from_download_model(model: DownloadAttachment) -> Self {
        Self {
            caption: model.fields.caption,
            thumbnail: model.fields.thumbnail,
            owner_group: Some(model.fields.owner_group),
            access_groups: Some(model.fields.access_groups),
            id: Some(model.id),
            dataset_id: Some(model.fields.dataset_id),
            server: model.server,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn dataset_id(&self) -> Option<&Pid> {
        self.dataset_id.as_ref()
    }

    pub fn make_upload_model(&self, dataset_id: &Pid, fields: &DatasetFields) -> UploadAttachment {
        UploadAttachment {
            dataset_id: dataset_id.clone(),
            caption: self.caption.clone(),
            thumbnail: self.thumbnail.clone(),
            owner_group: self
                .owner_group
                .clone()
                .unwrap_or_else(|| fields.owner_group.clone()),
            access_groups: self
                .access_groups
                .clone()
                .unwrap_or_else(|| fields.access_groups.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub fields: DatasetFields,
    checksum_algorithm: Option<ChecksumAlgorithm>,
    blocks: Vec<Datablock>,
    attachments: Vec<Attachment>,
    pid: Option<Pid>,
    server: ServerFields,
}

impl Dataset {
    /// A dataset that does not exist in the catalog yet.
    ///
    /// New datablocks use [`ChecksumAlgorithm::DEFAULT`] unless the files
    /// added to them carry their own algorithm.
    pub fn new(fields: DatasetFields) -> Self {
        Self {
            fields,
            checksum_algorithm: Some(ChecksumAlgorithm::DEFAULT),
            blocks: Vec::new(),
            attachments: Vec::new(),
            pid: None,
            server: ServerFields::default(),
        }
    }

    pub fn from_download_models(
        dataset: DownloadDataset,
        blocks: Vec<DownloadDatablock>,
        attachments: Vec<DownloadAttachment>,
    ) -> Self {
        let blocks: Vec<Datablock> = blocks
            .into_iter()
            .map(Datablock::from_download_model)
            .collect();
        let checksum_algorithm = blocks
            .last()
            .and_then(Datablock::checksum_algorithm)
            .or(Some(ChecksumAlgorithm::DEFAULT));
        Self {
            fields: DatasetFields::from_upload_model(dataset.fields),
            checksum_algorithm,
            blocks,
            attachments: attachments
                .into_iter()
                .map(Attachment::from_download_model)
                .collect(),
            pid: Some(dataset.pid),
            server: dataset.server,
        }
    }

    /// Algorithm for datablocks created by [`add_files`](Self::add_files)
    /// when the incoming files do not carry one.
    pub fn with_checksum_algorithm(mut self, algorithm: Option<ChecksumAlgorithm>) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    pub fn with_source_folder(mut self, folder: RemotePath) -> Self {
        self.fields.source_folder = Some(folder);
        self
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum_algorithm
    }

    pub fn source_folder(&self) -> Option<&RemotePath> {
        self.fields.source_folder.as_ref()
    }

    pub fn pid(&self) -> Option<&Pid> {
        self.pid.as_ref()
    }

    pub fn server_fields(&self) -> &ServerFields {
        &self.server
    }

    pub fn blocks(&self) -> &[Datablock] {
        &self.blocks
    }

    pub fn block(&self, key: &BlockKey) -> Option<&Datablock> {
        self.block_index(key).map(|index| &self.blocks[index])
    }

    fn block_index(&self, key: &BlockKey) -> Option<usize> {
        match key {
            BlockKey::Index(index) => (*index < self.blocks.len()).then_some(*index),
            BlockKey::Id(id) => self
                .blocks
                .iter()
                .position(|block| block.id() == Some(id.as_str())),
        }
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// All files across all datablocks, in block order.
    pub fn files(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.blocks.iter().flat_map(Datablock::files)
    }

    pub fn number_of_files(&self) -> usize {
        self.blocks.iter().map(Datablock::len).sum()
    }

    pub fn size(&self) -> Result<u64, FerryError> {
        self.blocks.iter().map(Datablock::size).sum()
    }

    /// Add files to a datablock.
    ///
    /// Without a `target`, the files go to the last block if its checksum
    /// algorithm is compatible or to a new block otherwise. Nothing is
    /// modified if the call fails.
    pub fn add_files(
        &mut self,
        files: Vec<FileDescriptor>,
        target: Option<BlockKey>,
    ) -> Result<(), FerryError> {
        if let Some(key) = &target
            && self.block_index(key).is_none()
        {
            return Err(FerryError::BlockNotFound(key.to_string()));
        }
        if files.is_empty() {
            return Ok(());
        }

        let mut seen: HashSet<&RemotePath> =
            self.files().map(FileDescriptor::remote_path).collect();
        for file in &files {
            if !seen.insert(file.remote_path()) {
                return Err(FerryError::DuplicateRemotePath(file.remote_path().to_string()));
            }
        }

        let algorithms: BTreeSet<&'static str> = files
            .iter()
            .filter_map(FileDescriptor::checksum_algorithm)
            .map(|algorithm| algorithm.as_str())
            .collect();
        let incoming = match algorithms.len() {
            0 => None,
            1 => files.iter().find_map(FileDescriptor::checksum_algorithm),
            _ => {
                let mut names = algorithms.into_iter();
                return Err(FerryError::ChecksumAlgorithmConflict {
                    existing: names.next().unwrap_or_default().to_string(),
                    incoming: names.collect::<Vec<_>>().join(", "),
                });
            }
        };

        let index = match target {
            Some(key) => {
                let index = self
                    .block_index(&key)
                    .ok_or_else(|| FerryError::BlockNotFound(key.to_string()))?;
                let block = &self.blocks[index];
                if !block.accepts(incoming) {
                    return Err(algorithm_conflict(block.checksum_algorithm(), incoming));
                }
                index
            }
            None => match self.blocks.last() {
                Some(block) if block.accepts(incoming) => self.blocks.len() - 1,
                _ => {
                    self.blocks
                        .push(Datablock::new(incoming.or(self.checksum_algorithm)));
                    self.blocks.len() - 1
                }
            },
        };

        self.blocks[index].push_files(files);
        Ok(())
    }

    pub fn add_local_files<P: AsRef<Utf8Path>>(
        &mut self,
        paths: &[P],
        base_path: Option<&Utf8Path>,
    ) -> Result<(), FerryError> {
        let files = paths
            .iter()
            .map(|path| {
                let file = FileDescriptor::from_local(path.as_ref());
                match base_path {
                    Some(base) => file.relative_to(base),
                    None => Ok(file),
                }
            })
            .collect::<Result<Vec<_>, FerryError>>()?;
        self.add_files(files, None)
    }

    /// Swap in updated descriptors, matched by remote path.
    pub fn replace_files(
        mut self,
        files: impl IntoIterator<Item = FileDescriptor>,
    ) -> Result<Self, FerryError> {
        for file in files {
            let mut pending = Some(file);
            for block in &mut self.blocks {
                let Some(file) = pending.take() else {
                    break;
                };
                if let Err(file) = block.replace_file(file) {
                    pending = Some(file);
                }
            }
            if let Some(file) = pending {
                return Err(FerryError::BlockNotFound(format!(
                    "no datablock contains file {}",
                    file.remote_path()
                )));
            }
        }
        Ok(self)
    }

    pub fn make_upload_model(&self) -> Result<UploadDataset, FerryError> {
        let source_folder = self
            .fields
            .source_folder
            .clone()
            .ok_or(FerryError::MissingSourceFolder)?;
        Ok(UploadDataset {
            dataset_type: self.fields.dataset_type,
            name: self.fields.name.clone(),
            description: self.fields.description.clone(),
            owner: self.fields.owner.clone(),
            owner_group: self.fields.owner_group.clone(),
            access_groups: self.fields.access_groups.clone(),
            contact_email: self.fields.contact_email.clone(),
            creation_time: self.fields.creation_time,
            source_folder,
            principal_investigator: self.fields.principal_investigator.clone(),
            number_of_files: self.number_of_files() as u64,
            size: self.size()?,
            scientific_metadata: self.fields.scientific_metadata.clone(),
        })
    }

    /// Upload models for all non-empty datablocks, linked to `pid`.
    pub fn make_datablock_upload_models(
        &self,
        pid: &Pid,
    ) -> Result<Vec<(usize, UploadDatablock)>, FerryError> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| !block.is_empty())
            .map(|(index, block)| {
                block
                    .make_upload_model(pid, &self.fields.owner_group, &self.fields.access_groups)
                    .map(|model| (index, model))
            })
            .collect()
    }

    pub fn make_attachment_upload_models(&self, pid: &Pid) -> Vec<UploadAttachment> {
        self.attachments
            .iter()
            .map(|attachment| attachment.make_upload_model(pid, &self.fields))
            .collect()
    }

    /// Record what the catalog assigned while the dataset was uploaded.
    pub(crate) fn finalize(
        mut self,
        dataset: DownloadDataset,
        blocks: &[(usize, DownloadDatablock)],
        attachments: Vec<DownloadAttachment>,
    ) -> Self {
        self.fields = DatasetFields::from_upload_model(dataset.fields);
        self.pid = Some(dataset.pid);
        self.server = dataset.server;
        for (index, model) in blocks {
            if let Some(block) = self.blocks.get_mut(*index) {
                block.assign(model);
            }
        }
        self.attachments = attachments
            .into_iter()
            .map(Attachment::from_download_model)
            .collect();
        self
    }
}

fn algorithm_conflict(
    existing: Option<ChecksumAlgorithm>,
    incoming: Option<ChecksumAlgorithm>,
) -> FerryError {
    let name = |algorithm: Option<ChecksumAlgorithm>| {
        algorithm
            .map(|algorithm| algorithm.to_string())
            .unwrap_or_else(|| "none".to_string())
    };
    FerryError::ChecksumAlgorithmConflict {
        existing: name(existing),
        incoming: name(incoming),
    }
}
