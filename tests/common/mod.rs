#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;

use dataset_ferry::catalog::Catalog;
use dataset_ferry::client::{Phase, ProgressEvent, ProgressSink};
use dataset_ferry::dataset::{Dataset, DatasetFields};
use dataset_ferry::domain::{DatasetType, Pid, RemotePath};
use dataset_ferry::error::FerryError;
use dataset_ferry::file::FileDescriptor;
use dataset_ferry::model::{
    DownloadAttachment, DownloadDatablock, DownloadDataset, ServerFields, UploadAttachment,
    UploadDatablock, UploadDataset,
};
use dataset_ferry::transfer::{
    CopyFileTransfer, DownloadConnection, Downloader, UploadConnection, Uploader,
};

pub fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub fn write_file(dir: &Utf8Path, name: &str, content: &[u8]) -> Utf8PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path()).unwrap();
    }
    fs::write(path.as_std_path(), content).unwrap();
    path
}

pub fn new_dataset() -> Dataset {
    let mut fields = DatasetFields::new(
        DatasetType::Raw,
        "Ponder Stibbons",
        "uu.hex",
        "stibbons@uu.am",
    );
    fields.name = Some("hex runs".to_string());
    fields.access_groups = vec!["uu.faculty".to_string()];
    Dataset::new(fields)
}

fn server_fields() -> ServerFields {
    ServerFields {
        created_at: Some(Utc::now()),
        created_by: Some("fake".to_string()),
        updated_at: Some(Utc::now()),
        updated_by: Some("fake".to_string()),
    }
}

/// Catalog operations that [`FakeCatalog`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogOp {
    GetDataset,
    ValidateDataset,
    CreateDataset,
    CreateDatablock,
    CreateAttachment,
}

/// In-memory catalog.
#[derive(Default)]
pub struct FakeCatalog {
    datasets: Mutex<HashMap<String, DownloadDataset>>,
    datablocks: Mutex<HashMap<String, Vec<DownloadDatablock>>>,
    attachments: Mutex<HashMap<String, Vec<DownloadAttachment>>>,
    disabled: Mutex<HashMap<CatalogOp, String>>,
    calls: Mutex<Vec<CatalogOp>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, op: CatalogOp, message: &str) {
        self.disabled.lock().unwrap().insert(op, message.to_string());
    }

    pub fn calls(&self) -> Vec<CatalogOp> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.lock().unwrap().len()
    }

    pub fn datablock_count(&self) -> usize {
        self.datablocks.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn stored_dataset(&self, pid: &Pid) -> Option<DownloadDataset> {
        self.datasets.lock().unwrap().get(&pid.to_string()).cloned()
    }

    fn check(&self, op: CatalogOp) -> Result<(), FerryError> {
        self.calls.lock().unwrap().push(op);
        match self.disabled.lock().unwrap().get(&op) {
            Some(message) if op == CatalogOp::ValidateDataset => {
                Err(FerryError::Validation(message.clone()))
            }
            Some(message) => Err(FerryError::Comm(message.clone())),
            None => Ok(()),
        }
    }
}

impl Catalog for FakeCatalog {
    fn get_dataset(&self, pid: &Pid) -> Result<DownloadDataset, FerryError> {
        self.check(CatalogOp::GetDataset)?;
        self.stored_dataset(pid)
            .ok_or_else(|| FerryError::Comm(format!("dataset {pid} not found")))
    }

    fn get_datablocks(&self, pid: &Pid) -> Result<Vec<DownloadDatablock>, FerryError> {
        Ok(self
            .datablocks
            .lock()
            .unwrap()
            .get(&pid.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn get_attachments(&self, pid: &Pid) -> Result<Vec<DownloadAttachment>, FerryError> {
        Ok(self
            .attachments
            .lock()
            .unwrap()
            .get(&pid.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn validate_dataset(&self, _dataset: &UploadDataset) -> Result<(), FerryError> {
        self.check(CatalogOp::ValidateDataset)
    }

    fn create_dataset(&self, dataset: &UploadDataset) -> Result<DownloadDataset, FerryError> {
        self.check(CatalogOp::CreateDataset)?;
        let created = DownloadDataset {
            pid: Pid::generate(Some("PID.uu")),
            fields: dataset.clone(),
            server: server_fields(),
        };
        self.datasets
            .lock()
            .unwrap()
            .insert(created.pid.to_string(), created.clone());
        Ok(created)
    }

    fn create_datablock(
        &self,
        datablock: &UploadDatablock,
    ) -> Result<DownloadDatablock, FerryError> {
        self.check(CatalogOp::CreateDatablock)?;
        let mut blocks = self.datablocks.lock().unwrap();
        let entry = blocks.entry(datablock.dataset_id.to_string()).or_default();
        let created = DownloadDatablock {
            id: format!("block-{}", entry.len()),
            fields: datablock.clone(),
            server: server_fields(),
        };
        entry.push(created.clone());
        Ok(created)
    }

    fn create_attachment(
        &self,
        attachment: &UploadAttachment,
    ) -> Result<DownloadAttachment, FerryError> {
        self.check(CatalogOp::CreateAttachment)?;
        let mut attachments = self.attachments.lock().unwrap();
        let entry = attachments
            .entry(attachment.dataset_id.to_string())
            .or_default();
        let created = DownloadAttachment {
            id: format!("attachment-{}", entry.len()),
            fields: attachment.clone(),
            server: server_fields(),
        };
        entry.push(created.clone());
        Ok(created)
    }
}

#[derive(Debug, Default)]
pub struct TransferLog {
    pub connects: usize,
    /// Files as returned from `upload_files`, with the bytes read from
    /// their local paths at upload time.
    pub uploaded: Vec<(FileDescriptor, Vec<u8>)>,
    pub reverted: Vec<RemotePath>,
    pub downloaded: Vec<RemotePath>,
}

/// A copy transfer that records what goes through it.
pub struct RecordingTransfer {
    inner: CopyFileTransfer,
    log: Arc<Mutex<TransferLog>>,
}

impl RecordingTransfer {
    pub fn new() -> (Self, Arc<Mutex<TransferLog>>) {
        Self::wrapping(CopyFileTransfer::new())
    }

    pub fn wrapping(inner: CopyFileTransfer) -> (Self, Arc<Mutex<TransferLog>>) {
        let log = Arc::new(Mutex::new(TransferLog::default()));
        (
            Self {
                inner,
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

struct RecordingDownload<'a> {
    inner: Box<dyn DownloadConnection + 'a>,
    log: Arc<Mutex<TransferLog>>,
}

impl DownloadConnection for RecordingDownload<'_> {
    fn download_files(
        &mut self,
        remote: &[RemotePath],
        local: &[Utf8PathBuf],
    ) -> Result<(), FerryError> {
        self.log
            .lock()
            .unwrap()
            .downloaded
            .extend(remote.iter().cloned());
        self.inner.download_files(remote, local)
    }
}

struct RecordingUpload<'a> {
    inner: Box<dyn UploadConnection + 'a>,
    log: Arc<Mutex<TransferLog>>,
}

impl UploadConnection for RecordingUpload<'_> {
    fn source_folder(&self) -> &RemotePath {
        self.inner.source_folder()
    }

    fn upload_files(
        &mut self,
        files: Vec<FileDescriptor>,
    ) -> Result<Vec<FileDescriptor>, FerryError> {
        let uploaded = self.inner.upload_files(files)?;
        let mut log = self.log.lock().unwrap();
        for file in &uploaded {
            let bytes = fs::read(file.local_path().unwrap().as_std_path()).unwrap();
            log.uploaded.push((file.clone(), bytes));
        }
        Ok(uploaded)
    }

    fn revert_upload(&mut self, files: &[FileDescriptor]) -> Result<(), FerryError> {
        self.log
            .lock()
            .unwrap()
            .reverted
            .extend(files.iter().map(|file| file.remote_path().clone()));
        self.inner.revert_upload(files)
    }
}

impl Downloader for RecordingTransfer {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        self.log.lock().unwrap().connects += 1;
        let inner = self.inner.connect_for_download(dataset, representative)?;
        Ok(Box::new(RecordingDownload {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

impl Uploader for RecordingTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        self.inner.source_folder_for(dataset)
    }

    fn connect_for_upload_to(
        &self,
        dataset: &Dataset,
        source_folder: &RemotePath,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        self.log.lock().unwrap().connects += 1;
        let inner = self
            .inner
            .connect_for_upload_to(dataset, source_folder, representative)?;
        Ok(Box::new(RecordingUpload {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Never manages to connect. Counts attempts.
pub struct FailingTransfer {
    name: &'static str,
    attempts: Arc<Mutex<usize>>,
}

impl FailingTransfer {
    pub fn new(name: &'static str) -> (Self, Arc<Mutex<usize>>) {
        let attempts = Arc::new(Mutex::new(0));
        (
            Self {
                name,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }

    fn fail(&self, representative: &RemotePath) -> FerryError {
        *self.attempts.lock().unwrap() += 1;
        FerryError::not_accessible(representative, format!("{} is unreachable", self.name))
    }
}

impl Downloader for FailingTransfer {
    fn connect_for_download(
        &self,
        _dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        Err(self.fail(representative))
    }
}

impl Uploader for FailingTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        dataset
            .source_folder()
            .cloned()
            .ok_or(FerryError::MissingSourceFolder)
    }

    fn connect_for_upload_to(
        &self,
        _dataset: &Dataset,
        _source_folder: &RemotePath,
        representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        Err(self.fail(representative))
    }
}

/// Records the phase of every progress event.
#[derive(Default)]
pub struct RecordingSink {
    phases: Mutex<Vec<Phase>>,
}

impl RecordingSink {
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = self.phases.lock().unwrap().clone();
        phases.dedup();
        phases
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.phases.lock().unwrap().push(event.phase);
    }
}
