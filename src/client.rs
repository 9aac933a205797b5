use std::fmt;
use std::time::{Duration, Instant};

use camino::Utf8Path;

use crate::catalog::Catalog;
use crate::dataset::Dataset;
use crate::domain::Pid;
use crate::download::{self, DownloadOptions};
use crate::error::FerryError;
use crate::transfer::FileTransfer;
use crate::upload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Validate,
    Select,
    Transfer,
    Verify,
    CreateDataset,
    CreateDatablocks,
    CreateAttachments,
    Revert,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolve => "Resolve",
            Phase::Validate => "Validate",
            Phase::Select => "Select",
            Phase::Transfer => "Transfer",
            Phase::Verify => "Verify",
            Phase::CreateDataset => "CreateDataset",
            Phase::CreateDatablocks => "CreateDatablocks",
            Phase::CreateAttachments => "CreateAttachments",
            Phase::Revert => "Revert",
            Phase::Done => "Done",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase={}; {}", self.phase, self.message)
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

pub(crate) fn emit(sink: &dyn ProgressSink, phase: Phase, message: &str, started: Instant) {
    sink.event(ProgressEvent {
        phase,
        message: message.to_string(),
        elapsed: Some(started.elapsed()),
    });
}

/// Moves datasets between a catalog and a file server.
#[derive(Clone)]
pub struct Client<C: Catalog, T: FileTransfer> {
    catalog: C,
    transfer: T,
}

impl<C: Catalog, T: FileTransfer> Client<C, T> {
    pub fn new(catalog: C, transfer: T) -> Self {
        Self { catalog, transfer }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Fetch a dataset with its datablocks and attachments.
    pub fn get_dataset(&self, pid: &Pid) -> Result<Dataset, FerryError> {
        let dataset = self.catalog.get_dataset(pid)?;
        let blocks = self.catalog.get_datablocks(pid)?;
        let attachments = self.catalog.get_attachments(pid)?;
        Ok(Dataset::from_download_models(dataset, blocks, attachments))
    }

    /// Upload the local files of `dataset` and create its catalog records.
    pub fn upload_new_dataset_now(
        &self,
        dataset: Dataset,
        sink: &dyn ProgressSink,
    ) -> Result<Dataset, FerryError> {
        upload::upload_new_dataset(&self.catalog, &self.transfer, dataset, sink)
    }

    pub fn download_files(
        &self,
        dataset: Dataset,
        target: &Utf8Path,
        options: DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Dataset, FerryError> {
        download::download_files(&self.transfer, dataset, target, options, sink)
    }
}
