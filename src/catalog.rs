use crate::domain::Pid;
use crate::error::FerryError;
use crate::model::{
    DownloadAttachment, DownloadDatablock, DownloadDataset, UploadAttachment, UploadDatablock,
    UploadDataset,
};

/// The metadata catalog.
///
/// Implementations own the wire protocol. Communication failures and missing
/// records are reported as [`FerryError::Comm`], rejected records as
/// [`FerryError::Validation`]. Calls are made sequentially by a single caller.
pub trait Catalog: Send + Sync {
    fn get_dataset(&self, pid: &Pid) -> Result<DownloadDataset, FerryError>;
    fn get_datablocks(&self, pid: &Pid) -> Result<Vec<DownloadDatablock>, FerryError>;
    fn get_attachments(&self, pid: &Pid) -> Result<Vec<DownloadAttachment>, FerryError>;

    /// Check a dataset record without creating it.
    fn validate_dataset(&self, dataset: &UploadDataset) -> Result<(), FerryError>;

    fn create_dataset(&self, dataset: &UploadDataset) -> Result<DownloadDataset, FerryError>;
    fn create_datablock(
        &self,
        datablock: &UploadDatablock,
    ) -> Result<DownloadDatablock, FerryError>;
    fn create_attachment(
        &self,
        attachment: &UploadAttachment,
    ) -> Result<DownloadAttachment, FerryError>;
}
