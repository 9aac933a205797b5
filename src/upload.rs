//! Uploading a new dataset: files first, then the catalog records.
//!
//! Only the file transfer is compensated. If the dataset record cannot be
//! created, the uploaded files are removed again. Once the dataset record
//! exists, later failures leave everything in place and report a
//! [`FerryError::PartialUpload`].

use std::time::Instant;

use tracing::{error, info};

use crate::catalog::Catalog;
use crate::client::{Phase, ProgressSink, emit};
use crate::dataset::Dataset;
use crate::error::FerryError;
use crate::file::FileDescriptor;
use crate::model::{DownloadAttachment, DownloadDatablock, DownloadDataset};
use crate::transfer::{UploadConnection, Uploader};

pub fn upload_new_dataset<C, T>(
    catalog: &C,
    transfer: &T,
    dataset: Dataset,
    sink: &dyn ProgressSink,
) -> Result<Dataset, FerryError>
where
    C: Catalog + ?Sized,
    T: Uploader + ?Sized,
{
    let started = Instant::now();

    emit(sink, Phase::Resolve, "resolving source folder", started);
    let source_folder = transfer.source_folder_for(&dataset)?;
    if let Some(file) = dataset
        .files()
        .find(|file| file.is_on_local() && file.is_on_remote())
    {
        return Err(FerryError::AmbiguousFile(file.remote_path().to_string()));
    }
    let dataset = dataset.with_source_folder(source_folder);

    emit(sink, Phase::Validate, "validating dataset", started);
    catalog.validate_dataset(&dataset.make_upload_model()?)?;

    let files: Vec<FileDescriptor> = dataset
        .files()
        .filter(|file| file.is_on_local())
        .cloned()
        .collect();
    let (dataset, created) = match files.first() {
        None => {
            emit(sink, Phase::CreateDataset, "creating dataset", started);
            let created = catalog.create_dataset(&dataset.make_upload_model()?)?;
            (dataset, created)
        }
        Some(first) => {
            let representative = first.remote_path().clone();
            emit(
                sink,
                Phase::Transfer,
                &format!("uploading {} files", files.len()),
                started,
            );
            let mut connection = transfer.connect_for_upload(&dataset, &representative)?;
            let uploaded = connection.upload_files(files)?;
            match create_with_uploaded(catalog, dataset, &*connection, &uploaded, sink, started)
            {
                Ok(result) => result,
                Err(err) => {
                    emit(sink, Phase::Revert, "reverting uploaded files", started);
                    if let Err(revert_err) = connection.revert_upload(&uploaded) {
                        error!(error = %revert_err, "failed to revert uploaded files");
                    }
                    return Err(err);
                }
            }
        }
    };
    info!(pid = %created.pid, "created dataset");

    let pid = created.pid.clone();
    let partial = |stage: &'static str, err: FerryError| FerryError::PartialUpload {
        pid: pid.to_string(),
        stage,
        message: err.to_string(),
    };

    emit(sink, Phase::CreateDatablocks, "creating datablocks", started);
    let block_models = dataset
        .make_datablock_upload_models(&pid)
        .map_err(|err| partial("datablocks", err))?;
    let mut blocks: Vec<(usize, DownloadDatablock)> = Vec::with_capacity(block_models.len());
    for (index, model) in block_models {
        let block = catalog
            .create_datablock(&model)
            .map_err(|err| partial("datablocks", err))?;
        blocks.push((index, block));
    }

    emit(sink, Phase::CreateAttachments, "creating attachments", started);
    let mut attachments: Vec<DownloadAttachment> = Vec::new();
    for model in dataset.make_attachment_upload_models(&pid) {
        let attachment = catalog
            .create_attachment(&model)
            .map_err(|err| partial("attachments", err))?;
        attachments.push(attachment);
    }

    emit(sink, Phase::Done, &format!("uploaded dataset {pid}"), started);
    Ok(dataset.finalize(created, &blocks, attachments))
}

fn create_with_uploaded<C: Catalog + ?Sized>(
    catalog: &C,
    dataset: Dataset,
    connection: &dyn UploadConnection,
    uploaded: &[FileDescriptor],
    sink: &dyn ProgressSink,
    started: Instant,
) -> Result<(Dataset, DownloadDataset), FerryError> {
    let dataset = dataset
        .with_source_folder(connection.source_folder().clone())
        .replace_files(uploaded.iter().cloned())?;
    emit(sink, Phase::CreateDataset, "creating dataset", started);
    let created = catalog.create_dataset(&dataset.make_upload_model()?)?;
    Ok((dataset, created))
}
