//! Downloading the files of a dataset into a local directory.

use std::collections::HashMap;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::client::{Phase, ProgressSink, emit};
use crate::dataset::Dataset;
use crate::domain::{ChecksumAlgorithm, RemotePath};
use crate::error::FerryError;
use crate::file::FileDescriptor;
use crate::fs_util;
use crate::selection::FileSelector;
use crate::transfer::Downloader;

#[derive(Debug, Default)]
pub struct DownloadOptions {
    pub select: FileSelector,
    /// Download even if the local file is up to date.
    pub force: bool,
    /// Algorithm used to decide whether existing local files are up to date,
    /// instead of the algorithm of each file.
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

impl DownloadOptions {
    pub fn select(select: impl Into<FileSelector>) -> Self {
        Self {
            select: select.into(),
            ..Self::default()
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = Some(algorithm);
        self
    }
}

/// Download the selected files of `dataset` into `target`.
///
/// Directories of the remote paths are dropped, every file lands directly in
/// `target`. Returns the dataset with the local paths of all selected files
/// set, including those that were already up to date.
pub fn download_files<T: Downloader + ?Sized>(
    transfer: &T,
    dataset: Dataset,
    target: &Utf8Path,
    options: DownloadOptions,
    sink: &dyn ProgressSink,
) -> Result<Dataset, FerryError> {
    let started = Instant::now();
    let source_folder = dataset
        .source_folder()
        .cloned()
        .ok_or(FerryError::MissingSourceFolder)?;
    fs_util::ensure_dir(target)?;

    emit(sink, Phase::Select, "selecting files", started);
    let selected: Vec<(FileDescriptor, Utf8PathBuf)> = dataset
        .files()
        .filter(|file| file.is_on_remote() && options.select.matches(file))
        .map(|file| (file.clone(), target.join(file.remote_path().file_name())))
        .collect();
    check_unique_local_names(&selected)?;

    let mut done = Vec::with_capacity(selected.len());
    let mut pending = Vec::new();
    for (file, local) in selected {
        if !options.force && is_up_to_date(&file, &local, options.checksum_algorithm)? {
            debug!(local = %local, "local file is up to date");
            done.push(file.downloaded(local));
        } else {
            pending.push((file, local));
        }
    }

    if let Some((first, _)) = pending.first() {
        emit(
            sink,
            Phase::Transfer,
            &format!("downloading {} files", pending.len()),
            started,
        );
        let remote: Vec<RemotePath> = pending
            .iter()
            .map(|(file, _)| source_folder.join(file.remote_path().as_str()))
            .collect();
        let local: Vec<Utf8PathBuf> = pending.iter().map(|(_, local)| local.clone()).collect();
        {
            let mut connection = transfer.connect_for_download(&dataset, first.remote_path())?;
            connection.download_files(&remote, &local)?;
        }

        emit(sink, Phase::Verify, "validating downloaded files", started);
        for (file, local) in pending {
            let mut file = file.downloaded(local);
            file.validate_after_download()?;
            done.push(file);
        }
    } else {
        info!("all selected files are up to date, nothing to download");
    }

    emit(sink, Phase::Done, &format!("{} files available locally", done.len()), started);
    dataset.replace_files(done)
}

fn check_unique_local_names(selected: &[(FileDescriptor, Utf8PathBuf)]) -> Result<(), FerryError> {
    let mut seen: HashMap<&Utf8Path, &RemotePath> = HashMap::new();
    for (file, local) in selected {
        if let Some(other) = seen.insert(local.as_path(), file.remote_path()) {
            return Err(FerryError::DuplicateLocalName(format!(
                "{} and {} both map to {local}",
                other,
                file.remote_path()
            )));
        }
    }
    Ok(())
}

fn is_up_to_date(
    file: &FileDescriptor,
    local: &Utf8Path,
    algorithm: Option<ChecksumAlgorithm>,
) -> Result<bool, FerryError> {
    if !local.as_std_path().is_file() {
        return Ok(false);
    }
    let mut local_copy = file.clone().downloaded(local);
    if algorithm.is_some() {
        local_copy = local_copy.with_checksum_algorithm(algorithm);
    }
    local_copy.local_is_up_to_date()
}
