//! Transfer over a remote shell.
//!
//! [`OpenSsh`] drives the system `ssh` and `scp` binaries through one
//! multiplexed control connection per transfer connection. [`LocalShell`]
//! runs the same commands on this machine.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::domain::{ChecksumAlgorithm, RemotePath};
use crate::error::FerryError;
use crate::file::{FileDescriptor, RemoteAccess, UploadedMetadata};
use crate::formatter::{self, SourceFolderPattern};
use crate::fs_util;
use crate::transfer::{DownloadConnection, Downloader, UploadConnection, Uploader};

const COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    fn from_output(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// Runs commands and copies files on the file server.
pub trait RemoteShell {
    fn host(&self) -> &str;
    fn run(&self, command: &str) -> Result<ShellOutput, FerryError>;
    fn put(&self, local: &Utf8Path, remote: &RemotePath) -> Result<(), FerryError>;
    fn get(&self, remote: &RemotePath, local: &Utf8Path) -> Result<(), FerryError>;
}

/// An OpenSSH control master. Closed when dropped.
pub struct OpenSsh {
    destination: String,
    port: Option<u16>,
    control_dir: TempDir,
}

impl OpenSsh {
    pub fn connect(host: &str, port: Option<u16>, user: Option<&str>) -> Result<Self, FerryError> {
        let destination = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        let control_dir = tempfile::Builder::new()
            .prefix("ferry-ssh")
            .tempdir()
            .map_err(|err| FerryError::Filesystem(err.to_string()))?;
        let shell = Self {
            destination,
            port,
            control_dir,
        };

        info!(host = %shell.destination, "opening ssh connection");
        let mut cmd = shell.ssh_command();
        cmd.args([
            "-o",
            "ControlMaster=yes",
            "-o",
            "ControlPersist=yes",
            "-o",
            "BatchMode=yes",
            "-f",
            "-N",
        ])
        .arg(&shell.destination);
        let output = run_cmd(cmd, "ssh")?;
        if !output.success() {
            return Err(FerryError::RemoteShell(format!(
                "cannot connect to {}: {}",
                shell.destination, output.stderr
            )));
        }
        Ok(shell)
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("master")
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()));
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd
    }

    fn scp_command(&self) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()));
        if let Some(port) = self.port {
            cmd.arg("-P").arg(port.to_string());
        }
        cmd
    }

    fn scp(&self, from: &str, to: &str) -> Result<(), FerryError> {
        let mut cmd = self.scp_command();
        cmd.arg(from).arg(to);
        let output = run_cmd(cmd, "scp")?;
        if output.success() {
            return Ok(());
        }
        Err(FerryError::RemoteShell(format!(
            "scp {from} {to} failed: {}",
            output.stderr
        )))
    }
}

impl RemoteShell for OpenSsh {
    fn host(&self) -> &str {
        &self.destination
    }

    fn run(&self, command: &str) -> Result<ShellOutput, FerryError> {
        debug!(host = %self.destination, command, "running remote command");
        let mut cmd = self.ssh_command();
        cmd.arg(&self.destination).arg("--").arg(command);
        run_cmd(cmd, "ssh")
    }

    fn put(&self, local: &Utf8Path, remote: &RemotePath) -> Result<(), FerryError> {
        self.scp(local.as_str(), &format!("{}:{}", self.destination, remote))
    }

    fn get(&self, remote: &RemotePath, local: &Utf8Path) -> Result<(), FerryError> {
        self.scp(&format!("{}:{}", self.destination, remote), local.as_str())
    }
}

impl Drop for OpenSsh {
    fn drop(&mut self) {
        let mut cmd = self.ssh_command();
        cmd.args(["-O", "exit"]).arg(&self.destination);
        match run_cmd(cmd, "ssh") {
            Ok(output) if output.success() => {
                debug!(host = %self.destination, "closed ssh connection");
            }
            Ok(output) => {
                debug!(
                    host = %self.destination,
                    stderr = %output.stderr,
                    "ssh control master already gone"
                );
            }
            Err(err) => {
                warn!(host = %self.destination, error = %err, "failed to close ssh connection")
            }
        }
    }
}

/// Treats this machine as the file server.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShell;

impl RemoteShell for LocalShell {
    fn host(&self) -> &str {
        "localhost"
    }

    fn run(&self, command: &str) -> Result<ShellOutput, FerryError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_cmd(cmd, "sh")
    }

    fn put(&self, local: &Utf8Path, remote: &RemotePath) -> Result<(), FerryError> {
        fs::copy(local.as_std_path(), remote.as_str())
            .map(|_| ())
            .map_err(|err| FerryError::RemoteShell(format!("copy {local} to {remote}: {err}")))
    }

    fn get(&self, remote: &RemotePath, local: &Utf8Path) -> Result<(), FerryError> {
        fs_util::copy_file_atomic(&remote.to_local(), local)
    }
}

fn run_cmd(mut cmd: Command, program: &str) -> Result<ShellOutput, FerryError> {
    cmd.stdin(Stdio::null());
    let output = cmd
        .output()
        .map_err(|err| FerryError::RemoteShell(format!("failed to run {program}: {err}")))?;
    Ok(ShellOutput::from_output(output))
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Where the transfer's shell runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellTarget {
    Ssh {
        host: String,
        port: Option<u16>,
        user: Option<String>,
    },
    Local,
}

impl ShellTarget {
    fn open(&self) -> Result<Box<dyn RemoteShell>, FerryError> {
        match self {
            ShellTarget::Ssh { host, port, user } => {
                Ok(Box::new(OpenSsh::connect(host, *port, user.as_deref())?))
            }
            ShellTarget::Local => Ok(Box::new(LocalShell)),
        }
    }
}

/// Uploads and downloads files through a remote shell.
///
/// Uploads create the source folder with `mkdir -p`. With checksum
/// verification enabled, every uploaded file is hashed on the server with
/// coreutils and compared to the local checksum.
#[derive(Debug, Clone)]
pub struct SshFileTransfer {
    target: ShellTarget,
    source_folder: Option<SourceFolderPattern>,
    verify_checksums: bool,
}

impl SshFileTransfer {
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_target(ShellTarget::Ssh {
            host: host.into(),
            port: None,
            user: None,
        })
    }

    /// A transfer whose "server" is this machine.
    pub fn local() -> Self {
        Self::with_target(ShellTarget::Local)
    }

    fn with_target(target: ShellTarget) -> Self {
        Self {
            target,
            source_folder: None,
            verify_checksums: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        if let ShellTarget::Ssh { port: slot, .. } = &mut self.target {
            *slot = Some(port);
        }
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        if let ShellTarget::Ssh { user: slot, .. } = &mut self.target {
            *slot = Some(user.into());
        }
        self
    }

    pub fn with_source_folder(mut self, pattern: impl Into<SourceFolderPattern>) -> Self {
        self.source_folder = Some(pattern.into());
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn target(&self) -> &ShellTarget {
        &self.target
    }
}

impl Downloader for SshFileTransfer {
    fn connect_for_download(
        &self,
        dataset: &Dataset,
        representative: &RemotePath,
    ) -> Result<Box<dyn DownloadConnection + '_>, FerryError> {
        let source_folder = dataset
            .source_folder()
            .ok_or(FerryError::MissingSourceFolder)?;
        let shell = self.target.open()?;
        let probe = source_folder.join(representative.as_str());
        let output = shell.run(&format!("test -r {}", shell_quote(probe.as_str())))?;
        if !output.success() {
            return Err(FerryError::not_accessible(
                &probe,
                format!("file is not readable on {}", shell.host()),
            ));
        }
        Ok(Box::new(SshDownloadConnection { shell }))
    }
}

impl Uploader for SshFileTransfer {
    fn source_folder_for(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        formatter::source_folder_for(dataset, self.source_folder.as_ref())
    }

    fn connect_for_upload_to(
        &self,
        _dataset: &Dataset,
        source_folder: &RemotePath,
        _representative: &RemotePath,
    ) -> Result<Box<dyn UploadConnection + '_>, FerryError> {
        let shell = self.target.open()?;
        Ok(Box::new(SshUploadConnection::new(
            shell,
            source_folder.clone(),
            self.verify_checksums,
        )))
    }
}

struct SshDownloadConnection {
    shell: Box<dyn RemoteShell>,
}

impl DownloadConnection for SshDownloadConnection {
    fn download_files(
        &mut self,
        remote: &[RemotePath],
        local: &[Utf8PathBuf],
    ) -> Result<(), FerryError> {
        for (remote, local) in remote.iter().zip(local) {
            info!(remote = %remote, host = self.shell.host(), local = %local, "downloading file");
            if let Some(parent) = local.parent() {
                fs_util::ensure_dir(parent)?;
            }
            self.shell.get(remote, local)?;
        }
        Ok(())
    }
}

struct SshUploadConnection {
    shell: Box<dyn RemoteShell>,
    source_folder: RemotePath,
    verify_checksums: bool,
}

impl SshUploadConnection {
    fn new(shell: Box<dyn RemoteShell>, source_folder: RemotePath, verify_checksums: bool) -> Self {
        Self {
            shell,
            source_folder,
            verify_checksums,
        }
    }

    fn make_dir(&self, dir: &RemotePath) -> Result<(), FerryError> {
        let output = self
            .shell
            .run(&format!("mkdir -p {}", shell_quote(dir.as_str())))?;
        if output.success() {
            return Ok(());
        }
        Err(FerryError::Upload(format!(
            "failed to create folder {dir} on {}: {}",
            self.shell.host(),
            output.stderr
        )))
    }

    fn upload_file(
        &self,
        file: FileDescriptor,
        remote: &RemotePath,
    ) -> Result<FileDescriptor, FerryError> {
        let local = file
            .local_path()
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| FerryError::MissingLocalFile(file.remote_path().to_string()))?;
        if let Some(parent) = remote.parent()
            && parent != self.source_folder
        {
            self.make_dir(&parent)?;
        }

        info!(local = %local, remote = %remote, host = self.shell.host(), "uploading file");
        self.shell
            .put(&local, remote)
            .map_err(|err| FerryError::Upload(err.to_string()))?;

        let metadata = self.stat(remote)?;
        let mut file = file.uploaded(metadata)?;
        if self.verify_checksums {
            self.verify_checksum(&mut file, remote)?;
        }
        Ok(file)
    }

    fn stat(&self, remote: &RemotePath) -> Result<UploadedMetadata, FerryError> {
        let output = self.shell.run(&format!(
            "stat -c '%s %Y %u %g %a' {}",
            shell_quote(remote.as_str())
        ))?;
        if !output.success() {
            return Err(FerryError::Upload(format!(
                "cannot stat uploaded file {remote}: {}",
                output.stderr
            )));
        }
        parse_stat(&output.stdout)
            .ok_or_else(|| FerryError::Upload(format!("unexpected stat output for {remote}")))
    }

    fn verify_checksum(
        &self,
        file: &mut FileDescriptor,
        remote: &RemotePath,
    ) -> Result<(), FerryError> {
        let Some(algorithm) = file.checksum_algorithm() else {
            return Ok(());
        };
        let Some(program) = checksum_command(algorithm) else {
            warn!(
                remote = %remote,
                algorithm = %algorithm,
                "cannot validate checksum of uploaded file, algorithm is not available on the server"
            );
            return Ok(());
        };
        let output = self
            .shell
            .run(&format!("{program} {}", shell_quote(remote.as_str())))?;
        if output.status == Some(COMMAND_NOT_FOUND) {
            warn!(
                remote = %remote,
                algorithm = %algorithm,
                "cannot validate checksum of uploaded file, algorithm is not available on the server"
            );
            return Ok(());
        }
        if !output.success() {
            return Err(FerryError::Upload(format!(
                "failed to compute checksum of {remote}: {}",
                output.stderr
            )));
        }
        let remote_checksum = output.stdout.split_whitespace().next().unwrap_or_default();
        let local_checksum = file.checksum()?.unwrap_or_default();
        if remote_checksum != local_checksum {
            return Err(FerryError::Upload(format!(
                "checksum of uploaded file {remote} ({remote_checksum}) does not match checksum \
                 of local file ({local_checksum}) using algorithm {algorithm}"
            )));
        }
        Ok(())
    }

    fn revert_paths(&self, remote_paths: &[RemotePath]) {
        let mut dirs = BTreeSet::new();
        for remote in remote_paths {
            info!(remote = %remote, host = self.shell.host(), "reverting upload");
            match self.shell.run(&format!("rm -f {}", shell_quote(remote.as_str()))) {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!(remote = %remote, stderr = %output.stderr, "failed to revert file")
                }
                Err(err) => warn!(remote = %remote, error = %err, "failed to revert file"),
            }
            let mut dir = remote.parent();
            while let Some(parent) = dir {
                if parent == self.source_folder
                    || !parent.as_str().starts_with(self.source_folder.as_str())
                {
                    break;
                }
                dir = parent.parent();
                dirs.insert(parent);
            }
        }
        // Deepest first, rmdir only removes empty directories.
        for dir in dirs.iter().rev() {
            match self.shell.run(&format!("rmdir {}", shell_quote(dir.as_str()))) {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    debug!(dir = %dir, stderr = %output.stderr, "remote directory not removed")
                }
                Err(err) => debug!(dir = %dir, error = %err, "remote directory not removed"),
            }
        }

        let folder = shell_quote(self.source_folder.as_str());
        let is_empty = matches!(
            self.shell.run(&format!("ls -A {folder}")),
            Ok(output) if output.success() && output.stdout.trim().is_empty()
        );
        if is_empty {
            info!(
                dir = %self.source_folder,
                host = self.shell.host(),
                "removing empty remote directory"
            );
            match self.shell.run(&format!("rmdir {folder}")) {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(
                    dir = %self.source_folder,
                    stderr = %output.stderr,
                    "failed to remove empty remote directory"
                ),
                Err(err) => warn!(
                    dir = %self.source_folder,
                    error = %err,
                    "failed to remove empty remote directory"
                ),
            }
        }
    }
}

impl UploadConnection for SshUploadConnection {
    fn source_folder(&self) -> &RemotePath {
        &self.source_folder
    }

    fn upload_files(
        &mut self,
        files: Vec<FileDescriptor>,
    ) -> Result<Vec<FileDescriptor>, FerryError> {
        self.make_dir(&self.source_folder)?;
        let mut uploaded = Vec::with_capacity(files.len());
        let mut placed = Vec::with_capacity(files.len());
        for file in files {
            let remote = self.source_folder.join(file.remote_path().as_str());
            placed.push(remote.clone());
            match self.upload_file(file, &remote) {
                Ok(file) => uploaded.push(file),
                Err(err) => {
                    self.revert_paths(&placed);
                    return Err(err);
                }
            }
        }
        Ok(uploaded)
    }

    fn revert_upload(&mut self, files: &[FileDescriptor]) -> Result<(), FerryError> {
        let paths: Vec<RemotePath> = files
            .iter()
            .map(|file| self.source_folder.join(file.remote_path().as_str()))
            .collect();
        self.revert_paths(&paths);
        Ok(())
    }
}

/// Coreutils command printing the checksum of a file in the format
/// `<hex> *<path>`.
fn checksum_command(algorithm: ChecksumAlgorithm) -> Option<&'static str> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Some("md5sum -b"),
        ChecksumAlgorithm::Sha256 => Some("sha256sum -b"),
        ChecksumAlgorithm::Sha384 => Some("sha384sum -b"),
        ChecksumAlgorithm::Sha512 => Some("sha512sum -b"),
        ChecksumAlgorithm::Blake2b => Some("b2sum -l 512 -b"),
        ChecksumAlgorithm::Blake2s | ChecksumAlgorithm::Blake3 => None,
    }
}

/// Parse `stat -c '%s %Y %u %g %a'`.
fn parse_stat(output: &str) -> Option<UploadedMetadata> {
    let mut fields = output.split_whitespace();
    let size = fields.next()?.parse().ok()?;
    let mtime: i64 = fields.next()?.parse().ok()?;
    let uid = fields.next()?.to_string();
    let gid = fields.next()?.to_string();
    let perm = fields.next()?.to_string();
    Some(UploadedMetadata {
        size,
        creation_time: DateTime::<Utc>::from_timestamp(mtime, 0)?,
        access: RemoteAccess {
            uid: Some(uid),
            gid: Some(gid),
            perm: Some(perm),
        },
    })
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::dataset::DatasetFields;
    use crate::domain::DatasetType;
    use crate::fs_util::utf8_path;

    /// Corrupts every file it uploads.
    struct CorruptingShell;

    impl RemoteShell for CorruptingShell {
        fn host(&self) -> &str {
            "corrupt"
        }

        fn run(&self, command: &str) -> Result<ShellOutput, FerryError> {
            LocalShell.run(command)
        }

        fn put(&self, _local: &Utf8Path, remote: &RemotePath) -> Result<(), FerryError> {
            fs::write(remote.as_str(), b"garbage")
                .map_err(|err| FerryError::RemoteShell(err.to_string()))
        }

        fn get(&self, remote: &RemotePath, local: &Utf8Path) -> Result<(), FerryError> {
            LocalShell.get(remote, local)
        }
    }

    fn dataset(folder: &Utf8Path) -> Dataset {
        Dataset::new(DatasetFields::new(
            DatasetType::Raw,
            "Ridcully",
            "faculty",
            "ridcully@uu.am",
        ))
        .with_source_folder(RemotePath::new(folder.as_str()))
    }

    fn local_file(dir: &Utf8Path, name: &str, content: &[u8]) -> FileDescriptor {
        let path = dir.join(name);
        fs::write(path.as_std_path(), content).unwrap();
        FileDescriptor::from_local(path).with_checksum_algorithm(Some(ChecksumAlgorithm::Sha256))
    }

    #[test]
    fn quotes_for_shell() {
        assert_eq!(shell_quote("/data/a b"), "'/data/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn parses_stat_output() {
        let metadata = parse_stat("1024 1700000000 1000 100 644\n").unwrap();
        assert_eq!(metadata.size, 1024);
        assert_eq!(metadata.creation_time.timestamp(), 1_700_000_000);
        assert_eq!(metadata.access.uid.as_deref(), Some("1000"));
        assert_eq!(metadata.access.perm.as_deref(), Some("644"));
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn checksum_commands() {
        assert_eq!(checksum_command(ChecksumAlgorithm::Blake2b), Some("b2sum -l 512 -b"));
        assert_eq!(checksum_command(ChecksumAlgorithm::Md5), Some("md5sum -b"));
        assert_eq!(checksum_command(ChecksumAlgorithm::Blake2s), None);
    }

    #[test]
    fn upload_through_local_shell() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        let folder = root.join("server/ds");
        let file = local_file(&root, "a.dat", b"payload").with_remote_path("sub/a.dat");

        let transfer = SshFileTransfer::local();
        let dataset = dataset(&folder);
        let mut conn = transfer.connect_for_upload(&dataset, file.remote_path()).unwrap();
        let uploaded = conn.upload_files(vec![file]).unwrap();

        assert_eq!(fs::read(folder.join("sub/a.dat").as_std_path()).unwrap(), b"payload");
        assert_eq!(uploaded[0].remote_metadata().unwrap().size, 7);

        conn.revert_upload(&uploaded).unwrap();
        assert!(!folder.as_std_path().exists());
    }

    #[test]
    fn revert_keeps_directories_with_foreign_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        let folder = root.join("server/ds");
        let file = local_file(&root, "a.dat", b"payload").with_remote_path("sub/a.dat");

        let transfer = SshFileTransfer::local();
        let dataset = dataset(&folder);
        let mut conn = transfer.connect_for_upload(&dataset, file.remote_path()).unwrap();
        let uploaded = conn.upload_files(vec![file]).unwrap();
        fs::write(folder.join("sub/other.dat").as_std_path(), b"keep").unwrap();

        conn.revert_upload(&uploaded).unwrap();
        assert!(!folder.join("sub/a.dat").as_std_path().exists());
        assert_eq!(fs::read(folder.join("sub/other.dat").as_std_path()).unwrap(), b"keep");
    }

    #[test]
    fn checksum_mismatch_reverts_call() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        let folder = root.join("server");
        let file = local_file(&root, "a.dat", b"payload");

        let mut conn = SshUploadConnection::new(
            Box::new(CorruptingShell),
            RemotePath::new(folder.as_str()),
            true,
        );
        assert_matches!(conn.upload_files(vec![file]), Err(FerryError::Upload(_)));
        assert!(!folder.join("a.dat").as_std_path().exists());
    }

    #[test]
    fn download_checks_access_then_copies() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        fs::write(root.join("a.dat").as_std_path(), b"remote").unwrap();
        let transfer = SshFileTransfer::local();
        let dataset = dataset(&root);

        assert_matches!(
            transfer
                .connect_for_download(&dataset, &RemotePath::new("missing.dat"))
                .map(|_| ()),
            Err(FerryError::FileNotAccessible { .. })
        );

        let mut conn = transfer
            .connect_for_download(&dataset, &RemotePath::new("a.dat"))
            .unwrap();
        let target = root.join("down/a.dat");
        conn.download_files(&[RemotePath::new(root.join("a.dat").as_str())], &[target.clone()])
            .unwrap();
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"remote");
    }
}
