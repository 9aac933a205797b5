use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::FerryError;

/// Identifier of a dataset in the catalog.
///
/// The id is split at the first `/` into an optional prefix, which identifies
/// the catalog instance, and the main id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pid {
    prefix: Option<String>,
    id: String,
}

impl Pid {
    pub fn new(prefix: Option<&str>, id: &str) -> Result<Self, FerryError> {
        if id.is_empty() || id.contains('/') {
            return Err(FerryError::InvalidPid(id.to_string()));
        }
        Ok(Self {
            prefix: prefix.map(str::to_string),
            id: id.to_string(),
        })
    }

    pub fn generate(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn without_prefix(&self) -> Self {
        Self {
            prefix: None,
            id: self.id.clone(),
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}/{}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

impl FromStr for Pid {
    type Err = FerryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.split_once('/') {
            Some((prefix, id)) if !prefix.is_empty() && !id.is_empty() => Ok(Self {
                prefix: Some(prefix.to_string()),
                id: id.to_string(),
            }),
            Some(_) => Err(FerryError::InvalidPid(value.to_string())),
            None if trimmed.is_empty() => Err(FerryError::InvalidPid(value.to_string())),
            None => Ok(Self {
                prefix: None,
                id: trimmed.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Pid {
    type Error = FerryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.to_string()
    }
}

/// A path on the remote file server.
///
/// Remote paths are sequences of segments joined by forward slashes,
/// independent of the path conventions of the local machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, other: impl AsRef<str>) -> Self {
        let this = self.0.strip_suffix('/').unwrap_or(&self.0);
        let other = other.as_ref();
        let other = other.strip_prefix('/').unwrap_or(other);
        let other = other.strip_suffix('/').unwrap_or(other);
        if this.is_empty() {
            return Self(other.to_string());
        }
        Self(format!("{this}/{other}"))
    }

    /// The last segment of the path with all directories removed.
    pub fn file_name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// The file extension including the leading period.
    pub fn suffix(&self) -> Option<&str> {
        let name = self.file_name();
        name.rfind('.')
            .filter(|&index| index > 0)
            .map(|index| &name[index..])
    }

    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.0.trim_end_matches('/');
        let (parent, _) = trimmed.rsplit_once('/')?;
        if parent.is_empty() {
            return Some(Self("/".to_string()));
        }
        Some(Self(parent.to_string()))
    }

    /// Interpret the remote path as a path on the local filesystem.
    ///
    /// Only meaningful for transfers where the file server is mounted locally.
    pub fn to_local(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.0)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RemotePath {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Sha384,
    Sha512,
    Blake2b,
    Blake2s,
    Blake3,
}

impl ChecksumAlgorithm {
    /// Used when a checksum must be compared but no algorithm was recorded.
    pub const DEFAULT: ChecksumAlgorithm = ChecksumAlgorithm::Blake2b;

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Blake2b => "blake2b",
            ChecksumAlgorithm::Blake2s => "blake2s",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = FerryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            "blake2b" => Ok(ChecksumAlgorithm::Blake2b),
            "blake2s" => Ok(ChecksumAlgorithm::Blake2s),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            _ => Err(FerryError::UnsupportedAlgorithm(value.to_string())),
        }
    }
}

impl TryFrom<String> for ChecksumAlgorithm {
    type Error = FerryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChecksumAlgorithm> for String {
    fn from(algorithm: ChecksumAlgorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Raw,
    Derived,
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetType::Raw => write!(f, "raw"),
            DatasetType::Derived => write!(f, "derived"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_pid_with_prefix() {
        let pid: Pid = "20.500.12269/abc-123".parse().unwrap();
        assert_eq!(pid.prefix(), Some("20.500.12269"));
        assert_eq!(pid.id(), "abc-123");
        assert_eq!(pid.to_string(), "20.500.12269/abc-123");
        assert_eq!(pid.without_prefix().to_string(), "abc-123");
    }

    #[test]
    fn parse_pid_invalid() {
        assert_matches!("".parse::<Pid>(), Err(FerryError::InvalidPid(_)));
        assert_matches!("/abc".parse::<Pid>(), Err(FerryError::InvalidPid(_)));
    }

    #[test]
    fn remote_path_join_strips_slashes() {
        let folder = RemotePath::new("/data/source/");
        assert_eq!(folder.join("/sub/file.nxs").as_str(), "/data/source/sub/file.nxs");
        assert_eq!(RemotePath::new("").join("a.txt").as_str(), "a.txt");
    }

    #[test]
    fn remote_path_components() {
        let path = RemotePath::new("/data/run/events.h5");
        assert_eq!(path.file_name(), "events.h5");
        assert_eq!(path.suffix(), Some(".h5"));
        assert_eq!(path.parent(), Some(RemotePath::new("/data/run")));
        assert_eq!(RemotePath::new(".hidden").suffix(), None);
        assert_eq!(RemotePath::new("plain").parent(), None);
    }

    #[test]
    fn parse_algorithm_case_insensitive() {
        let algorithm: ChecksumAlgorithm = "SHA256".parse().unwrap();
        assert_eq!(algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(
            "md5".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Md5
        );
        assert_matches!(
            "crc32".parse::<ChecksumAlgorithm>(),
            Err(FerryError::UnsupportedAlgorithm(_))
        );
    }
}
