//! Streaming file checksums and the per-file checksum cache.

use std::fs::File;
use std::io::Read;
use std::time::SystemTime;

use blake2::{Blake2b512, Blake2s256};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::domain::ChecksumAlgorithm;
use crate::error::FerryError;
use crate::fs_util;

/// Matches the I/O block size coreutils uses for its checksum tools.
pub const READ_BLOCK_SIZE: usize = 128 * 1024;

enum StreamingHasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake2b(Blake2b512),
    Blake2s(Blake2s256),
    Blake3(Box<blake3::Hasher>),
}

impl StreamingHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            ChecksumAlgorithm::Blake2b => Self::Blake2b(Blake2b512::new()),
            ChecksumAlgorithm::Blake2s => Self::Blake2s(Blake2s256::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(context) => context.consume(data),
            Self::Sha256(hasher) => Digest::update(hasher, data),
            Self::Sha384(hasher) => Digest::update(hasher, data),
            Self::Sha512(hasher) => Digest::update(hasher, data),
            Self::Blake2b(hasher) => Digest::update(hasher, data),
            Self::Blake2s(hasher) => Digest::update(hasher, data),
            Self::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(context) => hex::encode(context.compute().0),
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
            Self::Sha384(hasher) => hex::encode(hasher.finalize()),
            Self::Sha512(hasher) => hex::encode(hasher.finalize()),
            Self::Blake2b(hasher) => hex::encode(hasher.finalize()),
            Self::Blake2s(hasher) => hex::encode(hasher.finalize()),
            Self::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

/// Hex digest of everything `reader` yields, read block by block.
pub fn checksum_of_reader<R: Read>(
    mut reader: R,
    algorithm: ChecksumAlgorithm,
) -> std::io::Result<String> {
    let mut hasher = StreamingHasher::new(algorithm);
    let mut buffer = vec![0u8; READ_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize_hex())
}

pub fn checksum_of_file(
    path: &Utf8Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, FerryError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| FerryError::Filesystem(format!("open {path}: {err}")))?;
    checksum_of_reader(file, algorithm)
        .map_err(|err| FerryError::Filesystem(format!("read {path}: {err}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    path: Utf8PathBuf,
    algorithm: ChecksumAlgorithm,
}

/// Checksum of one local file, remembered until the file changes.
///
/// An entry is stale when it was computed for another path or algorithm, or
/// when the file was modified after the entry was last checked.
#[derive(Debug, Clone, Default)]
pub struct ChecksumCache {
    key: Option<CacheKey>,
    value: Option<String>,
    checked_at: Option<SystemTime>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_stale(
        &self,
        path: &Utf8Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<bool, FerryError> {
        let key_matches = self
            .key
            .as_ref()
            .is_some_and(|key| key.path == path && key.algorithm == algorithm);
        let (true, Some(_), Some(checked_at)) = (key_matches, &self.value, self.checked_at) else {
            return Ok(true);
        };
        let modified = fs_util::modified_time(path)?;
        Ok(modified > checked_at)
    }

    pub fn get_or_compute(
        &mut self,
        path: &Utf8Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<String, FerryError> {
        if !self.is_stale(path, algorithm)? {
            if let Some(value) = &self.value {
                self.checked_at = Some(SystemTime::now());
                return Ok(value.clone());
            }
        }
        let checked_at = SystemTime::now();
        let value = checksum_of_file(path, algorithm)?;
        self.key = Some(CacheKey {
            path: path.to_path_buf(),
            algorithm,
        });
        self.value = Some(value.clone());
        self.checked_at = Some(checked_at);
        Ok(value)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
