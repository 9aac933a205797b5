use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::domain::ChecksumAlgorithm;
use crate::error::FerryError;
use crate::formatter::SourceFolderPattern;
use crate::transfer::{
    CopyFileTransfer, FileTransfer, LinkFileTransfer, SelectFileTransfer, SshFileTransfer,
};

pub const CONFIG_FILE_NAME: &str = "ferry.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub checksum_algorithm: Option<String>,
    #[serde(default)]
    pub source_folder: Option<String>,
    #[serde(default)]
    pub transfers: Vec<TransferEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TransferEntry {
    Shorthand(String),
    Detailed(TransferEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransferEntryObject {
    Copy {
        #[serde(default)]
        hard_link: bool,
        #[serde(default)]
        source_folder: Option<String>,
    },
    Link {
        #[serde(default)]
        source_folder: Option<String>,
    },
    Ssh {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        verify_checksums: Option<bool>,
        #[serde(default)]
        source_folder: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    Copy {
        hard_link: bool,
        source_folder: Option<SourceFolderPattern>,
    },
    Link {
        source_folder: Option<SourceFolderPattern>,
    },
    Ssh {
        host: String,
        port: Option<u16>,
        user: Option<String>,
        verify_checksums: bool,
        source_folder: Option<SourceFolderPattern>,
    },
}

impl TransferRequest {
    fn build(&self) -> Box<dyn FileTransfer> {
        match self {
            TransferRequest::Copy {
                hard_link,
                source_folder,
            } => {
                let mut transfer = CopyFileTransfer::new().with_hard_link(*hard_link);
                if let Some(pattern) = source_folder {
                    transfer = transfer.with_source_folder(pattern.clone());
                }
                Box::new(transfer)
            }
            TransferRequest::Link { source_folder } => {
                let mut transfer = LinkFileTransfer::new();
                if let Some(pattern) = source_folder {
                    transfer = transfer.with_source_folder(pattern.clone());
                }
                Box::new(transfer)
            }
            TransferRequest::Ssh {
                host,
                port,
                user,
                verify_checksums,
                source_folder,
            } => {
                let mut transfer =
                    SshFileTransfer::new(host).with_checksum_verification(*verify_checksums);
                if let Some(port) = port {
                    transfer = transfer.with_port(*port);
                }
                if let Some(user) = user {
                    transfer = transfer.with_user(user);
                }
                if let Some(pattern) = source_folder {
                    transfer = transfer.with_source_folder(pattern.clone());
                }
                Box::new(transfer)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub source_folder: Option<SourceFolderPattern>,
    pub transfers: Vec<TransferRequest>,
}

impl ResolvedConfig {
    /// Give `dataset` the configured checksum algorithm unless it already
    /// has one.
    pub fn configure_dataset(&self, dataset: Dataset) -> Dataset {
        match dataset.checksum_algorithm() {
            Some(_) => dataset,
            None => dataset.with_checksum_algorithm(Some(self.checksum_algorithm)),
        }
    }

    /// One transfer is used directly, several are tried in order.
    pub fn build_transfer(&self) -> Result<Box<dyn FileTransfer>, FerryError> {
        match self.transfers.as_slice() {
            [] => Err(FerryError::InvalidTransfer(
                "no transfers configured".to_string(),
            )),
            [single] if self.source_folder.is_none() => Ok(single.build()),
            requests => {
                let children = requests.iter().map(TransferRequest::build).collect();
                let mut select = SelectFileTransfer::new(children)?;
                if let Some(pattern) = &self.source_folder {
                    select = select.with_source_folder(pattern.clone());
                }
                Ok(Box::new(select))
            }
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `ferry.json` from the current directory and then from
    /// the user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FerryError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(FerryError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FerryError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FerryError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("dataset-ferry").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FerryError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let checksum_algorithm = match config.checksum_algorithm {
            Some(name) => name.parse()?,
            None => ChecksumAlgorithm::DEFAULT,
        };

        let transfers = config
            .transfers
            .into_iter()
            .map(|entry| match entry {
                TransferEntry::Shorthand(kind) => match kind.as_str() {
                    "copy" => Ok(TransferRequest::Copy {
                        hard_link: false,
                        source_folder: None,
                    }),
                    "link" => Ok(TransferRequest::Link {
                        source_folder: None,
                    }),
                    "ssh" => Err(FerryError::InvalidTransfer(
                        "ssh transfer needs a host, use {\"kind\": \"ssh\", \"host\": ...}"
                            .to_string(),
                    )),
                    other => Err(FerryError::InvalidTransfer(format!(
                        "unknown transfer kind: {other}"
                    ))),
                },
                TransferEntry::Detailed(obj) => Ok(match obj {
                    TransferEntryObject::Copy {
                        hard_link,
                        source_folder,
                    } => TransferRequest::Copy {
                        hard_link,
                        source_folder: source_folder.map(SourceFolderPattern::new),
                    },
                    TransferEntryObject::Link { source_folder } => TransferRequest::Link {
                        source_folder: source_folder.map(SourceFolderPattern::new),
                    },
                    TransferEntryObject::Ssh {
                        host,
                        port,
                        user,
                        verify_checksums,
                        source_folder,
                    } => TransferRequest::Ssh {
                        host,
                        port,
                        user,
                        verify_checksums: verify_checksums.unwrap_or(true),
                        source_folder: source_folder.map(SourceFolderPattern::new),
                    },
                }),
            })
            .collect::<Result<Vec<_>, FerryError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            checksum_algorithm,
            source_folder: config.source_folder.map(SourceFolderPattern::new),
            transfers,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            transfers: vec![TransferEntry::Shorthand("copy".to_string())],
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.checksum_algorithm, ChecksumAlgorithm::Blake2b);
        assert_eq!(
            resolved.transfers,
            vec![TransferRequest::Copy {
                hard_link: false,
                source_folder: None
            }]
        );
        assert!(resolved.build_transfer().is_ok());
    }

    #[test]
    fn rejects_unknown_and_empty() {
        let config = Config {
            transfers: vec![TransferEntry::Shorthand("ftp".to_string())],
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(FerryError::InvalidTransfer(_))
        );

        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_matches!(
            resolved.build_transfer().map(|_| ()),
            Err(FerryError::InvalidTransfer(_))
        );
    }
}
