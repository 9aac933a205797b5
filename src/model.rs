//! Records exchanged with the catalog.
//!
//! Every record comes in two shapes. The `Upload*` types carry only the fields
//! a client may set. The `Download*` types are what the catalog hands back:
//! the same settable fields plus an identifier and [`ServerFields`], which
//! only the catalog assigns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChecksumAlgorithm, DatasetType, Pid, RemotePath};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFileRecord {
    pub path: RemotePath,
    pub size: u64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub chk: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub gid: Option<String>,
    #[serde(default)]
    pub perm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFields {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDataset {
    #[serde(rename = "type")]
    pub dataset_type: DatasetType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner: String,
    pub owner_group: String,
    #[serde(default)]
    pub access_groups: Vec<String>,
    pub contact_email: String,
    pub creation_time: DateTime<Utc>,
    pub source_folder: RemotePath,
    #[serde(default)]
    pub principal_investigator: Option<String>,
    #[serde(default)]
    pub number_of_files: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub scientific_metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDataset {
    pub pid: Pid,
    #[serde(flatten)]
    pub fields: UploadDataset,
    #[serde(flatten)]
    pub server: ServerFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDatablock {
    pub dataset_id: Pid,
    #[serde(default)]
    pub chk_alg: Option<ChecksumAlgorithm>,
    pub size: u64,
    pub data_file_list: Vec<DataFileRecord>,
    pub owner_group: String,
    #[serde(default)]
    pub access_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDatablock {
    pub id: String,
    #[serde(flatten)]
    pub fields: UploadDatablock,
    #[serde(flatten)]
    pub server: ServerFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAttachment {
    pub dataset_id: Pid,
    pub caption: String,
    /// Encoded as a data URL.
    pub thumbnail: String,
    pub owner_group: String,
    #[serde(default)]
    pub access_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAttachment {
    pub id: String,
    #[serde(flatten)]
    pub fields: UploadAttachment,
    #[serde(flatten)]
    pub server: ServerFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_dataset_flattens_fields() {
        let json = serde_json::json!({
            "pid": "prefix/123",
            "type": "raw",
            "name": "powder",
            "description": null,
            "owner": "Ponder Stibbons",
            "ownerGroup": "uu",
            "contactEmail": "p.stibbons@uu.am",
            "creationTime": "2024-01-02T03:04:05Z",
            "sourceFolder": "/hex/data",
            "createdBy": "ingestor"
        });
        let dataset: DownloadDataset = serde_json::from_value(json).unwrap();
        assert_eq!(dataset.pid.to_string(), "prefix/123");
        assert_eq!(dataset.fields.dataset_type, DatasetType::Raw);
        assert_eq!(dataset.fields.source_folder.as_str(), "/hex/data");
        assert_eq!(dataset.server.created_by.as_deref(), Some("ingestor"));
        assert!(dataset.fields.access_groups.is_empty());
    }

    #[test]
    fn download_datablock_with_md5() {
        let json = serde_json::json!({
            "id": "block-1",
            "datasetId": "prefix/123",
            "chkAlg": "md5",
            "size": 3,
            "dataFileList": [{
                "path": "a.dat",
                "size": 3,
                "time": "2024-01-02T03:04:05Z",
                "chk": "900150983cd24fb0d6963f7d28e17f72"
            }],
            "ownerGroup": "uu"
        });
        let block: DownloadDatablock = serde_json::from_value(json).unwrap();
        assert_eq!(block.fields.chk_alg, Some(ChecksumAlgorithm::Md5));
        assert_eq!(block.fields.data_file_list[0].path.as_str(), "a.dat");
    }
}
