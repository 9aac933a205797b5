//! Move catalogued datasets between a metadata catalog and file storage.
//!
//! A [`Client`](client::Client) combines a [`Catalog`](catalog::Catalog) with
//! a [`FileTransfer`](transfer::FileTransfer). Uploads copy local files to the
//! file server before the catalog records are created, downloads fetch the
//! files of a dataset and verify their checksums.

pub mod catalog;
pub mod checksum;
pub mod client;
pub mod config;
pub mod datablock;
pub mod dataset;
pub mod domain;
pub mod download;
pub mod error;
pub mod file;
pub mod formatter;
pub mod fs_util;
pub mod model;
pub mod selection;
pub mod transfer;
pub mod upload;
