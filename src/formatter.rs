//! Source folder patterns such as `/data/{owner_group}/{uid}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::domain::RemotePath;
use crate::error::FerryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFolderPattern(String);

impl SourceFolderPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute dataset fields into the pattern.
    ///
    /// `{uid}` is a fresh UUID on every call. Substituted values are escaped
    /// so they cannot introduce path separators or shell metacharacters.
    pub fn format(&self, dataset: &Dataset) -> Result<RemotePath, FerryError> {
        let mut out = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => field.push(ch),
                            None => return Err(FerryError::InvalidPattern(self.0.clone())),
                        }
                    }
                    out.push_str(&escape_path(&field_value(&field, dataset, &self.0)?));
                }
                '}' => return Err(FerryError::InvalidPattern(self.0.clone())),
                _ => out.push(ch),
            }
        }
        Ok(RemotePath::new(out))
    }
}

impl fmt::Display for SourceFolderPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceFolderPattern {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

fn field_value(field: &str, dataset: &Dataset, pattern: &str) -> Result<String, FerryError> {
    let fields = &dataset.fields;
    let value = match field.trim() {
        "uid" => uuid::Uuid::new_v4().to_string(),
        "name" => fields.name.clone().unwrap_or_default(),
        "owner" => fields.owner.clone(),
        "owner_group" => fields.owner_group.clone(),
        "type" => fields.dataset_type.to_string(),
        "pid" => dataset
            .pid()
            .map(|pid| pid.id().to_string())
            .ok_or_else(|| {
                FerryError::InvalidPattern(format!("{pattern}: dataset has no pid yet"))
            })?,
        other => {
            return Err(FerryError::InvalidPattern(format!(
                "{pattern}: unknown field '{other}'"
            )));
        }
    };
    Ok(value)
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn escape_path(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// The folder a transfer uploads to: its own pattern if it has one,
/// otherwise the dataset's source folder.
pub fn source_folder_for(
    dataset: &Dataset,
    pattern: Option<&SourceFolderPattern>,
) -> Result<RemotePath, FerryError> {
    match pattern {
        Some(pattern) => pattern.format(dataset),
        None => dataset
            .source_folder()
            .cloned()
            .ok_or(FerryError::MissingSourceFolder),
    }
}
