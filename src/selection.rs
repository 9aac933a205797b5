use std::fmt;

use regex::Regex;

use crate::file::FileDescriptor;

/// Which files of a dataset to download.
pub enum FileSelector {
    All,
    None,
    /// Exact match on the remote path.
    Exact(String),
    /// Membership of the remote path in a list.
    AnyOf(Vec<String>),
    /// Regex search anywhere in the remote path.
    Pattern(Regex),
    Predicate(Box<dyn Fn(&FileDescriptor) -> bool>),
}

impl FileSelector {
    pub fn predicate(f: impl Fn(&FileDescriptor) -> bool + 'static) -> Self {
        FileSelector::Predicate(Box::new(f))
    }

    pub fn matches(&self, file: &FileDescriptor) -> bool {
        let path = file.remote_path().as_str();
        match self {
            FileSelector::All => true,
            FileSelector::None => false,
            FileSelector::Exact(expected) => path == expected,
            FileSelector::AnyOf(paths) => paths.iter().any(|candidate| candidate == path),
            FileSelector::Pattern(pattern) => pattern.is_match(path),
            FileSelector::Predicate(f) => f(file),
        }
    }
}

impl Default for FileSelector {
    fn default() -> Self {
        FileSelector::All
    }
}

impl fmt::Debug for FileSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSelector::All => write!(f, "All"),
            FileSelector::None => write!(f, "None"),
            FileSelector::Exact(path) => f.debug_tuple("Exact").field(path).finish(),
            FileSelector::AnyOf(paths) => f.debug_tuple("AnyOf").field(paths).finish(),
            FileSelector::Pattern(pattern) => {
                f.debug_tuple("Pattern").field(&pattern.as_str()).finish()
            }
            FileSelector::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl From<bool> for FileSelector {
    fn from(value: bool) -> Self {
        if value {
            FileSelector::All
        } else {
            FileSelector::None
        }
    }
}

impl From<&str> for FileSelector {
    fn from(value: &str) -> Self {
        FileSelector::Exact(value.to_string())
    }
}

impl From<String> for FileSelector {
    fn from(value: String) -> Self {
        FileSelector::Exact(value)
    }
}

impl From<Vec<String>> for FileSelector {
    fn from(value: Vec<String>) -> Self {
        FileSelector::AnyOf(value)
    }
}

impl From<&[&str]> for FileSelector {
    fn from(value: &[&str]) -> Self {
        FileSelector::AnyOf(value.iter().map(|path| path.to_string()).collect())
    }
}

impl From<Regex> for FileSelector {
    fn from(value: Regex) -> Self {
        FileSelector::Pattern(value)
    }
}
