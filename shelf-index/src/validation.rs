//! Validation of group names and entity ids
//!
//! Both end up as path segments under the data root, so the accepted charset
//! is deliberately narrow: ASCII alphanumerics plus `-`, `_` and (ids only) `.`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::errors::{IndexError, Result};

/// Maximum entity id length
pub const MAX_ID_LEN: usize = 128;

/// Maximum group name length
pub const MAX_GROUP_LEN: usize = 64;

/// Collections a library client may push by default
pub const DEFAULT_GROUPS: &[&str] = &[
    "games",
    "platforms",
    "emulators",
    "genres",
    "companies",
    "features",
    "categories",
    "tags",
    "series",
    "regions",
    "sources",
    "ageratings",
    "completionstatuses",
    "filterpresets",
];

/// Directories under the data root that are not document groups
pub const RESERVED_GROUPS: &[&str] = &["media", "snapshots"];

/// Validate an entity id
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(IndexError::InvalidId(format!(
            "length {} outside 1..={}",
            id.len(),
            MAX_ID_LEN
        )));
    }
    if id.starts_with('.') || id.contains("..") {
        return Err(IndexError::InvalidId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(IndexError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Validate the shape of a group name (charset and length only)
pub fn validate_group_name(group: &str) -> Result<()> {
    if group.is_empty() || group.len() > MAX_GROUP_LEN {
        return Err(IndexError::InvalidGroup(format!(
            "length {} outside 1..={}",
            group.len(),
            MAX_GROUP_LEN
        )));
    }
    if !group
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(IndexError::InvalidGroup(group.to_string()));
    }
    Ok(())
}

/// Validate a document group: well-formed and not one of [`RESERVED_GROUPS`]
pub fn validate_group(group: &str) -> Result<()> {
    validate_group_name(group)?;
    if RESERVED_GROUPS.contains(&group) {
        return Err(IndexError::InvalidGroup(format!("reserved group: {}", group)));
    }
    Ok(())
}

/// The set of group names a client is allowed to address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupAllowList {
    groups: BTreeSet<String>,
}

impl GroupAllowList {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Reject groups that are malformed or not allow-listed
    pub fn validate(&self, group: &str) -> Result<()> {
        validate_group(group)?;
        if !self.contains(group) {
            return Err(IndexError::InvalidGroup(format!("unknown group: {}", group)));
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }
}

impl Default for GroupAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_GROUPS.iter().copied())
    }
}
