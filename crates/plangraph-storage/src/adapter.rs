//! The storage seam every repository writes through.

use async_trait::async_trait;

use crate::{JsonObject, Result};

/// Whole-collection persistence.
///
/// A collection is an ordered list of JSON objects stored under a name.
/// Implementations must treat a missing collection as empty and must make
/// `save_collection` all-or-nothing: readers see either the previous contents
/// or the new contents, never a mix.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read every object of `name`, in stored order.
    async fn load_collection(&self, name: &str) -> Result<Vec<JsonObject>>;

    /// Replace the contents of `name` with `records`.
    async fn save_collection(&self, name: &str, records: &[JsonObject]) -> Result<()>;

    /// Whether `name` has ever been saved.
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Names of the stored collections, sorted.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Remove `name`. Removing a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;
}

/// Reject names that could escape the storage root or clash with temp files.
///
/// Allowed: ASCII letters, digits, `_`, `-`, and `.` anywhere but the ends.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(crate::StorageError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        for ok in ["tasks", "action_items", "task-v2", "vectors.task"] {
            assert!(validate_collection_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", ".hidden", "a/b", "../up", "trail.", "a..b", "sp ace", "ü"] {
            assert!(validate_collection_name(bad).is_err(), "{bad}");
        }
    }
}
