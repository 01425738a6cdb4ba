//! Immutable sorted directory listings.

use crate::projection::types::PlaceholderInfo;
use crate::util::CaseSensitivity;

/// Entries of one directory, sorted once at construction.
///
/// Shared read-only between the folder cache and every cursor enumerating it.
#[derive(Clone, Debug)]
pub struct DirectorySnapshot {
    /// Entries sorted by name under `case`.
    entries: Vec<PlaceholderInfo>,
    case: CaseSensitivity,
}

impl DirectorySnapshot {
    /// Build a snapshot from an unordered listing.
    ///
    /// # Arguments
    /// * `entries` - Listing as returned by a content source
    /// * `case` - Name comparison policy for ordering and filtering
    pub fn new(mut entries: Vec<PlaceholderInfo>, case: CaseSensitivity) -> Self {
        entries.sort_by(|a, b| case.sort_order(&a.name, &b.name));
        Self { entries, case }
    }

    /// Get entries as slice.
    pub fn entries(&self) -> &[PlaceholderInfo] {
        &self.entries
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&PlaceholderInfo> {
        self.entries.get(index)
    }

    /// Find an entry by exact name.
    ///
    /// Uses plain string equality regardless of the case policy.
    ///
    /// # Arguments
    /// * `name` - Leaf name to find
    pub fn find(&self, name: &str) -> Option<&PlaceholderInfo> {
        self.entries.iter().find(|e| &*e.name == name)
    }

    /// Get entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name comparison policy.
    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }
}
