//! Per-session enumeration cursor.
//!
//! A listing session may span several page requests. The cursor keeps the
//! position and the filter captured from the first request so each page
//! resumes where the previous one stopped.

use std::sync::Arc;

use crate::projection::{DirectorySnapshot, PlaceholderInfo};

/// Cursor over one directory snapshot.
pub struct ActiveEnumeration {
    /// Snapshot being enumerated (shared with the folder cache).
    snapshot: Arc<DirectorySnapshot>,
    /// Current position in the snapshot.
    index: usize,
    /// Saved filter; `None` matches everything.
    filter: Option<String>,
    /// Whether a filter has been saved.
    filter_saved: bool,
}

impl ActiveEnumeration {
    /// Create a cursor positioned on the first entry.
    ///
    /// # Arguments
    /// * `snapshot` - Directory listing to enumerate
    pub fn new(snapshot: Arc<DirectorySnapshot>) -> Self {
        let mut enumeration = Self {
            snapshot,
            index: 0,
            filter: None,
            filter_saved: false,
        };
        enumeration.skip_filtered();
        enumeration
    }

    /// Entry under the cursor, `None` when exhausted.
    pub fn current(&self) -> Option<&PlaceholderInfo> {
        self.snapshot.get(self.index)
    }

    /// Check if current position is valid.
    pub fn is_current_valid(&self) -> bool {
        self.index < self.snapshot.len()
    }

    /// Advance to the next entry matching the filter.
    ///
    /// # Returns
    /// True if a valid position remains.
    pub fn move_next(&mut self) -> bool {
        if self.is_current_valid() {
            self.index += 1;
        }
        self.skip_filtered();
        self.is_current_valid()
    }

    /// Rewind to the first entry and replace the filter.
    ///
    /// # Arguments
    /// * `filter` - New filter, `None`/empty/`*` for match-all
    pub fn restart(&mut self, filter: Option<&str>) {
        self.index = 0;
        self.save_filter(filter);
    }

    /// Save the filter if none has been saved yet.
    ///
    /// # Arguments
    /// * `filter` - Filter from the page request
    ///
    /// # Returns
    /// True if the filter was saved, false if one was already in place.
    pub fn try_save_filter(&mut self, filter: Option<&str>) -> bool {
        if self.filter_saved {
            return false;
        }
        self.save_filter(filter);
        true
    }

    /// Saved filter, `None` when matching everything.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    fn save_filter(&mut self, filter: Option<&str>) {
        self.filter = match filter {
            None | Some("") | Some("*") => None,
            Some(pattern) => Some(pattern.to_string()),
        };
        self.filter_saved = true;
        self.skip_filtered();
    }

    fn skip_filtered(&mut self) {
        while let Some(entry) = self.current() {
            if self.matches_filter(entry) {
                break;
            }
            self.index += 1;
        }
    }

    fn matches_filter(&self, entry: &PlaceholderInfo) -> bool {
        match &self.filter {
            None => true,
            Some(pattern) => self.snapshot.case_sensitivity().matches(&entry.name, pattern),
        }
    }
}
