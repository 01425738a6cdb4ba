//! File name collation and wildcard matching.
//!
//! Both directory ordering and enumeration filters go through a
//! [`CaseSensitivity`] policy so a snapshot's sort order and the names its
//! cursors yield always agree.
//!
//! Case folding is per character, like the NTFS upcase table: a character
//! whose upper case is more than one character (`ß`) is left as is. On
//! Windows the case-insensitive policy defers to `PrjFileNameCompare` and
//! `PrjFileNameMatch` so provider listings collate the way ProjFS merges
//! them with on-disk entries.

use std::cmp::Ordering;

#[cfg(target_os = "windows")]
use windows::Win32::Storage::ProjectedFileSystem::{PrjFileNameCompare, PrjFileNameMatch};

/// Case policy for comparing and matching file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaseSensitivity {
    /// Ordinal comparison after upper-case folding (NTFS semantics).
    #[default]
    Insensitive,
    /// Plain ordinal comparison.
    Sensitive,
}

impl CaseSensitivity {
    /// Compare two file names under this policy.
    ///
    /// # Arguments
    /// * `a` - First file name
    /// * `b` - Second file name
    ///
    /// # Returns
    /// Ordering result. Names differing only by case are `Equal` when
    /// case-insensitive.
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            CaseSensitivity::Sensitive => a.cmp(b),
            #[cfg(target_os = "windows")]
            CaseSensitivity::Insensitive => prj_file_name_compare(a, b),
            #[cfg(not(target_os = "windows"))]
            CaseSensitivity::Insensitive => folded_compare(a, b),
        }
    }

    /// Total order used to sort directory entries.
    ///
    /// Falls back to ordinal order for names the policy considers equal, so
    /// the resulting order is strict and deterministic.
    pub fn sort_order(self, a: &str, b: &str) -> Ordering {
        self.compare(a, b).then_with(|| a.cmp(b))
    }

    /// Fold a path into the form used as a lookup key.
    pub fn fold(self, s: &str) -> String {
        match self {
            CaseSensitivity::Sensitive => s.to_string(),
            CaseSensitivity::Insensitive => s.chars().map(upcase).collect(),
        }
    }

    fn chars_eq(self, a: char, b: char) -> bool {
        match self {
            CaseSensitivity::Sensitive => a == b,
            CaseSensitivity::Insensitive => a == b || upcase(a) == upcase(b),
        }
    }

    /// Match a file name against a wildcard pattern.
    ///
    /// An empty pattern or `*` matches everything. Otherwise `*` matches any
    /// run of characters and `?` exactly one. The DOS wildcards forwarded by
    /// `FindFirstFile` are honoured too: `<` like `*`, `>` like `?` but may
    /// match nothing before a `.` or the end of the name, `"` matches a `.` or
    /// the end of the name.
    ///
    /// # Arguments
    /// * `name` - File name to check
    /// * `pattern` - Wildcard pattern
    ///
    /// # Returns
    /// True if the whole name matches the pattern.
    pub fn matches(self, name: &str, pattern: &str) -> bool {
        if pattern.is_empty() || pattern == "*" {
            return true;
        }

        match self {
            #[cfg(target_os = "windows")]
            CaseSensitivity::Insensitive => prj_file_name_match(name, pattern),
            _ => self.wildcard_match(name, pattern),
        }
    }

    fn wildcard_match(self, name: &str, pattern: &str) -> bool {
        let pat: Vec<char> = pattern.chars().collect();
        let name: Vec<char> = name.chars().collect();
        let len: usize = name.len();

        // next[j]: pattern suffix after the current token matches name[j..]
        let mut next: Vec<bool> = vec![false; len + 1];
        next[len] = true;

        for &token in pat.iter().rev() {
            let mut cur: Vec<bool> = vec![false; len + 1];
            for j in (0..=len).rev() {
                let at_end: bool = j == len;
                cur[j] = match token {
                    '*' | '<' => next[j] || (!at_end && cur[j + 1]),
                    '?' => !at_end && next[j + 1],
                    '>' => {
                        (!at_end && name[j] != '.' && next[j + 1])
                            || ((at_end || name[j] == '.') && next[j])
                    }
                    '"' => (!at_end && name[j] == '.' && next[j + 1]) || (at_end && next[j]),
                    c => !at_end && self.chars_eq(c, name[j]) && next[j + 1],
                };
            }
            next = cur;
        }

        next[0]
    }
}

/// Simple upper-case mapping of one character.
///
/// Characters without a single-character upper case are kept.
fn upcase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

#[cfg_attr(target_os = "windows", allow(dead_code))]
fn folded_compare(a: &str, b: &str) -> Ordering {
    a.chars().map(upcase).cmp(b.chars().map(upcase))
}

#[cfg(target_os = "windows")]
fn prj_file_name_compare(a: &str, b: &str) -> Ordering {
    use crate::util::wstr::to_wide_buf;
    use windows::core::PCWSTR;

    let a_wide = to_wide_buf(a);
    let b_wide = to_wide_buf(b);

    // SAFETY: both buffers are NUL-terminated and outlive the call.
    let result: i32 =
        unsafe { PrjFileNameCompare(PCWSTR(a_wide.as_ptr()), PCWSTR(b_wide.as_ptr())) };
    result.cmp(&0)
}

#[cfg(target_os = "windows")]
fn prj_file_name_match(name: &str, pattern: &str) -> bool {
    use crate::util::wstr::to_wide_buf;
    use windows::core::PCWSTR;

    let name_wide = to_wide_buf(name);
    let pattern_wide = to_wide_buf(pattern);

    // SAFETY: both buffers are NUL-terminated and outlive the call.
    unsafe { PrjFileNameMatch(PCWSTR(name_wide.as_ptr()), PCWSTR(pattern_wide.as_ptr())) }
        .as_bool()
}
