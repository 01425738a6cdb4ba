//! UTF-16 string conversion for the ProjFS boundary.

use smallvec::SmallVec;
use windows::core::PCWSTR;

use crate::error::DriveError;

/// Stack-allocated NUL-terminated wide string for short-lived API calls.
pub type WideBuf = SmallVec<[u16; 260]>;

/// Read a NUL-terminated wide string handed to a callback.
///
/// Unpaired surrogates are rejected rather than replaced so a lookup never
/// resolves to a different file.
///
/// # Arguments
/// * `s` - Wide string pointer, may be null
///
/// # Returns
/// Decoded string, empty for a null pointer.
pub fn pcwstr_to_string(s: PCWSTR) -> Result<String, DriveError> {
    if s.is_null() {
        return Ok(String::new());
    }

    // SAFETY: ProjFS passes valid NUL-terminated strings that outlive the callback.
    let wide: &[u16] = unsafe { s.as_wide() };
    String::from_utf16(wide).map_err(|e| DriveError::PathConversion(e.to_string()))
}

/// Optional variant used for filter patterns, where null means "no filter".
pub fn pcwstr_to_option(s: PCWSTR) -> Result<Option<String>, DriveError> {
    if s.is_null() {
        return Ok(None);
    }
    pcwstr_to_string(s).map(Some)
}

/// Encode a string as a NUL-terminated wide string.
pub fn string_to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Encode a string into a [`WideBuf`]; names up to 259 code units stay on
/// the stack.
pub fn to_wide_buf(s: &str) -> WideBuf {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_wide() {
        assert_eq!(string_to_wide("Hi"), vec![0x0048, 0x0069, 0x0000]);
        assert_eq!(string_to_wide(""), vec![0x0000]);
    }

    #[test]
    fn test_wide_buf_inline() {
        let buf: WideBuf = to_wide_buf("notes.txt");
        assert!(!buf.spilled());
        assert_eq!(&buf[..], &string_to_wide("notes.txt")[..]);
        assert!(to_wide_buf(&"x".repeat(300)).spilled());
    }

    #[test]
    fn test_pcwstr_roundtrip_unicode() {
        let wide: Vec<u16> = string_to_wide("dir\\файл 世界.txt");
        let back: String = pcwstr_to_string(PCWSTR(wide.as_ptr())).unwrap();
        assert_eq!(back, "dir\\файл 世界.txt");
    }

    #[test]
    fn test_null_pointer() {
        assert_eq!(pcwstr_to_string(PCWSTR::null()).unwrap(), "");
        assert_eq!(pcwstr_to_option(PCWSTR::null()).unwrap(), None);
    }

    #[test]
    fn test_unpaired_surrogate_rejected() {
        let wide: Vec<u16> = vec![0xD800, 0x0041, 0x0000];
        assert!(pcwstr_to_string(PCWSTR(wide.as_ptr())).is_err());
    }
}
