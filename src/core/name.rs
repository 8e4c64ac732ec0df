//! Game name sequencing for "next game" requests.
//!
//! `next("Baal-007")` is `"Baal-008"`. The numeric suffix is zero-filled to
//! its original width, so a suffix that overflows its width simply grows:
//! `"Baal-099"` becomes `"Baal-100"` and `"Run-999"` becomes `"Run-1000"`.
//! Names without a numeric suffix get `"-1"` appended.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TRAILING_DIGITS: Regex = Regex::new(r"[0-9]+$").unwrap();
}

/// Derive the next game name from the current one.
pub fn next(name: &str) -> String {
    let Some(suffix) = TRAILING_DIGITS.find(name) else {
        return format!("{}-1", name);
    };

    let mut result = String::with_capacity(name.len() + 1);
    result.push_str(&name[..suffix.start()]);
    result.push_str(&increment_digits(suffix.as_str()));
    result
}

/// Textual `+1` on an ASCII digit string, keeping leading zeros.
/// Works on digit strings of any length.
fn increment_digits(digits: &str) -> String {
    let mut bytes = digits.as_bytes().to_vec();
    for byte in bytes.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            return String::from_utf8(bytes).unwrap_or_default();
        }
    }
    // Every digit carried.
    let mut grown = String::with_capacity(bytes.len() + 1);
    grown.push('1');
    grown.push_str(std::str::from_utf8(&bytes).unwrap_or_default());
    grown
}
