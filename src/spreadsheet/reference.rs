//! A1-style cell references.

use regex::Regex;
use std::sync::OnceLock;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("Hardcode regex pattern"))
}

/// Converts a zero-based (row, col) pair to a reference such as `B3`.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    let mut letters = Vec::new();
    let mut col = col + 1;
    while col > 0 {
        let remainder = (col - 1) % 26;
        letters.push((b'A' + remainder as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect::<String>() + &(row + 1).to_string()
}

/// Parses a reference such as `B3` (or `$B$3`) into a zero-based (row, col) pair.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let captures = reference_pattern().captures(reference)?;
    let col = col_to_index(captures.get(1)?.as_str())?;
    let row = row_to_index(captures.get(2)?.as_str())?;
    Some((row, col))
}

/// `A` is 0, `Z` is 25, `AA` is 26.
pub(crate) fn col_to_index(col: &str) -> Option<usize> {
    if col.is_empty() {
        return None;
    }
    col.bytes().try_fold(0usize, |index, byte| {
        if byte.is_ascii_alphabetic() {
            let digit = (byte.to_ascii_uppercase() - b'A') as usize + 1;
            index.checked_mul(26)?.checked_add(digit)
        } else {
            None
        }
    }).map(|index| index - 1)
}

/// Row numbers are one-based in references; `0` is not a valid row.
pub(crate) fn row_to_index(row: &str) -> Option<usize> {
    row.parse::<usize>().ok()?.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_references() {
        assert_eq!(index_to_reference(0, 0), "A1");
        assert_eq!(index_to_reference(2, 1), "B3");
        assert_eq!(index_to_reference(9, 25), "Z10");
        assert_eq!(index_to_reference(0, 26), "AA1");
        assert_eq!(index_to_reference(0, 701), "ZZ1");
        assert_eq!(index_to_reference(0, 702), "AAA1");
    }

    #[test]
    fn parses_references() {
        assert_eq!(reference_to_index("A1"), Some((0, 0)));
        assert_eq!(reference_to_index("B3"), Some((2, 1)));
        assert_eq!(reference_to_index("$AA$12"), Some((11, 26)));
        assert_eq!(reference_to_index("xfd1048576"), Some((1048575, 16383)));
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(reference_to_index("A0"), None);
        assert_eq!(reference_to_index("1A"), None);
        assert_eq!(reference_to_index("A"), None);
        assert_eq!(reference_to_index(""), None);
        assert_eq!(col_to_index("A1"), None);
    }
}
