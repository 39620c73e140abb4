//! Natural ("human") ordering of file names.
//!
//! `page2.png` sorts before `page10.png`. Digit runs compare by numeric value;
//! everything else compares case-insensitively. Ties fall back to the plain
//! ordinal comparison so the order is total.

use std::cmp::Ordering;

/// A maximal run of digits or non-digits.
#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != digit => {
                out.push(make_chunk(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(digit);
    }
    if let Some(digit) = in_digits {
        out.push(make_chunk(&s[start..], digit));
    }
    out
}

fn make_chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Digits(s)
    } else {
        Chunk::Text(s)
    }
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        // Equal values: less padding first.
        .then_with(|| a.len().cmp(&b.len()))
}

fn compare_text(a: &str, b: &str) -> Ordering {
    let a = a.chars().flat_map(char::to_lowercase);
    let b = b.chars().flat_map(char::to_lowercase);
    a.cmp(b)
}

/// Compares two strings in natural order.
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Chunk::Digits(x), Chunk::Digits(y)) => compare_digits(x, y),
            (Chunk::Text(x), Chunk::Text(y))
            | (Chunk::Digits(x), Chunk::Text(y))
            | (Chunk::Text(x), Chunk::Digits(y)) => compare_text(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut names: Vec<&str>) -> Vec<&str> {
        names.sort_by(|a, b| compare_natural(a, b));
        names
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert_eq!(
            sorted(vec!["page10.png", "page2.png", "page1.png"]),
            vec!["page1.png", "page2.png", "page10.png"]
        );
    }

    #[test]
    fn test_case_insensitive_text() {
        assert_eq!(compare_natural("Chapter2", "chapter10"), Ordering::Less);
        assert_eq!(compare_natural("b.png", "A.png"), Ordering::Greater);
    }

    #[test]
    fn test_zero_padding_ties() {
        assert_eq!(compare_natural("01.png", "1.png"), Ordering::Greater);
        assert_eq!(compare_natural("007.png", "7.png"), Ordering::Greater);
        assert_eq!(compare_natural("010.png", "9.png"), Ordering::Greater);
    }

    #[test]
    fn test_total_order_fallback() {
        assert_eq!(compare_natural("a.png", "A.png"), "a.png".cmp("A.png"));
        assert_eq!(compare_natural("same", "same"), Ordering::Equal);
        assert_eq!(compare_natural("ch1", "ch1b"), Ordering::Less);
    }

    #[test]
    fn test_nested_paths() {
        assert_eq!(
            sorted(vec!["vol2/01.png", "vol10/01.png", "vol2/10.png", "vol2/9.png"]),
            vec!["vol2/01.png", "vol2/9.png", "vol2/10.png", "vol10/01.png"]
        );
    }
}
