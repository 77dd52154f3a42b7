use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapses all whitespace runs to single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Strips HTML markup from a free-text field, keeping the text content.
/// Publisher pages routinely leak tags like `<i>` or `<sub>` into titles
/// and abstracts.
pub fn strip_html(text: &str) -> String {
    if !text.contains('<') && !text.contains('&') {
        return collapse_whitespace(text);
    }
    let fragment = Html::parse_fragment(text);
    let stripped: String = fragment.root_element().text().collect::<Vec<_>>().join("");
    collapse_whitespace(&stripped)
}

/// Converts an uppercase Roman numeral to its decimal value. Returns `None`
/// for anything that is not a well-formed numeral.
pub fn roman_to_decimal(numeral: &str) -> Option<u32> {
    if numeral.is_empty() {
        return None;
    }
    let value_of = |c: char| match c {
        'I' => Some(1),
        'V' => Some(5),
        'X' => Some(10),
        'L' => Some(50),
        'C' => Some(100),
        'D' => Some(500),
        'M' => Some(1000),
        _ => None,
    };

    let values: Option<Vec<u32>> = numeral.chars().map(value_of).collect();
    let values = values?;
    let mut total: i64 = 0;
    for (i, &value) in values.iter().enumerate() {
        if values[i + 1..].iter().any(|&next| next > value) {
            total -= value as i64;
        } else {
            total += value as i64;
        }
    }
    if total > 0 {
        Some(total as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        assert_eq!(
            strip_html("The <i>Letters</i> of  Paul"),
            "The Letters of Paul"
        );
        assert_eq!(strip_html("plain title"), "plain title");
        assert_eq!(strip_html("a &amp; b"), "a & b");
    }

    #[test]
    fn converts_roman_numerals() {
        assert_eq!(roman_to_decimal("IV"), Some(4));
        assert_eq!(roman_to_decimal("XII"), Some(12));
        assert_eq!(roman_to_decimal("XLIX"), Some(49));
        assert_eq!(roman_to_decimal("MCMXCIX"), Some(1999));
        assert_eq!(roman_to_decimal("IIII"), Some(4)); // lenient form
        assert_eq!(roman_to_decimal("12"), None);
        assert_eq!(roman_to_decimal(""), None);
    }
}
