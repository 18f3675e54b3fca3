use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[\W_]+").unwrap();
    static ref LEADING_INT: Regex = Regex::new(r"^[+-]?\d+").unwrap();
    static ref BACKGROUND_IMAGE: Regex =
        Regex::new(r#"(?i)background-image:\s*url\(["']?(.+?)["']?\)"#).unwrap();
}

pub fn parse_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    s.trim().parse::<u64>()
}

/// Leading-integer parse of scraped text: `"12 eps"` is 12, anything unparsable is 0.
pub fn parse_int_safe(s: &str) -> u32 {
    LEADING_INT
        .find(s.trim())
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(|n| n.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0)
}

/// Collapses whitespace runs and trims.
pub fn normalize_text(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Search keyword the way the site's own search box submits it.
pub fn keyword_query(query: &str) -> String {
    NON_WORD.replace_all(query, "+").to_string()
}

/// Url inside an inline `background-image: url(...)` style.
pub fn background_image(style: &str) -> Option<String> {
    BACKGROUND_IMAGE
        .captures(style)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn clamp_page(page: u32) -> u32 {
    page.max(1)
}
