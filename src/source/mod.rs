// src/source/mod.rs
pub mod fab;

use crate::error::SourceError;
use crate::listing::ListingRecord;
use once_cell::sync::OnceCell;
use regex::Regex;

/// Produces the listings currently advertised in the promotional section.
#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_current(&self) -> Result<Vec<ListingRecord>, SourceError>;
    fn name(&self) -> &'static str;
}

/// Turn a listing's HTML description into plain text: block tags become line
/// breaks, other tags are dropped, entities decoded, blank runs collapsed.
pub fn normalize_description(s: &str) -> String {
    static RE_BREAKS: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_SPACES: OnceCell<Regex> = OnceCell::new();
    static RE_BLANK_LINES: OnceCell<Regex> = OnceCell::new();

    let re_breaks = RE_BREAKS
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6])>").unwrap());
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let re_spaces = RE_SPACES.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").unwrap());
    let re_blank = RE_BLANK_LINES.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let out = re_breaks.replace_all(s, "\n");
    let out = re_tags.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).to_string();
    let out = re_spaces.replace_all(&out, " ");

    let lines: Vec<&str> = out.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    re_blank.replace_all(joined.trim(), "\n\n").to_string()
}
