//! HTML output: standalone snapshot pages and the catalog index.

mod catalog;
mod snapshot;

pub use catalog::{build_catalog, EMPTY_CATALOG_PLACEHOLDER};
pub use snapshot::{HtmlRenderer, SnapshotPage, SnapshotRenderer, DEFAULT_EMBED_URL};

/// Escape text for element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Encode text as a JavaScript string literal that is safe inside `<script>`.
///
/// The literal evaluates to exactly `text`.
pub fn script_literal(text: &str) -> String {
    serde_json::Value::String(text.to_owned())
        .to_string()
        .replace("</", "<\\/")
}
