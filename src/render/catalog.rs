use super::escape_html;
use crate::models::{format_iso_seconds, SnapshotEntry};

/// Shown instead of a list when the manifest has no entries.
pub const EMPTY_CATALOG_PLACEHOLDER: &str = r#"<p class="empty">No snapshots yet.</p>"#;

/// Render the catalog page for `entries`, one list item per entry in the given order.
///
/// The output depends only on `entries`.
pub fn build_catalog(entries: &[SnapshotEntry]) -> String {
    let body = if entries.is_empty() {
        EMPTY_CATALOG_PLACEHOLDER.to_string()
    } else {
        let mut list = String::from("<ul>\n");
        for entry in entries {
            list.push_str("    ");
            list.push_str(&catalog_item(entry));
            list.push('\n');
        }
        list.push_str("  </ul>");
        list
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Diagram Snapshots</title>
  <style>
    body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Helvetica, Arial, sans-serif; margin: 0; padding: 2rem; background: #f8f9fa; }}
    h1 {{ margin-top: 0; }}
    ul {{ list-style: none; padding: 0; }}
    li {{ background: #fff; border: 1px solid #dee2e6; border-radius: 6px; padding: 1rem; margin-bottom: 1rem; }}
    a {{ font-weight: 600; color: #0d6efd; text-decoration: none; }}
    small {{ color: #6c757d; }}
    .empty {{ color: #6c757d; font-style: italic; }}
  </style>
</head>
<body>
  <h1>Diagram Snapshots</h1>
  <p>Rendered snapshots of the diagram, newest first.</p>
  {body}
</body>
</html>
"#
    )
}

fn catalog_item(entry: &SnapshotEntry) -> String {
    format!(
        r#"<li><a href="{href}">{title}</a><br><small>{generated_at} · Source: {source}<br>{note}</small></li>"#,
        href = escape_html(&entry.filename),
        title = escape_html(entry.display_title()),
        generated_at = escape_html(&format_iso_seconds(&entry.generated_at)),
        source = escape_html(&entry.source_document),
        note = escape_html(&entry.note),
    )
}
