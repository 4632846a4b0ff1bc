use super::{escape_html, script_literal};

/// diagrams.net editor in embed mode, speaking the JSON message protocol.
pub const DEFAULT_EMBED_URL: &str =
    "https://embed.diagrams.net/?embed=1&ui=atlas&spin=1&proto=json";

/// Everything a snapshot page is rendered from. `title` and `note` are raw user text.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPage<'a> {
    pub document: &'a str,
    pub title: &'a str,
    pub note: &'a str,
    pub embed_url: &'a str,
}

/// Turns a document and its metadata into a standalone HTML page.
///
/// Implementations must be pure, escape `title` and `note`, and hand the
/// document to the editor unchanged.
pub trait SnapshotRenderer: Send + Sync {
    fn render(&self, page: &SnapshotPage<'_>) -> String;
}

/// Page that embeds the diagram editor and loads the document once the editor
/// reports `init`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl SnapshotRenderer for HtmlRenderer {
    fn render(&self, page: &SnapshotPage<'_>) -> String {
        let title = escape_html(page.title);
        let note = escape_html(page.note);
        let document = script_literal(page.document);
        let embed_url = script_literal(page.embed_url);

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif; margin: 0; padding: 0; display: flex; flex-direction: column; height: 100vh; background: #f8f9fa; }}
        .header {{ padding: 1rem 1.5rem; border-bottom: 1px solid #dee2e6; background: #fff; }}
        h1 {{ margin: 0; font-size: 1.4rem; }}
        p {{ margin: 0.25rem 0 0; color: #6c757d; }}
        iframe {{ flex: 1; border: none; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>{title}</h1>
        <p>{note}</p>
    </div>
    <iframe id="diagram-editor" frameborder="0"></iframe>
    <script>
        const diagramXML = {document};
        const iframe = document.getElementById('diagram-editor');

        function postMessage(message) {{
            if (iframe.contentWindow) {{
                iframe.contentWindow.postMessage(JSON.stringify(message), '*');
            }}
        }}

        window.addEventListener('message', (event) => {{
            if (event.source !== iframe.contentWindow || !event.data) return;
            let msg = event.data;
            if (typeof msg === 'string') {{
                try {{ msg = JSON.parse(msg); }} catch (_) {{ return; }}
            }}
            if (typeof msg !== 'object') return;
            if (msg.event === 'configure') {{
                postMessage({{ action: 'configure', config: {{ defaultFonts: [], mathEnabled: false }} }});
            }} else if (msg.event === 'init') {{
                postMessage({{ action: 'load', xml: diagramXML }});
            }}
        }});

        iframe.src = {embed_url};
    </script>
</body>
</html>
"#
        )
    }
}
