//! Well-formedness check for submitted diagram markup.
//!
//! Only structure is checked: one root element, balanced and matching tags,
//! valid names, bound namespace prefixes, attributes, characters and entity
//! references. Nothing about the diagram format
//! itself is interpreted.

use quick_xml::events::attributes::Attributes;
use quick_xml::events::Event;
use quick_xml::name::{QName, ResolveResult};
use quick_xml::NsReader;

use crate::error::{Result, SnapshotError};

/// Reject `content` unless it is a well-formed, namespace-well-formed XML document.
pub fn check_well_formed(content: &str) -> Result<()> {
    let mut reader = NsReader::from_str(content);
    reader.config_mut().check_end_names = true;

    let mut open: Vec<String> = Vec::new();
    let mut roots = 0usize;

    loop {
        let event_start = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(invalid(content, reader.error_position() as usize, e.to_string()))
            }
        };
        let position = reader.buffer_position() as usize;

        match event {
            Event::Start(ref tag) | Event::Empty(ref tag) => {
                if open.is_empty() {
                    roots += 1;
                    if roots > 1 {
                        return Err(invalid(content, position, "junk after document element"));
                    }
                }
                check_name(tag.name())
                    .and_then(|()| check_prefix(&reader, tag.name(), true))
                    .and_then(|()| check_attributes(&reader, tag.attributes()))
                    .map_err(|message| invalid(content, position, message))?;
                if let Event::Start(_) = event {
                    open.push(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
                }
            }
            Event::End(_) => {
                if open.pop().is_none() {
                    return Err(invalid(content, position, "closing tag without matching opening tag"));
                }
            }
            Event::Text(text) => {
                if open.is_empty() {
                    if !text.iter().all(u8::is_ascii_whitespace) {
                        return Err(invalid(content, position, "text outside the root element"));
                    }
                } else {
                    if text.windows(3).any(|w| w == b"]]>") {
                        return Err(invalid(content, position, "']]>' is not allowed in text"));
                    }
                    let unescaped = text
                        .unescape()
                        .map_err(|e| invalid(content, position, e.to_string()))?;
                    check_chars(&unescaped).map_err(|message| invalid(content, position, message))?;
                }
            }
            Event::CData(_) if open.is_empty() => {
                return Err(invalid(content, position, "CDATA outside the root element"));
            }
            Event::Decl(_) => {
                if !content[..event_start.min(content.len())]
                    .trim_start_matches('\u{feff}')
                    .is_empty()
                {
                    return Err(invalid(
                        content,
                        event_start,
                        "XML declaration allowed only at the start of the document",
                    ));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(name) = open.last() {
        return Err(invalid(
            content,
            content.len(),
            format!("unclosed element <{}>", name),
        ));
    }
    if roots == 0 {
        return Err(invalid(content, content.len(), "no element found"));
    }
    Ok(())
}

fn check_attributes<R>(
    reader: &NsReader<R>,
    attributes: Attributes<'_>,
) -> std::result::Result<(), String> {
    for attr in attributes {
        let attr = attr.map_err(|e| e.to_string())?;
        check_name(attr.key)?;
        check_prefix(reader, attr.key, false)?;
        if attr.value.contains(&b'<') {
            return Err(format!(
                "'<' is not allowed in the value of attribute '{}'",
                String::from_utf8_lossy(attr.key.as_ref())
            ));
        }
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        check_chars(&value)?;
    }
    Ok(())
}

/// Element and attribute names must be XML names: no leading digit, dash or dot.
fn check_name(name: QName<'_>) -> std::result::Result<(), String> {
    let raw = String::from_utf8_lossy(name.as_ref());
    let mut chars = raw.chars();
    let valid = match chars.next() {
        Some(first) => is_name_start(first) && chars.all(is_name_char),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(format!("not well-formed (invalid name '{}')", raw))
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':' || (!c.is_ascii() && !c.is_whitespace())
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-' || c == '.' || c == '\u{b7}'
}

fn check_prefix<R>(
    reader: &NsReader<R>,
    name: QName<'_>,
    element: bool,
) -> std::result::Result<(), String> {
    let (resolved, _) = if element {
        reader.resolve_element(name)
    } else {
        reader.resolve_attribute(name)
    };
    match resolved {
        ResolveResult::Unknown(prefix) => Err(format!(
            "unbound prefix '{}'",
            String::from_utf8_lossy(&prefix)
        )),
        _ => Ok(()),
    }
}

/// Only tab, newline and carriage return are allowed among the C0 controls.
fn check_chars(text: &str) -> std::result::Result<(), String> {
    match text
        .chars()
        .find(|&c| (c < ' ' && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{fffe}' || c == '\u{ffff}')
    {
        Some(c) => Err(format!("not well-formed (invalid character U+{:04X})", c as u32)),
        None => Ok(()),
    }
}

fn invalid(content: &str, offset: usize, message: impl Into<String>) -> SnapshotError {
    let (line, column) = line_and_column(content, offset);
    SnapshotError::InvalidDocument {
        message: message.into(),
        line,
        column,
    }
}

/// 1-based line and column for a byte offset.
fn line_and_column(content: &str, offset: usize) -> (usize, usize) {
    let bytes = &content.as_bytes()[..offset.min(content.len())];
    let line = bytes.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    (line, bytes.len() - line_start + 1)
}
