use std::io::Read;

use scraper::{Html, Node};

use crate::error::{IndexError, Result};

/// Parses `reader` as HTML and returns the text of every `<title>` element,
/// concatenated in document order. Missing titles yield an empty string.
///
/// Parsing is browser-grade and never fails on bad markup; invalid UTF-8 is
/// replaced. Only a failing read of the body is reported.
pub fn extract_title<R: Read>(mut reader: R) -> Result<String> {
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .map_err(|err| IndexError::HtmlParseError(format!("read html body: {err}")))?;
    let document = Html::parse_document(&String::from_utf8_lossy(&raw));
    Ok(title_text(&document))
}

/// Walks the tree depth-first with an explicit stack so adversarially deep
/// markup cannot exhaust the call stack. Every `<title>` contributes all of
/// its descendant text, so a title nested in another is counted by both.
pub fn title_text(document: &Html) -> String {
    let mut text = String::new();
    let mut stack = vec![document.tree.root()];
    while let Some(node) = stack.pop() {
        if is_title(node.value()) {
            for descendant in node.descendants() {
                if let Node::Text(t) = descendant.value() {
                    text.push_str(t);
                }
            }
        }
        // reversed so siblings pop in document order
        stack.extend(node.children().rev());
    }
    text
}

fn is_title(node: &Node) -> bool {
    matches!(node, Node::Element(element) if element.name().eq_ignore_ascii_case("title"))
}
