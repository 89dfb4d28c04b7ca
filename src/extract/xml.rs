//! XML text collection for `efetch` documents.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::ExtractionError;

/// Collects the inner text of every `tag` element in document order.
///
/// Nested markup contributes its text. Pieces are joined by single spaces
/// and surrounding whitespace is dropped. No matching element yields an
/// empty string.
///
/// # Errors
///
/// Returns [`ExtractionError::Xml`] for malformed documents.
pub fn collect_element_text(body: &str, tag: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(body);
    let target = tag.as_bytes();

    let mut pieces: Vec<String> = Vec::new();
    // Open elements at or below the current match; zero when outside one.
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if depth > 0 {
                    depth += 1;
                } else if start.local_name().as_ref() == target {
                    depth = 1;
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Text(text)) if depth > 0 => {
                let decoded = text
                    .unescape()
                    .map(std::borrow::Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                pieces.push(decoded);
            }
            Ok(Event::CData(data)) if depth > 0 => {
                pieces.push(String::from_utf8_lossy(&data.into_inner()).into_owned());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractionError::Xml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if depth > 0 {
        return Err(ExtractionError::Xml(format!(
            "document ended inside <{tag}>"
        )));
    }

    Ok(pieces
        .iter()
        .flat_map(|piece| piece.split_whitespace())
        .collect::<Vec<_>>()
        .join(" "))
}
