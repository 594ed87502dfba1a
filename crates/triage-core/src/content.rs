//! Best-effort HTML and plain-text body extraction from a MIME part tree.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};

use crate::gmail::types::{Message, MessagePart};

const MIME_HTML: &str = "text/html";
const MIME_PLAIN: &str = "text/plain";

/// Standard alphabet, padding optional. Gmail's URL-safe bodies are mapped onto it first.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A MIME part reduced to what extraction needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPart {
    Leaf {
        mime_type: String,
        payload: Option<String>,
    },
    Composite {
        mime_type: String,
        children: Vec<BodyPart>,
    },
}

impl BodyPart {
    pub fn mime_type(&self) -> &str {
        match self {
            BodyPart::Leaf { mime_type, .. } | BodyPart::Composite { mime_type, .. } => mime_type,
        }
    }
}

fn part_mime_type(part: &MessagePart) -> String {
    part.mime_type.clone().unwrap_or_default()
}

impl From<&MessagePart> for BodyPart {
    /// Converts without recursion, so nesting depth is bounded only by memory.
    fn from(root: &MessagePart) -> Self {
        // Composites whose children are still being converted, innermost last.
        let mut open: Vec<(&MessagePart, Vec<BodyPart>)> = Vec::new();
        let mut current = root;

        loop {
            if let Some(first) = current.parts.first() {
                open.push((current, Vec::with_capacity(current.parts.len())));
                current = first;
                continue;
            }

            let mut done = BodyPart::Leaf {
                mime_type: part_mime_type(current),
                payload: current.body.as_ref().and_then(|b| b.data.clone()),
            };
            loop {
                let Some((parent, mut children)) = open.pop() else {
                    return done;
                };
                children.push(done);
                if let Some(next) = parent.parts.get(children.len()) {
                    open.push((parent, children));
                    current = next;
                    break;
                }
                done = BodyPart::Composite {
                    mime_type: part_mime_type(parent),
                    children,
                };
            }
        }
    }
}

impl Drop for BodyPart {
    fn drop(&mut self) {
        // Flatten the subtree so each part is dropped without children.
        let mut pending = match self {
            BodyPart::Composite { children, .. } => std::mem::take(children),
            BodyPart::Leaf { .. } => return,
        };
        while let Some(mut part) = pending.pop() {
            if let BodyPart::Composite { children, .. } = &mut part {
                pending.append(children);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub html: Option<String>,
    pub text: Option<String>,
}

impl ExtractedContent {
    /// HTML when present, otherwise plain text, otherwise empty.
    pub fn preferred_body(&self) -> &str {
        self.html
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }
}

/// Walks the tree in pre-order keeping the longest HTML body and the last plain-text body.
/// Length is measured in UTF-16 code units, which is how the web UI measures it.
pub fn extract(tree: Option<&BodyPart>) -> ExtractedContent {
    let mut content = ExtractedContent::default();
    let mut best_html_len = 0usize;

    let Some(root) = tree else {
        return content;
    };

    let mut stack = vec![root];
    while let Some(part) = stack.pop() {
        match part {
            BodyPart::Leaf { mime_type, payload } => {
                let Some(decoded) = payload.as_deref().and_then(decode_body) else {
                    continue;
                };
                if mime_type == MIME_HTML {
                    let len = decoded.encode_utf16().count();
                    if len > best_html_len {
                        best_html_len = len;
                        content.html = Some(decoded);
                    }
                } else if mime_type == MIME_PLAIN {
                    content.text = Some(decoded);
                }
            }
            BodyPart::Composite { children, .. } => {
                // Reversed so the first child is popped first.
                stack.extend(children.iter().rev());
            }
        }
    }

    content
}

pub fn extract_message(message: &Message) -> ExtractedContent {
    let tree = message.payload.as_ref().map(BodyPart::from);
    extract(tree.as_ref())
}

/// Decodes a Gmail body payload. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_body(data: &str) -> Option<String> {
    let normalized = data.replace('-', "+").replace('_', "/");
    let bytes = BODY_ENGINE.decode(normalized.as_bytes()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::types::MessagePartBody;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn leaf(mime_type: &str, text: &str) -> BodyPart {
        BodyPart::Leaf {
            mime_type: mime_type.into(),
            payload: Some(encode(text)),
        }
    }

    fn composite(children: Vec<BodyPart>) -> BodyPart {
        BodyPart::Composite {
            mime_type: "multipart/alternative".into(),
            children,
        }
    }

    #[test]
    fn keeps_longest_html() {
        let short = "a".repeat(50);
        let long = "b".repeat(120);
        let tree = composite(vec![leaf(MIME_HTML, &short), leaf(MIME_HTML, &long)]);
        assert_eq!(extract(Some(&tree)).html.as_deref(), Some(long.as_str()));

        let reversed = composite(vec![leaf(MIME_HTML, &long), leaf(MIME_HTML, &short)]);
        assert_eq!(extract(Some(&reversed)).html.as_deref(), Some(long.as_str()));
    }

    #[test]
    fn equal_length_html_keeps_first() {
        let tree = composite(vec![leaf(MIME_HTML, "first"), leaf(MIME_HTML, "later")]);
        assert_eq!(extract(Some(&tree)).html.as_deref(), Some("first"));
    }

    #[test]
    fn keeps_last_plain_text() {
        let tree = composite(vec![
            leaf(MIME_PLAIN, "first"),
            composite(vec![leaf(MIME_PLAIN, "nested")]),
            leaf(MIME_PLAIN, "last"),
        ]);
        let content = extract(Some(&tree));
        assert_eq!(content.text.as_deref(), Some("last"));
        assert_eq!(content.html, None);
    }

    #[test]
    fn empty_tree_yields_nothing() {
        assert_eq!(extract(None), ExtractedContent::default());
        assert_eq!(extract(Some(&composite(vec![]))), ExtractedContent::default());
        assert_eq!(extract(None).preferred_body(), "");
    }

    #[test]
    fn deeply_nested_tree_does_not_overflow() {
        let mut tree = leaf(MIME_PLAIN, "bottom");
        for _ in 0..50_000 {
            tree = composite(vec![tree]);
        }
        assert_eq!(extract(Some(&tree)).text.as_deref(), Some("bottom"));
    }

    #[test]
    fn html_length_counts_utf16_units() {
        // Two astral characters are four UTF-16 units, longer than "abc".
        let tree = composite(vec![leaf(MIME_HTML, "abc"), leaf(MIME_HTML, "😀😀")]);
        assert_eq!(extract(Some(&tree)).html.as_deref(), Some("😀😀"));

        // One astral character ties with two ASCII ones, so the first is kept.
        let tie = composite(vec![leaf(MIME_HTML, "😀"), leaf(MIME_HTML, "ab")]);
        assert_eq!(extract(Some(&tie)).html.as_deref(), Some("😀"));
    }

    fn message_part(mime_type: &str, data: Option<String>, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            part_id: None,
            mime_type: Some(mime_type.into()),
            filename: None,
            headers: vec![],
            body: data.map(|data| MessagePartBody {
                size: 0,
                data: Some(data),
                attachment_id: None,
            }),
            parts,
        }
    }

    #[test]
    fn converts_deeply_nested_message_parts() {
        let mut part = message_part(MIME_PLAIN, Some(encode("bottom")), vec![]);
        for _ in 0..50_000 {
            part = message_part("multipart/mixed", None, vec![part]);
        }

        let tree = BodyPart::from(&part);
        assert_eq!(tree.mime_type(), "multipart/mixed");
        assert_eq!(extract(Some(&tree)).text.as_deref(), Some("bottom"));

        // The wire type has no custom drop, so take it apart level by level.
        let mut pending = vec![part];
        while let Some(mut next) = pending.pop() {
            pending.append(&mut next.parts);
        }
    }

    #[test]
    fn conversion_keeps_sibling_order_and_shape() {
        let part = message_part(
            "multipart/mixed",
            None,
            vec![
                message_part(MIME_PLAIN, Some(encode("one")), vec![]),
                message_part(
                    "multipart/alternative",
                    None,
                    vec![
                        message_part(MIME_PLAIN, Some(encode("two")), vec![]),
                        message_part(MIME_HTML, Some(encode("<p>three</p>")), vec![]),
                    ],
                ),
                message_part(MIME_PLAIN, Some(encode("four")), vec![]),
            ],
        );

        let expected = BodyPart::Composite {
            mime_type: "multipart/mixed".into(),
            children: vec![
                leaf(MIME_PLAIN, "one"),
                BodyPart::Composite {
                    mime_type: "multipart/alternative".into(),
                    children: vec![leaf(MIME_PLAIN, "two"), leaf(MIME_HTML, "<p>three</p>")],
                },
                leaf(MIME_PLAIN, "four"),
            ],
        };
        assert_eq!(BodyPart::from(&part), expected);
    }

    #[test]
    fn undecodable_and_missing_payloads_are_skipped() {
        let tree = composite(vec![
            leaf(MIME_PLAIN, "good"),
            BodyPart::Leaf {
                mime_type: MIME_PLAIN.into(),
                payload: Some("!!!not base64!!!".into()),
            },
            BodyPart::Leaf {
                mime_type: MIME_HTML.into(),
                payload: None,
            },
        ]);
        let content = extract(Some(&tree));
        assert_eq!(content.text.as_deref(), Some("good"));
        assert_eq!(content.html, None);
    }

    #[test]
    fn decodes_url_safe_with_or_without_padding() {
        let text = "??>>~~";
        let unpadded = URL_SAFE_NO_PAD.encode(text);
        assert!(unpadded.contains('-'));
        assert_eq!(decode_body(&unpadded).as_deref(), Some(text));

        let padded = base64::engine::general_purpose::URL_SAFE.encode("hi");
        assert!(padded.ends_with('='));
        assert_eq!(decode_body(&padded).as_deref(), Some("hi"));
    }

    #[test]
    fn extracts_from_gmail_message() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [{ "name": "Subject", "value": "Hi" }],
                "parts": [
                    { "mimeType": "text/plain", "body": { "size": 5, "data": encode("plain") } },
                    { "mimeType": "text/html", "body": { "size": 11, "data": encode("<p>html</p>") } }
                ]
            }
        }))
        .expect("message decodes");

        let content = extract_message(&message);
        assert_eq!(content.text.as_deref(), Some("plain"));
        assert_eq!(content.html.as_deref(), Some("<p>html</p>"));
        assert_eq!(content.preferred_body(), "<p>html</p>");
    }

    #[test]
    fn single_part_message_is_a_leaf() {
        let part: MessagePart = serde_json::from_value(json!({
            "mimeType": "text/plain",
            "body": { "data": encode("only") }
        }))
        .expect("part decodes");
        let tree = BodyPart::from(&part);
        assert_eq!(tree.mime_type(), "text/plain");
        assert_eq!(extract(Some(&tree)).text.as_deref(), Some("only"));
    }
}
