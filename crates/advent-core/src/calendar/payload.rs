//! Day content.
//!
//! A payload is an ordered list of messages. Configured lines are classified
//! by prefix: `IMAGE:` for a photo (local path or URL), `MARKDOWN:` for
//! MarkdownV2 text, anything else is sent as plain text.

use serde::{Deserialize, Serialize};

const IMAGE_PREFIX: &str = "IMAGE:";
const MARKDOWN_PREFIX: &str = "MARKDOWN:";

/// One message of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PayloadPart {
    Text(String),
    Markdown(String),
    /// Path to a local file, or an `http(s)` URL.
    Image(String),
}

impl PayloadPart {
    /// Classify a configured line.
    pub fn parse(line: &str) -> Self {
        if let Some(rest) = line.strip_prefix(IMAGE_PREFIX) {
            PayloadPart::Image(rest.trim().to_string())
        } else if let Some(rest) = line.strip_prefix(MARKDOWN_PREFIX) {
            PayloadPart::Markdown(rest.to_string())
        } else {
            PayloadPart::Text(line.to_string())
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            PayloadPart::Text(s) | PayloadPart::Markdown(s) | PayloadPart::Image(s) => {
                s.trim().is_empty()
            }
        }
    }
}

/// Ordered content sent as one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Payload {
    parts: Vec<PayloadPart>,
}

impl Payload {
    /// Build a payload from configured lines. Blank lines are dropped.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts = lines
            .into_iter()
            .map(|line| PayloadPart::parse(line.as_ref()))
            .filter(|part| !part.is_blank())
            .collect();
        Self { parts }
    }

    /// A single plain-text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![PayloadPart::Text(text.into())],
        }
    }

    pub fn parts(&self) -> &[PayloadPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Prepend another payload's parts (used for the "open" prelude).
    pub fn prefixed_by(&self, prelude: &Payload) -> Payload {
        let mut parts = prelude.parts.clone();
        parts.extend(self.parts.iter().cloned());
        Payload { parts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_prefixed_lines() {
        let payload = Payload::from_lines(["Hello", "IMAGE: door1.jpg", "MARKDOWN:*bold*"]);
        assert_eq!(
            payload.parts(),
            &[
                PayloadPart::Text("Hello".into()),
                PayloadPart::Image("door1.jpg".into()),
                PayloadPart::Markdown("*bold*".into()),
            ]
        );
    }

    #[test]
    fn blank_lines_are_dropped() {
        let payload = Payload::from_lines(["", "   ", "IMAGE:"]);
        assert!(payload.is_empty());
    }

    #[test]
    fn prelude_comes_first() {
        let body = Payload::text("gift");
        let full = body.prefixed_by(&Payload::text("Here is your door"));
        assert_eq!(full.parts().len(), 2);
        assert_eq!(full.parts()[0], PayloadPart::Text("Here is your door".into()));
    }
}
