//! Parsed message → document bytes.
//!
//! `Renderer` fills the HTML template and hands it to a [`RenderEngine`].
//! The shipped engine is [`PdfEngine`].

pub mod pdf;

use std::sync::Arc;

use crate::error::RenderError;
use crate::naming;
use crate::parser::ParsedMessage;

pub use pdf::PdfEngine;

/// Turns markup into a binary document.
pub trait RenderEngine: Send + Sync {
    fn render(&self, markup: &str) -> Result<Vec<u8>, RenderError>;
}

/// A rendered document plus the collision-naive name it should be saved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub base_name: String,
}

pub struct Renderer {
    engine: Arc<dyn RenderEngine>,
    label: String,
}

impl Renderer {
    pub fn new(engine: Arc<dyn RenderEngine>, label: impl Into<String>) -> Self {
        Self {
            engine,
            label: label.into(),
        }
    }

    pub fn render(&self, message: &ParsedMessage) -> Result<RenderedDocument, RenderError> {
        let markup = render_template(message);
        let bytes = self.engine.render(&markup)?;
        if bytes.is_empty() {
            return Err(RenderError::Empty);
        }

        Ok(RenderedDocument {
            bytes,
            base_name: naming::base_name(message, &self.label),
        })
    }
}

/// Fill the document template. Header fields are escaped, the body is
/// inserted as-is.
pub fn render_template(message: &ParsedMessage) -> String {
    let subject = escape_html(&message.subject);
    let sender = escape_html(&message.sender);
    let date = message.timestamp.format("%Y-%m-%d %H:%M:%S");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{subject}</title>
</head>
<body>
    <div class="header">
        <p><strong>Subject:</strong> {subject}</p>
        <p><strong>From:</strong> {sender}</p>
        <p><strong>Date:</strong> {date}</p>
    </div>
    <hr>
    <div class="content">
        {body}
    </div>
</body>
</html>
"#,
        body = message.body
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::parser::ExtractedFields;

    struct FailingEngine;

    impl RenderEngine for FailingEngine {
        fn render(&self, _markup: &str) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Engine("malformed markup".into()))
        }
    }

    struct EchoEngine;

    impl RenderEngine for EchoEngine {
        fn render(&self, markup: &str) -> Result<Vec<u8>, RenderError> {
            Ok(markup.as_bytes().to_vec())
        }
    }

    fn message() -> ParsedMessage {
        ParsedMessage {
            subject: "Your ride on March 5".into(),
            sender: "Lyft <no-reply@lyftmail.com>".into(),
            timestamp: DateTime::parse_from_rfc3339("2024-03-06T08:15:09-08:00").unwrap(),
            body: "<table><tr><td>GST</td></tr></table>".into(),
            fields: ExtractedFields {
                total: Some("25.00".into()),
                tax: Some("1.23".into()),
            },
        }
    }

    #[test]
    fn template_contains_header_fields_and_raw_body() {
        let html = render_template(&message());
        assert!(html.contains("<title>Your ride on March 5</title>"));
        assert!(html.contains("Lyft &lt;no-reply@lyftmail.com&gt;"));
        assert!(html.contains("2024-03-06 08:15:09"));
        assert!(html.contains("<table><tr><td>GST</td></tr></table>"));
    }

    #[test]
    fn renderer_attaches_base_name() {
        let renderer = Renderer::new(Arc::new(EchoEngine), "Lyft");
        let doc = renderer.render(&message()).unwrap();
        assert_eq!(doc.base_name, "20240305 - Lyft - 25.00 - GST 1.23");
        assert!(!doc.bytes.is_empty());
    }

    #[test]
    fn engine_failure_is_a_render_error() {
        let renderer = Renderer::new(Arc::new(FailingEngine), "Lyft");
        let err = renderer.render(&message()).unwrap_err();
        assert!(matches!(err, RenderError::Engine(_)));
    }

    #[test]
    fn escape_html_special_characters() {
        assert_eq!(escape_html(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    }
}
