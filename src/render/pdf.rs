//! Minimal text-layout PDF engine.
//!
//! Markup is parsed with `scraper` and flattened to text lines (block
//! elements break lines, table cells are separated by spaces), wrapped, and
//! laid out in Helvetica on A4 pages with `lopdf`.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use scraper::{ElementRef, Html};

use crate::error::RenderError;
use crate::render::RenderEngine;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FONT_SIZE: i64 = 10;
const LEADING: i64 = 12;
const LINES_PER_PAGE: usize = 64;
const WRAP_COLUMNS: usize = 95;

/// Elements whose content never reaches the page.
const SKIPPED: [&str; 4] = ["head", "style", "script", "title"];

/// Elements that start a new line.
const BLOCKS: [&str; 20] = [
    "p", "div", "br", "tr", "li", "ul", "ol", "table", "hr", "h1", "h2", "h3", "h4", "h5",
    "h6", "pre", "blockquote", "section", "header", "footer",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfEngine;

impl RenderEngine for PdfEngine {
    fn render(&self, markup: &str) -> Result<Vec<u8>, RenderError> {
        let lines: Vec<String> = markup_to_lines(markup)
            .iter()
            .flat_map(|line| wrap(line, WRAP_COLUMNS))
            .collect();

        let mut doc = build_document(&lines)?;
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| RenderError::Engine(e.to_string()))?;
        // The object graph can be several times the output size.
        drop(doc);

        Ok(bytes)
    }
}

fn build_document(lines: &[String]) -> Result<Document, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let empty = [String::new()];
    let lines = if lines.is_empty() { &empty[..] } else { lines };

    let mut kids = Vec::new();
    for page in lines.chunks(LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(FONT_SIZE)]),
            Operation::new("TL", vec![Object::Integer(LEADING)]),
            Operation::new(
                "Td",
                vec![Object::Integer(MARGIN), Object::Integer(PAGE_HEIGHT - MARGIN)],
            ),
        ];
        for line in page {
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(encode_win_ansi(line))],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }
            .encode()
            .map_err(|e| RenderError::Engine(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(PAGE_WIDTH),
            Object::Integer(PAGE_HEIGHT),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    Ok(doc)
}

/// Flatten markup into display lines.
pub fn markup_to_lines(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    let mut lines = Vec::new();
    let mut current = String::new();
    flatten(document.root_element(), &mut lines, &mut current);
    flush_line(&mut lines, &mut current);
    lines
}

fn flatten(element: ElementRef<'_>, lines: &mut Vec<String>, current: &mut String) {
    let name = element.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    let block = BLOCKS.contains(&name);
    if block {
        flush_line(lines, current);
    } else if name == "td" || name == "th" {
        current.push(' ');
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            current.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            flatten(child, lines, current);
        }
    }

    if block {
        flush_line(lines, current);
    }
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    let line = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

/// Greedy word wrap; words longer than `width` are split.
pub fn wrap(line: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            let piece_len = piece.len();
            if current_len > 0 && current_len + 1 + piece_len > width {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(piece);
            current_len += piece_len;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Encode for the standard WinAnsi font encoding; unmappable characters
/// become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            '€' => 0x80,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}
