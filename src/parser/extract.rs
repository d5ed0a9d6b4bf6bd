//! Amount extraction from receipt markup.
//!
//! The body is parsed as HTML. The tax amount sits in the value cell that
//! follows the label cell containing the tax marker; the total sits in the
//! cell carrying the total class. Neither is required.

use scraper::{ElementRef, Html, Selector};

use crate::config::ExtractionRules;
use crate::parser::ExtractedFields;

pub fn extract_fields(body: &str, rules: &ExtractionRules) -> ExtractedFields {
    let Ok(cells) = Selector::parse("td") else {
        return ExtractedFields::default();
    };
    let document = Html::parse_document(body);

    let tax = document
        .select(&cells)
        .find(|cell| is_leaf_cell(cell) && cell_text(cell).contains(&rules.tax_marker))
        .and_then(|label| {
            label
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sibling| sibling.value().name() == "td" && has_class(sibling, &rules.value_class))
        })
        .and_then(|cell| clean_amount(&cell_text(&cell)));

    let total = document
        .select(&cells)
        .find(|cell| has_class(cell, &rules.total_class))
        .and_then(|cell| clean_amount(&cell_text(&cell)));

    ExtractedFields { total, tax }
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect()
}

fn has_class(element: &ElementRef, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// A cell with no nested cells, so layout tables wrapping the receipt never
/// match the marker themselves.
fn is_leaf_cell(cell: &ElementRef) -> bool {
    !cell
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().name() == "td")
}

/// Strip currency symbols and whitespace; empty means absent.
fn clean_amount(text: &str) -> Option<String> {
    let cleaned = text.trim().replace('$', "");
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str) -> ExtractedFields {
        extract_fields(body, &ExtractionRules::default())
    }

    #[test]
    fn tax_from_sibling_value_cell() {
        let body = r#"<table><tr><td>GST</td><td class="value">$12.34</td></tr></table>"#;
        assert_eq!(extract(body).tax.as_deref(), Some("12.34"));
    }

    #[test]
    fn tax_skips_siblings_without_value_class() {
        let body = r#"<table><tr>
            <td>GST (5%)</td>
            <td class="note">incl.</td>
            <td class="amount value">  $ 0.95 </td>
        </tr></table>"#;
        assert_eq!(extract(body).tax.as_deref(), Some("0.95"));
    }

    #[test]
    fn missing_marker_leaves_tax_unset() {
        let body = r#"<table><tr><td>Tip</td><td class="value">$2.00</td></tr></table>"#;
        let fields = extract(body);
        assert_eq!(fields.tax, None);
        assert_eq!(fields.total, None);
    }

    #[test]
    fn marker_without_value_cell_leaves_tax_unset() {
        let body = r#"<table><tr><td>GST</td><td>$1.00</td></tr></table>"#;
        assert_eq!(extract(body).tax, None);
    }

    #[test]
    fn total_from_class() {
        let body = r#"<table><tr><td>Total</td><td class="charge-total">$41.07</td></tr></table>"#;
        assert_eq!(extract(body).total.as_deref(), Some("41.07"));
    }

    #[test]
    fn nested_layout_tables_match_inner_cell() {
        let body = r#"<table><tr><td>
            <table><tr><td>GST</td><td class="value">$3.10</td></tr></table>
        </td></tr></table>"#;
        assert_eq!(extract(body).tax.as_deref(), Some("3.10"));
    }

    #[test]
    fn plain_text_body_extracts_nothing() {
        assert_eq!(extract("GST $12.34 total $50"), ExtractedFields::default());
    }

    #[test]
    fn custom_rules() {
        let rules = ExtractionRules {
            tax_marker: "VAT".into(),
            value_class: "amt".into(),
            total_class: "grand".into(),
        };
        let body = r#"<table>
            <tr><td>VAT</td><td class="amt">€4.00</td></tr>
            <tr><td class="grand">$20.00</td></tr>
        </table>"#;
        let fields = extract_fields(body, &rules);
        assert_eq!(fields.tax.as_deref(), Some("€4.00"));
        assert_eq!(fields.total.as_deref(), Some("20.00"));
    }

    #[test]
    fn empty_amount_is_absent() {
        let body = r#"<table><tr><td class="charge-total"> $ </td></tr></table>"#;
        assert_eq!(extract(body).total, None);
    }
}
