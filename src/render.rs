//! Print-ready HTML for an extracted invoice.
//!
//! The output is a single self-contained page with inline styles; turning it into a PDF is left
//! to an external engine.

use crate::document::{InvoiceDocument, LineItem, Party};

const STYLE: &str = "body{font-family:sans-serif;font-size:12px;margin:24px}\
h1{font-size:18px;margin:0 0 4px}\
.ksef{color:#555;margin-bottom:16px}\
.parties{display:flex;gap:48px;margin-bottom:16px}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #999;padding:4px 6px}\
td.num,th.num{text-align:right}\
.totals{margin-top:12px;width:auto;margin-left:auto}";

/// Renders the invoice as an HTML document. All document text is escaped.
pub fn render_html(document: &InvoiceDocument, ksef_id: &str) -> String {
    let title = document.invoice_number.as_deref().unwrap_or(ksef_id);
    let currency = escape(&document.currency);

    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang=\"pl\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>Faktura {}</title>\n", escape(title)));
    html.push_str(&format!("<style>{STYLE}</style>\n</head>\n<body>\n"));

    html.push_str(&format!("<h1>Faktura {}</h1>\n", escape(title)));
    html.push_str(&format!(
        "<div class=\"ksef\">Numer KSeF: {}</div>\n",
        escape(ksef_id)
    ));

    html.push_str("<table class=\"dates\">\n");
    for (label, value) in [
        ("Data wystawienia", &document.issue_date),
        ("Miejsce wystawienia", &document.issue_place),
        ("Data sprzedaży", &document.sale_date),
        ("Termin płatności", &document.due_date),
    ] {
        if let Some(value) = value {
            html.push_str(&format!(
                "<tr><th>{label}</th><td>{}</td></tr>\n",
                escape(value)
            ));
        }
    }
    html.push_str("</table>\n");

    html.push_str("<div class=\"parties\">\n");
    html.push_str(&party("Sprzedawca", &document.seller));
    html.push_str(&party("Nabywca", &document.buyer));
    html.push_str("</div>\n");

    if !document.line_items.is_empty() {
        html.push_str(
            "<table class=\"items\">\n<tr><th>Lp.</th><th>Nazwa</th><th>J.m.</th>\
             <th class=\"num\">Ilość</th><th class=\"num\">Cena netto</th>\
             <th class=\"num\">Wartość netto</th><th>VAT</th></tr>\n",
        );
        for (index, item) in document.line_items.iter().enumerate() {
            html.push_str(&line_item(index + 1, item));
        }
        html.push_str("</table>\n");
    }

    html.push_str(&format!(
        "<table class=\"totals\">\n\
         <tr><th>Netto</th><td class=\"num\">{} {currency}</td></tr>\n\
         <tr><th>VAT</th><td class=\"num\">{} {currency}</td></tr>\n\
         <tr><th>Brutto</th><td class=\"num\">{} {currency}</td></tr>\n\
         </table>\n",
        amount(document.net_total),
        amount(document.vat_total),
        amount(document.gross_total),
    ));

    html.push_str("</body>\n</html>\n");
    html
}

fn party(label: &str, party: &Party) -> String {
    let mut block = format!("<div class=\"party\"><h2>{label}</h2>\n");
    block.push_str(&format!(
        "<div>{}</div>\n",
        escape(party.name.as_deref().unwrap_or("-"))
    ));
    if let Some(tax_id) = &party.tax_id {
        block.push_str(&format!("<div>NIP: {}</div>\n", escape(tax_id)));
    }
    for line in &party.address {
        block.push_str(&format!("<div>{}</div>\n", escape(line)));
    }
    block.push_str("</div>\n");
    block
}

fn line_item(fallback_position: usize, item: &LineItem) -> String {
    let position = item
        .position
        .clone()
        .unwrap_or_else(|| fallback_position.to_string());
    let optional = |value: Option<f64>| value.map(amount).unwrap_or_default();

    format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"num\">{}</td>\
         <td class=\"num\">{}</td><td class=\"num\">{}</td><td>{}</td></tr>\n",
        escape(&position),
        escape(item.name.as_deref().unwrap_or("")),
        escape(item.unit.as_deref().unwrap_or("")),
        item.quantity.map(|q| q.to_string()).unwrap_or_default(),
        optional(item.unit_net_price),
        optional(item.net_value),
        escape(&vat_rate(item.vat_rate.as_deref())),
    )
}

/// Numeric rates get a percent sign; codes such as `zw` or `np` are shown as is.
fn vat_rate(rate: Option<&str>) -> String {
    match rate {
        Some(rate) if rate.parse::<f64>().is_ok() => format!("{rate}%"),
        Some(rate) => rate.to_string(),
        None => String::new(),
    }
}

fn amount(value: f64) -> String {
    format!("{value:.2}")
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SAMPLE_FA2;

    #[test]
    fn test_renders_invoice_fields() {
        let doc = InvoiceDocument::from_xml(SAMPLE_FA2).unwrap();
        let html = render_html(&doc, "5265877635-20250115-0100A0B1C2D3-E4");

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Faktura FV/1/2025</h1>"));
        assert!(html.contains("Numer KSeF: 5265877635-20250115-0100A0B1C2D3-E4"));
        assert!(html.contains("NIP: 5265877635"));
        assert!(html.contains("Kowalski &amp; Syn"));
        assert!(html.contains("<td>Consulting</td>"));
        assert!(html.contains("<td>23%</td>"));
        assert!(html.contains("177.00 PLN"));
        assert!(html.contains("2025-01-29"));
    }

    #[test]
    fn test_escapes_markup_and_falls_back_to_ksef_id() {
        let doc = InvoiceDocument {
            currency: "PLN".into(),
            seller: Party {
                name: Some("<script>alert('x')</script>".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let html = render_html(&doc, "ID-1");

        assert!(html.contains("<h1>Faktura ID-1</h1>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(!html.contains("class=\"items\""));
    }

    #[test]
    fn test_vat_rate_formatting() {
        assert_eq!(vat_rate(Some("23")), "23%");
        assert_eq!(vat_rate(Some("zw")), "zw");
        assert_eq!(vat_rate(None), "");
    }
}
