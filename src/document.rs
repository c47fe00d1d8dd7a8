//! Structured invoice documents.
//!
//! KSeF invoices are FA(2)/FA(3) XML. The XML is read into a loosely typed [`Node`] tree keyed by
//! local element names, and the fields needed for display are then picked out of it by
//! [`InvoiceDocument::from_xml`]. Namespaces and prefixes are ignored and lookups are
//! case-insensitive, so minor schema variants resolve the same way.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use crate::ksef::InvoicePayload;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed XML document: {0}")]
    Malformed(String),

    #[error("Document is not a structured invoice")]
    NotAnInvoice,

    #[error("Invoice payload is not XML")]
    NotXml,
}

/// A loosely typed XML element.
///
/// Leaf elements become [`Node::Text`], elements with children become [`Node::Map`], and a child
/// element repeated under the same parent becomes a [`Node::List`] in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    /// Parses an XML document. The result is a map holding the root element.
    pub fn parse(xml: &str) -> Result<Node, DocumentError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack = vec![Frame::new(String::new())];
        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    stack.push(Frame::new(local_name(e.local_name().as_ref())));
                }
                Event::Empty(e) => {
                    let name = local_name(e.local_name().as_ref());
                    if let Some(parent) = stack.last_mut() {
                        parent.attach(name, Node::Text(String::new()));
                    }
                }
                Event::Text(e) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::End(_) => {
                    if stack.len() < 2 {
                        return Err(DocumentError::Malformed("unexpected closing tag".into()));
                    }
                    let Some(frame) = stack.pop() else {
                        break;
                    };
                    let (name, node) = frame.finish();
                    if let Some(parent) = stack.last_mut() {
                        parent.attach(name, node);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(DocumentError::Malformed("unclosed element".into()));
        }
        match stack.pop() {
            Some(root) if !root.children.is_empty() => Ok(Node::Map(root.children)),
            _ => Err(DocumentError::Malformed("no root element".into())),
        }
    }

    /// Depth-first search for the first element with the given local name.
    ///
    /// Keys of a map are checked before descending into its values.
    pub fn find_by_local_name(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Text(_) => None,
            Node::List(items) => items.iter().find_map(|item| item.find_by_local_name(name)),
            Node::Map(map) => self
                .child(name)
                .or_else(|| map.values().find_map(|value| value.find_by_local_name(name))),
        }
    }

    /// Direct child by local name. Repeated children resolve to their list.
    pub fn child(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Map(map) => map
                .iter()
                .find(|(key, _)| name_matches(key, name))
                .map(|(_, value)| value),
            Node::List(items) => items.first()?.child(name),
            Node::Text(_) => None,
        }
    }

    /// Follows a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&Node> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Trimmed text of a leaf, or of the first item of a list. Empty text is `None`.
    pub fn text(&self) -> Option<&str> {
        match self {
            Node::Text(text) => Some(text.trim()).filter(|t| !t.is_empty()),
            Node::List(items) => items.first()?.text(),
            Node::Map(_) => None,
        }
    }

    /// The node as a sequence: the items of a list, or the node itself.
    pub fn items(&self) -> Vec<&Node> {
        match self {
            Node::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Child entries of a map, with repeated children flattened in order.
    pub fn entries(&self) -> Vec<(&str, &Node)> {
        match self {
            Node::Map(map) => map
                .iter()
                .flat_map(|(key, value)| {
                    value.items().into_iter().map(move |item| (key.as_str(), item))
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

struct Frame {
    name: String,
    text: String,
    children: BTreeMap<String, Node>,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: BTreeMap::new(),
        }
    }

    fn attach(&mut self, name: String, node: Node) {
        match self.children.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(node);
            }
            Entry::Occupied(slot) => match slot.into_mut() {
                Node::List(items) => items.push(node),
                existing => {
                    let first = std::mem::replace(existing, Node::List(Vec::new()));
                    *existing = Node::List(vec![first, node]);
                }
            },
        }
    }

    fn finish(self) -> (String, Node) {
        let node = if self.children.is_empty() {
            Node::Text(self.text.trim().to_string())
        } else {
            Node::Map(self.children)
        };
        (self.name, node)
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn name_matches(key: &str, name: &str) -> bool {
    let key = key.rsplit(':').next().unwrap_or(key);
    key.eq_ignore_ascii_case(name)
}

fn parse_amount(text: &str) -> Option<f64> {
    text.trim().replace([' ', '\u{a0}'], "").replace(',', ".").parse().ok()
}

fn text_at<'a>(node: &'a Node, names: &[&str]) -> Option<&'a str> {
    node.path(names)?.text()
}

fn owned(text: Option<&str>) -> Option<String> {
    text.map(str::to_string)
}

/// Seller or buyer of an invoice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Party {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Vec<String>,
}

impl Party {
    fn from_node(node: &Node) -> Self {
        let ident = node.child("DaneIdentyfikacyjne");
        let address = node
            .child("Adres")
            .map(|addr| {
                ["AdresL1", "AdresL2"]
                    .iter()
                    .filter_map(|line| text_at(addr, &[*line]))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: owned(ident.and_then(|i| text_at(i, &["Nazwa"]))),
            tax_id: owned(ident.and_then(|i| text_at(i, &["NIP"]))),
            address,
        }
    }
}

/// One `FaWiersz` row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineItem {
    pub position: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub quantity: Option<f64>,
    pub unit_net_price: Option<f64>,
    pub net_value: Option<f64>,
    pub vat_rate: Option<String>,
}

impl LineItem {
    fn from_node(node: &Node) -> Self {
        let amount = |name: &str| text_at(node, &[name]).and_then(parse_amount);
        Self {
            position: owned(text_at(node, &["NrWierszaFa"])),
            name: owned(text_at(node, &["P_7"])),
            unit: owned(text_at(node, &["P_8A"])),
            quantity: amount("P_8B"),
            unit_net_price: amount("P_9A"),
            net_value: amount("P_11"),
            vat_rate: owned(text_at(node, &["P_12"])),
        }
    }
}

/// Display fields extracted from an FA(2)/FA(3) invoice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceDocument {
    pub form_variant: Option<String>,
    pub invoice_number: Option<String>,
    pub issue_date: Option<String>,
    pub issue_place: Option<String>,
    pub sale_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: String,
    pub seller: Party,
    pub buyer: Party,
    pub net_total: f64,
    pub vat_total: f64,
    pub gross_total: f64,
    pub line_items: Vec<LineItem>,
}

impl InvoiceDocument {
    pub fn from_xml(xml: &str) -> Result<Self, DocumentError> {
        let tree = Node::parse(xml)?;
        let fa = tree
            .find_by_local_name("Fa")
            .filter(|fa| matches!(fa, Node::Map(_)))
            .ok_or(DocumentError::NotAnInvoice)?;

        // P_13_n are net sums per rate and P_14_n the VAT; the W suffix marks PLN conversions.
        let sum_of = |prefix: &str| -> f64 {
            fa.entries()
                .into_iter()
                .filter(|(key, _)| key.starts_with(prefix) && !key.ends_with('W'))
                .filter_map(|(_, node)| node.text().and_then(parse_amount))
                .sum()
        };
        let net_total = sum_of("P_13_");
        let vat_total = sum_of("P_14_");
        let gross_total = text_at(fa, &["P_15"])
            .and_then(parse_amount)
            .unwrap_or(net_total + vat_total);

        let due_date = fa
            .path(&["Platnosc", "TerminPlatnosci"])
            .and_then(|term| term.child("Termin").unwrap_or(term).text());

        Ok(Self {
            form_variant: owned(tree.find_by_local_name("WariantFormularza").and_then(Node::text)),
            invoice_number: owned(text_at(fa, &["P_2"])),
            issue_date: owned(text_at(fa, &["P_1"])),
            issue_place: owned(text_at(fa, &["P_1M"])),
            sale_date: owned(text_at(fa, &["P_6"])),
            due_date: owned(due_date),
            currency: text_at(fa, &["KodWaluty"]).unwrap_or("PLN").to_string(),
            seller: tree
                .find_by_local_name("Podmiot1")
                .map(Party::from_node)
                .unwrap_or_default(),
            buyer: tree
                .find_by_local_name("Podmiot2")
                .map(Party::from_node)
                .unwrap_or_default(),
            net_total,
            vat_total,
            gross_total,
            line_items: fa
                .child("FaWiersz")
                .map(|rows| rows.items().into_iter().map(LineItem::from_node).collect())
                .unwrap_or_default(),
        })
    }

    pub fn from_payload(payload: &InvoicePayload) -> Result<Self, DocumentError> {
        payload
            .as_xml()
            .ok_or(DocumentError::NotXml)
            .and_then(Self::from_xml)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_FA2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Faktura xmlns="http://crd.gov.pl/wzor/2023/06/29/12648/">
  <Naglowek>
    <KodFormularza kodSystemowy="FA (2)" wersjaSchemy="1-0E">FA</KodFormularza>
    <WariantFormularza>2</WariantFormularza>
  </Naglowek>
  <Podmiot1>
    <DaneIdentyfikacyjne>
      <NIP>5265877635</NIP>
      <Nazwa>ACME Sp. z o.o.</Nazwa>
    </DaneIdentyfikacyjne>
    <Adres>
      <KodKraju>PL</KodKraju>
      <AdresL1>ul. Prosta 1</AdresL1>
      <AdresL2>00-001 Warszawa</AdresL2>
    </Adres>
  </Podmiot1>
  <Podmiot2>
    <DaneIdentyfikacyjne>
      <NIP>1111111111</NIP>
      <Nazwa>Kowalski &amp; Syn</Nazwa>
    </DaneIdentyfikacyjne>
  </Podmiot2>
  <Fa>
    <KodWaluty>PLN</KodWaluty>
    <P_1>2025-01-15</P_1>
    <P_1M>Warszawa</P_1M>
    <P_2>FV/1/2025</P_2>
    <P_6>2025-01-14</P_6>
    <P_13_1>100.00</P_13_1>
    <P_14_1>23.00</P_14_1>
    <P_13_2>50.00</P_13_2>
    <P_14_2>4.00</P_14_2>
    <P_15>177.00</P_15>
    <FaWiersz>
      <NrWierszaFa>1</NrWierszaFa>
      <P_7>Consulting</P_7>
      <P_8A>h</P_8A>
      <P_8B>2</P_8B>
      <P_9A>50.00</P_9A>
      <P_11>100.00</P_11>
      <P_12>23</P_12>
    </FaWiersz>
    <FaWiersz>
      <NrWierszaFa>2</NrWierszaFa>
      <P_7>Books</P_7>
      <P_8B>1</P_8B>
      <P_11>50,00</P_11>
      <P_12>8</P_12>
    </FaWiersz>
    <Platnosc>
      <TerminPlatnosci>
        <Termin>2025-01-29</Termin>
      </TerminPlatnosci>
    </Platnosc>
  </Fa>
</Faktura>"#;
