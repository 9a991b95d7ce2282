//! Structured artifact documents.
//!
//! Every domain artifact is a small XML document: one root element carrying
//! `project` and `date` attributes, one child element per entity, scalar
//! attributes and at most one text body per element. Documents are built and
//! parsed as [`Element`] trees with `quick-xml` events.

use super::error::BundleError;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("attribute error: {0}")]
    Attribute(#[from] AttrError),
    #[error("{0}")]
    Structure(String),
}

impl DocumentError {
    fn structure(message: impl Into<String>) -> Self {
        DocumentError::Structure(message.into())
    }
}

/// One element of an artifact document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Root element of an artifact, stamped with the source project and today's date.
    pub fn document(name: impl Into<String>, project: &str) -> Self {
        Self::new(name)
            .with_attr("project", project)
            .with_attr("date", Utc::now().format("%Y-%m-%d").to_string())
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Add the attribute only when a value is present.
    pub fn with_opt_attr(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with_attr(key, value),
            None => self,
        }
    }

    pub fn with_date_attr(self, key: &str, value: Option<DateTime<Utc>>) -> Self {
        self.with_opt_attr(key, value.map(format_date))
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = if text.is_empty() { None } else { Some(text) };
        self
    }

    pub fn with_opt_text(self, text: Option<&str>) -> Self {
        match text {
            Some(text) => self.with_text(text),
            None => self,
        }
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, key: &str) -> Result<&str, DocumentError> {
        self.attr(key).ok_or_else(|| {
            DocumentError::structure(format!("<{}> is missing attribute `{}`", self.name, key))
        })
    }

    pub fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, DocumentError>
    where
        T::Err: std::fmt::Display,
    {
        self.attr(key)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| {
                    DocumentError::structure(format!(
                        "<{}> attribute `{}` = `{}`: {}",
                        self.name, key, value, e
                    ))
                })
            })
            .transpose()
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, DocumentError> {
        match self.attr(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" | "" => Ok(false),
                _ => Err(DocumentError::structure(format!(
                    "<{}> attribute `{}` is not a boolean: `{}`",
                    self.name, key, value
                ))),
            },
        }
    }

    /// Date attribute read with a tolerant parser; absent means unset.
    ///
    /// Values without a zone are UTC, and a bare date is midnight.
    pub fn date(&self, key: &str) -> Result<Option<DateTime<Utc>>, DocumentError> {
        match self.attr(key).map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => dateparser::parse_with(value, &Utc, NaiveTime::MIN)
                .map(Some)
                .map_err(|e| {
                    DocumentError::structure(format!(
                        "<{}> attribute `{}` is not a date: `{}` ({})",
                        self.name, key, value, e
                    ))
                }),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Fail unless this is a root element named `name`.
    pub fn expect_root(&self, name: &str) -> Result<(), DocumentError> {
        if self.name == name {
            Ok(())
        } else {
            Err(DocumentError::structure(format!(
                "expected root <{}>, found <{}>",
                name, self.name
            )))
        }
    }

    /// Serialize as an indented document with an XML declaration.
    pub fn to_xml(&self) -> Result<Vec<u8>, DocumentError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        write_element(&mut writer, self)?;
        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// RFC 3339 with second precision and a `Z` suffix.
pub fn format_date(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), DocumentError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.text.is_none() && element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    // The text body goes last so no indentation lands inside it.
    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        write_element(writer, child)?;
    }
    if let Some(text) = &element.text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, DocumentError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Parse a document into its root element.
///
/// Whitespace-only text between elements is layout and is dropped; any other
/// text is kept verbatim. Writers place an element's text body after its
/// children.
pub fn parse(xml: &str) -> Result<Element, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    fn attach(
        stack: &mut [Element],
        root: &mut Option<Element>,
        element: Element,
    ) -> Result<(), DocumentError> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_some() => {
                return Err(DocumentError::structure(format!(
                    "second root element <{}>",
                    element.name
                )));
            }
            None => *root = Some(element),
        }
        Ok(())
    }

    fn append_text(stack: &mut [Element], text: &str) -> Result<(), DocumentError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        match stack.last_mut() {
            Some(element) => {
                element.text.get_or_insert_with(String::new).push_str(text);
                Ok(())
            }
            None => Err(DocumentError::structure("text outside the root element")),
        }
    }

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(DocumentError::structure("second root element"));
                }
                stack.push(element_from(&start)?);
            }
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::structure("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                append_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                append_text(&mut stack, &text)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(DocumentError::structure(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| DocumentError::structure("document has no root element"))
}

/// Read and parse an artifact. An absent file yields `None`.
pub async fn read_document(path: &Path, artifact: &str) -> Result<Option<Element>, BundleError> {
    let xml = match tokio::fs::read_to_string(path).await {
        Ok(xml) => xml,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            return Err(BundleError::malformed(artifact, err));
        }
        Err(err) => return Err(BundleError::io(path, err)),
    };
    parse(&xml)
        .map(Some)
        .map_err(|e| BundleError::malformed(artifact, e))
}

pub async fn write_document(path: &Path, root: &Element) -> Result<(), BundleError> {
    let bytes = root
        .to_xml()
        .map_err(|e| BundleError::io(path, io::Error::other(e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BundleError::io(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| BundleError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn text_body_survives_markup_characters() {
        let doc = Element::document("wiki", "alpha").with_child(
            Element::new("page")
                .with_attr("name", "WikiStart")
                .with_text("= Title =\n  <b>bold</b> & more\n"),
        );
        let xml = String::from_utf8(doc.to_xml().unwrap()).unwrap();
        let parsed = parse(&xml).unwrap();

        assert_eq!(parsed.name, "wiki");
        assert_eq!(parsed.attr("project"), Some("alpha"));
        let page = parsed.children_named("page").next().unwrap();
        assert_eq!(page.text(), Some("= Title =\n  <b>bold</b> & more\n"));
    }

    #[test]
    fn layout_whitespace_is_not_text() {
        let parsed = parse("<groups>\n  <group sid=\"dev\">\n    <grant action=\"WIKI_VIEW\"/>\n  </group>\n</groups>").unwrap();
        let group = &parsed.children[0];
        assert_eq!(group.text(), None);
        assert_eq!(group.children.len(), 1);
        assert_eq!(group.children[0].attr("action"), Some("WIKI_VIEW"));
    }

    #[test]
    fn text_body_beside_children_is_exact() {
        let doc = Element::document("groups", "alpha").with_child(
            Element::new("group")
                .with_attr("sid", "developers")
                .with_text("Developers\n")
                .with_child(Element::new("grant").with_attr("action", "WIKI_VIEW"))
                .with_child(Element::new("grant").with_attr("action", "TICKET_ADMIN")),
        );
        let xml = String::from_utf8(doc.to_xml().unwrap()).unwrap();
        let parsed = parse(&xml).unwrap();

        let group = &parsed.children[0];
        assert_eq!(group.text(), Some("Developers\n"));
        assert_eq!(group.children.len(), 2);
        assert_eq!(parsed, doc);
    }

    #[test]
    fn structural_errors_are_reported() {
        assert!(parse("").is_err());
        assert!(parse("<a><b></a>").is_err());
        assert!(parse("<a/><b/>").is_err());
        assert!(parse("<a>").is_err());
    }

    #[test]
    fn tolerant_dates_and_flags() {
        let element = Element::new("milestone")
            .with_attr("due", "2024-03-01T12:00:00Z")
            .with_attr("start", "2024-01-15")
            .with_attr("private", "1")
            .with_attr("bad", "later");

        assert_eq!(
            element.date("due").unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(
            element.date("start").unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(element.date("completed").unwrap(), None);
        assert!(element.date("bad").is_err());
        assert!(element.flag("private", false).unwrap());
        assert!(!element.flag("missing", false).unwrap());
    }

    #[test]
    fn dates_format_with_seconds_and_zulu() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(format_date(when), "2024-03-01T12:00:05Z");
    }
}
