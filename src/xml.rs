//! A small owned XML element tree built from `quick-xml` events.
//!
//! The Bruker metadata files are tiny (a few kilobytes, except for the
//! Base64 SEM image payload), so holding them fully in memory is cheap and
//! buys pugixml-style path lookup with defaulted typed getters, which is all
//! the metadata extraction needs.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::BcfError;

#[derive(Debug, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a whole document. The returned element is a synthetic root
    /// whose children hold the document element(s), so path lookups start
    /// at the document element name.
    pub fn parse_file(path: &Path) -> Result<XmlElement, BcfError> {
        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();
        let mut stack: Vec<XmlElement> = vec![XmlElement::default()];

        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|_| BcfError::InvalidFormat("malformed XML metadata"))?
            {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    push_child(&mut stack, element);
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|_| BcfError::InvalidFormat("malformed XML metadata"))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(text.trim());
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(data.as_ref()));
                    }
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        if let Some(element) = stack.pop() {
                            push_child(&mut stack, element);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if stack.len() != 1 {
            return Err(BcfError::InvalidFormat("malformed XML metadata"));
        }
        stack
            .pop()
            .ok_or(BcfError::InvalidFormat("malformed XML metadata"))
    }

    /// Follow a `/`-separated path of element names, taking the first match
    /// at every step.
    pub fn first_by_path(&self, path: &str) -> Option<&XmlElement> {
        let mut current = self;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = current.children.iter().find(|c| c.name == part)?;
        }
        Some(current)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn text_by_path(&self, path: &str) -> Option<&str> {
        self.first_by_path(path).map(|e| e.text.as_str())
    }

    pub fn str_by_path(&self, path: &str, default: &str) -> String {
        match self.text_by_path(path) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn i32_by_path(&self, path: &str, default: i32) -> i32 {
        self.text_by_path(path)
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn f32_by_path(&self, path: &str, default: f32) -> f32 {
        self.text_by_path(path)
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn f64_by_path(&self, path: &str, default: f64) -> f64 {
        self.text_by_path(path)
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or(default)
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<XmlElement, BcfError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|_| BcfError::InvalidFormat("malformed XML attribute"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|_| BcfError::InvalidFormat("malformed XML attribute"))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn push_child(stack: &mut Vec<XmlElement>, element: XmlElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    }
}
