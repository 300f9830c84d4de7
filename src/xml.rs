//! Owned XML element tree and pull-parsing helpers.
//!
//! Submissions are small documents, so the pull parser materializes each one
//! into an [`Element`] tree that the mapper can walk repeatedly. Namespace
//! prefixes are stripped; lookups use local names only.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::SubmissionError;

/// A parsed XML element with its attributes, children and text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    fn new(name: String) -> Self {
        Self { name, attributes: Vec::new(), children: Vec::new(), text: String::new() }
    }

    /// Returns the value of the named attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Returns the first direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Follows `segments` downwards and returns the first matching element.
    pub fn find<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Element> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self);
        };
        for child in &self.children {
            if child.name == first.as_ref()
                && let Some(found) = child.find(rest)
            {
                return Some(found);
            }
        }
        None
    }

    /// Collects every element matching `segments`, in document order.
    pub fn find_all<'a, S: AsRef<str>>(&'a self, segments: &[S], out: &mut Vec<&'a Element>) {
        let Some((first, rest)) = segments.split_first() else {
            out.push(self);
            return;
        };
        for child in &self.children {
            if child.name == first.as_ref() {
                child.find_all(rest, out);
            }
        }
    }

    /// Returns the text of the element at `segments`, if any.
    pub fn text_at<S: AsRef<str>>(&self, segments: &[S]) -> Option<&str> {
        self.find(segments).map(|element| element.text.as_str())
    }

    /// Depth-first search for the first element (self included) with the
    /// given local name.
    pub fn descendant(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.descendant(name))
    }
}

/// Parses a whole XML document into its root element.
pub fn parse_document(path: &Path) -> Result<Element, SubmissionError> {
    let file = File::open(path).map_err(|source| SubmissionError::Io { path: path.to_path_buf(), source })?;
    let mut reader = Reader::from_reader(BufReader::new(file));

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                let element = read_element(path, &start)?;
                stack.push(element);
            }
            Ok(Event::Empty(start)) => {
                let element = read_element(path, &start)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                let Some(element) = stack.pop() else {
                    return Err(parse_error(path, "unbalanced closing tag"));
                };
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    let value = text.unescape().map_err(|e| parse_error(path, e))?;
                    top.text.push_str(value.trim());
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(parse_error(path, e)),
        }
        buf.clear();
    }

    root.ok_or_else(|| parse_error(path, "document has no root element"))
}

fn read_element(path: &Path, start: &BytesStart<'_>) -> Result<Element, SubmissionError> {
    let mut element = Element::new(local_name(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| parse_error(path, e))?;
        let key = local_name(attribute.key.as_ref());
        let value = attribute.unescape_value().map_err(|e| parse_error(path, e))?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            // Only the first top-level element counts as the document root.
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn parse_error(path: &Path, reason: impl ToString) -> SubmissionError {
    SubmissionError::Parse { path: path.to_path_buf(), reason: reason.to_string() }
}
