use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use std::{io::BufRead, sync::Arc};
use tracing::trace;

use crate::{element::Scope, Element, Node, XmlError};

fn open<B: BufRead>(
    reader: &Reader<B>,
    start: &BytesStart,
    parent: Option<&Element>,
) -> Result<Element, XmlError> {
    let name = reader.decode(start.name())?.to_owned();
    let scope = parent.map_or_else(Scope::default, |parent| Arc::clone(&parent.scope));
    let mut element = Element::with_scope(name, scope);

    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = reader.decode(attribute.key)?.to_owned();
        let value = attribute.unescape_and_decode_value(reader)?;
        element.set_attribute(key, value);
    }

    Ok(element)
}

fn close(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.push_node(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError::UnbalancedTags),
    }
    Ok(())
}

pub(crate) fn parse(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    reader.expand_empty_elements(false);
    reader.check_end_names(true);

    let mut buffer = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event(&mut buffer)? {
            Event::Start(start) => {
                let element = open(&reader, &start, stack.last())?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open(&reader, &start, stack.last())?;
                close(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::UnbalancedTags)?;
                close(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_node(Node::Text(text.unescape_and_decode(&reader)?));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_node(Node::Text(reader.decode(&data)?.to_owned()));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    parent.push_node(Node::Comment(reader.decode(&comment)?.to_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buffer.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::UnbalancedTags);
    }

    let root = root.ok_or(XmlError::EmptyDocument)?;
    trace!(root = root.name(), "parsed xml document");
    Ok(root)
}
