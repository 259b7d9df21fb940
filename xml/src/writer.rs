use quick_xml::{
    events::{BytesDecl, BytesStart, BytesText, Event},
    Writer,
};
use std::io::{Cursor, Write};

use crate::{Element, Node, XmlError};

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<(), XmlError> {
    let mut start = BytesStart::owned_name(element.name.clone());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start.to_borrowed()))?;
    for node in &element.children {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => {
                writer.write_event(Event::Text(BytesText::from_plain_str(text)))?;
            }
            Node::Comment(text) => {
                writer.write_event(Event::Comment(BytesText::from_escaped_str(text.as_str())))?;
            }
        }
    }
    writer.write_event(Event::End(start.to_end()))?;

    Ok(())
}

pub(crate) fn write_document(element: &Element, indent: bool) -> Result<String, XmlError> {
    let mut writer = if indent {
        Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2)
    } else {
        Writer::new(Cursor::new(Vec::new()))
    };

    writer.write_event(Event::Decl(BytesDecl::new(b"1.0", Some(b"UTF-8"), None)))?;
    if !indent {
        writer.write_event(Event::Text(BytesText::from_escaped_str("\n")))?;
    }
    write_element(&mut writer, element)?;

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

pub(crate) fn write_fragment(element: &Element) -> Result<String, XmlError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_element(&mut writer, element)?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}
