use std::{collections::BTreeMap, sync::Arc};

use crate::{reader, writer, XmlError};

/// Prefix to namespace URI bindings in scope at an element. The default
/// namespace is stored under the empty prefix.
pub(crate) type Scope = Arc<BTreeMap<String, String>>;

pub fn split_namespaced_name(prefixed_name: &str) -> (Option<&str>, &str) {
    match prefixed_name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, prefixed_name),
    }
}

fn xmlns_prefix(attribute: &str) -> Option<&str> {
    if attribute == "xmlns" {
        Some("")
    } else {
        attribute.strip_prefix("xmlns:")
    }
}

fn xmlns_attribute(prefix: &str) -> String {
    if prefix.is_empty() {
        "xmlns".to_owned()
    } else {
        format!("xmlns:{}", prefix)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) name: String,
    pub(crate) namespace: Option<String>,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) children: Vec<Node>,
    pub(crate) scope: Scope,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scope(name.into(), Scope::default())
    }

    pub(crate) fn with_scope(name: String, scope: Scope) -> Self {
        let mut element = Self {
            name,
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
            scope,
        };
        element.refresh_namespace();
        element
    }

    /// Parses a whole document and returns its root element.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        reader::parse(xml)
    }

    pub(crate) fn refresh_namespace(&mut self) {
        let (prefix, _) = split_namespaced_name(&self.name);
        self.namespace = self
            .scope
            .get(prefix.unwrap_or(""))
            .filter(|uri| !uri.is_empty())
            .cloned();
    }

    /// Qualified name as written, e.g. `soap:Body`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        split_namespaced_name(&self.name).1
    }

    pub fn prefix(&self) -> Option<&str> {
        split_namespaced_name(&self.name).0
    }

    /// Resolved namespace URI of this element.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Looks up the URI bound to `prefix` here; the empty prefix is the
    /// default namespace.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.scope
            .get(prefix)
            .map(String::as_str)
            .filter(|uri| !uri.is_empty())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> {
        self.scope
            .iter()
            .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
    }

    /// Splits a QName attribute value such as `tns:Foo` and resolves its
    /// prefix against the scope of this element.
    pub fn resolve_qname<'a>(&self, qname: &'a str) -> (Option<&str>, &'a str) {
        let (prefix, local) = split_namespaced_name(qname);
        (self.namespace_uri(prefix.unwrap_or("")), local)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Finds an attribute by local name whatever its prefix.
    pub fn attribute_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| split_namespaced_name(key).1 == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Sets an attribute. Namespace declarations update the scope of this
    /// element; children added afterwards see the new binding.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some(prefix) = xmlns_prefix(&name).map(str::to_owned) {
            Arc::make_mut(&mut self.scope).insert(prefix, value.clone());
            self.refresh_namespace();
        }

        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    fn declares(&self, prefix: &str) -> bool {
        self.attributes
            .iter()
            .any(|(key, _)| xmlns_prefix(key) == Some(prefix))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Element children only, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn has_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// First direct child with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children().find(|child| child.local_name() == local)
    }

    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: vec![self.children.iter()],
        }
    }

    /// Searches the descendants of this element in document order. Elements
    /// whose local name is `tag` in one of `namespaces` win, then elements
    /// whose qualified name is exactly `tag`, then any element with local
    /// name `tag`.
    pub fn find(&self, tag: &str, namespaces: &[&str]) -> Vec<&Element> {
        if !namespaces.is_empty() {
            let found: Vec<_> = self
                .descendants()
                .filter(|element| element.matches_namespaced(tag, namespaces))
                .collect();
            if !found.is_empty() {
                return found;
            }
        }

        let found: Vec<_> = self
            .descendants()
            .filter(|element| element.name == tag)
            .collect();
        if !found.is_empty() {
            return found;
        }

        self.descendants()
            .filter(|element| element.local_name() == tag)
            .collect()
    }

    pub fn find_first(&self, tag: &str, namespaces: &[&str]) -> Option<&Element> {
        if !namespaces.is_empty() {
            if let Some(element) = self
                .descendants()
                .find(|element| element.matches_namespaced(tag, namespaces))
            {
                return Some(element);
            }
        }

        self.descendants()
            .find(|element| element.name == tag)
            .or_else(|| self.descendants().find(|element| element.local_name() == tag))
    }

    pub fn find_first_mut(&mut self, tag: &str, namespaces: &[&str]) -> Option<&mut Element> {
        let path = {
            let target = self.find_first(tag, namespaces)?;
            self.path_to(target)?
        };

        let mut current = self;
        for index in path {
            current = match current.children.get_mut(index) {
                Some(Node::Element(element)) => element,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Strict lookup: a missing tag is an error instead of an empty result.
    pub fn require(&self, tag: &str, namespaces: &[&str]) -> Result<&Element, XmlError> {
        self.find_first(tag, namespaces)
            .ok_or_else(|| XmlError::TagNotFound {
                tag: tag.to_owned(),
            })
    }

    fn matches_namespaced(&self, tag: &str, namespaces: &[&str]) -> bool {
        self.local_name() == tag
            && self
                .namespace()
                .map_or(false, |namespace| namespaces.contains(&namespace))
    }

    fn path_to(&self, target: &Element) -> Option<Vec<usize>> {
        for (index, node) in self.children.iter().enumerate() {
            if let Node::Element(child) = node {
                if std::ptr::eq(child, target) {
                    return Some(vec![index]);
                }
                if let Some(mut path) = child.path_to(target) {
                    path.insert(0, index);
                    return Some(path);
                }
            }
        }
        None
    }

    fn push_element(&mut self, child: Element) -> &mut Element {
        self.children.push(Node::Element(child));
        match self.children.last_mut() {
            Some(Node::Element(element)) => element,
            _ => unreachable!(),
        }
    }

    pub(crate) fn push_node(&mut self, node: Node) {
        match node {
            Node::Text(text) => self.add_text(text),
            node => self.children.push(node),
        }
    }

    /// Appends an empty child element. The child inherits the namespace
    /// scope of this element, so a prefixed name resolves immediately.
    pub fn add_child(&mut self, name: impl Into<String>) -> &mut Element {
        let child = Self::with_scope(name.into(), Arc::clone(&self.scope));
        self.push_element(child)
    }

    pub fn add_child_text(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> &mut Element {
        let child = self.add_child(name);
        child.add_text(text);
        child
    }

    /// Appends a child bound to `namespace`, declaring it on the child when
    /// the inherited scope resolves the name elsewhere.
    pub fn add_child_ns(&mut self, name: impl Into<String>, namespace: &str) -> &mut Element {
        let child = self.add_child(name);
        if child.namespace() != Some(namespace) {
            let attribute = xmlns_attribute(child.prefix().unwrap_or(""));
            child.set_attribute(attribute, namespace);
        }
        child
    }

    pub fn add_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(Node::Text(existing)) => existing.push_str(&text),
            _ => self.children.push(Node::Text(text)),
        }
    }

    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.children.push(Node::Comment(text.into()));
    }

    pub fn remove_children(&mut self) {
        self.children.clear();
    }

    /// Deep-copies `other`, possibly from another document, as the last
    /// child. Bindings the copy relies on but this scope lacks are declared
    /// on the copy.
    pub fn import(&mut self, other: &Element) -> &mut Element {
        let mut copy = other.clone();

        for (prefix, uri) in other.scope.iter() {
            if self.scope.get(prefix) != Some(uri) && !copy.declares(prefix) {
                copy.attributes.push((xmlns_attribute(prefix), uri.clone()));
            }
        }
        let inherits_default = self
            .namespace_uri("")
            .map_or(false, |_| other.namespace_uri("").is_none());
        if inherits_default && !copy.declares("") {
            copy.attributes.push(("xmlns".to_owned(), String::new()));
        }

        self.push_element(copy)
    }

    /// Concatenated text content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn conversion_error(&self, expected: &'static str) -> XmlError {
        XmlError::Conversion {
            tag: self.local_name().to_owned(),
            value: self.text(),
            expected,
        }
    }

    pub fn as_int(&self) -> Result<i64, XmlError> {
        self.text()
            .trim()
            .parse()
            .map_err(|_| self.conversion_error("integer"))
    }

    pub fn as_float(&self) -> Result<f64, XmlError> {
        self.text()
            .trim()
            .parse()
            .map_err(|_| self.conversion_error("float"))
    }

    /// Serializes this element as a document with an XML declaration.
    pub fn to_xml(&self) -> Result<String, XmlError> {
        writer::write_document(self, false)
    }

    pub fn to_pretty_xml(&self) -> Result<String, XmlError> {
        writer::write_document(self, true)
    }

    /// Serializes this element alone, without a declaration.
    pub fn to_fragment(&self) -> Result<String, XmlError> {
        writer::write_fragment(self)
    }
}

/// Pre-order iterator over the element descendants of a node.
pub struct Descendants<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(Node::Element(element)) => {
                    self.stack.push(element.children.iter());
                    return Some(element);
                }
                Some(_) => continue,
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP: &str = "http://schemas.xmlsoap.org/soap/envelope/";

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <AddResponse xmlns="http://example.com/calc">
      <AddResult>3</AddResult>
      <!-- computed -->
      <Ratio><![CDATA[1.5]]></Ratio>
    </AddResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn parse_resolves_namespaces() {
        let root = Element::parse(RESPONSE).unwrap();
        assert_eq!(root.name(), "soap:Envelope");
        assert_eq!(root.local_name(), "Envelope");
        assert_eq!(root.namespace(), Some(SOAP));

        let response = root.find_first("AddResponse", &[]).unwrap();
        assert_eq!(response.namespace(), Some("http://example.com/calc"));
        let result = response.child("AddResult").unwrap();
        assert_eq!(result.namespace(), Some("http://example.com/calc"));
    }

    #[test]
    fn find_prefers_namespace_then_qualified_then_local() {
        let root = Element::parse(RESPONSE).unwrap();
        assert_eq!(root.find("Body", &[SOAP]).len(), 1);
        assert_eq!(root.find("soap:Body", &[]).len(), 1);
        assert_eq!(root.find("Body", &["urn:other"]).len(), 1);
        assert!(root.find("Missing", &[SOAP]).is_empty());
    }

    #[test]
    fn require_reports_missing_tags() {
        let root = Element::parse(RESPONSE).unwrap();
        match root.require("Fault", &[SOAP]) {
            Err(XmlError::TagNotFound { tag }) => assert_eq!(tag, "Fault"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn text_coercions() {
        let root = Element::parse(RESPONSE).unwrap();
        assert_eq!(root.find_first("AddResult", &[]).unwrap().as_int().unwrap(), 3);
        assert_eq!(root.find_first("Ratio", &[]).unwrap().as_float().unwrap(), 1.5);

        let body = root.find_first("Body", &[SOAP]).unwrap();
        assert!(matches!(
            body.find_first("AddResponse", &[]).unwrap().as_int(),
            Err(XmlError::Conversion { .. })
        ));
    }

    #[test]
    fn children_skip_text_and_comments() {
        let root = Element::parse(RESPONSE).unwrap();
        let response = root.find_first("AddResponse", &[]).unwrap();
        let names: Vec<_> = response.children().map(Element::local_name).collect();
        assert_eq!(names, ["AddResult", "Ratio"]);
        assert!(response
            .nodes()
            .iter()
            .any(|node| matches!(node, Node::Comment(text) if text.trim() == "computed")));
    }

    #[test]
    fn build_and_serialize() {
        let mut envelope = Element::new("soap:Envelope");
        envelope.set_attribute("xmlns:soap", SOAP);
        let body = envelope.add_child("soap:Body");
        assert_eq!(body.namespace(), Some(SOAP));
        let method = body.add_child_ns("echo", "urn:echo");
        method.add_child_text("text", "a < b");
        method.add_child("empty");
        method.add_comment("string");

        let xml = envelope.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<echo xmlns=\"urn:echo\"><text>a &lt; b</text><empty/><!--string--></echo>"));

        let reparsed = Element::parse(&xml).unwrap();
        let text = reparsed.find_first("text", &["urn:echo"]).unwrap();
        assert_eq!(text.text(), "a < b");
    }

    #[test]
    fn import_redeclares_missing_bindings() {
        let source =
            Element::parse(r#"<a xmlns:w="urn:wsse"><w:Security><w:Token>x</w:Token></w:Security></a>"#)
                .unwrap();
        let security = source.find_first("w:Security", &[]).unwrap();

        let mut header = Element::new("Header");
        let imported = header.import(security);
        assert_eq!(imported.attribute("xmlns:w"), Some("urn:wsse"));

        let reparsed = Element::parse(&header.to_fragment().unwrap()).unwrap();
        let token = reparsed.find_first("Token", &["urn:wsse"]).unwrap();
        assert_eq!(token.text(), "x");
    }

    #[test]
    fn find_first_mut_edits_in_place() {
        let mut root = Element::parse(RESPONSE).unwrap();
        root.find_first_mut("AddResult", &[])
            .unwrap()
            .set_attribute("id", "r1");
        assert_eq!(
            root.find_first("AddResult", &[]).unwrap().attribute("id"),
            Some("r1")
        );
    }

    #[test]
    fn qname_resolution() {
        let root = Element::parse(
            r#"<definitions xmlns:tns="urn:t" xmlns="urn:d"><part type="tns:Foo"/></definitions>"#,
        )
        .unwrap();
        let part = root.find_first("part", &[]).unwrap();
        assert_eq!(part.resolve_qname("tns:Foo"), (Some("urn:t"), "Foo"));
        assert_eq!(part.resolve_qname("Bar"), (Some("urn:d"), "Bar"));
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(Element::parse("<a><b></a>").is_err());
        assert!(matches!(Element::parse(""), Err(XmlError::EmptyDocument)));
    }
}
