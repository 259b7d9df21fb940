use simplesoap_wsdl::{
    dialect::ServerDialect,
    types::{Descriptor, Field, TypeTable, ANY_FIELD},
};
use simplesoap_xml::{Element, Node};
use tracing::debug;

use crate::value::Value;

/// Element name for `name` under `prefix`, and the prefix its children
/// inherit. Names that carry their own prefix keep it and pass nothing on.
fn qualify<'p>(name: &str, prefix: Option<&'p str>) -> (String, Option<&'p str>) {
    match prefix {
        _ if name.contains(':') => (name.to_owned(), None),
        Some(prefix) => (format!("{}:{}", prefix, name), Some(prefix)),
        None => (name.to_owned(), None),
    }
}

fn copy_content(target: &mut Element, source: &Element) {
    for node in source.nodes() {
        match node {
            Node::Element(element) => {
                target.import(element);
            }
            Node::Text(text) => target.add_text(text.clone()),
            Node::Comment(text) => target.add_comment(text.clone()),
        }
    }
}

/// Writes native values into element trees, guided by schema descriptors
/// when they are known.
pub struct Marshaller<'a> {
    types: &'a TypeTable,
    dialect: &'a ServerDialect,
}

impl<'a> Marshaller<'a> {
    pub fn new(types: &'a TypeTable, dialect: &'a ServerDialect) -> Self {
        Self { types, dialect }
    }

    /// Appends `value` to `parent` as element `name`. Never fails: shapes
    /// without a better rendering fall back to their text.
    pub fn marshal(
        &self,
        parent: &mut Element,
        name: &str,
        value: &Value,
        hint: Option<&Descriptor>,
        prefix: Option<&str>,
    ) {
        let (tag, inherited) = qualify(name, prefix);

        match value {
            Value::Map(_) | Value::Pairs(_) => {
                let child = parent.add_child(tag);
                self.marshal_entries(child, value, hint, inherited);
            }
            Value::List(items) => self.marshal_list(parent, name, items, hint, prefix),
            Value::Null => {
                parent.add_child(tag);
            }
            Value::Type(primitive) => {
                parent.add_child(tag).add_comment(primitive.xsd_name());
            }
            Value::Xml(element) => copy_content(parent.add_child(tag), element),
            scalar => {
                parent.add_child_text(tag, scalar.to_text().unwrap_or_default());
            }
        }
    }

    /// Appends the entries of a map or pair list directly under `node`.
    pub fn marshal_entries(
        &self,
        node: &mut Element,
        value: &Value,
        hint: Option<&Descriptor>,
        prefix: Option<&str>,
    ) {
        for (key, entry) in value.entries() {
            self.marshal(node, key, entry, self.field_hint(hint, key), prefix);
        }
    }

    fn field_hint<'h>(&'h self, hint: Option<&'h Descriptor>, key: &str) -> Option<&'h Descriptor> {
        self.types.entries(hint?).field(key)
    }

    fn item_hint<'h>(&'h self, hint: Option<&'h Descriptor>) -> Option<&'h Descriptor> {
        hint.map(|hint| match self.types.resolve(hint) {
            Descriptor::Array(item) => item.as_ref(),
            other => other,
        })
    }

    /// Lists of mappings become one wrapper holding every item, or one
    /// wrapper per item when the items are wide, the dialect groups arrays,
    /// or the field itself repeats. Lists of scalars repeat the tag.
    fn marshal_list(
        &self,
        parent: &mut Element,
        name: &str,
        items: &[Value],
        hint: Option<&Descriptor>,
        prefix: Option<&str>,
    ) {
        let (tag, inherited) = qualify(name, prefix);
        let item_hint = self.item_hint(hint);

        if items.is_empty() {
            parent.add_child(tag);
            return;
        }

        if !items.iter().all(Value::is_mapping) {
            for item in items {
                self.marshal(parent, name, item, item_hint, prefix);
            }
            return;
        }

        if self.wraps_each_item(items, hint) {
            for item in items {
                let wrapper = parent.add_child(tag.clone());
                self.marshal_entries(wrapper, item, item_hint, inherited);
            }
        } else {
            let wrapper = parent.add_child(tag);
            for item in items {
                self.marshal_entries(wrapper, item, item_hint, inherited);
            }
        }
    }

    fn wraps_each_item(&self, items: &[Value], hint: Option<&Descriptor>) -> bool {
        let widest = items.iter().map(Value::len).max().unwrap_or_default();
        let field_level = matches!(hint, Some(Descriptor::Array(_)));
        let declared = match hint.map(|hint| self.types.resolve(hint)) {
            Some(Descriptor::Array(item)) => self.types.resolve(item).fields().len(),
            _ => 0,
        };

        field_level
            || self.dialect.wraps_each_item(widest)
            || self.dialect.wraps_each_item(declared)
    }

    /// Reorders a native value into the declared field order, recursively.
    /// Unknown keys and nulls are dropped unless a wildcard accepts them.
    pub fn sort_by_descriptor(&self, value: &Value, descriptor: &Descriptor) -> Value {
        match (value, self.types.resolve(descriptor)) {
            (Value::List(items), Descriptor::Array(item)) => Value::List(
                items
                    .iter()
                    .map(|entry| self.sort_by_descriptor(entry, item))
                    .collect(),
            ),
            (Value::List(items), sequence @ Descriptor::Sequence(_)) => Value::List(
                items
                    .iter()
                    .map(|entry| self.sort_by_descriptor(entry, sequence))
                    .collect(),
            ),
            (value, Descriptor::Array(item)) if value.is_mapping() => {
                self.sort_by_descriptor(value, item)
            }
            (value, Descriptor::Sequence(fields)) if value.is_mapping() => {
                self.sort_entries(value, fields)
            }
            (value, _) => value.clone(),
        }
    }

    fn sort_entries(&self, value: &Value, fields: &[Field]) -> Value {
        let declared = |key: &str| fields.iter().any(|field| field.name == key);
        let wildcard = declared(ANY_FIELD);

        let mut sorted = Vec::with_capacity(value.len());
        for field in fields {
            if field.name == ANY_FIELD {
                sorted.extend(
                    value
                        .entries()
                        .filter(|(key, entry)| !declared(*key) && !entry.is_null())
                        .map(|(key, entry)| (key.to_owned(), entry.clone())),
                );
                continue;
            }

            for (key, entry) in value.entries().filter(|(key, _)| *key == field.name) {
                if !entry.is_null() {
                    sorted.push((key.to_owned(), self.sort_by_descriptor(entry, &field.descriptor)));
                }
            }
        }

        if !wildcard {
            for (key, _) in value.entries().filter(|(key, _)| !declared(*key)) {
                debug!(key, "dropping argument without a declared field");
            }
        }

        match value {
            Value::Pairs(_) => Value::Pairs(sorted),
            _ => Value::Map(sorted.into_iter().collect()),
        }
    }
}
