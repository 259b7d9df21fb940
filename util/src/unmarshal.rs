use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use simplesoap_wsdl::{
    dialect::ServerDialect,
    types::{Descriptor, Field, Primitive, TypeKind, TypeTable, SOAP_ENC_NS, XSD_NAMESPACES, XSI_NS},
};
use simplesoap_xml::{split_namespaced_name, Element};
use tracing::{debug, trace};

use crate::{
    error::Error,
    value::{Map, Value},
};

fn strip_timezone(value: &str) -> &str {
    if let Some(stripped) = value.strip_suffix('Z') {
        return stripped;
    }

    let bytes = value.as_bytes();
    let len = bytes.len();
    if len > 6 && matches!(bytes[len - 6], b'+' | b'-') && bytes[len - 3] == b':' {
        return value.get(..len - 6).unwrap_or(value);
    }
    value
}

fn convert(node: &Element, primitive: Primitive) -> Result<Value, Error> {
    let text = node.text();
    if primitive == Primitive::String {
        return Ok(Value::String(text));
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let error = || Error::ValueConversion {
        tag: node.local_name().to_owned(),
        value: trimmed.to_owned(),
        expected: primitive.xsd_name(),
    };

    Ok(match primitive {
        Primitive::String => Value::String(text.clone()),
        Primitive::Int
        | Primitive::Long
        | Primitive::Integer
        | Primitive::Short
        | Primitive::Byte => Value::Int(trimmed.parse().map_err(|_| error())?),
        Primitive::Float | Primitive::Double => Value::Float(trimmed.parse().map_err(|_| error())?),
        Primitive::Boolean => Value::Bool(match trimmed {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(error()),
        }),
        Primitive::Decimal => {
            trimmed.parse::<f64>().map_err(|_| error())?;
            Value::Decimal(trimmed.to_owned())
        }
        Primitive::Date => Value::Date(
            NaiveDate::parse_from_str(strip_timezone(trimmed), "%Y-%m-%d").map_err(|_| error())?,
        ),
        Primitive::Time => Value::Time(
            NaiveTime::parse_from_str(strip_timezone(trimmed), "%H:%M:%S%.f")
                .map_err(|_| error())?,
        ),
        Primitive::DateTime => Value::DateTime(
            NaiveDateTime::parse_from_str(strip_timezone(trimmed), "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(|_| error())?,
        ),
        Primitive::Base64Binary => Value::Bytes(
            STANDARD
                .decode(trimmed.split_whitespace().collect::<String>())
                .map_err(|_| error())?,
        ),
    })
}

fn xsi_type(node: &Element) -> Option<&str> {
    node.attributes()
        .find(|(name, _)| {
            let (prefix, local) = split_namespaced_name(name);
            local == "type" && prefix.and_then(|prefix| node.namespace_uri(prefix)) == Some(XSI_NS)
        })
        .map(|(_, value)| value)
}

fn is_blank(node: &Element) -> bool {
    !node.has_children() && node.text().trim().is_empty()
}

/// Reads element trees back into native values.
pub struct Unmarshaller<'a> {
    types: &'a TypeTable,
    dialect: &'a ServerDialect,
    strict: bool,
    root: Option<&'a Element>,
}

impl<'a> Unmarshaller<'a> {
    /// A strict unmarshaller refuses tags it has no type for; a lenient one
    /// reads them as text.
    pub fn new(types: &'a TypeTable, dialect: &'a ServerDialect, strict: bool) -> Self {
        Self {
            types,
            dialect,
            strict,
            root: None,
        }
    }

    /// Document searched for the targets of `href` references.
    pub fn with_root(mut self, root: &'a Element) -> Self {
        self.root = Some(root);
        self
    }

    /// Converts the children of `node` against a sequence descriptor.
    pub fn unmarshal(&self, node: &Element, descriptor: &Descriptor) -> Result<Map, Error> {
        let children: Vec<&Element> = node.children().collect();
        self.unmarshal_nodes(&children, descriptor)
    }

    /// Under a container every field may repeat, so each one reads as a
    /// list even when it occurs once.
    fn unmarshal_nodes(&self, nodes: &[&Element], descriptor: &Descriptor) -> Result<Map, Error> {
        let container = matches!(self.types.resolve(descriptor), Descriptor::Array(_));
        let fields = self.types.entries(descriptor);

        let mut groups: IndexMap<&str, Vec<&Element>> = IndexMap::new();
        for node in nodes {
            groups.entry(node.local_name()).or_default().push(node);
        }

        let mut map = Map::with_capacity(groups.len());
        for (name, occurrences) in groups {
            let value = match fields.field(name) {
                Some(field) => match self.types.resolve(field) {
                    Descriptor::Array(item) => Value::List(self.unmarshal_array(&occurrences, item)?),
                    _ if container => Value::List(self.unmarshal_array(&occurrences, field)?),
                    _ => self.each(&occurrences, |node| self.unmarshal_element(node, field))?,
                },
                None => self.each(&occurrences, |node| self.untyped(node))?,
            };
            map.insert(name.to_owned(), value);
        }

        Ok(map)
    }

    /// One value for a single occurrence, a list for repeated tags.
    fn each<F>(&self, occurrences: &[&Element], convert: F) -> Result<Value, Error>
    where
        F: Fn(&Element) -> Result<Value, Error>,
    {
        match occurrences {
            [single] => convert(*single),
            _ => occurrences
                .iter()
                .map(|node| convert(*node))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
        }
    }

    /// Collects every occurrence of an array field. Wide items, or any item
    /// under a grouping dialect, are one element each; narrow items are one
    /// per child element. Blank occurrences stand for an empty array.
    fn unmarshal_array(&self, occurrences: &[&Element], item: &Descriptor) -> Result<Vec<Value>, Error> {
        let mut items = Vec::new();

        match self.types.resolve(item) {
            sequence @ Descriptor::Sequence(fields) => {
                let grouped = self.dialect.wraps_each_item(fields.len());
                for occurrence in occurrences {
                    let occurrence = self.dereference(occurrence)?;
                    if is_blank(occurrence) {
                        continue;
                    }

                    if grouped {
                        items.push(Value::Map(self.unmarshal(occurrence, sequence)?));
                    } else {
                        for child in occurrence.children() {
                            let child = self.dereference(child)?;
                            items.push(Value::Map(self.unmarshal_nodes(&[child], sequence)?));
                        }
                    }
                }
            }
            _ => {
                for occurrence in occurrences {
                    let occurrence = self.dereference(occurrence)?;
                    if !is_blank(occurrence) {
                        items.push(self.unmarshal_element(occurrence, item)?);
                    }
                }
            }
        }

        Ok(items)
    }

    /// Converts one element against `descriptor`.
    pub fn unmarshal_element(&self, node: &Element, descriptor: &Descriptor) -> Result<Value, Error> {
        let node = self.dereference(node)?;

        match self.types.resolve(descriptor) {
            Descriptor::Primitive(primitive) => convert(node, *primitive),
            sequence @ Descriptor::Sequence(_) => {
                if node.has_children() {
                    Ok(Value::Map(self.unmarshal(node, sequence)?))
                } else {
                    Ok(Value::Null)
                }
            }
            Descriptor::Array(item) => Ok(Value::List(self.unmarshal_array(&[node], item)?)),
            Descriptor::Tuple(items) => self.unmarshal_tuple(node, items),
            Descriptor::AnyType | Descriptor::Ref(_) => Ok(Value::Xml(node.clone())),
        }
    }

    /// Tuples of mappings read as one merged mapping; other tuples pair
    /// children with items positionally.
    fn unmarshal_tuple(&self, node: &Element, items: &[Descriptor]) -> Result<Value, Error> {
        let resolved: Vec<&Descriptor> = items.iter().map(|item| self.types.resolve(item)).collect();

        if resolved
            .iter()
            .all(|descriptor| matches!(descriptor, Descriptor::Sequence(_)))
        {
            let fields: Vec<Field> = resolved
                .iter()
                .flat_map(|descriptor| descriptor.fields().iter().cloned())
                .collect();
            return Ok(Value::Map(self.unmarshal(node, &Descriptor::Sequence(fields))?));
        }

        node.children()
            .zip(items)
            .map(|(child, item)| self.unmarshal_element(child, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }

    /// A tag the schema says nothing about: trust `xsi:type` when present,
    /// else fail in strict mode or read it as text or nested entries.
    fn untyped(&self, node: &Element) -> Result<Value, Error> {
        let node = self.dereference(node)?;

        if let Some(qname) = xsi_type(node) {
            let (uri, local) = node.resolve_qname(qname);
            if uri == Some(SOAP_ENC_NS) && local == "Array" {
                return node
                    .children()
                    .map(|child| self.untyped(child))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List);
            }

            return match self.xsi_descriptor(uri, local) {
                Some(descriptor) => self.unmarshal_element(node, &descriptor),
                None => {
                    debug!(tag = node.local_name(), xsi_type = qname, "unknown xsi:type, keeping raw content");
                    Ok(Value::Xml(node.clone()))
                }
            };
        }

        if self.strict {
            return Err(Error::TypeNotFound {
                tag: node.local_name().to_owned(),
            });
        }

        if node.has_children() {
            Ok(Value::Map(self.unmarshal(node, &Descriptor::Sequence(Vec::new()))?))
        } else {
            let text = node.text();
            Ok(if text.trim().is_empty() {
                Value::Null
            } else {
                Value::String(text)
            })
        }
    }

    fn xsi_descriptor(&self, uri: Option<&str>, local: &str) -> Option<Descriptor> {
        match uri {
            Some(uri) if XSD_NAMESPACES.contains(&uri) || uri == SOAP_ENC_NS => {
                if local == "anyType" {
                    Some(Descriptor::AnyType)
                } else {
                    Primitive::from_xsd(local).map(Descriptor::Primitive)
                }
            }
            uri => self
                .types
                .lookup(local, TypeKind::Complex, uri.unwrap_or_default())
                .or_else(|| self.types.find_by_name(local, TypeKind::Complex))
                .map(Descriptor::Ref),
        }
    }

    /// Follows `href="#id"` to the element carrying that `id`.
    fn dereference<'n>(&self, node: &'n Element) -> Result<&'n Element, Error>
    where
        'a: 'n,
    {
        let Some(id) = node.attribute("href").and_then(|href| href.strip_prefix('#')) else {
            return Ok(node);
        };

        let root = self.root.ok_or_else(|| {
            Error::MalformedMessage(format!("reference #{} outside of a document", id))
        })?;
        trace!(id, "following multiRef");

        root.descendants()
            .find(|element| element.attribute("id") == Some(id))
            .ok_or_else(|| Error::MalformedMessage(format!("unresolved reference #{}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string() -> Descriptor {
        Descriptor::Primitive(Primitive::String)
    }

    fn read(xml: &str, descriptor: &Descriptor) -> Result<Map, Error> {
        let root = Element::parse(xml).unwrap();
        let types = TypeTable::default();
        let dialect = ServerDialect::default();
        Unmarshaller::new(&types, &dialect, true)
            .with_root(&root)
            .unmarshal(&root, descriptor)
    }

    #[test]
    fn booleans_read_as_booleans() {
        let descriptor = Descriptor::sequence([
            ("name", string()),
            ("value", Descriptor::Primitive(Primitive::Boolean)),
        ]);
        let map = read("<r><name>foo</name><value>true</value></r>", &descriptor).unwrap();
        assert_eq!(map["name"], Value::from("foo"));
        assert_eq!(map["value"], Value::Bool(true));

        let map = read("<r><value>0</value></r>", &descriptor).unwrap();
        assert_eq!(map["value"], Value::Bool(false));
    }

    #[test]
    fn repeated_items_stay_a_list() {
        let descriptor = Descriptor::sequence([(
            "c",
            Descriptor::array(Descriptor::sequence([("d", string())])),
        )]);

        let map = read("<r><c><d>hola</d></c><c><d>chau</d></c></r>", &descriptor).unwrap();
        assert_eq!(
            map["c"],
            Value::list([Value::map([("d", "hola")]), Value::map([("d", "chau")])])
        );

        let map = read("<r><c><d>solo</d></c></r>", &descriptor).unwrap();
        assert_eq!(map["c"], Value::list([Value::map([("d", "solo")])]));

        let map = read("<r><c/></r>", &descriptor).unwrap();
        assert_eq!(map["c"], Value::List(Vec::new()));
    }

    #[test]
    fn grouping_dialect_reads_one_item_per_wrapper() {
        let descriptor = Descriptor::sequence([(
            "c",
            Descriptor::array(Descriptor::sequence([("d", string())])),
        )]);
        let root = Element::parse("<r><c><d>hola</d><d>chau</d></c></r>").unwrap();
        let types = TypeTable::default();

        let dotnet = ServerDialect::default();
        let map = Unmarshaller::new(&types, &dotnet, true)
            .unmarshal(&root, &descriptor)
            .unwrap();
        assert_eq!(map["c"].len(), 2);

        let jetty = ServerDialect::named("jetty").unwrap();
        let map = Unmarshaller::new(&types, &jetty, true)
            .unmarshal(&root, &descriptor)
            .unwrap();
        assert_eq!(
            map["c"],
            Value::list([Value::map([("d", Value::list(["hola", "chau"]))])])
        );
    }

    #[test]
    fn missing_types_depend_on_strictness() {
        let descriptor = Descriptor::sequence([("known", string())]);
        let xml = "<r><known>a</known><other>b</other><empty/></r>";

        match read(xml, &descriptor) {
            Err(Error::TypeNotFound { tag }) => assert_eq!(tag, "other"),
            other => panic!("unexpected {:?}", other),
        }

        let root = Element::parse(xml).unwrap();
        let types = TypeTable::default();
        let dialect = ServerDialect::default();
        let map = Unmarshaller::new(&types, &dialect, false)
            .unmarshal(&root, &descriptor)
            .unwrap();
        assert_eq!(map["other"], Value::from("b"));
        assert_eq!(map["empty"], Value::Null);
        assert!(!map.contains_key("absent"));
    }

    #[test]
    fn conversion_failures_name_the_tag() {
        let descriptor = Descriptor::sequence([("count", Descriptor::Primitive(Primitive::Int))]);
        match read("<r><count>many</count></r>", &descriptor) {
            Err(Error::ValueConversion { tag, value, expected }) => {
                assert_eq!(tag, "count");
                assert_eq!(value, "many");
                assert_eq!(expected, "int");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn primitives_convert() {
        let descriptor = Descriptor::sequence([
            ("n", Descriptor::Primitive(Primitive::Long)),
            ("f", Descriptor::Primitive(Primitive::Double)),
            ("d", Descriptor::Primitive(Primitive::Date)),
            ("t", Descriptor::Primitive(Primitive::DateTime)),
            ("b", Descriptor::Primitive(Primitive::Base64Binary)),
            ("x", Descriptor::Primitive(Primitive::Decimal)),
            ("blank", Descriptor::Primitive(Primitive::Int)),
        ]);
        let map = read(
            "<r><n> 42 </n><f>INF</f><d>2021-12-03Z</d><t>2021-12-03T08:05:09.5+02:00</t>\
             <b>c29h\ncA==</b><x>10.50</x><blank/></r>",
            &descriptor,
        )
        .unwrap();

        assert_eq!(map["n"], Value::Int(42));
        assert_eq!(map["f"], Value::Float(f64::INFINITY));
        assert_eq!(map["d"], Value::Date(NaiveDate::from_ymd_opt(2021, 12, 3).unwrap()));
        assert_eq!(
            map["t"],
            Value::DateTime(
                NaiveDate::from_ymd_opt(2021, 12, 3)
                    .unwrap()
                    .and_hms_milli_opt(8, 5, 9, 500)
                    .unwrap()
            )
        );
        assert_eq!(map["b"], Value::Bytes(b"soap".to_vec()));
        assert_eq!(map["x"], Value::Decimal("10.50".to_owned()));
        assert_eq!(map["blank"], Value::Null);
    }

    #[test]
    fn any_type_keeps_the_element() {
        let descriptor = Descriptor::sequence([("schema", Descriptor::AnyType)]);
        let map = read("<r><schema><element name=\"x\"/></schema></r>", &descriptor).unwrap();
        let element = map["schema"].as_element().unwrap();
        assert_eq!(element.child("element").unwrap().attribute("name"), Some("x"));
    }

    #[test]
    fn tuples_of_mappings_merge() {
        let descriptor = Descriptor::sequence([(
            "both",
            Descriptor::Tuple(vec![
                Descriptor::sequence([("a", string())]),
                Descriptor::sequence([("b", Descriptor::Primitive(Primitive::Int))]),
            ]),
        )]);
        let map = read("<r><both><a>x</a><b>1</b></both></r>", &descriptor).unwrap();
        assert_eq!(map["both"], Value::map([("a", Value::from("x")), ("b", Value::from(1))]));
    }

    #[test]
    fn containers_read_single_items_as_lists() {
        let mut types = TypeTable::default();
        let names = types.define(
            "ArrayOfName",
            TypeKind::Complex,
            "urn:t",
            Descriptor::array(Descriptor::sequence([("name", string())])),
        );
        let root = Element::parse("<r><name>ann</name></r>").unwrap();
        let dialect = ServerDialect::default();
        let map = Unmarshaller::new(&types, &dialect, true)
            .unmarshal(&root, &Descriptor::Ref(names))
            .unwrap();
        assert_eq!(map["name"], Value::list(["ann"]));
    }

    #[test]
    fn self_referencing_types_read_to_any_depth() {
        let mut types = TypeTable::default();
        let node = types.intern("Node", TypeKind::Complex, "urn:t");
        types.define(
            "Node",
            TypeKind::Complex,
            "urn:t",
            Descriptor::sequence([
                ("value", Descriptor::Primitive(Primitive::Int)),
                ("next", Descriptor::Ref(node)),
            ]),
        );

        let root = Element::parse(
            "<r><head><value>1</value><next><value>2</value><next><value>3</value></next></next></head></r>",
        )
        .unwrap();
        let dialect = ServerDialect::default();
        let map = Unmarshaller::new(&types, &dialect, true)
            .unmarshal(&root, &Descriptor::sequence([("head", Descriptor::Ref(node))]))
            .unwrap();

        let third = map["head"].get("next").and_then(|next| next.get("next")).unwrap();
        assert_eq!(third.get("value"), Some(&Value::Int(3)));
        assert!(third.get("next").is_none());
    }

    #[test]
    fn timezones_are_dropped() {
        assert_eq!(strip_timezone("08:05:09Z"), "08:05:09");
        assert_eq!(strip_timezone("2021-12-03-05:00"), "2021-12-03");
        assert_eq!(strip_timezone("2021-12-03"), "2021-12-03");
        assert_eq!(strip_timezone("08:05:09"), "08:05:09");
    }
}
