use simplesoap_xml::{split_namespaced_name, Element};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

use crate::{
    dialect::{ArrayMarking, ServerDialect},
    error::Error,
    fetch::{self, Fetcher},
    types::{Descriptor, Field, Primitive, TypeId, TypeKind, TypeTable, ANY_FIELD, SOAP_ENC_NS, XSD_NAMESPACES},
};

/// Definition body as written, before references are followed.
#[derive(Debug)]
enum Shape {
    Fields {
        fields: Vec<Field>,
        base: Option<Descriptor>,
        array: bool,
    },
    Alias(Descriptor),
}

#[derive(Default)]
struct ShapeBuilder {
    fields: Vec<(Field, bool)>,
    base: Option<Descriptor>,
    alias: Option<Descriptor>,
}

/// Resolves a built-in type name: XSD types, SOAP-ENC types and
/// unprefixed names without a default namespace.
pub(crate) fn builtin(node: &Element, qname: &str) -> Option<Descriptor> {
    let (prefix, local) = split_namespaced_name(qname);
    let uri = node.namespace_uri(prefix.unwrap_or(""));

    let is_builtin = match uri {
        Some(uri) => XSD_NAMESPACES.contains(&uri) || uri == SOAP_ENC_NS,
        None => prefix.is_none(),
    };
    if !is_builtin {
        return None;
    }

    match Primitive::from_xsd(local) {
        Some(primitive) => Some(Descriptor::Primitive(primitive)),
        None if uri.is_some() => Some(Descriptor::AnyType),
        None => None,
    }
}

fn is_soap_enc_array(node: &Element, qname: &str) -> bool {
    let (prefix, local) = split_namespaced_name(qname);
    local == "Array"
        && (node.namespace_uri(prefix.unwrap_or("")) == Some(SOAP_ENC_NS)
            || matches!(prefix, Some("SOAP-ENC") | Some("soapenc")))
}

fn is_repeated(node: &Element) -> bool {
    match node.attribute("maxOccurs") {
        Some("unbounded") => true,
        Some(count) => count.parse::<u64>().map_or(false, |count| count > 1),
        None => false,
    }
}

pub(crate) fn required_attribute<'e>(node: &'e Element, attribute: &'static str) -> Result<&'e str, Error> {
    node.attribute(attribute).ok_or_else(|| Error::MissingAttribute {
        element: node.local_name().to_owned(),
        attribute,
    })
}

/// Collects `xs:schema` definitions into a [`TypeTable`].
///
/// Types may be referenced before they are defined; references become
/// placeholders in the table and are checked by [`SchemaResolver::finish`].
pub(crate) struct SchemaResolver<'a> {
    table: TypeTable,
    shapes: HashMap<TypeId, Shape>,
    dialect: &'a ServerDialect,
    fetcher: &'a dyn Fetcher,
    imported: HashSet<Url>,
}

impl<'a> SchemaResolver<'a> {
    pub(crate) fn new(dialect: &'a ServerDialect, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            table: TypeTable::default(),
            shapes: HashMap::new(),
            dialect,
            fetcher,
            imported: HashSet::new(),
        }
    }

    pub(crate) fn process_schema(&mut self, schema: &Element, base: &Url) -> Result<(), Error> {
        let target = schema.attribute("targetNamespace").unwrap_or_default();
        let qualified = schema.attribute("elementFormDefault") == Some("qualified");
        debug!(namespace = target, qualified, "processing schema");

        for child in schema.children() {
            match child.local_name() {
                "element" | "complexType" | "simpleType" => {
                    self.process_definition(child, target, qualified)?
                }
                "import" | "include" => {
                    if let Some(location) = child.attribute("schemaLocation") {
                        self.import(base, location)?;
                    }
                }
                "annotation" | "attribute" | "attributeGroup" | "group" | "notation"
                | "redefine" => {}
                other => return Err(Error::UnknownElementKind(other.to_owned())),
            }
        }

        Ok(())
    }

    fn import(&mut self, base: &Url, location: &str) -> Result<(), Error> {
        let url = fetch::resolve_location(base, location)?;
        if !self.imported.insert(url.clone()) {
            debug!(%url, "schema already imported");
            return Ok(());
        }

        let schema = fetch::fetch_document(self.fetcher, &url)?;
        if schema.local_name() != "schema" {
            warn!(%url, root = schema.name(), "imported document is not a schema");
            return Ok(());
        }
        self.process_schema(&schema, &url)
    }

    fn process_definition(
        &mut self,
        node: &Element,
        target: &str,
        qualified: bool,
    ) -> Result<(), Error> {
        let name = required_attribute(node, "name")?;
        let kind = match node.local_name() {
            "element" => TypeKind::Element,
            _ => TypeKind::Complex,
        };

        let id = self.table.intern(name, kind, target);
        let shape = match kind {
            TypeKind::Element => self.element_shape(node, name, target)?,
            TypeKind::Complex => self.type_shape(node, name, target)?,
        };

        self.table.def_mut(id).qualified = qualified;
        if self.shapes.contains_key(&id) {
            debug!(name, namespace = target, "duplicate definition ignored");
        } else {
            self.shapes.insert(id, shape);
        }
        Ok(())
    }

    fn element_shape(&mut self, node: &Element, owner: &str, target: &str) -> Result<Shape, Error> {
        if let Some(ty) = node.attribute("type") {
            return Ok(Shape::Alias(self.type_ref(node, ty, target)));
        }

        for child in node.children() {
            match child.local_name() {
                "complexType" => return self.complex_shape(child, owner, target),
                "simpleType" => return Ok(Shape::Alias(self.simple_descriptor(child, target))),
                _ => {}
            }
        }

        Ok(Shape::Alias(Descriptor::AnyType))
    }

    fn type_shape(&mut self, node: &Element, owner: &str, target: &str) -> Result<Shape, Error> {
        match node.local_name() {
            "complexType" => self.complex_shape(node, owner, target),
            "simpleType" => Ok(Shape::Alias(self.simple_descriptor(node, target))),
            other => Err(Error::UnknownElementKind(other.to_owned())),
        }
    }

    fn complex_shape(&mut self, node: &Element, owner: &str, target: &str) -> Result<Shape, Error> {
        let mut builder = ShapeBuilder::default();
        self.walk_content(node, owner, target, &mut builder)?;

        if let Some(alias) = builder.alias {
            return Ok(Shape::Alias(alias));
        }

        let container = match self.dialect.array_marking {
            ArrayMarking::Container => true,
            ArrayMarking::Field => false,
            ArrayMarking::Auto => builder.fields.len() == 1,
        };

        let mut array = false;
        let fields = builder
            .fields
            .into_iter()
            .map(|(field, repeated)| match (repeated, container) {
                (false, _) => field,
                (true, true) => {
                    array = true;
                    field
                }
                (true, false) => Field {
                    name: field.name,
                    descriptor: Descriptor::array(field.descriptor),
                },
            })
            .collect();

        Ok(Shape::Fields {
            fields,
            base: builder.base,
            array,
        })
    }

    fn walk_content(
        &mut self,
        node: &Element,
        owner: &str,
        target: &str,
        builder: &mut ShapeBuilder,
    ) -> Result<(), Error> {
        for child in node.children() {
            match child.local_name() {
                "sequence" | "all" | "choice" => self.walk_particles(child, owner, target, builder)?,
                "complexContent" | "simpleContent" => {
                    let simple = child.local_name() == "simpleContent";
                    for derivation in child.children() {
                        self.walk_derivation(derivation, simple, owner, target, builder)?;
                    }
                }
                "group" => debug!(owner, "model group references are not expanded"),
                _ => {}
            }
        }
        Ok(())
    }

    fn walk_derivation(
        &mut self,
        node: &Element,
        simple: bool,
        owner: &str,
        target: &str,
        builder: &mut ShapeBuilder,
    ) -> Result<(), Error> {
        let base = required_attribute(node, "base")?;

        match node.local_name() {
            "restriction" if is_soap_enc_array(node, base) => {
                let item = node
                    .descendants()
                    .find_map(|attribute| attribute.attribute_local("arrayType"))
                    .map(|array_type| {
                        let item = array_type.split('[').next().unwrap_or(array_type);
                        self.type_ref(node, item, target)
                    })
                    .unwrap_or(Descriptor::AnyType);
                builder.alias = Some(Descriptor::array(Descriptor::sequence([(ANY_FIELD, item)])));
            }
            _ if simple => builder.alias = Some(self.type_ref(node, base, target)),
            "extension" => {
                builder.base = Some(self.type_ref(node, base, target));
                self.walk_content(node, owner, target, builder)?;
            }
            "restriction" => self.walk_content(node, owner, target, builder)?,
            _ => {}
        }
        Ok(())
    }

    fn walk_particles(
        &mut self,
        node: &Element,
        owner: &str,
        target: &str,
        builder: &mut ShapeBuilder,
    ) -> Result<(), Error> {
        for child in node.children() {
            match child.local_name() {
                "element" => {
                    let field = self.element_field(child, owner, target)?;
                    builder.fields.push(field);
                }
                "sequence" | "all" | "choice" => self.walk_particles(child, owner, target, builder)?,
                "any" => builder.fields.push((
                    Field {
                        name: ANY_FIELD.to_owned(),
                        descriptor: Descriptor::AnyType,
                    },
                    false,
                )),
                _ => {}
            }
        }
        Ok(())
    }

    fn element_field(
        &mut self,
        node: &Element,
        owner: &str,
        target: &str,
    ) -> Result<(Field, bool), Error> {
        let mut repeated = is_repeated(node);

        if let Some(reference) = node.attribute("ref") {
            let (uri, local) = node.resolve_qname(reference);
            let id = self.table.intern(local, TypeKind::Element, uri.unwrap_or(target));
            let field = Field {
                name: local.to_owned(),
                descriptor: Descriptor::Ref(id),
            };
            return Ok((field, repeated));
        }

        let name = required_attribute(node, "name")?;
        let descriptor = if let Some(ty) = node.attribute("type") {
            if is_soap_enc_array(node, ty) {
                repeated = true;
                Descriptor::AnyType
            } else {
                self.type_ref(node, ty, target)
            }
        } else if let Some(inner) = node.child("complexType") {
            let anonymous = format!("{}/{}", owner, name);
            let shape = self.complex_shape(inner, &anonymous, target)?;
            let id = self.table.intern(&anonymous, TypeKind::Complex, target);
            self.shapes.insert(id, shape);
            Descriptor::Ref(id)
        } else if let Some(inner) = node.child("simpleType") {
            self.simple_descriptor(inner, target)
        } else {
            Descriptor::AnyType
        };

        let field = Field {
            name: name.to_owned(),
            descriptor,
        };
        Ok((field, repeated))
    }

    fn simple_descriptor(&mut self, node: &Element, target: &str) -> Descriptor {
        match node.child("restriction") {
            Some(restriction) => match restriction.attribute("base") {
                Some(base) => self.type_ref(restriction, base, target),
                None => Descriptor::Primitive(Primitive::String),
            },
            None => Descriptor::Primitive(Primitive::String),
        }
    }

    /// Built-in names become primitives, anything else a reference that may
    /// be defined later.
    fn type_ref(&mut self, node: &Element, qname: &str, target: &str) -> Descriptor {
        if let Some(descriptor) = builtin(node, qname) {
            return descriptor;
        }

        let (uri, local) = node.resolve_qname(qname);
        let uri = match uri {
            Some(uri) => uri,
            None => {
                if qname.contains(':') {
                    warn!(qname, "unbound prefix, assuming the target namespace");
                }
                target
            }
        };
        Descriptor::Ref(self.table.intern(local, TypeKind::Complex, uri))
    }

    fn fallback_for(&self, id: TypeId) -> Option<TypeId> {
        let name = self.table.name(id);
        let kind = self.table.def(id).key.kind;
        let defined = |other: &TypeId| self.shapes.contains_key(other) && self.table.name(*other) == name;

        self.table
            .ids()
            .filter(defined)
            .find(|other| self.table.def(*other).key.kind == kind)
            .or_else(|| self.table.ids().find(defined))
    }

    /// Checks every reference, merges extension bases and collapses aliases.
    pub(crate) fn finish(mut self) -> Result<TypeTable, Error> {
        let undefined: Vec<TypeId> = self
            .table
            .ids()
            .filter(|id| !self.shapes.contains_key(id))
            .collect();

        for id in undefined {
            match self.fallback_for(id) {
                Some(other) => {
                    debug!(
                        name = self.table.name(id),
                        namespace = self.table.namespace(id),
                        found = self.table.namespace(other),
                        "resolved reference outside its namespace"
                    );
                    self.shapes.insert(id, Shape::Alias(Descriptor::Ref(other)));
                }
                None => {
                    return Err(Error::UnresolvedType {
                        name: self.table.name(id).to_owned(),
                        namespace: self.table.namespace(id).to_owned(),
                    })
                }
            }
        }

        let mut visiting = HashSet::new();
        let mut done = HashMap::new();
        for id in self.table.ids() {
            self.finalize(id, &mut visiting, &mut done)?;
        }

        for (id, body) in done {
            self.table.def_mut(id).body = Some(body);
        }
        debug!(types = self.table.len(), "schema resolved");
        Ok(self.table)
    }

    fn finalize(
        &self,
        id: TypeId,
        visiting: &mut HashSet<TypeId>,
        done: &mut HashMap<TypeId, Descriptor>,
    ) -> Result<Descriptor, Error> {
        if let Some(body) = done.get(&id) {
            return Ok(body.clone());
        }
        if !visiting.insert(id) {
            return Err(Error::CyclicDefinition(self.table.name(id).to_owned()));
        }

        let body = match self.shapes.get(&id) {
            Some(Shape::Alias(descriptor)) => self.expand(descriptor, visiting, done)?,
            Some(Shape::Fields {
                fields,
                base,
                array,
            }) => {
                let mut merged = match base {
                    Some(base) => match self.expand(base, visiting, done)? {
                        Descriptor::Sequence(fields) => fields,
                        Descriptor::Array(inner) => inner.fields().to_vec(),
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };

                for field in fields {
                    match merged.iter_mut().find(|existing| existing.name == field.name) {
                        Some(existing) => existing.descriptor = field.descriptor.clone(),
                        None => merged.push(field.clone()),
                    }
                }

                let body = Descriptor::Sequence(merged);
                if *array {
                    Descriptor::array(body)
                } else {
                    body
                }
            }
            None => {
                return Err(Error::UnresolvedType {
                    name: self.table.name(id).to_owned(),
                    namespace: self.table.namespace(id).to_owned(),
                })
            }
        };

        visiting.remove(&id);
        done.insert(id, body.clone());
        Ok(body)
    }

    /// Alias and base edges are followed, field references are not, so
    /// recursive structures stay references.
    fn expand(
        &self,
        descriptor: &Descriptor,
        visiting: &mut HashSet<TypeId>,
        done: &mut HashMap<TypeId, Descriptor>,
    ) -> Result<Descriptor, Error> {
        match descriptor {
            Descriptor::Ref(target) => self.finalize(*target, visiting, done),
            other => Ok(other.clone()),
        }
    }
}
