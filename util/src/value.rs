use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexMap;
use simplesoap_wsdl::types::Primitive;
use simplesoap_xml::Element;

pub type Map = IndexMap<String, Value>;

/// Native data exchanged with a service. Schema descriptors describe the
/// expected shape; values carry what is actually sent or received.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Kept as text to avoid losing precision.
    Decimal(String),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    Map(Map),
    List(Vec<Value>),
    /// Ordered entries that may repeat a key.
    Pairs(Vec<(String, Value)>),
    /// Raw content for untyped elements.
    Xml(Element),
    /// A type placeholder without a value, rendered as a comment.
    Type(Primitive),
}

impl Value {
    /// Builds a map from `(key, value)` pairs, keeping their order.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Maps and pair lists both render as a nested element.
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Map(_) | Self::Pairs(_))
    }

    /// Entries of a map or pair list in order.
    pub fn entries(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
        match self {
            Self::Map(map) => Box::new(map.iter().map(|(key, value)| (key.as_str(), value))),
            Self::Pairs(pairs) => Box::new(pairs.iter().map(|(key, value)| (key.as_str(), value))),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Map(map) => map.len(),
            Self::Pairs(pairs) => pairs.len(),
            Self::List(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First entry named `key` of a map or pair list.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(map) => map.get(key),
            Self::Pairs(pairs) => pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(string) | Self::Decimal(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            Self::Decimal(value) => value.parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Xml(element) => Some(element),
            _ => None,
        }
    }

    /// Wire text of a scalar. Containers have none.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => format_float(*value),
            Self::Decimal(value) | Self::String(value) => value.clone(),
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
            Self::Time(time) if time.nanosecond() != 0 => time.format("%H:%M:%S%.6f").to_string(),
            Self::Time(time) => time.format("%H:%M:%S").to_string(),
            Self::DateTime(datetime) if datetime.nanosecond() != 0 => {
                datetime.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
            }
            Self::DateTime(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Self::Bytes(bytes) => STANDARD.encode(bytes),
            Self::Map(_) | Self::List(_) | Self::Pairs(_) | Self::Xml(_) | Self::Type(_) => {
                return None
            }
        })
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{}INF", sign)
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    Vec<u8> => Bytes,
    Map => Map,
    Element => Xml,
    Primitive => Type,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<(String, Value)>> for Value {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        Self::Pairs(pairs)
    }
}
