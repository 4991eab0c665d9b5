use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use time::OffsetDateTime;

/// A runtime value snapshot as seen by the debugger.
///
/// Scalars and containers are captured by value. Pointers and interfaces hold a
/// [`Reference`], which is shared and can be re-pointed, so aliasing and cyclic
/// object graphs survive the trip through the contract.
#[derive(Clone, Debug)]
pub struct Value {
    pub type_name: String,
    pub kind: ValueKind,
}

#[derive(Clone, Debug)]
pub enum ValueKind {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex { re: f64, im: f64 },
    String(Arc<str>),
    /// Wall-clock timestamp struct.
    Timestamp(OffsetDateTime),
    Pointer(Option<Reference>),
    Interface(Option<Reference>),
    Array(Arc<[Value]>),
    Slice(Option<Arc<[Value]>>),
    Struct(Arc<[NamedValue]>),
    Map(Option<Arc<[(Value, Value)]>>),
    Chan { nil: bool },
    Func { nil: bool },
    /// Anything the engine cannot describe further, with its textual form.
    Opaque(Arc<str>),
}

#[derive(Clone, Debug)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Shared, re-targetable pointee cell.
#[derive(Clone)]
pub struct Reference(Arc<RwLock<Value>>);

impl Reference {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Reference {
    // Never print the pointee: the graph may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({:p})", Arc::as_ptr(&self.0))
    }
}

impl Value {
    pub fn new(type_name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::new("bool", ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new("int", ValueKind::Int(value))
    }

    pub fn uint(value: u64) -> Self {
        Self::new("uint", ValueKind::Uint(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new("float64", ValueKind::Float(value))
    }

    pub fn string(value: &str) -> Self {
        Self::new("string", ValueKind::String(Arc::from(value)))
    }

    pub fn pointer_to(type_name: impl Into<String>, pointee: Value) -> Self {
        Self::new(type_name, ValueKind::Pointer(Some(Reference::new(pointee))))
    }

    pub fn slice(type_name: impl Into<String>, elements: Vec<Value>) -> Self {
        Self::new(type_name, ValueKind::Slice(Some(elements.into())))
    }

    pub fn array(type_name: impl Into<String>, elements: Vec<Value>) -> Self {
        Self::new(type_name, ValueKind::Array(elements.into()))
    }

    pub fn map(type_name: impl Into<String>, entries: Vec<(Value, Value)>) -> Self {
        Self::new(type_name, ValueKind::Map(Some(entries.into())))
    }

    pub fn structure(type_name: impl Into<String>, fields: Vec<NamedValue>) -> Self {
        Self::new(type_name, ValueKind::Struct(fields.into()))
    }

    pub fn is_nil(&self) -> bool {
        match &self.kind {
            ValueKind::Pointer(target) | ValueKind::Interface(target) => target.is_none(),
            ValueKind::Slice(elements) => elements.is_none(),
            ValueKind::Map(entries) => entries.is_none(),
            ValueKind::Chan { nil } | ValueKind::Func { nil } => *nil,
            _ => false,
        }
    }
}
