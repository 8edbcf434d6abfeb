//! Property descriptors and the declaration builders that produce them
//!
//! A [`TypeDeclaration`] is what a type hands to the registry. Resolving it
//! yields one immutable [`Descriptor`] per property, shared by every
//! instance of the type.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use super::property::PropertyValue;
use crate::error::DataResult;
use crate::model::LinkInputs;
use crate::value::Value;

bitflags! {
    /// Flags that control how a property is written, observed and serialized
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        /// Writable only while constructing or deserializing
        const READ_ONLY = 0x01;
        /// Never exported, ignored on import
        const TRANSIENT = 0x02;
        /// Object elements of a collection may be null
        const NULLABLE = 0x04;
        /// Writes do not emit change events
        const STRICT = 0x08;
        /// Accepted on import, skipped on export, warns on write
        const DEPRECATED = 0x10;
    }
}

/// Declared kind of a property's value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Bool,
    Int,
    Float,
    String,
    /// Owned nested data object of the named type (nullable)
    Object(String),
    /// Ordered sequence of elements
    Array(Box<SemanticType>),
    /// Unique scalar elements
    Set(Box<SemanticType>),
    /// String-keyed mapping
    Map(Box<SemanticType>),
}

impl SemanticType {
    /// Object type shorthand
    pub fn object(type_name: impl Into<String>) -> Self {
        SemanticType::Object(type_name.into())
    }

    pub fn array(element: SemanticType) -> Self {
        SemanticType::Array(Box::new(element))
    }

    pub fn set(element: SemanticType) -> Self {
        SemanticType::Set(Box::new(element))
    }

    pub fn map(element: SemanticType) -> Self {
        SemanticType::Map(Box::new(element))
    }

    /// Element type of a collection, `None` for scalars and objects
    pub fn element(&self) -> Option<&SemanticType> {
        match self {
            SemanticType::Array(e) | SemanticType::Set(e) | SemanticType::Map(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.element().is_some()
    }

    /// Type name of the object this type holds, directly or as elements
    pub fn object_type(&self) -> Option<&str> {
        match self {
            SemanticType::Object(name) => Some(name),
            other => other.element().and_then(SemanticType::object_type),
        }
    }

    /// Value a fresh slot starts with when no default was declared
    pub fn default_value(&self) -> Value {
        match self {
            SemanticType::Bool => Value::Bool(false),
            SemanticType::Int => Value::Int(0),
            SemanticType::Float => Value::Float(0.0),
            SemanticType::String => Value::String(String::new()),
            SemanticType::Object(_) => Value::Null,
            SemanticType::Array(_) => Value::Array(Vec::new()),
            SemanticType::Set(_) => Value::Set(Vec::new()),
            SemanticType::Map(_) => Value::Map(Default::default()),
        }
    }

    /// Coerce a scalar value to this type
    ///
    /// Ints widen to floats. Returns `None` for non-scalar types or a
    /// mismatched value.
    pub(crate) fn coerce_scalar(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (SemanticType::Bool, v @ Value::Bool(_)) => Some(v),
            (SemanticType::Int, v @ Value::Int(_)) => Some(v),
            (SemanticType::Float, v @ Value::Float(_)) => Some(v),
            (SemanticType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (SemanticType::String, v @ Value::String(_)) => Some(v),
            _ => None,
        }
    }

    /// Coerce a value that holds no objects (declared defaults)
    pub(crate) fn coerce_plain(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (SemanticType::Object(_), Value::Null) => Some(Value::Null),
            (SemanticType::Object(_), _) => None,
            (SemanticType::Array(e), Value::Array(items)) => items
                .into_iter()
                .map(|v| e.coerce_plain(v))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            (SemanticType::Set(e), Value::Set(items) | Value::Array(items)) => {
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let item = e.coerce_plain(item)?;
                    if out.contains(&item) {
                        return None;
                    }
                    out.push(item);
                }
                Some(Value::Set(out))
            }
            (SemanticType::Map(e), Value::Map(map)) => map
                .into_iter()
                .map(|(k, v)| e.coerce_plain(v).map(|v| (k, v)))
                .collect::<Option<_>>()
                .map(Value::Map),
            (scalar, value) => scalar.coerce_scalar(value),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Bool => f.write_str("bool"),
            SemanticType::Int => f.write_str("int"),
            SemanticType::Float => f.write_str("float"),
            SemanticType::String => f.write_str("string"),
            SemanticType::Object(name) => f.write_str(name),
            SemanticType::Array(e) => write!(f, "array<{}>", e),
            SemanticType::Set(e) => write!(f, "set<{}>", e),
            SemanticType::Map(e) => write!(f, "map<{}>", e),
        }
    }
}

/// Compute function of a linked property
pub type ComputeFn = Arc<dyn Fn(&LinkInputs<'_>) -> DataResult<Value> + Send + Sync>;

/// Immutable metadata for one declared property
#[derive(Clone)]
pub struct Descriptor {
    name: String,
    key: String,
    index: usize,
    semantic_type: SemanticType,
    flags: PropertyFlags,
    default: Value,
    depends_on: Vec<String>,
    /// `depends_on` split on '.'
    pub(crate) dependency_paths: Vec<Vec<String>>,
    pub(crate) compute: Option<ComputeFn>,
}

impl Descriptor {
    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialization key (defaults to the name)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Position in declaration order
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn semantic_type(&self) -> &SemanticType {
        &self.semantic_type
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// Value the slot holds after construction or `reset`
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Declared dependencies of a linked property
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_linked(&self) -> bool {
        self.compute.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PropertyFlags::READ_ONLY)
    }

    pub fn is_transient(&self) -> bool {
        self.flags.contains(PropertyFlags::TRANSIENT)
    }

    pub fn is_nullable(&self) -> bool {
        self.flags.contains(PropertyFlags::NULLABLE)
    }

    pub fn is_strict(&self) -> bool {
        self.flags.contains(PropertyFlags::STRICT)
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(PropertyFlags::DEPRECATED)
    }

    /// Whether the serializer reads and writes this property
    pub fn is_serialized(&self) -> bool {
        !self.is_linked() && !self.is_transient()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("index", &self.index)
            .field("semantic_type", &self.semantic_type)
            .field("flags", &self.flags)
            .field("default", &self.default)
            .field("depends_on", &self.depends_on)
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Builder for one property of a [`TypeDeclaration`]
#[derive(Clone)]
pub struct PropertyDeclaration {
    pub(crate) name: String,
    pub(crate) key: Option<String>,
    pub(crate) semantic_type: SemanticType,
    pub(crate) flags: PropertyFlags,
    pub(crate) default: Option<Value>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) compute: Option<ComputeFn>,
    /// Declares nested data classes this property mentions
    pub(crate) nested: Option<fn()>,
}

impl PropertyDeclaration {
    /// Declare a property with an explicit semantic type
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            key: None,
            semantic_type,
            flags: PropertyFlags::empty(),
            default: None,
            depends_on: Vec::new(),
            compute: None,
            nested: None,
        }
    }

    /// Declare a property whose semantic type follows a Rust type
    ///
    /// Nested data classes named by `T` are declared alongside the owner
    /// when it goes through [`declare_class`](super::registry::declare_class).
    pub fn of<T: PropertyValue>(name: impl Into<String>) -> Self {
        let mut decl = Self::new(name, T::semantic_type());
        decl.nested = Some(T::declare_nested);
        decl
    }

    /// Override the serialization key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Add flags
    pub fn with(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn read_only(self) -> Self {
        self.with(PropertyFlags::READ_ONLY)
    }

    pub fn transient(self) -> Self {
        self.with(PropertyFlags::TRANSIENT)
    }

    pub fn nullable(self) -> Self {
        self.with(PropertyFlags::NULLABLE)
    }

    pub fn strict(self) -> Self {
        self.with(PropertyFlags::STRICT)
    }

    pub fn deprecated(self) -> Self {
        self.with(PropertyFlags::DEPRECATED)
    }

    /// Make this a linked property computed from `depends_on`
    ///
    /// Dependencies are property names of the same type or dotted paths
    /// through nested object and collection properties
    /// (`"inventory.weight"`).
    pub fn linked<F>(mut self, depends_on: &[&str], compute: F) -> Self
    where
        F: Fn(&LinkInputs<'_>) -> DataResult<Value> + Send + Sync + 'static,
    {
        self.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
        self.compute = Some(Arc::new(compute));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_linked(&self) -> bool {
        self.compute.is_some()
    }

    /// Build the descriptor at `index`
    ///
    /// The default must already be coerced to the semantic type.
    pub(crate) fn build(&self, index: usize, default: Value) -> Descriptor {
        Descriptor {
            name: self.name.clone(),
            key: self.key.clone().unwrap_or_else(|| self.name.clone()),
            index,
            semantic_type: self.semantic_type.clone(),
            flags: self.flags,
            default,
            depends_on: self.depends_on.clone(),
            dependency_paths: self
                .depends_on
                .iter()
                .map(|d| d.split('.').map(str::to_string).collect())
                .collect(),
            compute: self.compute.clone(),
        }
    }
}

impl fmt::Debug for PropertyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDeclaration")
            .field("name", &self.name)
            .field("semantic_type", &self.semantic_type)
            .field("flags", &self.flags)
            .field("linked", &self.is_linked())
            .finish_non_exhaustive()
    }
}

/// Declared properties of one data-object type, in declaration order
#[derive(Debug, Clone)]
pub struct TypeDeclaration {
    pub(crate) name: String,
    pub(crate) properties: Vec<PropertyDeclaration>,
}

impl TypeDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Append a property
    pub fn property(mut self, property: PropertyDeclaration) -> Self {
        self.properties.push(property);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDeclaration] {
        &self.properties
    }
}
