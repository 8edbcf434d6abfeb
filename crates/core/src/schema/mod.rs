//! Schema - declared types, property descriptors and typed tokens
//!
//! Every data-object type is declared once, either by hand through the
//! [`TypeDeclaration`] builder or by `#[derive(DataClass)]`, and resolved
//! lazily into a shared [`TypeInfo`] on first use.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            #[derive(DataClass)] / TypeDeclaration            │
//! │   name, ordered PropertyDeclarations, linked compute fns    │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ registry::declare
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Type Registry                         │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │ register_or_get(type) -> Arc<TypeInfo>              │   │
//! │  │   - validates types, defaults, dependencies         │   │
//! │  │   - rejects linked-property cycles                  │   │
//! │  │   - caches results in DashMap                       │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │                          │                                  │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │ Property<T>                                         │   │
//! │  │   - (type, index, name) token typed by T            │   │
//! │  │   - get(graph, obj) -> T / set(graph, obj, T)       │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use datatree_core::schema::{registry, PropertyDeclaration, SemanticType, TypeDeclaration};
//!
//! registry::declare(
//!     TypeDeclaration::new("Item")
//!         .property(PropertyDeclaration::new("name", SemanticType::String))
//!         .property(PropertyDeclaration::new("weight", SemanticType::Float).default(1.0)),
//! );
//!
//! let info = registry::register_or_get("Item")?;
//! for descriptor in info.descriptors() {
//!     println!("{}: {}", descriptor.name(), descriptor.semantic_type());
//! }
//! ```

pub mod descriptor;
pub mod hash;
pub mod property;
pub mod registry;

// Re-export primary types
pub use descriptor::{
    ComputeFn, Descriptor, PropertyDeclaration, PropertyFlags, SemanticType, TypeDeclaration,
};
pub use hash::{fnv1a_32, fnv1a_64, hash_str, type_hash};
pub use property::{AsProperty, Property, PropertyValue};
pub use registry::{
    cache_size, clear_cache, declare, declare_class, declared_types, register_or_get, schema_json,
    TypeInfo,
};

use crate::model::ObjectId;

/// Trait for typed handles to data objects
///
/// This trait is implemented by the `#[derive(DataClass)]` macro. A handle
/// is a copyable wrapper around an [`ObjectId`]; the graph owns the data.
pub trait DataClass: Sized {
    /// Registered type name
    const TYPE_NAME: &'static str;

    /// Declaration of this type's properties, in order
    fn declaration() -> TypeDeclaration;

    /// Wrap an object id without checking its type
    ///
    /// Use [`DataGraph::cast`](crate::DataGraph::cast) for a checked
    /// conversion.
    fn from_id(id: ObjectId) -> Self;

    /// Id of the wrapped object
    fn id(&self) -> ObjectId;
}
