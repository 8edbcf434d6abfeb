//! Datatree Proc Macros
//!
//! This crate provides `#[derive(DataClass)]`, which turns a marker struct
//! into a declared data-object type with typed property tokens and
//! accessors.
//!
//! # Example
//!
//! ```ignore
//! use std::marker::PhantomData;
//! use datatree_core::{DataClass, DataGraph, DataResult, LinkInputs, ObjectId};
//!
//! #[derive(DataClass, Clone, Copy)]
//! #[data(name = "Hero")]
//! pub struct Hero {
//!     id: ObjectId,
//!
//!     #[data(default = 100)]
//!     health: PhantomData<i64>,
//!
//!     #[data(key = "displayName")]
//!     name: PhantomData<String>,
//!
//!     #[data(linked = "Self::compute_hurt", depends_on = "health")]
//!     hurt: PhantomData<bool>,
//! }
//!
//! impl Hero {
//!     fn compute_hurt(inputs: &LinkInputs<'_>) -> DataResult<bool> {
//!         Ok(inputs.get_as::<i64>("health")? < 100)
//!     }
//! }
//!
//! // Generated:
//! // - Hero::HEALTH: Property<i64>, Hero::NAME, Hero::HURT
//! // - hero.health(&graph) -> DataResult<i64>
//! // - hero.set_health(&mut graph, 50) -> DataResult<()>
//! // - hero.hurt(&graph) (no setter for linked properties)
//! // - Hero::create(&mut graph) -> DataResult<Hero>
//! ```
//!
//! # Attributes
//!
//! ## Struct Attributes
//!
//! - `#[data(name = "TypeName")]` - Optional. Registered type name (default: struct name).
//!
//! ## Field Attributes
//!
//! - `#[data(default = expr)]` - Default value.
//! - `#[data(key = "json_key")]` - Serialization key.
//! - `#[data(readonly)]` - Writable only during construction/import; no setter.
//! - `#[data(transient)]` - Not serialized.
//! - `#[data(nullable)]` - Object collection elements may be null.
//! - `#[data(strict)]` - Changes emit no events.
//! - `#[data(deprecated)]` - Warn on write, skip on export.
//! - `#[data(linked = "path::to::fn", depends_on = "a, b.c")]` - Computed property.
//!
//! The `id: ObjectId` field is required; every other field is a
//! `PhantomData<T>` naming the property's Rust type.

mod data_class;
mod parse;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Derive macro for data-object types
///
/// # Generated Code
///
/// - `TYPE_HASH` and one `Property<T>` constant per property
/// - A getter per property and a setter unless `readonly` or `linked`
/// - `DataClass` and `PropertyValue` implementations, so the type can be
///   used as a nested object (`Option<T>`) or collection element
///   (`Vec<T>`, `BTreeMap<String, T>`)
/// - `From<T> for Value`
#[proc_macro_derive(DataClass, attributes(data))]
pub fn derive_data_class(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    data_class::derive_data_class(input).into()
}
