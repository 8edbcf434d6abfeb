//! Datatree - reflective runtime data model
//!
//! Declared types with typed property descriptors, tree-shaped object
//! graphs, change notification with bubbling, lazily cached linked
//! properties and JSON (de)serialization.
//!
//! # Modules
//!
//! - [`schema`] - type registry, descriptors and typed property tokens
//! - [`model`] - the object graph, collections and linked properties
//! - [`events`] - change events and subscriptions
//! - [`serialize`] - JSON export and import
//! - [`config`] - TOML settings

// Allow the crate to refer to itself as `datatree_core` for proc macro compatibility
extern crate self as datatree_core;

use tracing::info;

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod schema;
pub mod serialize;
pub mod value;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, ModelConfig};
pub use error::{DataError, DataResult, KeyError};
pub use events::{
    ChangeEvent, ChangeKind, CollectionEdit, Entry, Propagation, SubscriptionKey,
};
pub use model::{
    DataGraph, LinkInputs, LinkStatus, ObjectId, ParentLink, Position, ValidationReport,
};
pub use schema::{
    registry, DataClass, Descriptor, Property, PropertyDeclaration, PropertyFlags, PropertyValue,
    SemanticType, TypeDeclaration, TypeInfo,
};
pub use serialize::ImportMode;
pub use value::Value;

// Re-export macros
pub use datatree_macros::DataClass;

/// Load settings, install logging and create an empty graph
///
/// A missing config file is created with defaults; an unreadable one is
/// reported and defaults are used.
pub fn init() -> DataGraph {
    let config = match ModelConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load model config, using defaults: {}", e);
            ModelConfig::default()
        }
    };
    logging::init(&config);
    info!("Datatree initialized (max_depth {})", config.max_depth);
    DataGraph::with_config(config)
}
