//! JSON Serializer
//!
//! Exports an object subtree as one JSON object per data object (arrays
//! and sets as JSON arrays, maps as JSON objects) and builds subtrees back
//! from such documents.
//!
//! # Format
//!
//! ```text
//! {
//!   "name": "Ayla",            ← descriptor key, declaration order
//!   "health": 75,
//!   "inventory": {             ← nested object
//!     "items": [ { ... } ],    ← array of objects
//!     "labels": { "a": "x" }   ← map
//!   }
//! }
//! ```
//!
//! Linked properties are derived data: exported only on request and never
//! read back. Import leaves them unevaluated.
//!
//! # Example
//!
//! ```ignore
//! let json = graph.export(hero)?;
//! let copy = graph.import("Hero", &json)?;
//! assert_eq!(graph.export(copy)?, json);
//! ```

mod export;
mod import;

use serde_json::Value as Json;

/// How [`import_into`](crate::DataGraph::import_into) treats existing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Keep properties missing from the document; update nested objects in
    /// place
    #[default]
    Patch,
    /// Reset every property to its default before applying the document
    Replace,
}

/// JSON type name for error reports
pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_f64() => "float",
        Json::Number(_) => "int",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
