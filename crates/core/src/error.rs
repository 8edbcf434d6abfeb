//! Error types for data model operations

use std::fmt;

use crate::model::ObjectId;

/// Result type for data model operations
pub type DataResult<T> = Result<T, DataError>;

/// Error type for data model operations
///
/// Construction-time errors (`UnknownType`, `CyclicDependency`,
/// `InvalidDeclaration`) point at a declaration bug. Everything else is a
/// per-call failure that leaves the graph untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type mismatch for {type_name}.{property}: expected {expected}, found {found}")]
    TypeMismatch {
        type_name: String,
        property: String,
        expected: String,
        found: String,
    },

    #[error("Property {type_name}.{property} is read-only")]
    ReadOnlyProperty { type_name: String, property: String },

    #[error("Cyclic dependency in {type_name}: {}", .cycle.join(" -> "))]
    CyclicDependency {
        type_name: String,
        cycle: Vec<String>,
    },

    #[error("Failed to deserialize {type_name}: {}", format_key_errors(.errors))]
    DeserializationTypeError {
        type_name: String,
        errors: Vec<KeyError>,
    },

    #[error("Invalid element for {type_name}.{property}: {reason}")]
    InvalidCollectionElement {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("Unknown property: {type_name}.{property}")]
    UnknownProperty { type_name: String, property: String },

    #[error("Unknown object: {0:?}")]
    UnknownObject(ObjectId),

    #[error("Assigning {object:?} to {type_name}.{property} would make it its own ancestor")]
    OwnershipCycle {
        object: ObjectId,
        type_name: String,
        property: String,
    },

    #[error("Invalid declaration of {type_name}: {reason}")]
    InvalidDeclaration { type_name: String, reason: String },

    #[error("Linked property {type_name}.{property} read undeclared dependency '{dependency}'")]
    UndeclaredDependency {
        type_name: String,
        property: String,
        dependency: String,
    },

    #[error("Ownership tree deeper than the configured limit of {limit}")]
    DepthExceeded { limit: usize },

    #[error("Index {index} out of bounds for {type_name}.{property} (len {len})")]
    IndexOutOfBounds {
        type_name: String,
        property: String,
        index: usize,
        len: usize,
    },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::InvalidJson(e.to_string())
    }
}

/// One offending key found while importing a JSON document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    /// Dotted path of the key, relative to the imported object
    pub path: String,
    /// Expected semantic type
    pub expected: String,
    /// What was found in the document
    pub found: String,
}

impl KeyError {
    pub(crate) fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' expected {}, found {}",
            self.path, self.expected, self.found
        )
    }
}

fn format_key_errors(errors: &[KeyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_error_lists_every_key() {
        let err = DataError::DeserializationTypeError {
            type_name: "Hero".to_string(),
            errors: vec![
                KeyError::new("health", "int", "string"),
                KeyError::new("bag.weight", "float", "bool"),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("'health' expected int, found string"));
        assert!(message.contains("'bag.weight' expected float, found bool"));
    }

    #[test]
    fn test_cycle_message() {
        let err = DataError::CyclicDependency {
            type_name: "Loop".to_string(),
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency in Loop: a -> b -> a");
    }
}
