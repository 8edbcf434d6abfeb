//! JSON → graph

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::{debug, trace, warn};

use super::{json_kind, ImportMode};
use crate::error::{DataError, DataResult, KeyError};
use crate::model::{DataGraph, ObjectId, WriteMode};
use crate::schema::{registry, DataClass, SemanticType};
use crate::value::Value;

/// Path reported for a document that is not a JSON object
const ROOT_PATH: &str = "$";

impl DataGraph {
    /// Build a new root object from a JSON document
    ///
    /// Missing keys keep their defaults and unknown keys are ignored. Any
    /// type-incompatible key discards the whole new subtree.
    ///
    /// # Errors
    /// `DeserializationTypeError` listing every offending key path, or
    /// `UnknownType` / `DepthExceeded`
    pub fn import(&mut self, type_name: &str, json: &Json) -> DataResult<ObjectId> {
        let (id, errors) = self.import_with_report(type_name, json)?;
        if errors.is_empty() {
            return Ok(id);
        }
        self.destroy_subtree(id);
        Err(DataError::DeserializationTypeError {
            type_name: type_name.to_string(),
            errors,
        })
    }

    /// Build a new root object, keeping it even if some keys were rejected
    ///
    /// # Returns
    /// The object and the rejected keys. A rejected property keeps its
    /// default; its siblings are imported.
    pub fn import_with_report(
        &mut self,
        type_name: &str,
        json: &Json,
    ) -> DataResult<(ObjectId, Vec<KeyError>)> {
        let Json::Object(doc) = json else {
            return Err(DataError::DeserializationTypeError {
                type_name: type_name.to_string(),
                errors: vec![KeyError::new(ROOT_PATH, type_name, json_kind(json))],
            });
        };

        let id = self.create(type_name)?;
        let mut errors = Vec::new();
        if let Err(e) = self.apply_document(id, doc, "", &mut errors, 0, false) {
            self.destroy_subtree(id);
            return Err(e);
        }

        debug!(
            "Imported {} {:?} ({} rejected keys)",
            type_name,
            id,
            errors.len()
        );
        Ok((id, errors))
    }

    /// Parse JSON text and import it
    pub fn import_str(&mut self, type_name: &str, text: &str) -> DataResult<ObjectId> {
        let json: Json = serde_json::from_str(text)?;
        self.import(type_name, &json)
    }

    /// Declare `T` if needed and import a typed root
    pub fn import_class<T: DataClass>(&mut self, json: &Json) -> DataResult<T> {
        registry::declare_class::<T>();
        self.import(T::TYPE_NAME, json).map(T::from_id)
    }

    /// Apply a JSON document to an existing object
    ///
    /// Writes go through the normal change path, so subscribers see one
    /// event per changed property. With [`ImportMode::Replace`] every
    /// property is reset first; with [`ImportMode::Patch`] nested objects
    /// already present are updated in place.
    ///
    /// # Errors
    /// `DeserializationTypeError` after every valid key has been applied
    pub fn import_into(&mut self, object: ObjectId, json: &Json, mode: ImportMode) -> DataResult<()> {
        let type_name = self.node(object)?.info.name().to_string();
        let Json::Object(doc) = json else {
            return Err(DataError::DeserializationTypeError {
                errors: vec![KeyError::new(ROOT_PATH, type_name.as_str(), json_kind(json))],
                type_name,
            });
        };

        if mode == ImportMode::Replace {
            self.reset_all(object)?;
        }

        let mut errors = Vec::new();
        self.apply_document(object, doc, "", &mut errors, 0, mode == ImportMode::Patch)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::DeserializationTypeError { type_name, errors })
        }
    }

    /// Copy an object's serialized state into a new root
    ///
    /// Transient and deprecated properties take their defaults in the copy.
    pub fn deep_copy(&mut self, object: ObjectId) -> DataResult<ObjectId> {
        let type_name = self.node(object)?.info.name().to_string();
        let json = self.export(object)?;
        self.import(&type_name, &json)
    }

    fn apply_document(
        &mut self,
        object: ObjectId,
        doc: &Map<String, Json>,
        prefix: &str,
        errors: &mut Vec<KeyError>,
        depth: usize,
        patch: bool,
    ) -> DataResult<()> {
        if depth > self.config.max_depth {
            tracing::error!("Import exceeds max_depth {}", self.config.max_depth);
            return Err(DataError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }

        let info = Arc::clone(&self.node(object)?.info);
        for key in doc.keys() {
            if info.find_by_key(key).is_none() {
                if self.config.warn_unknown_keys {
                    warn!("Ignoring unknown key '{}' for {}", join(prefix, key), info.name());
                } else {
                    debug!("Ignoring unknown key '{}' for {}", join(prefix, key), info.name());
                }
            }
        }

        for descriptor in info.descriptors() {
            let Some(json) = doc.get(descriptor.key()) else {
                continue;
            };
            let path = join(prefix, descriptor.key());
            if !descriptor.is_serialized() {
                trace!("Ignoring non-serialized key '{}'", path);
                continue;
            }

            if patch {
                let existing = self
                    .stored(object, descriptor.index())
                    .and_then(Value::as_object);
                if let (Some(child), Json::Object(inner)) = (existing, json) {
                    self.apply_document(child, inner, &path, errors, depth + 1, true)?;
                    continue;
                }
            }

            let Some(value) = self.decode(descriptor.semantic_type(), json, &path, errors, depth)?
            else {
                continue;
            };
            if let Err(e) = self.write(
                object,
                descriptor.index(),
                value.clone(),
                WriteMode::Deserialize,
                None,
            ) {
                errors.push(KeyError::new(
                    path,
                    descriptor.semantic_type().to_string(),
                    e.to_string(),
                ));
                self.discard(&value);
            }
        }
        Ok(())
    }

    /// Convert a JSON value to a slot value, creating child objects
    ///
    /// Soft failures are recorded in `errors` and yield `None` with any
    /// objects created for the value already destroyed.
    fn decode(
        &mut self,
        ty: &SemanticType,
        json: &Json,
        path: &str,
        errors: &mut Vec<KeyError>,
        depth: usize,
    ) -> DataResult<Option<Value>> {
        let value = match (ty, json) {
            (SemanticType::Bool, Json::Bool(b)) => Value::Bool(*b),
            (SemanticType::Int, Json::Number(n)) if n.as_i64().is_some() => {
                Value::Int(n.as_i64().unwrap_or_default())
            }
            (SemanticType::Float, Json::Number(n)) => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            // Non-finite floats export as null
            (SemanticType::Float, Json::Null) => Value::Float(f64::NAN),
            (SemanticType::String, Json::String(s)) => Value::String(s.clone()),
            (SemanticType::Object(_), Json::Null) => Value::Null,
            (SemanticType::Object(type_name), Json::Object(doc)) => {
                let child = self.create(type_name)?;
                if let Err(e) = self.apply_document(child, doc, path, errors, depth + 1, false) {
                    self.destroy_subtree(child);
                    return Err(e);
                }
                Value::Object(child)
            }
            (SemanticType::Array(element) | SemanticType::Set(element), Json::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let decoded =
                        self.decode(element, item, &join(path, &i.to_string()), errors, depth);
                    match decoded {
                        Ok(Some(v)) => out.push(v),
                        other => {
                            out.iter().for_each(|v| self.discard(v));
                            return other.map(|_| None);
                        }
                    }
                }
                match ty {
                    SemanticType::Set(_) => Value::Set(out),
                    _ => Value::Array(out),
                }
            }
            (SemanticType::Map(element), Json::Object(doc)) => {
                let mut out = BTreeMap::new();
                for (key, item) in doc {
                    match self.decode(element, item, &join(path, key), errors, depth) {
                        Ok(Some(v)) => {
                            out.insert(key.clone(), v);
                        }
                        other => {
                            out.values().for_each(|v| self.discard(v));
                            return other.map(|_| None);
                        }
                    }
                }
                Value::Map(out)
            }
            (ty, json) => {
                errors.push(KeyError::new(path, ty.to_string(), json_kind(json)));
                return Ok(None);
            }
        };
        Ok(Some(value))
    }

    /// Destroy objects created for a value that was never stored
    fn discard(&mut self, value: &Value) {
        for id in value.object_ids() {
            self.destroy_subtree(id);
        }
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}
