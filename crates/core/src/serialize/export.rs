//! Graph → JSON

use serde_json::{Map, Number, Value as Json};
use tracing::trace;

use crate::error::{DataError, DataResult};
use crate::model::{DataGraph, ObjectId};
use crate::schema::fnv1a_64;
use crate::value::Value;

impl DataGraph {
    /// Export an object and everything it owns as a JSON object
    ///
    /// Keys follow declaration order and use each descriptor's
    /// serialization key. Transient and deprecated properties are skipped;
    /// linked properties are included only with `export_linked`.
    pub fn export(&self, object: ObjectId) -> DataResult<Json> {
        self.export_object(object, 0)
    }

    /// Export as JSON text
    pub fn export_string(&self, object: ObjectId, pretty: bool) -> DataResult<String> {
        let json = self.export(object)?;
        let text = if pretty {
            serde_json::to_string_pretty(&json)?
        } else {
            serde_json::to_string(&json)?
        };
        Ok(text)
    }

    /// FNV-1a 64 hash of the compact export
    ///
    /// Equal for two subtrees whose exported documents are equal. The hash
    /// is cached on the object until a write anywhere in its subtree.
    pub fn content_hash(&self, object: ObjectId) -> DataResult<u64> {
        if let Some(hash) = *self.node(object)?.hash.lock() {
            trace!("Content hash cache hit for {:?}", object);
            return Ok(hash);
        }

        let text = self.export_string(object, false)?;
        let hash = fnv1a_64(text.as_bytes());
        *self.node(object)?.hash.lock() = Some(hash);
        Ok(hash)
    }

    fn export_object(&self, object: ObjectId, depth: usize) -> DataResult<Json> {
        if depth > self.config.max_depth {
            tracing::error!(
                "Export of {:?} exceeds max_depth {}",
                object,
                self.config.max_depth
            );
            return Err(DataError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }

        let node = self.node(object)?;
        let mut map = Map::new();
        for descriptor in node.info.descriptors() {
            if descriptor.is_transient() || descriptor.is_deprecated() {
                continue;
            }
            if descriptor.is_linked() && !self.config.export_linked {
                continue;
            }
            let value = self.get(object, descriptor)?;
            map.insert(descriptor.key().to_string(), self.export_value(&value, depth)?);
        }
        Ok(Json::Object(map))
    }

    fn export_value(&self, value: &Value, depth: usize) -> DataResult<Json> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
            Value::Object(id) => self.export_object(*id, depth + 1)?,
            Value::Array(items) | Value::Set(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.export_value(item, depth))
                    .collect::<DataResult<_>>()?,
            ),
            Value::Map(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.clone(), self.export_value(item, depth)?);
                }
                Json::Object(map)
            }
        })
    }
}
