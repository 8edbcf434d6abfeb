//! Array, set and map operations on collection-typed properties
//!
//! Each mutation builds the new container, then goes through the same
//! validate-and-commit path as `set`, tagged with a [`CollectionEdit`].
//! Reads return snapshots; a caller iterating one is unaffected by writes
//! made while it iterates.

use std::collections::BTreeMap;

use super::{DataGraph, ObjectId, WriteMode};
use crate::error::{DataError, DataResult};
use crate::events::{CollectionEdit, Entry};
use crate::schema::{AsProperty, SemanticType};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Array,
    Set,
    Map,
}

impl Container {
    fn of(ty: &SemanticType) -> Option<Self> {
        match ty {
            SemanticType::Array(_) => Some(Self::Array),
            SemanticType::Set(_) => Some(Self::Set),
            SemanticType::Map(_) => Some(Self::Map),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Set => "set",
            Self::Map => "map",
        }
    }
}

/// Current contents of a collection slot
struct Snapshot {
    index: usize,
    kind: Container,
    element: SemanticType,
    items: Vec<Value>,
    map: BTreeMap<String, Value>,
}

impl DataGraph {
    /// Append to an array, or add a member to a set
    ///
    /// Adding a member a set already holds fails with
    /// `InvalidCollectionElement`.
    pub fn append(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        value: impl Into<Value>,
    ) -> DataResult<()> {
        let mut snap = self.snapshot(object, &property, &[Container::Array, Container::Set])?;
        let value = value.into();
        let (new, edit) = match snap.kind {
            Container::Set => {
                let member = coerce(&snap.element, value);
                snap.items.push(member.clone());
                (Value::Set(snap.items), Entry::Member(member))
            }
            _ => {
                let at = snap.items.len();
                snap.items.push(value);
                (Value::Array(snap.items), Entry::Index(at))
            }
        };
        self.write(
            object,
            snap.index,
            new,
            WriteMode::Normal,
            Some(CollectionEdit::Added(edit)),
        )
    }

    /// Insert into an array at `index`, shifting later elements
    ///
    /// `index == len` appends.
    pub fn insert(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        index: usize,
        value: impl Into<Value>,
    ) -> DataResult<()> {
        let mut snap = self.snapshot(object, &property, &[Container::Array])?;
        if index > snap.items.len() {
            return Err(self.out_of_bounds(object, snap.index, index, snap.items.len()));
        }
        snap.items.insert(index, value.into());
        self.write(
            object,
            snap.index,
            Value::Array(snap.items),
            WriteMode::Normal,
            Some(CollectionEdit::Added(Entry::Index(index))),
        )
    }

    /// Replace the array element at `index`
    ///
    /// A replaced object is released and destroyed.
    pub fn set_at(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        index: usize,
        value: impl Into<Value>,
    ) -> DataResult<()> {
        let mut snap = self.snapshot(object, &property, &[Container::Array])?;
        let len = snap.items.len();
        let Some(item) = snap.items.get_mut(index) else {
            return Err(self.out_of_bounds(object, snap.index, index, len));
        };
        *item = value.into();
        self.write(
            object,
            snap.index,
            Value::Array(snap.items),
            WriteMode::Normal,
            Some(CollectionEdit::Replaced(Entry::Index(index))),
        )
    }

    /// Insert or replace a map entry
    pub fn set_at_key(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> DataResult<()> {
        let mut snap = self.snapshot(object, &property, &[Container::Map])?;
        let key = key.into();
        let entry = Entry::Key(key.clone());
        let edit = match snap.map.insert(key, value.into()) {
            Some(_) => CollectionEdit::Replaced(entry),
            None => CollectionEdit::Added(entry),
        };
        self.write(
            object,
            snap.index,
            Value::Map(snap.map),
            WriteMode::Normal,
            Some(edit),
        )
    }

    /// Remove the array or set element at `index`
    ///
    /// # Returns
    /// The removed value. A removed object has already been destroyed, so
    /// its id is only useful for comparison.
    pub fn remove_at(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        index: usize,
    ) -> DataResult<Value> {
        let mut snap = self.snapshot(object, &property, &[Container::Array, Container::Set])?;
        if index >= snap.items.len() {
            return Err(self.out_of_bounds(object, snap.index, index, snap.items.len()));
        }
        let removed = snap.items.remove(index);
        let (new, entry) = match snap.kind {
            Container::Set => (Value::Set(snap.items), Entry::Member(removed.clone())),
            _ => (Value::Array(snap.items), Entry::Index(index)),
        };
        self.write(
            object,
            snap.index,
            new,
            WriteMode::Normal,
            Some(CollectionEdit::Removed(entry)),
        )?;
        Ok(removed)
    }

    /// Remove a map entry
    ///
    /// # Returns
    /// The removed value, `None` if the key was absent (nothing is emitted)
    pub fn remove_key(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        key: &str,
    ) -> DataResult<Option<Value>> {
        let mut snap = self.snapshot(object, &property, &[Container::Map])?;
        let Some(removed) = snap.map.remove(key) else {
            return Ok(None);
        };
        self.write(
            object,
            snap.index,
            Value::Map(snap.map),
            WriteMode::Normal,
            Some(CollectionEdit::Removed(Entry::Key(key.to_string()))),
        )?;
        Ok(Some(removed))
    }

    /// Remove the first array element or set member equal to `value`
    ///
    /// # Returns
    /// `true` if an element was removed
    pub fn remove_value(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        value: impl Into<Value>,
    ) -> DataResult<bool> {
        let mut snap = self.snapshot(object, &property, &[Container::Array, Container::Set])?;
        let value = coerce(&snap.element, value.into());
        let Some(position) = snap.items.iter().position(|item| *item == value) else {
            return Ok(false);
        };
        snap.items.remove(position);
        let (new, entry) = match snap.kind {
            Container::Set => (Value::Set(snap.items), Entry::Member(value)),
            _ => (Value::Array(snap.items), Entry::Index(position)),
        };
        self.write(
            object,
            snap.index,
            new,
            WriteMode::Normal,
            Some(CollectionEdit::Removed(entry)),
        )?;
        Ok(true)
    }

    /// Empty a collection, destroying any objects it held
    ///
    /// Clearing an empty collection emits nothing.
    pub fn clear(&mut self, object: ObjectId, property: impl AsProperty) -> DataResult<()> {
        let snap = self.snapshot(
            object,
            &property,
            &[Container::Array, Container::Set, Container::Map],
        )?;
        let new = match snap.kind {
            Container::Array => Value::Array(Vec::new()),
            Container::Set => Value::Set(Vec::new()),
            Container::Map => Value::Map(BTreeMap::new()),
        };
        self.write(
            object,
            snap.index,
            new,
            WriteMode::Normal,
            Some(CollectionEdit::Cleared),
        )
    }

    /// Number of elements in a collection
    pub fn len(&self, object: ObjectId, property: impl AsProperty) -> DataResult<usize> {
        let snap = self.snapshot(
            object,
            &property,
            &[Container::Array, Container::Set, Container::Map],
        )?;
        Ok(match snap.kind {
            Container::Map => snap.map.len(),
            _ => snap.items.len(),
        })
    }

    /// Snapshot of a collection's elements
    ///
    /// Arrays keep their order, sets their insertion order, maps yield
    /// values in key order.
    pub fn elements(&self, object: ObjectId, property: impl AsProperty) -> DataResult<Vec<Value>> {
        let snap = self.snapshot(
            object,
            &property,
            &[Container::Array, Container::Set, Container::Map],
        )?;
        Ok(match snap.kind {
            Container::Map => snap.map.into_values().collect(),
            _ => snap.items,
        })
    }

    /// Snapshot of a map's entries in key order
    pub fn entries(
        &self,
        object: ObjectId,
        property: impl AsProperty,
    ) -> DataResult<Vec<(String, Value)>> {
        let snap = self.snapshot(object, &property, &[Container::Map])?;
        Ok(snap.map.into_iter().collect())
    }

    fn snapshot(
        &self,
        object: ObjectId,
        property: &impl AsProperty,
        allowed: &[Container],
    ) -> DataResult<Snapshot> {
        let node = self.node(object)?;
        let descriptor = property.resolve(&node.info)?;
        let ty = descriptor.semantic_type();

        let kind = Container::of(ty)
            .filter(|kind| allowed.contains(kind))
            .ok_or_else(|| DataError::TypeMismatch {
                type_name: node.info.name().to_string(),
                property: descriptor.name().to_string(),
                expected: allowed
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(" or "),
                found: ty.to_string(),
            })?;
        let element = ty.element().cloned().unwrap_or(SemanticType::Bool);

        let (items, map) = match self.get(object, descriptor)? {
            Value::Array(items) | Value::Set(items) => (items, BTreeMap::new()),
            Value::Map(map) => (Vec::new(), map),
            _ => (Vec::new(), BTreeMap::new()),
        };

        Ok(Snapshot {
            index: descriptor.index(),
            kind,
            element,
            items,
            map,
        })
    }

    fn out_of_bounds(&self, object: ObjectId, index: usize, at: usize, len: usize) -> DataError {
        let (type_name, property) = self
            .objects
            .get(object)
            .and_then(|node| {
                node.info
                    .descriptor(index)
                    .map(|d| (node.info.name().to_string(), d.name().to_string()))
            })
            .unwrap_or_default();
        DataError::IndexOutOfBounds {
            type_name,
            property,
            index: at,
            len,
        }
    }
}

/// Scalar coercion for set members so `Int` and `Float` compare consistently
fn coerce(element: &SemanticType, value: Value) -> Value {
    match element {
        SemanticType::Object(_) => value,
        _ => element.coerce_scalar(value.clone()).unwrap_or(value),
    }
}
