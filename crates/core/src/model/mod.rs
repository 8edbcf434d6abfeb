//! Data objects and their owning graph
//!
//! Every data object lives in a [`DataGraph`] arena keyed by [`ObjectId`].
//! A node holds its resolved [`TypeInfo`] and exactly one slot per
//! descriptor. Ownership is a tree: an object held by a property slot has
//! one [`ParentLink`] in a side table, and releasing it from that slot
//! destroys it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DataGraph                            │
//! │  objects: SlotMap<ObjectId, ObjectNode>                     │
//! │  parents: SecondaryMap<ObjectId, ParentLink>  (weak links)  │
//! │  bus:     EventBus                                          │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ set / collection ops
//!                               ▼
//!   validate → store → reparent / destroy released → invalidate
//!   linked caches (up the chain) → Property event → Descendant
//!   events (up the chain)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datatree_core::DataGraph;
//!
//! let mut graph = DataGraph::new();
//! let hero = graph.create("Hero")?;
//! graph.set(hero, "health", 75)?;
//! assert_eq!(graph.get(hero, "health")?, 75.into());
//! ```

mod collection;
mod linked;
mod links;

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use tracing::{debug, trace, warn};

pub use linked::{LinkInputs, LinkStatus};
pub use links::{ParentLink, Position, ValidationReport};

pub(crate) use linked::LinkState;

use crate::config::ModelConfig;
use crate::error::{DataError, DataResult};
use crate::events::{
    ChangeEvent, ChangeKind, CollectionEdit, EventBus, Propagation, SubscriptionKey,
};
use crate::schema::{
    registry, AsProperty, DataClass, Descriptor, PropertyValue, SemanticType, TypeInfo,
};
use crate::value::Value;

new_key_type! {
    /// Key of a data object in its graph
    pub struct ObjectId;
}

/// Storage for one property
pub(crate) enum Slot {
    Stored(Value),
    Linked(Mutex<LinkState>),
}

/// One data object: its type and one slot per descriptor
pub(crate) struct ObjectNode {
    pub info: Arc<TypeInfo>,
    pub slots: Vec<Slot>,
    /// Content hash of the exported subtree, dropped on any change below
    pub hash: Mutex<Option<u64>>,
}

/// Who is writing
///
/// Read-only properties accept writes only while an object is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Normal,
    Construct,
    Deserialize,
}

/// Owner of a tree-shaped graph of data objects
///
/// Mutation goes through `&mut self`; reads (including lazy evaluation of
/// linked properties) only need `&self`.
pub struct DataGraph {
    pub(crate) objects: SlotMap<ObjectId, ObjectNode>,
    pub(crate) parents: SecondaryMap<ObjectId, ParentLink>,
    pub(crate) bus: EventBus,
    pub(crate) config: ModelConfig,
}

impl Default for DataGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataGraph")
            .field("objects", &self.objects.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DataGraph {
    /// Create an empty graph with default settings
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            objects: SlotMap::with_key(),
            parents: SecondaryMap::new(),
            bus: EventBus::new(),
            config,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains_key(object)
    }

    /// Create a root object of a declared type with every slot at its default
    pub fn create(&mut self, type_name: &str) -> DataResult<ObjectId> {
        let info = registry::register_or_get(type_name)?;
        let slots = info
            .descriptors()
            .iter()
            .map(|d| {
                if d.is_linked() {
                    Slot::Linked(Mutex::new(LinkState::Unevaluated))
                } else {
                    Slot::Stored(d.default_value().clone())
                }
            })
            .collect();

        let id = self.objects.insert(ObjectNode {
            info,
            slots,
            hash: Mutex::new(None),
        });
        trace!("Created {} {:?}", type_name, id);
        Ok(id)
    }

    /// Declare `T` if needed and create a root instance
    pub fn create_class<T: DataClass>(&mut self) -> DataResult<T> {
        registry::declare_class::<T>();
        self.create(T::TYPE_NAME).map(T::from_id)
    }

    /// Create an object and fill properties in construction mode
    ///
    /// Read-only properties are writable here. If any value is rejected the
    /// new object is destroyed and the error returned.
    pub fn construct<P, V>(
        &mut self,
        type_name: &str,
        values: impl IntoIterator<Item = (P, V)>,
    ) -> DataResult<ObjectId>
    where
        P: AsProperty,
        V: Into<Value>,
    {
        let id = self.create(type_name)?;
        for (property, value) in values {
            let result = self
                .index_of(id, &property)
                .and_then(|index| self.write(id, index, value.into(), WriteMode::Construct, None));
            if let Err(e) = result {
                self.destroy_subtree(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Destroy an object and everything it owns
    ///
    /// An owned object is first removed from its owning slot, which emits
    /// the usual change event on the owner.
    pub fn destroy(&mut self, object: ObjectId) -> DataResult<()> {
        if !self.objects.contains_key(object) {
            return Err(DataError::UnknownObject(object));
        }
        self.take_from_owner(object);
        let count = self.destroy_subtree(object);
        debug!("Destroyed {:?} ({} objects)", object, count);
        Ok(())
    }

    /// Resolved type of an object
    pub fn type_info(&self, object: ObjectId) -> DataResult<Arc<TypeInfo>> {
        Ok(Arc::clone(&self.node(object)?.info))
    }

    /// Typed handle if the object is a `T`
    pub fn cast<T: DataClass>(&self, object: ObjectId) -> Option<T> {
        self.objects
            .get(object)
            .filter(|node| node.info.name() == T::TYPE_NAME)
            .map(|_| T::from_id(object))
    }

    /// Read a property
    ///
    /// Linked properties are computed on first read and cached until one of
    /// their dependencies changes.
    pub fn get(&self, object: ObjectId, property: impl AsProperty) -> DataResult<Value> {
        let node = self.node(object)?;
        let index = property.resolve(&node.info)?.index();
        match &node.slots[index] {
            Slot::Stored(value) => Ok(value.clone()),
            Slot::Linked(_) => self.evaluate(object, index),
        }
    }

    /// Read a property as a Rust type
    pub fn get_as<T: PropertyValue>(
        &self,
        object: ObjectId,
        property: impl AsProperty,
    ) -> DataResult<T> {
        let node = self.node(object)?;
        let descriptor = property.resolve(&node.info)?;
        let value = self.get(object, descriptor)?;
        T::from_value(&value).ok_or_else(|| DataError::TypeMismatch {
            type_name: node.info.name().to_string(),
            property: descriptor.name().to_string(),
            expected: T::semantic_type().to_string(),
            found: self.describe(&value),
        })
    }

    /// Write a property
    ///
    /// The value is fully validated before anything changes. Writing the
    /// current value again is a no-op and emits nothing.
    ///
    /// # Errors
    /// `UnknownProperty`, `ReadOnlyProperty` (read-only or linked),
    /// `TypeMismatch`, `InvalidCollectionElement`, `UnknownObject`,
    /// `OwnershipCycle` or `DepthExceeded`.
    pub fn set(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        value: impl Into<Value>,
    ) -> DataResult<()> {
        let index = self.index_of(object, &property)?;
        self.write(object, index, value.into(), WriteMode::Normal, None)
    }

    /// Write a property from a Rust value
    pub fn set_as<T: PropertyValue>(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        value: T,
    ) -> DataResult<()> {
        self.set(object, property, value.into_value())
    }

    /// Restore a property's default
    ///
    /// Follows the same path as `set` (read-only properties included). For
    /// a linked property the cache is dropped instead.
    pub fn reset(&mut self, object: ObjectId, property: impl AsProperty) -> DataResult<()> {
        let index = self.index_of(object, &property)?;
        self.reset_index(object, index)
    }

    /// Restore every property of an object to its default
    pub fn reset_all(&mut self, object: ObjectId) -> DataResult<()> {
        let count = self.node(object)?.slots.len();
        for index in 0..count {
            self.reset_index(object, index)?;
        }
        Ok(())
    }

    fn reset_index(&mut self, object: ObjectId, index: usize) -> DataResult<()> {
        let info = Arc::clone(&self.node(object)?.info);
        let descriptor = &info.descriptors()[index];
        if descriptor.is_linked() {
            self.mark_stale(object, index);
            self.invalidate(object, index);
            return Ok(());
        }
        self.write(
            object,
            index,
            descriptor.default_value().clone(),
            WriteMode::Construct,
            None,
        )
    }

    /// Subscribe to every change event delivered to an object
    ///
    /// # Returns
    /// A key that can be used to remove the subscription via `unsubscribe`
    pub fn subscribe<F>(&mut self, object: ObjectId, callback: F) -> DataResult<SubscriptionKey>
    where
        F: Fn(&ChangeEvent) -> Propagation + Send + Sync + 'static,
    {
        self.node(object)?;
        Ok(self.bus.subscribe(object, None, Arc::new(callback)))
    }

    /// Subscribe to changes of one property, including changes below it
    pub fn subscribe_property<F>(
        &mut self,
        object: ObjectId,
        property: impl AsProperty,
        callback: F,
    ) -> DataResult<SubscriptionKey>
    where
        F: Fn(&ChangeEvent) -> Propagation + Send + Sync + 'static,
    {
        let name = property.resolve(&self.node(object)?.info)?.name().to_string();
        Ok(self.bus.subscribe(object, Some(name), Arc::new(callback)))
    }

    /// Subscribe and receive events on a channel
    pub fn subscribe_channel(
        &mut self,
        object: ObjectId,
    ) -> DataResult<(SubscriptionKey, Receiver<ChangeEvent>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let key = self.subscribe(object, move |event| {
            let _ = tx.send(event.clone());
            Propagation::Continue
        })?;
        Ok((key, rx))
    }

    /// Remove a subscription
    ///
    /// # Returns
    /// `true` if the subscription was found and removed
    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        self.bus.unsubscribe(key)
    }

    /// Number of subscriptions on an object
    pub fn subscriber_count(&self, object: ObjectId) -> usize {
        self.bus.subscriber_count(object)
    }

    /// Run `f` with event delivery deferred
    ///
    /// Events are queued and delivered in order when the outermost deferred
    /// scope ends. Receivers destroyed in the meantime are skipped. If `f`
    /// panics the scope still ends, delivering events for the writes that
    /// were committed, and the panic is resumed.
    pub fn with_deferred_events<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.bus.begin_deferred();
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        self.bus.end_deferred();
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub(crate) fn node(&self, object: ObjectId) -> DataResult<&ObjectNode> {
        self.objects
            .get(object)
            .ok_or(DataError::UnknownObject(object))
    }

    pub(crate) fn index_of(&self, object: ObjectId, property: &impl AsProperty) -> DataResult<usize> {
        Ok(property.resolve(&self.node(object)?.info)?.index())
    }

    /// Stored value of a non-linked slot
    pub(crate) fn stored(&self, object: ObjectId, index: usize) -> Option<&Value> {
        match self.objects.get(object)?.slots.get(index)? {
            Slot::Stored(value) => Some(value),
            Slot::Linked(_) => None,
        }
    }

    fn store(&mut self, object: ObjectId, index: usize, value: Value) {
        if let Some(slot) = self
            .objects
            .get_mut(object)
            .and_then(|node| node.slots.get_mut(index))
        {
            *slot = Slot::Stored(value);
        }
    }

    /// Runtime description of a value for error messages
    pub(crate) fn describe(&self, value: &Value) -> String {
        match value {
            Value::Object(id) => self
                .objects
                .get(*id)
                .map(|node| node.info.name().to_string())
                .unwrap_or_else(|| "destroyed object".to_string()),
            other => other.kind_name().to_string(),
        }
    }

    /// Validate and commit a write to slot `index`
    pub(crate) fn write(
        &mut self,
        object: ObjectId,
        index: usize,
        value: Value,
        mode: WriteMode,
        edit: Option<CollectionEdit>,
    ) -> DataResult<()> {
        let info = Arc::clone(&self.node(object)?.info);
        let descriptor = &info.descriptors()[index];

        if descriptor.is_linked() || (descriptor.is_read_only() && mode == WriteMode::Normal) {
            return Err(DataError::ReadOnlyProperty {
                type_name: info.name().to_string(),
                property: descriptor.name().to_string(),
            });
        }

        let value = self.prepare_value(&info, descriptor, value)?;
        self.check_adoption(object, &info, descriptor, &value)?;

        if descriptor.is_deprecated() && mode != WriteMode::Deserialize {
            warn!(
                "Write to deprecated property {}.{}",
                info.name(),
                descriptor.name()
            );
        }

        self.commit(object, index, value, edit);
        Ok(())
    }

    /// Check a value against a descriptor, coercing ints to floats
    pub(crate) fn prepare_value(
        &self,
        info: &TypeInfo,
        descriptor: &Descriptor,
        value: Value,
    ) -> DataResult<Value> {
        let ty = descriptor.semantic_type();
        let mismatch = |found: &Value| DataError::TypeMismatch {
            type_name: info.name().to_string(),
            property: descriptor.name().to_string(),
            expected: ty.to_string(),
            found: self.describe(found),
        };

        match (ty, value) {
            (SemanticType::Object(_), Value::Null) => Ok(Value::Null),
            (SemanticType::Object(expected), Value::Object(child)) => {
                let node = self.node(child)?;
                if node.info.name() != expected {
                    return Err(mismatch(&Value::Object(child)));
                }
                Ok(Value::Object(child))
            }
            (SemanticType::Array(element), Value::Array(items)) => {
                let items = self.prepare_elements(info, descriptor, element, items)?;
                Ok(Value::Array(items))
            }
            (SemanticType::Set(element), Value::Set(items) | Value::Array(items)) => {
                let items = self.prepare_elements(info, descriptor, element, items)?;
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        return Err(invalid_element(
                            info,
                            descriptor,
                            format!("duplicate set element {:?}", item),
                        ));
                    }
                }
                Ok(Value::Set(items))
            }
            (SemanticType::Map(element), Value::Map(map)) => {
                let mut out = std::collections::BTreeMap::new();
                for (key, item) in map {
                    let item = self.prepare_element(info, descriptor, element, item)?;
                    out.insert(key, item);
                }
                let out = Value::Map(out);
                check_unique_objects(info, descriptor, &out)?;
                Ok(out)
            }
            (ty, value) => {
                let found = value.clone();
                ty.coerce_scalar(value).ok_or_else(|| mismatch(&found))
            }
        }
    }

    fn prepare_elements(
        &self,
        info: &TypeInfo,
        descriptor: &Descriptor,
        element: &SemanticType,
        items: Vec<Value>,
    ) -> DataResult<Vec<Value>> {
        let items = items
            .into_iter()
            .map(|item| self.prepare_element(info, descriptor, element, item))
            .collect::<DataResult<Vec<_>>>()?;
        check_unique_objects(info, descriptor, &Value::Array(items.clone()))?;
        Ok(items)
    }

    fn prepare_element(
        &self,
        info: &TypeInfo,
        descriptor: &Descriptor,
        element: &SemanticType,
        item: Value,
    ) -> DataResult<Value> {
        match (element, item) {
            (SemanticType::Object(_), Value::Null) => {
                if descriptor.is_nullable() {
                    Ok(Value::Null)
                } else {
                    Err(invalid_element(
                        info,
                        descriptor,
                        "null element in a non-nullable collection".to_string(),
                    ))
                }
            }
            (SemanticType::Object(expected), Value::Object(child)) => {
                let node = self.node(child)?;
                if node.info.name() != expected {
                    return Err(invalid_element(
                        info,
                        descriptor,
                        format!("expected {}, found {}", expected, node.info.name()),
                    ));
                }
                Ok(Value::Object(child))
            }
            (element, item) => {
                let found = self.describe(&item);
                element.coerce_scalar(item).ok_or_else(|| {
                    invalid_element(
                        info,
                        descriptor,
                        format!("expected {}, found {}", element, found),
                    )
                })
            }
        }
    }

    /// Reject objects that would end up owning themselves or sit too deep
    ///
    /// The deepest object after the write is the target's depth plus one
    /// plus the height of the tallest adopted subtree.
    fn check_adoption(
        &self,
        target: ObjectId,
        info: &TypeInfo,
        descriptor: &Descriptor,
        value: &Value,
    ) -> DataResult<()> {
        let children = value.object_ids();
        if children.is_empty() {
            return Ok(());
        }

        let chain = self.ancestor_ids(target)?;
        if let Some(&child) = children.iter().find(|child| chain.contains(child)) {
            return Err(DataError::OwnershipCycle {
                object: child,
                type_name: info.name().to_string(),
                property: descriptor.name().to_string(),
            });
        }

        let limit = self.config.max_depth;
        let tallest = children
            .iter()
            .map(|&child| self.subtree_height(child, limit))
            .max()
            .unwrap_or(0);
        if chain.len() + tallest >= limit {
            debug!(
                "Rejected adoption into {}.{}: depth {} exceeds max_depth {}",
                info.name(),
                descriptor.name(),
                chain.len() + tallest,
                limit
            );
            return Err(DataError::DepthExceeded { limit });
        }
        Ok(())
    }

    /// Apply a validated value and run its side effects
    fn commit(
        &mut self,
        object: ObjectId,
        index: usize,
        new: Value,
        edit: Option<CollectionEdit>,
    ) {
        let Some(old) = self.stored(object, index).cloned() else {
            return;
        };
        if old == new {
            trace!("Skipping write of unchanged value to {:?}[{}]", object, index);
            return;
        }

        let old_children = old.object_ids();
        let new_children = new.object_ids();
        let adopted: Vec<ObjectId> = new_children
            .iter()
            .copied()
            .filter(|c| !old_children.contains(c))
            .collect();
        let released: Vec<ObjectId> = old_children
            .iter()
            .copied()
            .filter(|c| !new_children.contains(c))
            .collect();

        // Moves: pull adopted objects out of their previous slots first
        for &child in &adopted {
            self.take_from_owner(child);
        }

        self.store(object, index, new.clone());
        for &child in &released {
            self.parents.remove(child);
        }
        self.relink_slot(object, index);

        for &child in &released {
            self.emit_lifecycle(child, ChangeKind::Detached, object, index);
            let count = self.destroy_subtree(child);
            trace!("Released {:?} ({} objects destroyed)", child, count);
        }
        for &child in &adopted {
            self.emit_lifecycle(child, ChangeKind::Attached, object, index);
        }

        self.finish_write(object, index, old, new, edit);
    }

    /// Invalidate dependents and emit the change event for a stored slot
    pub(crate) fn finish_write(
        &mut self,
        object: ObjectId,
        index: usize,
        old: Value,
        new: Value,
        edit: Option<CollectionEdit>,
    ) {
        self.invalidate(object, index);

        let Some(node) = self.objects.get(object) else {
            return;
        };
        let descriptor = &node.info.descriptors()[index];
        if descriptor.is_strict() {
            return;
        }

        let event = ChangeEvent {
            kind: ChangeKind::Property,
            source: object,
            type_name: node.info.name().to_string(),
            property: descriptor.name().to_string(),
            index,
            path: descriptor.name().to_string(),
            old_value: old,
            new_value: new,
            edit,
        };
        let delivery = self.bubble(object, event);
        self.bus.dispatch(delivery);
    }

    /// Tell a child it was attached to or detached from `owner`
    fn emit_lifecycle(&mut self, child: ObjectId, kind: ChangeKind, owner: ObjectId, index: usize) {
        let (Some(child_node), Some(owner_node)) = (self.objects.get(child), self.objects.get(owner))
        else {
            return;
        };

        let path = match self.parents.get(child) {
            Some(link) if kind == ChangeKind::Attached => self.link_segment(link),
            _ => owner_node.info.descriptors()[index].name().to_string(),
        };
        let (old_value, new_value) = match kind {
            ChangeKind::Attached => (Value::Null, Value::Object(owner)),
            _ => (Value::Object(owner), Value::Null),
        };

        let event = ChangeEvent {
            kind,
            source: child,
            type_name: child_node.info.name().to_string(),
            property: owner_node.info.descriptors()[index].name().to_string(),
            index,
            path,
            old_value,
            new_value,
            edit: None,
        };
        self.bus.dispatch(vec![(child, event)]);
    }

    /// Remove an object and its whole subtree without touching its owner
    ///
    /// # Returns
    /// Number of objects removed
    pub(crate) fn destroy_subtree(&mut self, object: ObjectId) -> usize {
        let mut stack = vec![object];
        let mut count = 0;
        while let Some(next) = stack.pop() {
            let Some(node) = self.objects.remove(next) else {
                continue;
            };
            for slot in &node.slots {
                if let Slot::Stored(value) = slot {
                    value.collect_object_ids(&mut stack);
                }
            }
            self.parents.remove(next);
            self.bus.remove_object(next);
            count += 1;
        }
        count
    }
}

fn invalid_element(info: &TypeInfo, descriptor: &Descriptor, reason: String) -> DataError {
    DataError::InvalidCollectionElement {
        type_name: info.name().to_string(),
        property: descriptor.name().to_string(),
        reason,
    }
}

fn check_unique_objects(info: &TypeInfo, descriptor: &Descriptor, value: &Value) -> DataResult<()> {
    let mut seen = HashSet::new();
    for id in value.object_ids() {
        if !seen.insert(id) {
            return Err(invalid_element(
                info,
                descriptor,
                format!("object {:?} is already held by this collection", id),
            ));
        }
    }
    Ok(())
}
