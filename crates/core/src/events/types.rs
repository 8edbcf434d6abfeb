//! Change event types

use std::sync::Arc;

use crate::model::ObjectId;
use crate::value::Value;

/// What a [`ChangeEvent`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A property of the receiving object changed
    Property,
    /// A property of an object somewhere below the receiver changed
    Descendant,
    /// The receiving object was placed into an owning slot
    Attached,
    /// The receiving object was taken out of its owning slot
    Detached,
}

/// Element addressed by a collection edit
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Array position
    Index(usize),
    /// Map key
    Key(String),
    /// Set member
    Member(Value),
}

/// Structural change made by a collection operation
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEdit {
    Added(Entry),
    Replaced(Entry),
    Removed(Entry),
    Cleared,
}

/// Immutable snapshot of one property change
///
/// For `Descendant` deliveries `path` is relative to the receiver
/// (`"inventory.items.2.weight"`); for `Property` it is the property name.
/// Attach and detach events carry the owning slot as `property` and the
/// old and new owner as `old_value` / `new_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Object whose property changed
    pub source: ObjectId,
    /// Type of `source`
    pub type_name: String,
    /// Changed property of `source`
    pub property: String,
    /// Descriptor index of `property`
    pub index: usize,
    pub path: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Set by collection operations
    pub edit: Option<CollectionEdit>,
}

impl ChangeEvent {
    /// First segment of `path`: the receiver's own property this came through
    pub fn via(&self) -> &str {
        self.path.split('.').next().unwrap_or("")
    }
}

/// Result from a change callback determining how dispatch proceeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Propagation {
    /// Keep delivering, to this object's other subscribers and to ancestors
    #[default]
    Continue = 0,

    /// Finish this object's subscribers but do not bubble further up
    Stop = 1,

    /// Stop immediately: skip remaining subscribers and ancestors
    StopImmediate = 2,
}

/// Type alias for change callbacks
///
/// # Arguments
/// * `event` - The change being delivered
///
/// # Returns
/// `Propagation` indicating whether the event keeps bubbling
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) -> Propagation + Send + Sync>;
