//! Parent links and tree navigation
//!
//! A parent link is a weak `(owner, slot, position)` record kept in a side
//! table keyed by the child. Nothing here keeps an object alive.

use std::collections::HashMap;

use tracing::{error, warn};

use super::{DataGraph, ObjectId, Slot};
use crate::error::{DataError, DataResult};
use crate::events::{ChangeEvent, ChangeKind, CollectionEdit, Delivery, Entry};
use crate::value::Value;

/// Where inside its owning slot an object sits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Position {
    /// The slot holds the object directly
    Field,
    /// Array element
    Index(usize),
    /// Map value
    Key(String),
}

/// Weak back-reference from a child to the slot that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub owner: ObjectId,
    /// Descriptor index of the owning property
    pub property: usize,
    pub position: Position,
}

/// Result of [`DataGraph::validation`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl DataGraph {
    /// Owning slot of an object, `None` for roots and unknown ids
    pub fn parent(&self, object: ObjectId) -> Option<ParentLink> {
        self.parents.get(object).cloned()
    }

    /// Objects held directly by this object's slots, in slot order
    pub fn children(&self, object: ObjectId) -> DataResult<Vec<ObjectId>> {
        let mut out = Vec::new();
        for slot in &self.node(object)?.slots {
            if let Slot::Stored(value) = slot {
                value.collect_object_ids(&mut out);
            }
        }
        Ok(out)
    }

    /// Objects that have no owner
    pub fn roots(&self) -> Vec<ObjectId> {
        self.objects
            .keys()
            .filter(|id| !self.parents.contains_key(*id))
            .collect()
    }

    /// Topmost ancestor (the object itself for a root)
    pub fn root_of(&self, object: ObjectId) -> DataResult<ObjectId> {
        let chain = self.ancestor_ids(object)?;
        Ok(chain.last().copied().unwrap_or(object))
    }

    /// Dotted path from the root, e.g. `inventory.items.2`
    ///
    /// Empty for a root.
    pub fn path(&self, object: ObjectId) -> DataResult<String> {
        self.node(object)?;
        let mut segments = Vec::new();
        let mut current = object;
        while let Some(link) = self.parents.get(current) {
            segments.push(self.link_segment(link));
            if segments.len() > self.config.max_depth {
                return Err(self.depth_exceeded(object));
            }
            current = link.owner;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// Follow a dotted path from `root`
    ///
    /// Segments name properties on objects, positions in arrays and keys in
    /// maps. An empty path yields the root itself.
    pub fn resolve_path(&self, root: ObjectId, path: &str) -> DataResult<Value> {
        self.node(root)?;
        let mut current = Value::Object(root);
        if path.is_empty() {
            return Ok(current);
        }
        for segment in path.split('.') {
            current = self.step(&current, segment)?;
        }
        Ok(current)
    }

    /// Take an owned object out of its slot, keeping it alive as a root
    ///
    /// # Returns
    /// `true` if the object had an owner
    pub fn detach(&mut self, object: ObjectId) -> DataResult<bool> {
        self.node(object)?;
        Ok(self.take_from_owner(object))
    }

    /// Check the graph's structural invariants
    ///
    /// Every slot set matches its type, every stored value matches its
    /// descriptor, every owned object has exactly one owner, and every
    /// parent link points at the slot that actually holds the child.
    pub fn validation(&self) -> ValidationReport {
        let mut issues = Vec::new();
        let mut owners: HashMap<ObjectId, usize> = HashMap::new();

        for (id, node) in &self.objects {
            let info = &node.info;
            if node.slots.len() != info.len() {
                issues.push(format!(
                    "{:?} ({}) has {} slots for {} descriptors",
                    id,
                    info.name(),
                    node.slots.len(),
                    info.len()
                ));
                continue;
            }

            for (descriptor, slot) in info.descriptors().iter().zip(&node.slots) {
                let value = match slot {
                    Slot::Linked(_) if descriptor.is_linked() => continue,
                    Slot::Stored(value) if !descriptor.is_linked() => value,
                    _ => {
                        issues.push(format!(
                            "{:?}.{} slot kind does not match its descriptor",
                            id,
                            descriptor.name()
                        ));
                        continue;
                    }
                };

                if let Err(e) = self.prepare_value(info, descriptor, value.clone()) {
                    issues.push(format!("{:?}.{}: {}", id, descriptor.name(), e));
                }

                for (child, position) in positions(value) {
                    *owners.entry(child).or_default() += 1;
                    let expected = ParentLink {
                        owner: id,
                        property: descriptor.index(),
                        position,
                    };
                    if self.parents.get(child) != Some(&expected) {
                        issues.push(format!(
                            "{:?} held by {:?}.{} has parent link {:?}",
                            child,
                            id,
                            descriptor.name(),
                            self.parents.get(child)
                        ));
                    }
                }
            }
        }

        for (child, count) in owners {
            if count > 1 {
                issues.push(format!("{:?} has {} owners", child, count));
            }
        }
        for (child, link) in &self.parents {
            if !self.objects.contains_key(child) || !self.objects.contains_key(link.owner) {
                issues.push(format!("dangling parent link {:?} -> {:?}", child, link));
            }
        }

        ValidationReport { issues }
    }

    /// The object followed by its ancestors, nearest first
    pub(crate) fn ancestor_ids(&self, object: ObjectId) -> DataResult<Vec<ObjectId>> {
        let mut chain = vec![object];
        let mut current = object;
        while let Some(link) = self.parents.get(current) {
            chain.push(link.owner);
            if chain.len() > self.config.max_depth {
                return Err(self.depth_exceeded(object));
            }
            current = link.owner;
        }
        Ok(chain)
    }

    /// Levels of objects below `object`, 0 for a leaf
    ///
    /// Counting stops once `limit` is passed.
    pub(crate) fn subtree_height(&self, object: ObjectId, limit: usize) -> usize {
        let mut height = 0;
        let mut level = vec![object];
        while height <= limit {
            let next: Vec<ObjectId> = level
                .iter()
                .flat_map(|&id| self.children(id).unwrap_or_default())
                .collect();
            if next.is_empty() {
                break;
            }
            height += 1;
            level = next;
        }
        height
    }

    fn depth_exceeded(&self, object: ObjectId) -> DataError {
        error!(
            "Ownership chain of {:?} exceeds max_depth {}",
            object, self.config.max_depth
        );
        DataError::DepthExceeded {
            limit: self.config.max_depth,
        }
    }

    /// Path segment of a link inside its owner: `slot`, `slot.3` or `slot.key`
    pub(crate) fn link_segment(&self, link: &ParentLink) -> String {
        let name = self
            .objects
            .get(link.owner)
            .and_then(|node| node.info.descriptor(link.property))
            .map(|d| d.name().to_string())
            .unwrap_or_default();
        match &link.position {
            Position::Field => name,
            Position::Index(i) => format!("{}.{}", name, i),
            Position::Key(key) => format!("{}.{}", name, key),
        }
    }

    /// One navigation step from a value
    pub(crate) fn step(&self, current: &Value, segment: &str) -> DataResult<Value> {
        let missing = || DataError::UnknownProperty {
            type_name: self.describe(current),
            property: segment.to_string(),
        };
        match current {
            Value::Object(id) => self.get(*id, segment),
            Value::Array(items) | Value::Set(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(missing),
            Value::Map(map) => map.get(segment).cloned().ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    /// Build the bubbling delivery for an event raised on `source`
    ///
    /// The source gets the event as is; each ancestor gets a `Descendant`
    /// copy whose path is relative to that ancestor.
    pub(crate) fn bubble(&self, source: ObjectId, event: ChangeEvent) -> Delivery {
        let mut delivery: Delivery = Vec::new();
        let mut path = event.path.clone();
        let mut current = source;

        while let Some(link) = self.parents.get(current) {
            if delivery.len() >= self.config.max_depth {
                error!(
                    "Stopped bubbling {}.{} at max_depth {}",
                    event.type_name, event.property, self.config.max_depth
                );
                break;
            }
            path = format!("{}.{}", self.link_segment(link), path);
            let mut copy = event.clone();
            copy.kind = ChangeKind::Descendant;
            copy.path = path.clone();
            delivery.push((link.owner, copy));
            current = link.owner;
        }

        delivery.insert(0, (source, event));
        delivery
    }

    /// Point every object held by a slot back at it
    pub(crate) fn relink_slot(&mut self, owner: ObjectId, property: usize) {
        let Some(value) = self.stored(owner, property) else {
            return;
        };
        let links: Vec<(ObjectId, Position)> = positions(value);
        for (child, position) in links {
            self.parents.insert(
                child,
                ParentLink {
                    owner,
                    property,
                    position,
                },
            );
        }
    }

    /// Remove an object from its owning slot without destroying it
    ///
    /// Emits `Detached` on the child and a property event on the owner.
    ///
    /// # Returns
    /// `true` if the object had an owner
    pub(crate) fn take_from_owner(&mut self, child: ObjectId) -> bool {
        let Some(link) = self.parents.remove(child) else {
            return false;
        };
        let Some(old) = self.stored(link.owner, link.property).cloned() else {
            warn!("Parent link of {:?} points at a missing slot", child);
            return false;
        };

        let held = Value::Object(child);
        let (new, edit) = match (&old, &link.position) {
            (Value::Object(id), Position::Field) if *id == child => (Value::Null, None),
            (Value::Array(items), Position::Index(i)) if items.get(*i) == Some(&held) => {
                let mut items = items.clone();
                items.remove(*i);
                (
                    Value::Array(items),
                    Some(CollectionEdit::Removed(Entry::Index(*i))),
                )
            }
            (Value::Map(map), Position::Key(key)) if map.get(key) == Some(&held) => {
                let mut map = map.clone();
                map.remove(key);
                (
                    Value::Map(map),
                    Some(CollectionEdit::Removed(Entry::Key(key.clone()))),
                )
            }
            _ => {
                warn!(
                    "Parent link of {:?} does not match its owner slot {:?}",
                    child, link
                );
                return false;
            }
        };

        self.store(link.owner, link.property, new.clone());
        self.relink_slot(link.owner, link.property);
        self.emit_lifecycle(child, ChangeKind::Detached, link.owner, link.property);
        self.finish_write(link.owner, link.property, old, new, edit);
        true
    }
}

/// Objects held by a slot value with their positions
fn positions(value: &Value) -> Vec<(ObjectId, Position)> {
    match value {
        Value::Object(id) => vec![(*id, Position::Field)],
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_object().map(|id| (id, Position::Index(i))))
            .collect(),
        Value::Map(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_object().map(|id| (id, Position::Key(k.clone()))))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{registry, PropertyDeclaration, SemanticType, TypeDeclaration};
    use std::sync::Once;

    static DECLARE: Once = Once::new();

    fn graph_with_tree() -> (DataGraph, ObjectId, ObjectId, ObjectId) {
        DECLARE.call_once(|| {
            registry::declare(
                TypeDeclaration::new("links.Leaf")
                    .property(PropertyDeclaration::new("label", SemanticType::String)),
            );
            registry::declare(
                TypeDeclaration::new("links.Branch")
                    .property(PropertyDeclaration::new(
                        "leaves",
                        SemanticType::array(SemanticType::object("links.Leaf")),
                    ))
                    .property(PropertyDeclaration::new(
                        "named",
                        SemanticType::map(SemanticType::object("links.Leaf")),
                    )),
            );
            registry::declare(TypeDeclaration::new("links.Root").property(
                PropertyDeclaration::new("branch", SemanticType::object("links.Branch")),
            ));
        });

        let mut graph = DataGraph::new();
        let root = graph.create("links.Root").unwrap();
        let branch = graph.create("links.Branch").unwrap();
        let leaf = graph.create("links.Leaf").unwrap();
        graph.set(root, "branch", branch).unwrap();
        graph.append(branch, "leaves", leaf).unwrap();
        (graph, root, branch, leaf)
    }

    #[test]
    fn test_path_and_root() {
        let (graph, root, branch, leaf) = graph_with_tree();

        assert_eq!(graph.path(root).unwrap(), "");
        assert_eq!(graph.path(branch).unwrap(), "branch");
        assert_eq!(graph.path(leaf).unwrap(), "branch.leaves.0");
        assert_eq!(graph.root_of(leaf).unwrap(), root);
        assert_eq!(graph.roots(), vec![root]);
    }

    #[test]
    fn test_resolve_path() {
        let (mut graph, root, _branch, leaf) = graph_with_tree();
        graph.set(leaf, "label", "first").unwrap();

        assert_eq!(
            graph.resolve_path(root, "branch.leaves.0").unwrap(),
            Value::Object(leaf)
        );
        assert_eq!(
            graph.resolve_path(root, "branch.leaves.0.label").unwrap(),
            Value::from("first")
        );
        assert!(matches!(
            graph.resolve_path(root, "branch.leaves.7"),
            Err(DataError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_map_positions() {
        let (mut graph, root, branch, _leaf) = graph_with_tree();
        let named = graph.create("links.Leaf").unwrap();
        graph.set_at_key(branch, "named", "boss", named).unwrap();

        assert_eq!(graph.path(named).unwrap(), "branch.named.boss");
        assert_eq!(
            graph.resolve_path(root, "branch.named.boss").unwrap(),
            Value::Object(named)
        );
    }

    #[test]
    fn test_detach_keeps_object_alive() {
        let (mut graph, root, branch, leaf) = graph_with_tree();
        let (_key, events) = graph.subscribe_channel(leaf).unwrap();

        assert!(graph.detach(leaf).unwrap());
        assert!(graph.contains(leaf));
        assert!(graph.parent(leaf).is_none());
        assert_eq!(graph.len(branch, "leaves").unwrap(), 0);
        assert_eq!(events.try_recv().unwrap().kind, ChangeKind::Detached);

        let mut roots = graph.roots();
        roots.sort();
        let mut expected = vec![root, leaf];
        expected.sort();
        assert_eq!(roots, expected);
        assert!(!graph.detach(leaf).unwrap());
    }

    #[test]
    fn test_children_in_slot_order() {
        let (mut graph, _root, branch, leaf) = graph_with_tree();
        let second = graph.create("links.Leaf").unwrap();
        graph.append(branch, "leaves", second).unwrap();

        assert_eq!(graph.children(branch).unwrap(), vec![leaf, second]);
        assert!(graph.validation().is_valid());
    }

    #[test]
    fn test_validation_flags_broken_link() {
        let (mut graph, _root, _branch, leaf) = graph_with_tree();
        graph.parents.remove(leaf);

        let report = graph.validation();
        assert!(!report.is_valid());
        assert!(report.issues[0].contains("parent link"));
    }
}
