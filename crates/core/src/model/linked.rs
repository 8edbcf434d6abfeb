//! Linked-property evaluation and invalidation
//!
//! A linked slot caches the result of its compute function. Reads compute
//! on demand; writes only mark dependents stale, walking up the ownership
//! chain so that dependencies declared as paths into nested objects
//! (`"inventory.items.weight"`) see changes made deep below.

use std::cell::Cell;

use tracing::{error, trace};

use super::{DataGraph, ObjectId, Slot};
use crate::error::{DataError, DataResult};
use crate::schema::{AsProperty, Descriptor, PropertyValue, TypeInfo};
use crate::value::Value;

/// Cache state of a linked slot
pub(crate) enum LinkState {
    Unevaluated,
    /// Compute function is running; reaching this again is a cycle
    Evaluating,
    Valid(Value),
    Stale,
}

thread_local! {
    /// Nesting of compute functions on this thread
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds one level of [`EVAL_DEPTH`] until dropped
struct EvalDepthGuard;

impl EvalDepthGuard {
    fn enter(limit: usize) -> DataResult<Self> {
        let depth = EVAL_DEPTH.with(|d| d.get());
        if depth >= limit {
            error!("Linked evaluation nested deeper than max_depth {}", limit);
            return Err(DataError::DepthExceeded { limit });
        }
        EVAL_DEPTH.with(|d| d.set(depth + 1));
        Ok(Self)
    }
}

impl Drop for EvalDepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Public view of a linked slot's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Unevaluated,
    Valid,
    Stale,
}

/// Read access for a compute function, limited to declared dependencies
///
/// Paths are relative to the object being computed. A read is allowed when
/// its property path (positions dropped) and a declared dependency are
/// prefixes of one another, so `"items.2.weight"` is readable under a
/// dependency on `"items.weight"` or `"items"`.
pub struct LinkInputs<'a> {
    graph: &'a DataGraph,
    object: ObjectId,
    info: &'a TypeInfo,
    descriptor: &'a Descriptor,
}

impl<'a> LinkInputs<'a> {
    /// Object being computed
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Read a dependency by dotted path
    pub fn get(&self, path: &str) -> DataResult<Value> {
        self.navigate(self.object, path, Vec::new())
    }

    /// Read a dependency as a Rust type
    pub fn get_as<T: PropertyValue>(&self, path: &str) -> DataResult<T> {
        let value = self.get(path)?;
        T::from_value(&value).ok_or_else(|| DataError::TypeMismatch {
            type_name: self.info.name().to_string(),
            property: path.to_string(),
            expected: T::semantic_type().to_string(),
            found: self.graph.describe(&value),
        })
    }

    /// Elements of a collection dependency (map values in key order)
    pub fn elements(&self, path: &str) -> DataResult<Vec<Value>> {
        match self.get(path)? {
            Value::Array(items) | Value::Set(items) => Ok(items),
            Value::Map(map) => Ok(map.into_values().collect()),
            other => Err(DataError::TypeMismatch {
                type_name: self.info.name().to_string(),
                property: path.to_string(),
                expected: "collection".to_string(),
                found: self.graph.describe(&other),
            }),
        }
    }

    /// Read a property of an object inside a declared dependency subtree
    ///
    /// Typically used on elements returned by [`elements`](Self::elements).
    pub fn read(&self, object: ObjectId, property: &str) -> DataResult<Value> {
        let prefix = self.schema_path_to(object)?;
        self.navigate(object, property, prefix)
    }

    /// Property names leading from the computed object down to `object`
    fn schema_path_to(&self, object: ObjectId) -> DataResult<Vec<String>> {
        let mut names = Vec::new();
        let mut current = object;
        while current != self.object {
            let link = self
                .graph
                .parents
                .get(current)
                .filter(|_| names.len() < self.graph.config.max_depth)
                .ok_or_else(|| self.undeclared(format!("{:?}", object)))?;
            let owner = self.graph.node(link.owner)?;
            names.push(owner.info.descriptors()[link.property].name().to_string());
            current = link.owner;
        }
        names.reverse();
        Ok(names)
    }

    fn navigate(&self, from: ObjectId, path: &str, mut schema: Vec<String>) -> DataResult<Value> {
        let mut current = Value::Object(from);
        for segment in path.split('.') {
            if matches!(current, Value::Object(_)) {
                schema.push(segment.to_string());
                if !self.is_declared(&schema) {
                    return Err(self.undeclared(schema.join(".")));
                }
            }
            current = self.graph.step(&current, segment)?;
        }
        Ok(current)
    }

    fn is_declared(&self, schema: &[String]) -> bool {
        self.descriptor
            .dependency_paths
            .iter()
            .any(|dep| related(dep, schema))
    }

    fn undeclared(&self, dependency: String) -> DataError {
        DataError::UndeclaredDependency {
            type_name: self.info.name().to_string(),
            property: self.descriptor.name().to_string(),
            dependency,
        }
    }
}

/// Whether one path is a prefix of the other
fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

impl DataGraph {
    /// Cache state of a linked property, `None` for stored properties
    pub fn link_state(
        &self,
        object: ObjectId,
        property: impl AsProperty,
    ) -> DataResult<Option<LinkStatus>> {
        let node = self.node(object)?;
        let index = property.resolve(&node.info)?.index();
        Ok(match &node.slots[index] {
            Slot::Stored(_) => None,
            Slot::Linked(state) => Some(match &*state.lock() {
                LinkState::Unevaluated | LinkState::Evaluating => LinkStatus::Unevaluated,
                LinkState::Valid(_) => LinkStatus::Valid,
                LinkState::Stale => LinkStatus::Stale,
            }),
        })
    }

    /// Return the cached value of a linked slot, computing it if needed
    pub(crate) fn evaluate(&self, object: ObjectId, index: usize) -> DataResult<Value> {
        let node = self.node(object)?;
        let descriptor = &node.info.descriptors()[index];
        let (Slot::Linked(state), Some(compute)) = (&node.slots[index], descriptor.compute.as_ref())
        else {
            return self.stored(object, index).cloned().ok_or(DataError::UnknownObject(object));
        };

        let _depth = EvalDepthGuard::enter(self.config.max_depth)?;
        let previous = {
            let mut guard = state.lock();
            match &*guard {
                LinkState::Valid(value) => {
                    trace!("Cache hit for {}.{}", node.info.name(), descriptor.name());
                    return Ok(value.clone());
                }
                LinkState::Evaluating => {
                    return Err(DataError::CyclicDependency {
                        type_name: node.info.name().to_string(),
                        cycle: vec![descriptor.name().to_string(), descriptor.name().to_string()],
                    });
                }
                _ => {}
            }
            std::mem::replace(&mut *guard, LinkState::Evaluating)
        };

        let inputs = LinkInputs {
            graph: self,
            object,
            info: &node.info,
            descriptor,
        };
        let result =
            compute(&inputs).and_then(|value| self.prepare_value(&node.info, descriptor, value));

        let mut guard = state.lock();
        match result {
            Ok(value) => {
                trace!("Computed {}.{}", node.info.name(), descriptor.name());
                *guard = LinkState::Valid(value.clone());
                Ok(value)
            }
            Err(e) => {
                *guard = previous;
                Err(e)
            }
        }
    }

    /// Drop a linked slot's cached value
    ///
    /// # Returns
    /// `true` if a valid value was dropped
    pub(crate) fn mark_stale(&self, object: ObjectId, index: usize) -> bool {
        let Some(Slot::Linked(state)) = self
            .objects
            .get(object)
            .and_then(|node| node.slots.get(index))
        else {
            return false;
        };
        let mut guard = state.lock();
        if matches!(*guard, LinkState::Valid(_)) {
            *guard = LinkState::Stale;
            true
        } else {
            false
        }
    }

    fn forget_hash(&self, object: ObjectId) {
        if let Some(node) = self.objects.get(object) {
            *node.hash.lock() = None;
        }
    }

    /// Mark every linked property affected by a change to slot `index`
    ///
    /// Changed paths start as the slot name. At each object, linked
    /// properties whose dependencies relate to a changed path go stale and
    /// are added as changed paths themselves, and the cached content hash
    /// is dropped; then every path is prefixed
    /// with the owning slot's name and the walk moves to the owner.
    pub(crate) fn invalidate(&self, object: ObjectId, index: usize) {
        let Some(descriptor) = self
            .objects
            .get(object)
            .and_then(|node| node.info.descriptor(index))
        else {
            return;
        };

        let mut changed: Vec<Vec<String>> = vec![vec![descriptor.name().to_string()]];
        let mut current = object;
        let mut depth = 0;

        loop {
            self.forget_hash(current);
            self.invalidate_local(current, &mut changed);

            let Some(link) = self.parents.get(current) else {
                break;
            };
            let Some(owner) = self.objects.get(link.owner) else {
                break;
            };
            depth += 1;
            if depth > self.config.max_depth {
                error!(
                    "Stopped invalidation at max_depth {}",
                    self.config.max_depth
                );
                break;
            }

            let slot = owner.info.descriptors()[link.property].name().to_string();
            for path in &mut changed {
                path.insert(0, slot.clone());
            }
            current = link.owner;
        }
    }

    fn invalidate_local(&self, object: ObjectId, changed: &mut Vec<Vec<String>>) {
        let Some(node) = self.objects.get(object) else {
            return;
        };
        if node.info.linked().is_empty() {
            return;
        }

        let mut touched = vec![false; node.slots.len()];
        let mut cursor = 0;
        while cursor < changed.len() {
            for &linked in node.info.linked() {
                if touched[linked] {
                    continue;
                }
                let descriptor = &node.info.descriptors()[linked];
                let affected = descriptor
                    .dependency_paths
                    .iter()
                    .any(|dep| related(dep, &changed[cursor]));
                if affected {
                    touched[linked] = true;
                    if self.mark_stale(object, linked) {
                        trace!("Invalidated {}.{}", node.info.name(), descriptor.name());
                    }
                    changed.push(vec![descriptor.name().to_string()]);
                }
            }
            cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::schema::{registry, PropertyDeclaration, SemanticType, TypeDeclaration};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;

    static DECLARE: Once = Once::new();
    static TOTAL_CALLS: AtomicUsize = AtomicUsize::new(0);
    static DOUBLE_CALLS: AtomicUsize = AtomicUsize::new(0);
    // Only test_recompute_exactly_once_after_change creates linked.Counter
    static COUNTER_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn declare_types() {
        DECLARE.call_once(|| {
            registry::declare(
                TypeDeclaration::new("linked.Item")
                    .property(PropertyDeclaration::new("weight", SemanticType::Float))
                    .property(PropertyDeclaration::new("name", SemanticType::String)),
            );
            registry::declare(
                TypeDeclaration::new("linked.Bag")
                    .property(PropertyDeclaration::new(
                        "items",
                        SemanticType::array(SemanticType::object("linked.Item")),
                    ))
                    .property(PropertyDeclaration::new("bonus", SemanticType::Float))
                    .property(PropertyDeclaration::new("label", SemanticType::String))
                    .property(
                        PropertyDeclaration::new("total", SemanticType::Float).linked(
                            &["items.weight", "bonus"],
                            |inputs| {
                                TOTAL_CALLS.fetch_add(1, Ordering::SeqCst);
                                let mut sum = inputs.get_as::<f64>("bonus")?;
                                for item in inputs.elements("items")? {
                                    if let Some(id) = item.as_object() {
                                        sum += inputs.read(id, "weight")?.as_float().unwrap_or(0.0);
                                    }
                                }
                                Ok(Value::Float(sum))
                            },
                        ),
                    )
                    .property(
                        PropertyDeclaration::new("double", SemanticType::Float).linked(
                            &["total"],
                            |inputs| {
                                DOUBLE_CALLS.fetch_add(1, Ordering::SeqCst);
                                Ok(Value::Float(inputs.get_as::<f64>("total")? * 2.0))
                            },
                        ),
                    )
                    .property(
                        PropertyDeclaration::new("sneaky", SemanticType::String)
                            .linked(&["bonus"], |inputs| inputs.get("label")),
                    )
                    .property(
                        PropertyDeclaration::new("wrong", SemanticType::Int)
                            .linked(&["label"], |inputs| inputs.get("label")),
                    ),
            );
            registry::declare(
                TypeDeclaration::new("linked.Counter")
                    .property(PropertyDeclaration::new("base", SemanticType::Int))
                    .property(PropertyDeclaration::new("label", SemanticType::String))
                    .property(
                        PropertyDeclaration::new("scaled", SemanticType::Int).linked(
                            &["base"],
                            |inputs| {
                                COUNTER_CALLS.fetch_add(1, Ordering::SeqCst);
                                Ok(Value::Int(inputs.get_as::<i64>("base")? * 10))
                            },
                        ),
                    ),
            );
            registry::declare(
                TypeDeclaration::new("linked.Owner")
                    .property(PropertyDeclaration::new(
                        "bag",
                        SemanticType::object("linked.Bag"),
                    ))
                    .property(
                        PropertyDeclaration::new("carried", SemanticType::Float).linked(
                            &["bag.total"],
                            |inputs| match inputs.get("bag")? {
                                Value::Object(bag) => inputs.read(bag, "total"),
                                _ => Ok(Value::Float(0.0)),
                            },
                        ),
                    ),
            );
        });
    }

    fn bag_with_item(graph: &mut DataGraph, weight: f64) -> (ObjectId, ObjectId) {
        declare_types();
        let bag = graph.create("linked.Bag").unwrap();
        let item = graph.create("linked.Item").unwrap();
        graph.set(item, "weight", weight).unwrap();
        graph.append(bag, "items", item).unwrap();
        (bag, item)
    }

    // Call counters are shared across tests, so compare deltas
    fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[test]
    fn test_lazy_state_machine() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 2.0);

        assert_eq!(
            graph.link_state(bag, "total").unwrap(),
            Some(LinkStatus::Unevaluated)
        );
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(2.0));
        assert_eq!(graph.link_state(bag, "total").unwrap(), Some(LinkStatus::Valid));

        graph.set(bag, "bonus", 1.0).unwrap();
        assert_eq!(graph.link_state(bag, "total").unwrap(), Some(LinkStatus::Stale));
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(3.0));
        assert_eq!(graph.link_state(bag, "bonus").unwrap(), None);
    }

    #[test]
    fn test_recompute_exactly_once_after_change() {
        declare_types();
        let mut graph = DataGraph::new();
        let counter = graph.create("linked.Counter").unwrap();
        graph.set(counter, "base", 2).unwrap();
        assert_eq!(graph.get(counter, "scaled").unwrap(), Value::Int(20));

        let before = calls(&COUNTER_CALLS);
        graph.set(counter, "label", "unrelated").unwrap();
        assert_eq!(graph.get(counter, "scaled").unwrap(), Value::Int(20));
        assert_eq!(calls(&COUNTER_CALLS), before);

        graph.set(counter, "base", 3).unwrap();
        assert_eq!(calls(&COUNTER_CALLS), before);
        assert_eq!(graph.get(counter, "scaled").unwrap(), Value::Int(30));
        assert_eq!(graph.get(counter, "scaled").unwrap(), Value::Int(30));
        assert_eq!(calls(&COUNTER_CALLS), before + 1);
        assert_eq!(
            graph.link_state(counter, "scaled").unwrap(),
            Some(LinkStatus::Valid)
        );
    }

    #[test]
    fn test_unrelated_change_keeps_cache() {
        let mut graph = DataGraph::new();
        let (bag, item) = bag_with_item(&mut graph, 1.0);
        graph.get(bag, "total").unwrap();

        graph.set(bag, "label", "travel").unwrap();
        graph.set(item, "name", "rope").unwrap();
        assert_eq!(graph.link_state(bag, "total").unwrap(), Some(LinkStatus::Valid));
    }

    #[test]
    fn test_nested_change_invalidates() {
        let mut graph = DataGraph::new();
        let (bag, item) = bag_with_item(&mut graph, 1.0);
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(1.0));

        graph.set(item, "weight", 4.0).unwrap();
        assert_eq!(graph.link_state(bag, "total").unwrap(), Some(LinkStatus::Stale));
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(4.0));
    }

    #[test]
    fn test_collection_change_invalidates() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 1.0);
        graph.get(bag, "total").unwrap();

        let extra = graph.create("linked.Item").unwrap();
        graph.set(extra, "weight", 2.0).unwrap();
        graph.append(bag, "items", extra).unwrap();
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(3.0));

        graph.remove_at(bag, "items", 0).unwrap();
        assert_eq!(graph.get(bag, "total").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_transitive_invalidation() {
        let mut graph = DataGraph::new();
        let (bag, item) = bag_with_item(&mut graph, 1.5);
        assert_eq!(graph.get(bag, "double").unwrap(), Value::Float(3.0));
        assert_eq!(graph.link_state(bag, "double").unwrap(), Some(LinkStatus::Valid));

        graph.set(item, "weight", 2.0).unwrap();
        assert_eq!(graph.link_state(bag, "double").unwrap(), Some(LinkStatus::Stale));

        let before = calls(&DOUBLE_CALLS);
        assert_eq!(graph.get(bag, "double").unwrap(), Value::Float(4.0));
        assert!(calls(&DOUBLE_CALLS) > before);
    }

    #[test]
    fn test_invalidation_crosses_ancestors() {
        let mut graph = DataGraph::new();
        let (bag, item) = bag_with_item(&mut graph, 1.0);
        let owner = graph.create("linked.Owner").unwrap();
        graph.set(owner, "bag", bag).unwrap();

        assert_eq!(graph.get(owner, "carried").unwrap(), Value::Float(1.0));
        graph.set(item, "weight", 7.0).unwrap();
        assert_eq!(
            graph.link_state(owner, "carried").unwrap(),
            Some(LinkStatus::Stale)
        );
        assert_eq!(graph.get(owner, "carried").unwrap(), Value::Float(7.0));
    }

    #[test]
    fn test_depth_limit_keeps_owner_caches_reachable() {
        declare_types();
        let shallow = ModelConfig {
            max_depth: 2,
            ..Default::default()
        };
        let mut graph = DataGraph::with_config(shallow);
        let (bag, _item) = bag_with_item(&mut graph, 1.0);
        let owner = graph.create("linked.Owner").unwrap();
        assert_eq!(
            graph.set(owner, "bag", bag),
            Err(DataError::DepthExceeded { limit: 2 })
        );

        let mut graph = DataGraph::with_config(ModelConfig {
            max_depth: 3,
            ..Default::default()
        });
        let (bag, item) = bag_with_item(&mut graph, 1.0);
        let owner = graph.create("linked.Owner").unwrap();
        graph.set(owner, "bag", bag).unwrap();
        assert_eq!(graph.get(owner, "carried").unwrap(), Value::Float(1.0));

        graph.set(item, "weight", 10.0).unwrap();
        assert_eq!(
            graph.link_state(owner, "carried").unwrap(),
            Some(LinkStatus::Stale)
        );
        assert_eq!(graph.get(owner, "carried").unwrap(), Value::Float(10.0));
    }

    #[test]
    fn test_undeclared_read_fails() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 1.0);

        let err = graph.get(bag, "sneaky").unwrap_err();
        assert!(matches!(err, DataError::UndeclaredDependency { .. }));
        assert_eq!(
            graph.link_state(bag, "sneaky").unwrap(),
            Some(LinkStatus::Unevaluated)
        );
    }

    #[test]
    fn test_compute_result_is_type_checked() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 1.0);
        assert!(matches!(
            graph.get(bag, "wrong"),
            Err(DataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_linked_is_read_only() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 1.0);
        assert!(matches!(
            graph.set(bag, "total", 1.0),
            Err(DataError::ReadOnlyProperty { .. })
        ));
    }

    #[test]
    fn test_reset_linked_marks_stale() {
        let mut graph = DataGraph::new();
        let (bag, _item) = bag_with_item(&mut graph, 1.0);
        graph.get(bag, "double").unwrap();

        graph.reset(bag, "total").unwrap();
        assert_eq!(graph.link_state(bag, "total").unwrap(), Some(LinkStatus::Stale));
        assert_eq!(graph.link_state(bag, "double").unwrap(), Some(LinkStatus::Stale));
    }

    #[test]
    fn test_related_paths() {
        let p = |s: &str| s.split('.').map(str::to_string).collect::<Vec<_>>();
        assert!(related(&p("items.weight"), &p("items")));
        assert!(related(&p("items"), &p("items.weight")));
        assert!(!related(&p("items.weight"), &p("items.name")));
        assert!(!related(&p("bonus"), &p("label")));
    }
}
