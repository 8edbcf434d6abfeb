//! Change bus - subscription storage and synchronous dispatch
//!
//! Subscriptions live in a `SlotMap` and are indexed per object. Dispatch
//! walks a pre-computed receiver chain (source first, then ancestors) and
//! stops bubbling as soon as a receiver's callbacks ask it to.

use slotmap::{new_key_type, SecondaryMap, SlotMap};
use tracing::trace;

use super::types::{ChangeCallback, ChangeEvent, ChangeKind, Propagation};
use crate::model::ObjectId;

new_key_type! {
    /// Key for change subscriptions, used for removal
    pub struct SubscriptionKey;
}

/// Storage for one subscription
struct Subscription {
    object: ObjectId,
    /// Only deliver events that came through this property
    property: Option<String>,
    callback: ChangeCallback,
}

impl Subscription {
    fn accepts(&self, event: &ChangeEvent) -> bool {
        match &self.property {
            None => true,
            Some(name) => {
                matches!(event.kind, ChangeKind::Property | ChangeKind::Descendant)
                    && event.via() == name
            }
        }
    }
}

/// One dispatch: receivers in bubbling order, each with its own event copy
pub(crate) type Delivery = Vec<(ObjectId, ChangeEvent)>;

pub(crate) struct EventBus {
    subscriptions: SlotMap<SubscriptionKey, Subscription>,
    by_object: SecondaryMap<ObjectId, Vec<SubscriptionKey>>,
    /// Nesting level of deferred scopes
    deferred_depth: usize,
    /// Deliveries queued while deferred
    pending: Vec<Delivery>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: SlotMap::with_key(),
            by_object: SecondaryMap::new(),
            deferred_depth: 0,
            pending: Vec::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        object: ObjectId,
        property: Option<String>,
        callback: ChangeCallback,
    ) -> SubscriptionKey {
        let key = self.subscriptions.insert(Subscription {
            object,
            property,
            callback,
        });
        if let Some(entry) = self.by_object.entry(object) {
            entry.or_default().push(key);
        }
        trace!("Added subscription {:?} on {:?}", key, object);
        key
    }

    /// Remove a subscription
    ///
    /// # Returns
    /// `true` if the subscription was found and removed
    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        let Some(subscription) = self.subscriptions.remove(key) else {
            return false;
        };
        if let Some(keys) = self.by_object.get_mut(subscription.object) {
            keys.retain(|k| *k != key);
        }
        true
    }

    /// Drop every subscription on a destroyed object
    pub fn remove_object(&mut self, object: ObjectId) {
        if let Some(keys) = self.by_object.remove(object) {
            for key in keys {
                self.subscriptions.remove(key);
            }
        }
    }

    pub fn subscriber_count(&self, object: ObjectId) -> usize {
        self.by_object.get(object).map_or(0, Vec::len)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred_depth > 0
    }

    /// Deliver now, or queue if inside a deferred scope
    pub fn dispatch(&mut self, delivery: Delivery) {
        if delivery.is_empty() {
            return;
        }
        if self.is_deferred() {
            self.pending.push(delivery);
        } else {
            self.deliver_chain(&delivery);
        }
    }

    pub fn begin_deferred(&mut self) {
        self.deferred_depth += 1;
    }

    /// Leave a deferred scope, flushing the queue when the outermost ends
    pub fn end_deferred(&mut self) {
        self.deferred_depth = self.deferred_depth.saturating_sub(1);
        if self.deferred_depth > 0 {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            trace!("Flushing {} deferred deliveries", pending.len());
        }
        for delivery in &pending {
            self.deliver_chain(delivery);
        }
    }

    fn deliver_chain(&self, delivery: &Delivery) {
        for (receiver, event) in delivery {
            if self.deliver(*receiver, event) >= Propagation::Stop {
                trace!(
                    "Propagation of {}.{} stopped at {:?}",
                    event.type_name,
                    event.property,
                    receiver
                );
                break;
            }
        }
    }

    /// Run one receiver's callbacks
    fn deliver(&self, receiver: ObjectId, event: &ChangeEvent) -> Propagation {
        let Some(keys) = self.by_object.get(receiver) else {
            return Propagation::Continue;
        };

        let mut result = Propagation::Continue;
        for key in keys {
            let Some(subscription) = self.subscriptions.get(*key) else {
                continue;
            };
            if !subscription.accepts(event) {
                continue;
            }

            result = result.max((subscription.callback)(event));
            if result == Propagation::StopImmediate {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(source: ObjectId, kind: ChangeKind, path: &str) -> ChangeEvent {
        ChangeEvent {
            kind,
            source,
            type_name: "T".to_string(),
            property: "x".to_string(),
            index: 0,
            path: path.to_string(),
            old_value: Value::Int(0),
            new_value: Value::Int(1),
            edit: None,
        }
    }

    fn counter(result: Propagation) -> (Arc<AtomicUsize>, ChangeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback: ChangeCallback = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            result
        });
        (count, callback)
    }

    fn ids(n: usize) -> Vec<ObjectId> {
        let mut map: SlotMap<ObjectId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_stop_halts_bubbling_but_not_siblings() {
        let objs = ids(2);
        let mut bus = EventBus::new();
        let (first, cb1) = counter(Propagation::Stop);
        let (second, cb2) = counter(Propagation::Continue);
        let (parent, cb3) = counter(Propagation::Continue);
        bus.subscribe(objs[0], None, cb1);
        bus.subscribe(objs[0], None, cb2);
        bus.subscribe(objs[1], None, cb3);

        bus.dispatch(vec![
            (objs[0], event(objs[0], ChangeKind::Property, "x")),
            (objs[1], event(objs[0], ChangeKind::Descendant, "child.x")),
        ]);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(parent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_immediate_skips_siblings() {
        let objs = ids(1);
        let mut bus = EventBus::new();
        let (first, cb1) = counter(Propagation::StopImmediate);
        let (second, cb2) = counter(Propagation::Continue);
        bus.subscribe(objs[0], None, cb1);
        bus.subscribe(objs[0], None, cb2);

        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Property, "x"))]);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_property_filter() {
        let objs = ids(1);
        let mut bus = EventBus::new();
        let (hits, cb) = counter(Propagation::Continue);
        bus.subscribe(objs[0], Some("x".to_string()), cb);

        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Property, "y"))]);
        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Descendant, "x.inner"))]);
        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Attached, "x"))]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_flushes_at_outermost_scope() {
        let objs = ids(1);
        let mut bus = EventBus::new();
        let (hits, cb) = counter(Propagation::Continue);
        bus.subscribe(objs[0], None, cb);

        bus.begin_deferred();
        bus.begin_deferred();
        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Property, "x"))]);
        bus.end_deferred();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.end_deferred();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_object_is_skipped() {
        let objs = ids(1);
        let mut bus = EventBus::new();
        let (hits, cb) = counter(Propagation::Continue);
        let key = bus.subscribe(objs[0], None, cb);
        assert_eq!(bus.subscriber_count(objs[0]), 1);

        bus.begin_deferred();
        bus.dispatch(vec![(objs[0], event(objs[0], ChangeKind::Property, "x"))]);
        bus.remove_object(objs[0]);
        bus.end_deferred();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!bus.unsubscribe(key));
    }
}
