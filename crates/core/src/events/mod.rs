//! Change Notification Bus
//!
//! Subscribe to property changes on data objects. Every successful write
//! delivers a [`ChangeEvent`] to the object's subscribers, then bubbles a
//! `Descendant` copy up the ownership chain.
//!
//! # Architecture
//!
//! ```text
//! DataGraph::set → EventBus::dispatch → source callbacks → parent → ... → root
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datatree_core::events::{ChangeKind, Propagation};
//!
//! let key = graph.subscribe(inventory, |event| {
//!     if event.kind == ChangeKind::Descendant {
//!         tracing::info!("{} changed under inventory", event.path);
//!     }
//!     Propagation::Continue
//! })?;
//!
//! // Or collect events on a channel:
//! let (key, events) = graph.subscribe_channel(hero)?;
//! graph.set(hero, "health", 50)?;
//! assert_eq!(events.try_recv()?.property, "health");
//! ```

mod bus;
mod types;

pub(crate) use bus::{Delivery, EventBus};
pub use bus::SubscriptionKey;
pub use types::{ChangeCallback, ChangeEvent, ChangeKind, CollectionEdit, Entry, Propagation};
