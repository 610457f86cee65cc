//! In-memory resource store with watch fan-out
//!
//! Every mutation bumps the object's resourceVersion and is delivered to
//! the subscribers whose selector matches, in the order it happened.

use std::collections::BTreeMap;

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedSender};
use kube::{Resource, ResourceExt};

use crate::error::ClusterError;
use crate::models::{Selector, WatchEvent, WatchStream};

type Subscriber<K> = (Selector, UnboundedSender<Result<WatchEvent<K>, ClusterError>>);

pub(crate) struct ResourceStore<K> {
    kind: &'static str,
    objects: BTreeMap<String, K>,
    subscribers: Vec<Subscriber<K>>,
    next_version: u64,
}

impl<K> ResourceStore<K>
where
    K: Resource + Clone + Send + 'static,
{
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            objects: BTreeMap::new(),
            subscribers: Vec::new(),
            next_version: 1,
        }
    }

    fn not_found(&self, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind: self.kind,
            name: name.to_string(),
        }
    }

    fn stamp(&mut self, obj: &mut K) {
        obj.meta_mut().resource_version = Some(self.next_version.to_string());
        self.next_version += 1;
    }

    fn publish(&mut self, event: &WatchEvent<K>) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (selector, tx) in &self.subscribers {
            let in_scope = match event.object() {
                Some(obj) => selector.matches(&obj.name_any(), obj.labels()),
                None => true,
            };
            if in_scope {
                // A closed receiver is pruned on the next publish
                let _ = tx.unbounded_send(Ok(event.clone()));
            }
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<K, ClusterError> {
        self.objects.get(name).cloned().ok_or_else(|| self.not_found(name))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub(crate) fn list(&self, selector: &Selector) -> Vec<K> {
        self.objects
            .values()
            .filter(|obj| selector.matches(&obj.name_any(), obj.labels()))
            .cloned()
            .collect()
    }

    /// Insert or overwrite without a version check
    pub(crate) fn upsert(&mut self, mut obj: K) -> K {
        self.stamp(&mut obj);
        let name = obj.name_any();
        let existed = self.objects.insert(name, obj.clone()).is_some();
        let event = if existed {
            WatchEvent::Modified(obj.clone())
        } else {
            WatchEvent::Added(obj.clone())
        };
        self.publish(&event);
        obj
    }

    /// Create; an existing object with the same name is a conflict
    pub(crate) fn create(&mut self, obj: K) -> Result<K, ClusterError> {
        let name = obj.name_any();
        if self.objects.contains_key(&name) {
            return Err(ClusterError::Conflict { kind: self.kind, name });
        }
        Ok(self.upsert(obj))
    }

    /// Replace, honouring optimistic concurrency on resourceVersion
    pub(crate) fn replace(&mut self, obj: K) -> Result<K, ClusterError> {
        let name = obj.name_any();
        let current = self.objects.get(&name).ok_or_else(|| self.not_found(&name))?;
        if let Some(sent) = obj.meta().resource_version.as_deref() {
            if current.meta().resource_version.as_deref() != Some(sent) {
                return Err(ClusterError::Conflict { kind: self.kind, name });
            }
        }
        Ok(self.upsert(obj))
    }

    /// Apply a mutation to a stored object and publish it as `Modified`
    pub(crate) fn modify(&mut self, name: &str, f: impl FnOnce(&mut K)) -> Result<K, ClusterError> {
        let mut obj = self.get(name)?;
        f(&mut obj);
        Ok(self.upsert(obj))
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<K, ClusterError> {
        let obj = self.objects.remove(name).ok_or_else(|| self.not_found(name))?;
        self.publish(&WatchEvent::Deleted(obj.clone()));
        Ok(obj)
    }

    /// Open a subscription. Matching objects are replayed as `Added`
    /// first, like a watch started from resourceVersion 0.
    pub(crate) fn watch(&mut self, selector: &Selector) -> WatchStream<K> {
        let (tx, rx) = mpsc::unbounded();
        for obj in self.list(selector) {
            let _ = tx.unbounded_send(Ok(WatchEvent::Added(obj)));
        }
        self.subscribers.push((selector.clone(), tx));
        rx.boxed()
    }

    /// Deliver a raw event to every live subscriber in scope
    pub(crate) fn inject(&mut self, event: WatchEvent<K>) {
        self.publish(&event);
    }

    /// End every open subscription
    pub(crate) fn close_watches(&mut self) {
        self.subscribers.clear();
    }

    pub(crate) fn active_watches(&mut self) -> usize {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        self.subscribers.len()
    }
}
