//! Drops watch events that only touch bookkeeping fields
//!
//! Every status write bumps `resourceVersion` and `managedFields`, and every
//! injector attempt appends a record event. None of these need another
//! reconcile, so the watch stream is filtered on a fingerprint that leaves
//! them out.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use kube::runtime::watcher::Event;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

/// Remembers the last fingerprint seen per object
#[derive(Default)]
pub struct SpecChangeFilter {
    seen: DashMap<String, u64>,
}

impl SpecChangeFilter {
    /// Whether `event` should reach the controller.
    ///
    /// Deletions always pass and forget the object.
    pub fn admit<K>(&self, event: &Event<K>) -> bool
    where
        K: Resource + Serialize,
    {
        match event {
            Event::Apply(obj) | Event::InitApply(obj) => self.changed(obj),
            Event::Delete(obj) => {
                self.seen.remove(&object_key(obj));
                true
            }
            Event::Init | Event::InitDone => true,
        }
    }

    /// Record `obj` and report whether its fingerprint moved
    pub fn changed<K>(&self, obj: &K) -> bool
    where
        K: Resource + Serialize,
    {
        let Some(print) = fingerprint(obj) else {
            return true;
        };
        let key = object_key(obj);
        let previous = self.seen.insert(key.clone(), print);
        let changed = previous != Some(print);
        if !changed {
            trace!(object = %key, "bookkeeping-only change filtered");
        }
        changed
    }
}

fn object_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Hash of the object without the fields that change on every write
fn fingerprint<K: Serialize>(obj: &K) -> Option<u64> {
    let mut value = serde_json::to_value(obj).ok()?;
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("resourceVersion");
        meta.remove("managedFields");
    }
    if let Some(records) = value
        .pointer_mut("/status/experiment/records")
        .and_then(Value::as_array_mut)
    {
        for record in records.iter_mut().filter_map(Value::as_object_mut) {
            record.remove("events");
        }
    }

    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    Some(hasher.finish())
}
