use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{HandlerInfo, Payload, SubscriptionId, subscription::Registration};

/// Event type → registrations, each list kept in descending priority order.
pub(crate) struct Registry<P: Payload> {
    entries: Mutex<HashMap<Arc<str>, Vec<Arc<Registration<P>>>>>,
}

impl<P: Payload> Registry<P> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Append and re-sort. The sort is stable, so equal priorities keep
    /// insertion order.
    pub fn insert(&self, registration: Arc<Registration<P>>) {
        let mut entries = self.entries.lock().expect("Registry lock poisoned");
        let list = entries
            .entry(registration.event_type.clone())
            .or_default();
        list.push(registration);
        list.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Remove a registration from whichever type holds it.
    pub fn remove(&self, id: SubscriptionId) -> Option<Arc<Registration<P>>> {
        let mut entries = self.entries.lock().expect("Registry lock poisoned");
        let (event_type, index) = entries.iter().find_map(|(event_type, list)| {
            list.iter()
                .position(|r| r.id == id)
                .map(|index| (event_type.clone(), index))
        })?;
        let list = entries.get_mut(&event_type)?;
        let removed = list.remove(index);
        if list.is_empty() {
            entries.remove(&event_type);
        }
        Some(removed)
    }

    pub fn remove_all(&self, event_type: &str) -> usize {
        let mut entries = self.entries.lock().expect("Registry lock poisoned");
        entries.remove(event_type).map_or(0, |list| list.len())
    }

    /// Registrations for one dispatch. Later changes to the registry do not
    /// affect the returned list.
    pub fn snapshot(&self, event_type: &str) -> Vec<Arc<Registration<P>>> {
        let entries = self.entries.lock().expect("Registry lock poisoned");
        entries.get(event_type).cloned().unwrap_or_default()
    }

    pub fn handlers(&self, event_type: &str) -> Vec<HandlerInfo> {
        let entries = self.entries.lock().expect("Registry lock poisoned");
        entries
            .get(event_type)
            .map(|list| list.iter().map(|r| r.info()).collect())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        let entries = self.entries.lock().expect("Registry lock poisoned");
        let mut types: Vec<String> = entries.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }

    pub fn has_handlers(&self, event_type: &str) -> bool {
        let entries = self.entries.lock().expect("Registry lock poisoned");
        entries.get(event_type).is_some_and(|list| !list.is_empty())
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("Registry lock poisoned");
        entries.values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("Registry lock poisoned").clear();
    }
}
