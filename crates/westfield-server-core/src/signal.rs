//! Listener lists for engine notifications.

use std::rc::Rc;

/// Handle returned when a listener is attached, used to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An ordered list of listeners of type `F`.
///
/// Emission snapshots the list so listeners can attach or detach other
/// listeners, or call back into the engine, while being notified.
pub struct Signal<F: ?Sized> {
    listeners: Vec<(ListenerId, Rc<F>)>,
    next_id: u64,
}

impl<F: ?Sized> Signal<F> {
    /// Creates an empty signal.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Appends a listener; listeners are notified in insertion order.
    pub fn add(&mut self, listener: Rc<F>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Detaches a listener. Returns false if it was not attached.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Snapshot of the current listeners, in notification order.
    pub fn snapshot(&self) -> Vec<Rc<F>> {
        self.listeners.iter().map(|(_, l)| Rc::clone(l)).collect()
    }

    /// Drops every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of attached listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is attached.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<F: ?Sized> Default for Signal<F> {
    fn default() -> Self {
        Self::new()
    }
}
