use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::Note;

pub type Listener = Box<dyn FnMut(&[Note])>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: IndexMap<u64, Listener>,
}

impl Listeners {
    pub(crate) fn register(registry: &Rc<RefCell<Self>>, listener: Listener) -> Subscription {
        let mut inner = registry.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, listener);
        Subscription {
            id,
            registry: Rc::downgrade(registry),
        }
    }

    pub(crate) fn notify(&mut self, snapshot: &[Note]) {
        for listener in self.entries.values_mut() {
            listener(snapshot);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by [`super::NoteStore::subscribe`]. Dropping it keeps the
/// listener registered; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().entries.shift_remove(&self.id);
        }
    }
}
