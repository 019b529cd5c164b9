//! Subscription registry (C4): a generational-slot table of
//! `{pattern, callback, owner, originator_filter}` records.

use crate::error::Error;
use crate::task::TaskId;
use crate::topic::{match_topic, valid_pattern};

/// Opaque handle to a live subscription: a slot index paired with the
/// generation it was issued under. Never reused in value across a
/// scheduler's lifetime, even once the slot backing a removed subscription
/// is recycled for a later `subscribe` call (the generation is bumped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    index: u32,
    generation: u32,
}

/// A subscription callback: invoked with the owning scheduler plus
/// `(topic, payload, originator)`, the same explicit-handle convention
/// [`crate::task::TaskCallback`] uses.
pub type SubscriptionCallback =
    Box<dyn FnMut(&mut crate::scheduler::Scheduler, &str, &str, &str)>;

pub(crate) struct Subscription {
    pub pattern: String,
    /// `None` only while a callback is taken out for invocation; see
    /// [`SubscriptionRegistry::take_callback`].
    pub callback: Option<SubscriptionCallback>,
    pub owner_task_id: TaskId,
    pub originator_filter: Option<String>,
}

struct Slot {
    generation: u32,
    entry: Option<Subscription>,
}

/// Growable sequence of subscriptions, iterated in insertion order during
/// drain. Removal clears a slot in place rather than swapping with the last
/// element, so live entries never change relative order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: Vec<Slot>,
    next_generation: u32,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_generation: 1,
        }
    }

    pub fn subscribe(
        &mut self,
        owner_task_id: TaskId,
        pattern: impl Into<String>,
        originator_filter: Option<String>,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, Error> {
        let pattern = pattern.into();
        if !valid_pattern(&pattern) {
            return Err(Error::InvalidPattern(pattern));
        }
        let generation = self.next_generation;
        self.next_generation = self
            .next_generation
            .checked_add(1)
            .ok_or(Error::RegistryFull)?;

        let entry = Subscription {
            pattern,
            callback: Some(callback),
            owner_task_id,
            originator_filter,
        };

        // Always append rather than recycling a freed slot: dispatch order is
        // slot order, and reusing a lower index for a later subscription
        // would deliver to it ahead of an older, still-live subscription
        // sitting at a higher index. The generation counter alone is enough
        // to keep handles from being reused in value.
        self.slots.push(Slot {
            generation,
            entry: Some(entry),
        });
        Ok(SubscriptionHandle {
            index: (self.slots.len() - 1) as u32,
            generation,
        })
    }

    /// Remove exactly the subscription identified by `handle`. Returns
    /// `false` if it is unknown (already removed, or never existed).
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.entry.is_some() => {
                slot.entry = None;
                true
            }
            _ => false,
        }
    }

    /// Remove every subscription owned by `task_id` (used when a task is
    /// removed from the scheduler).
    pub fn remove_owned_by(&mut self, task_id: TaskId) {
        for slot in self.slots.iter_mut() {
            if let Some(sub) = &slot.entry {
                if sub.owner_task_id == task_id {
                    slot.entry = None;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count, including freed slots — the upper bound for
    /// index-based dispatch iteration. Re-read on every loop iteration by
    /// callers so a subscribe triggered from a callback is visible, and a
    /// removed slot is simply skipped.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// If the slot at `index` is live, its pattern matches `topic`, and it is
    /// not suppressed by `originator`, returns its handle and owning task.
    pub fn match_at(&self, index: usize, topic: &str, originator: &str) -> Option<(SubscriptionHandle, TaskId)> {
        let slot = self.slots.get(index)?;
        let sub = slot.entry.as_ref()?;
        if !match_topic(topic, &sub.pattern) {
            return None;
        }
        if let Some(filter) = &sub.originator_filter {
            if !originator.is_empty() && filter == originator {
                return None;
            }
        }
        Some((
            SubscriptionHandle {
                index: index as u32,
                generation: slot.generation,
            },
            sub.owner_task_id,
        ))
    }

    /// Take `handle`'s callback out so it can be invoked with full
    /// `&mut Scheduler` access. `None` if the handle is stale.
    pub fn take_callback(&mut self, handle: SubscriptionHandle) -> Option<SubscriptionCallback> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
            .and_then(|sub| sub.callback.take())
    }

    /// Restore a callback previously removed by
    /// [`SubscriptionRegistry::take_callback`]. A no-op if the subscription
    /// was removed while its callback was out.
    pub fn restore_callback(&mut self, handle: SubscriptionHandle, callback: SubscriptionCallback) {
        if let Some(sub) = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_mut())
        {
            sub.callback = Some(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    fn main_task() -> TaskId {
        TaskId::MAIN
    }

    fn noop() -> SubscriptionCallback {
        Box::new(|_, _, _, _| {})
    }

    #[test]
    fn subscribe_then_unsubscribe_preserves_length() {
        let mut reg = SubscriptionRegistry::new();
        let h = reg.subscribe(main_task(), "a/b", None, noop()).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.unsubscribe(h));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn unsubscribe_then_subscribe_never_reuses_handle() {
        let mut reg = SubscriptionRegistry::new();
        let h1 = reg.subscribe(main_task(), "a", None, noop()).unwrap();
        reg.unsubscribe(h1);
        let h2 = reg.subscribe(main_task(), "b", None, noop()).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn unsubscribe_unknown_handle_returns_false() {
        let mut reg = SubscriptionRegistry::new();
        let h = reg.subscribe(main_task(), "a", None, noop()).unwrap();
        reg.unsubscribe(h);
        assert!(!reg.unsubscribe(h));
    }

    #[test]
    fn removal_does_not_reorder_remaining_subscriptions() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.subscribe(main_task(), "t", None, noop()).unwrap();
        let b = reg.subscribe(main_task(), "t", None, noop()).unwrap();
        let c = reg.subscribe(main_task(), "t", None, noop()).unwrap();
        reg.unsubscribe(b);

        let mut seen = Vec::new();
        for i in 0..reg.slot_count() {
            if let Some((h, _)) = reg.match_at(i, "t", "") {
                seen.push(h);
            }
        }
        assert_eq!(seen, vec![a, c]);
    }

    #[test]
    fn new_subscription_after_a_removal_does_not_jump_ahead_of_older_ones() {
        // a (slot 0), b (slot 1); remove a, freeing slot 0; subscribe c.
        // c must NOT be recycled into slot 0 and visited ahead of b, which
        // was registered first and never removed.
        let mut reg = SubscriptionRegistry::new();
        let a = reg.subscribe(main_task(), "t", None, noop()).unwrap();
        let b = reg.subscribe(main_task(), "t", None, noop()).unwrap();
        reg.unsubscribe(a);
        let c = reg.subscribe(main_task(), "t", None, noop()).unwrap();

        let mut seen = Vec::new();
        for i in 0..reg.slot_count() {
            if let Some((h, _)) = reg.match_at(i, "t", "") {
                seen.push(h);
            }
        }
        assert_eq!(seen, vec![b, c]);
    }

    #[test]
    fn originator_filter_suppresses_matching_loopback() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(main_task(), "t", Some("taskA".to_string()), noop())
            .unwrap();

        assert!(reg.match_at(0, "t", "taskA").is_none());
        assert!(reg.match_at(0, "t", "").is_some());
    }

    #[test]
    fn pattern_matching_is_unaffected_by_other_subscriptions() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(main_task(), "a/+", None, noop()).unwrap();
        let before = reg.match_at(0, "a/b", "").is_some();
        reg.subscribe(main_task(), "a/+", None, noop()).unwrap();
        let after = reg.match_at(0, "a/b", "").is_some();
        assert_eq!(before, after);
    }
}
