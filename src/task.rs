//! Task registry (C5): a generational-slot table of periodically-invoked
//! callbacks.

use crate::error::Error;

/// Identifies a registered task. `TaskId::MAIN` is reserved for the host
/// context and is never handed out by [`TaskRegistry::add`]; it exists only
/// so CPU accounting has somewhere to attribute work done outside any
/// registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub const MAIN: TaskId = TaskId {
        index: u32::MAX,
        generation: 0,
    };

    fn slot(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

/// Advisory dispatch priority. Recorded but never consulted — dispatch order
/// is always registration order, per the scheduler's contract. Reserved for
/// future use by a host that wants to act on it outside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    SystemCritical,
    TimeCritical,
    High,
    #[default]
    Normal,
    Low,
    Lowest,
}

/// A task callback. Takes the owning [`crate::scheduler::Scheduler`] so it
/// can publish, subscribe, add, or remove tasks of its own accord — the
/// explicit-handle equivalent of the source's shared-scheduler-pointer
/// design, per this crate's no-global-singleton rule.
pub type TaskCallback = Box<dyn FnMut(&mut crate::scheduler::Scheduler)>;

pub(crate) struct TaskRecord {
    pub name: Option<String>,
    /// `None` only for the brief window a callback is taken out to be
    /// invoked with full scheduler access; see
    /// [`TaskRegistry::take_callback`].
    pub callback: Option<TaskCallback>,
    pub period_us: u32,
    pub priority: Priority,
    pub last_call_us: u32,
    pub cpu_time_us: u64,
    pub late_time_us: u64,
}

struct Slot {
    generation: u32,
    entry: Option<TaskRecord>,
}

/// Growable sequence of tasks keyed by [`TaskId`]. Iteration order is
/// insertion order and defines dispatch order within a step.
#[derive(Default)]
pub struct TaskRegistry {
    slots: Vec<Slot>,
    next_generation: u32,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_generation: 1,
        }
    }

    /// `last_call_us` starts at 0, so the task becomes due as soon as the
    /// scheduler observes `delta(0, now) >= period_us` — which may be on the
    /// very first `step()` after registration if the clock has already run
    /// for at least a period's worth of time.
    pub fn add(
        &mut self,
        callback: TaskCallback,
        name: Option<String>,
        period_us: u32,
        priority: Priority,
    ) -> Result<TaskId, Error> {
        let generation = self.next_generation;
        self.next_generation = self
            .next_generation
            .checked_add(1)
            .ok_or(Error::RegistryFull)?;

        let record = TaskRecord {
            name,
            callback: Some(callback),
            period_us,
            priority,
            last_call_us: 0,
            cpu_time_us: 0,
            late_time_us: 0,
        };

        // Always append rather than recycling a freed slot: dispatch order is
        // slot order, and reusing a lower index for a later task would run
        // it ahead of an older, still-live task sitting at a higher index.
        // The generation counter alone is enough to keep ids from being
        // reused in value.
        self.slots.push(Slot {
            generation,
            entry: Some(record),
        });
        Ok(TaskId::slot((self.slots.len() - 1) as u32, generation))
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        if id.is_main() {
            return false;
        }
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => {
                slot.entry = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        if id.is_main() {
            return None;
        }
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        if id.is_main() {
            return None;
        }
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live task, in registration (slot) order. A point-in-time
    /// snapshot — prefer [`TaskRegistry::slot_count`]/[`TaskRegistry::id_at`]
    /// for dispatch, which re-read the registry on every step of the loop.
    pub fn live_ids(&self) -> Vec<TaskId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(i, s)| TaskId::slot(i as u32, s.generation))
            .collect()
    }

    /// Total slot count, including freed slots — the upper bound for
    /// index-based dispatch iteration. Re-read on every loop iteration by
    /// callers so a task added from within a running callback is visible,
    /// the same convention [`crate::subscription::SubscriptionRegistry::slot_count`]
    /// uses.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The id of the task at `index`, if that slot is currently live.
    pub fn id_at(&self, index: usize) -> Option<TaskId> {
        let slot = self.slots.get(index)?;
        slot.entry.as_ref()?;
        Some(TaskId::slot(index as u32, slot.generation))
    }

    /// Reset every live task's `cpu_time_us`/`late_time_us` to zero, as the
    /// stats tick does.
    pub fn reset_stats(&mut self) {
        for slot in &mut self.slots {
            if let Some(task) = &mut slot.entry {
                task.cpu_time_us = 0;
                task.late_time_us = 0;
            }
        }
    }

    /// A per-task counters snapshot for a stats tick, in registration order.
    pub fn snapshot(&self) -> Vec<crate::scheduler::TaskStatsEntry> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.entry.as_ref().map(|t| crate::scheduler::TaskStatsEntry {
                    id: TaskId::slot(i as u32, s.generation),
                    name: t.name.clone(),
                    cpu_time_us: t.cpu_time_us,
                    late_time_us: t.late_time_us,
                })
            })
            .collect()
    }

    /// Remove `id`'s callback from its record so it can be invoked with full
    /// `&mut Scheduler` access without aliasing the record it lives in.
    /// Returns `None` if `id` is unknown or the callback is already taken
    /// (re-entrant invocation of the same task, which cannot happen through
    /// the public API but is guarded against defensively).
    pub fn take_callback(&mut self, id: TaskId) -> Option<TaskCallback> {
        self.get_mut(id).and_then(|t| t.callback.take())
    }

    /// Restore a callback previously removed by [`TaskRegistry::take_callback`].
    /// A no-op if the task was removed while its callback was out.
    pub fn restore_callback(&mut self, id: TaskId, callback: TaskCallback) {
        if let Some(task) = self.get_mut(id) {
            task.callback = Some(callback);
        }
    }
}
