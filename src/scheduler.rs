//! The dispatcher (C6), public API (C7), and stats tick (C8, C9) — the heart
//! of the crate. `Scheduler::step()` is the single entry point a host calls
//! in a tight loop; everything else is bookkeeping around it.

use crate::clock::{delta, Clock, SystemClock};
use crate::error::Error;
use crate::queue::{Message, MessageQueue};
use crate::subscription::{SubscriptionCallback, SubscriptionHandle, SubscriptionRegistry};
use crate::task::{Priority, TaskCallback, TaskId, TaskRegistry};

/// Default task invocation period, matching the source's own default.
pub const DEFAULT_PERIOD_US: u32 = 100_000;

/// A nullary hook a host can provide to service its own event loop (or feed
/// a watchdog) between tasks. Invoked, if present, after every task slot is
/// considered — whether or not that task actually ran. Default is a no-op.
pub trait YieldHook {
    fn yield_now(&mut self) {}
}

/// Default [`YieldHook`] that does nothing.
#[derive(Debug, Default)]
pub struct NoopYieldHook;
impl YieldHook for NoopYieldHook {}

/// Per-task counters as published by a stats tick.
#[derive(Debug, Clone)]
pub struct TaskStatsEntry {
    pub id: TaskId,
    pub name: Option<String>,
    pub cpu_time_us: u64,
    pub late_time_us: u64,
}

/// Snapshot handed to a [`StatsSink`] once per stats interval.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub system_time_us: u64,
    pub main_time_us: u64,
    pub tasks: Vec<TaskStatsEntry>,
}

/// Receives a [`StatsSnapshot`] once per stats interval. Default is a no-op;
/// [`LoggingStatsSink`] logs a summary line the way the teacher's scheduler
/// periodically logged queue/dispatch counters.
pub trait StatsSink {
    fn on_stats(&mut self, snapshot: &StatsSnapshot);
}

/// No-op [`StatsSink`].
#[derive(Debug, Default)]
pub struct NoopStatsSink;
impl StatsSink for NoopStatsSink {
    fn on_stats(&mut self, _snapshot: &StatsSnapshot) {}
}

/// Logs a single `debug` line per stats tick.
#[derive(Debug, Default)]
pub struct LoggingStatsSink;
impl StatsSink for LoggingStatsSink {
    fn on_stats(&mut self, snapshot: &StatsSnapshot) {
        log::debug!(
            "scheduler stats: system_us={} main_us={} tasks={}",
            snapshot.system_time_us,
            snapshot.main_time_us,
            snapshot.tasks.len()
        );
        for task in &snapshot.tasks {
            log::trace!(
                "  task {:?} ({}): cpu_us={} late_us={}",
                task.id,
                task.name.as_deref().unwrap_or("<unnamed>"),
                task.cpu_time_us,
                task.late_time_us
            );
        }
    }
}

/// Static construction parameters for a [`Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    pub max_message_len: usize,
    pub stats_interval_us: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            max_message_len: 4096,
            stats_interval_us: 1_000_000,
        }
    }
}

/// Dispatch mode state machine (§4.8): `Normal` runs every due task in
/// registration order; `Pinned(id)` restricts dispatch to one task and
/// suppresses queue drain and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Normal,
    Pinned(TaskId),
}

/// The cooperative scheduler and topic-routed message bus.
///
/// Not re-entrant: calling [`Scheduler::step`] from within a running
/// task/subscription callback (directly or transitively) panics, since the
/// scheduler has no preemption story for that case — spec's own "unhandled
/// failure inside the dispatcher itself is a programming error" clause.
pub struct Scheduler {
    clock: Box<dyn Clock>,
    yield_hook: Box<dyn YieldHook>,
    stats_sink: Box<dyn StatsSink>,

    queue: MessageQueue,
    max_message_len: usize,
    subscriptions: SubscriptionRegistry,
    tasks: TaskRegistry,

    mode: DispatchMode,

    start_us: u32,
    last_system_sample_us: u32,
    last_stats_us: u32,
    stats_interval_us: u32,
    system_time_us: u64,
    main_time_us: u64,

    in_step: bool,
}

impl Scheduler {
    /// A scheduler with a [`SystemClock`], no yield hook, and no stats sink —
    /// the common hosted case.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock::new()))
    }

    /// A scheduler driven by a caller-supplied clock (e.g. a [`crate::clock::TestClock`]
    /// or a bare-metal timer wrapper), with a no-op yield hook and stats sink.
    pub fn with_clock(config: SchedulerConfig, clock: Box<dyn Clock>) -> Self {
        Self::with_hooks(
            config,
            clock,
            Box::new(NoopYieldHook),
            Box::new(NoopStatsSink),
        )
    }

    /// Full control over every external collaborator (§6).
    pub fn with_hooks(
        config: SchedulerConfig,
        clock: Box<dyn Clock>,
        yield_hook: Box<dyn YieldHook>,
        stats_sink: Box<dyn StatsSink>,
    ) -> Self {
        let now = clock.now_us();
        Self {
            clock,
            yield_hook,
            stats_sink,
            queue: MessageQueue::new(config.queue_capacity),
            max_message_len: config.max_message_len,
            subscriptions: SubscriptionRegistry::new(),
            tasks: TaskRegistry::new(),
            mode: DispatchMode::Normal,
            start_us: now,
            last_system_sample_us: now,
            last_stats_us: now,
            stats_interval_us: config.stats_interval_us,
            system_time_us: 0,
            main_time_us: 0,
            in_step: false,
        }
    }

    // ---- Public API (C7) ----------------------------------------------

    /// Enqueue a message for delivery on the next drain. Fails with
    /// [`Error::QueueFull`] if the ring is saturated, or
    /// [`Error::MessageTooLarge`] if the payload exceeds the configured cap.
    pub fn publish(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<String>,
        originator: impl Into<String>,
    ) -> Result<(), Error> {
        let payload = payload.into();
        if payload.len() > self.max_message_len {
            return Err(Error::MessageTooLarge {
                len: payload.len(),
                max: self.max_message_len,
            });
        }
        let msg = Message::new(topic, payload, originator);
        if self.queue.push(msg) {
            Ok(())
        } else {
            Err(Error::QueueFull)
        }
    }

    /// Register a subscription. An empty `originator` disables loopback
    /// suppression (same convention as [`Scheduler::publish`]'s `originator`).
    pub fn subscribe(
        &mut self,
        owner_task_id: TaskId,
        pattern: impl Into<String>,
        originator_filter: impl Into<String>,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle, Error> {
        let originator_filter = originator_filter.into();
        let filter = if originator_filter.is_empty() {
            None
        } else {
            Some(originator_filter)
        };
        self.subscriptions
            .subscribe(owner_task_id, pattern, filter, callback)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), Error> {
        if self.subscriptions.unsubscribe(handle) {
            Ok(())
        } else {
            Err(Error::UnknownHandle)
        }
    }

    /// Register a task. `period_us` is the minimum interval between
    /// invocations. `last_call_us` starts at 0, so the task runs for the
    /// first time as soon as the scheduler observes `delta(0, now) >=
    /// period_us` — immediately, if the clock has already run at least a
    /// period's worth of time before this call.
    pub fn add_task(
        &mut self,
        callback: TaskCallback,
        name: Option<String>,
        period_us: u32,
        priority: Priority,
    ) -> Result<TaskId, Error> {
        self.tasks.add(callback, name, period_us, priority)
    }

    /// Remove a task and every subscription it owns.
    pub fn remove_task(&mut self, id: TaskId) -> Result<(), Error> {
        if self.tasks.remove(id) {
            self.subscriptions.remove_owned_by(id);
            Ok(())
        } else {
            Err(Error::UnknownHandle)
        }
    }

    /// Restrict subsequent [`Scheduler::step`] calls to `id` only, suppressing
    /// queue drain and stats — for reserving the CPU during an uninterruptible
    /// procedure.
    pub fn set_single_task_mode(&mut self, id: TaskId) {
        self.mode = DispatchMode::Pinned(id);
    }

    /// Return to normal round-robin dispatch.
    pub fn clear_single_task_mode(&mut self) {
        self.mode = DispatchMode::Normal;
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Seconds elapsed since this scheduler was constructed, per the clock
    /// it was given.
    pub fn uptime_seconds(&self) -> u32 {
        delta(self.start_us, self.clock.now_us()) / 1_000_000
    }

    /// Exposed for testing/diagnostics per the source's own `match` entry
    /// point (§4.7).
    pub fn topic_matches(topic: &str, pattern: &str) -> bool {
        crate::topic::match_topic(topic, pattern)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    // ---- Dispatcher (C6) ------------------------------------------------

    /// Advance the scheduler by one step: drain the queue and run due tasks,
    /// in registration order. Host code calls this in a tight loop.
    pub fn step(&mut self) {
        if self.in_step {
            panic!("Scheduler::step is not re-entrant");
        }
        self.in_step = true;

        let now = self.clock.now_us();
        self.system_time_us += delta(self.last_system_sample_us, now) as u64;
        self.last_system_sample_us = now;

        match self.mode {
            DispatchMode::Pinned(id) => {
                self.run_task_if_due(id);
            }
            DispatchMode::Normal => {
                self.maybe_emit_stats(now);
                self.drain_queue();
                // Index-based iteration, re-reading slot_count() every loop:
                // tolerates add_task/remove_task called from within a task
                // callback, the same discipline deliver() uses for
                // subscriptions.
                let mut i = 0;
                while i < self.tasks.slot_count() {
                    if let Some(id) = self.tasks.id_at(i) {
                        self.run_task_if_due(id);
                        self.drain_queue();
                        self.account_yield();
                    }
                    i += 1;
                }
            }
        }

        self.in_step = false;
    }

    fn account_yield(&mut self) {
        let before = self.clock.now_us();
        self.yield_hook.yield_now();
        let after = self.clock.now_us();
        self.system_time_us += delta(before, after) as u64;
    }

    /// Drain processes the messages present at entry plus any published by a
    /// callback during this same call, bounded by queue capacity so a chain
    /// of republishing tasks can never recurse unboundedly. Messages
    /// produced during a drain ARE visible to later subscriptions within
    /// that same drain (the Open Question spec leaves to implementations is
    /// pinned here, exercised by `tests::drain_sees_messages_published_during_drain`).
    fn drain_queue(&mut self) {
        let budget = self.queue.capacity().max(1);
        let mut processed = 0usize;
        while processed < budget {
            let Some(msg) = self.queue.pop() else {
                break;
            };
            processed += 1;
            self.deliver(&msg);
        }
    }

    fn deliver(&mut self, msg: &Message) {
        // Index-based iteration, re-reading slot_count() every step: tolerates
        // subscribe/unsubscribe calls made from within a delivered callback.
        let mut i = 0;
        while i < self.subscriptions.slot_count() {
            if let Some((handle, owner)) = self
                .subscriptions
                .match_at(i, &msg.topic, &msg.originator)
            {
                if let Some(mut callback) = self.subscriptions.take_callback(handle) {
                    let start = self.clock.now_us();
                    callback(self, &msg.topic, &msg.payload, &msg.originator);
                    let after = self.clock.now_us();
                    self.subscriptions.restore_callback(handle, callback);
                    self.bill(owner, delta(start, after) as u64);
                }
            }
            i += 1;
        }
    }

    fn bill(&mut self, owner: TaskId, cost_us: u64) {
        if let Some(rec) = self.tasks.get_mut(owner) {
            rec.cpu_time_us += cost_us;
        } else {
            self.main_time_us += cost_us;
        }
    }

    fn run_task_if_due(&mut self, id: TaskId) {
        let now = self.clock.now_us();
        let Some(rec) = self.tasks.get(id) else {
            return;
        };
        let since_last = delta(rec.last_call_us, now);
        if since_last < rec.period_us {
            return;
        }
        let period = rec.period_us;

        let Some(mut callback) = self.tasks.take_callback(id) else {
            return;
        };
        callback(self);
        let after = self.clock.now_us();
        self.tasks.restore_callback(id, callback);

        if let Some(rec) = self.tasks.get_mut(id) {
            rec.cpu_time_us += delta(now, after) as u64;
            rec.late_time_us += (since_last - period) as u64;
            rec.last_call_us = now;
        }
    }

    // ---- Stats (C8) -------------------------------------------------------

    fn maybe_emit_stats(&mut self, now: u32) {
        if self.stats_interval_us == 0 {
            return;
        }
        if delta(self.last_stats_us, now) < self.stats_interval_us {
            return;
        }
        self.last_stats_us = now;

        let snapshot = StatsSnapshot {
            system_time_us: self.system_time_us,
            main_time_us: self.main_time_us,
            tasks: self.tasks.snapshot(),
        };
        self.stats_sink.on_stats(&snapshot);

        self.system_time_us = 0;
        self.main_time_us = 0;
        self.tasks.reset_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn scheduler_with_clock() -> (Scheduler, Rc<TestClock>) {
        let clock = Rc::new(TestClock::new());
        let sched = Scheduler::with_clock(SchedulerConfig::default(), Box::new(SharedClock(clock.clone())));
        (sched, clock)
    }

    struct SharedClock(Rc<TestClock>);
    impl Clock for SharedClock {
        fn now_us(&self) -> u32 {
            self.0.now_us()
        }
    }

    #[test]
    fn exact_topic_match_delivers_once() {
        let (mut sched, _clock) = scheduler_with_clock();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "sensors/temp",
                "",
                Box::new(move |_s, topic, payload, originator| {
                    r.borrow_mut()
                        .push((topic.to_string(), payload.to_string(), originator.to_string()));
                }),
            )
            .unwrap();
        sched.publish("sensors/temp", "21.5", "").unwrap();
        sched.step();
        assert_eq!(
            *received.borrow(),
            vec![("sensors/temp".into(), "21.5".into(), "".into())]
        );
    }

    #[test]
    fn single_segment_wildcard_delivers_matching_only() {
        let (mut sched, _clock) = scheduler_with_clock();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "sensors/+/value",
                "",
                Box::new(move |_s, _t, payload, _o| r.borrow_mut().push(payload.to_string())),
            )
            .unwrap();
        sched.publish("sensors/a/value", "1", "").unwrap();
        sched.publish("sensors/a/b/value", "2", "").unwrap();
        sched.step();
        assert_eq!(*received.borrow(), vec!["1".to_string()]);
    }

    #[test]
    fn multi_segment_wildcard_delivers_in_publish_order() {
        let (mut sched, _clock) = scheduler_with_clock();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = received.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "sensors/#",
                "",
                Box::new(move |_s, _t, payload, _o| r.borrow_mut().push(payload.to_string())),
            )
            .unwrap();
        sched.publish("sensors", "x", "").unwrap();
        sched.publish("sensors/a", "y", "").unwrap();
        sched.publish("sensors/a/b", "z", "").unwrap();
        sched.step();
        assert_eq!(
            *received.borrow(),
            vec!["x".to_string(), "y".to_string(), "z".to_string()]
        );
    }

    #[test]
    fn loopback_suppression_by_originator() {
        let (mut sched, _clock) = scheduler_with_clock();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "t",
                "taskA",
                Box::new(move |_s, _t, _p, _o| *c.borrow_mut() += 1),
            )
            .unwrap();

        sched.publish("t", "m", "taskA").unwrap();
        sched.step();
        assert_eq!(*count.borrow(), 0);

        sched.publish("t", "m", "").unwrap();
        sched.step();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn periodic_task_runs_once_per_elapsed_period() {
        let (mut sched, clock) = scheduler_with_clock();
        let runs = Rc::new(RefCell::new(0));
        let r = runs.clone();
        sched
            .add_task(
                Box::new(move |_s| *r.borrow_mut() += 1),
                None,
                1000,
                Priority::Normal,
            )
            .unwrap();

        sched.step(); // t=0: just registered, not yet due
        assert_eq!(*runs.borrow(), 0);

        clock.advance(500);
        sched.step();
        assert_eq!(*runs.borrow(), 0, "not yet due");

        clock.advance(500);
        sched.step(); // t=1000: exactly one period since registration
        assert_eq!(*runs.borrow(), 1);

        clock.advance(500);
        sched.step();
        assert_eq!(*runs.borrow(), 1, "not yet due again");

        clock.advance(500);
        sched.step(); // t=2000: one more period since the last run
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn late_time_tracks_overrun_past_period() {
        let (mut sched, clock) = scheduler_with_clock();
        let id = sched
            .add_task(Box::new(|_s| {}), None, 1000, Priority::Normal)
            .unwrap();

        clock.advance(1000);
        sched.step(); // due exactly at the period boundary, late = 0
        clock.advance(1001);
        sched.step(); // runs again 1 us late relative to the 1000 period

        let snapshot_tasks = sched.tasks.snapshot();
        let task = snapshot_tasks.iter().find(|t| t.id == id).unwrap();
        assert_eq!(task.late_time_us, 1);
    }

    #[test]
    fn single_task_mode_runs_only_pinned_task() {
        let (mut sched, _clock) = scheduler_with_clock();
        let a_runs = Rc::new(RefCell::new(0));
        let b_runs = Rc::new(RefCell::new(0));
        let ar = a_runs.clone();
        let br = b_runs.clone();
        let a = sched
            .add_task(Box::new(move |_s| *ar.borrow_mut() += 1), None, 0, Priority::Normal)
            .unwrap();
        sched
            .add_task(Box::new(move |_s| *br.borrow_mut() += 1), None, 0, Priority::Normal)
            .unwrap();

        sched.set_single_task_mode(a);
        sched.step();
        assert_eq!(*a_runs.borrow(), 1);
        assert_eq!(*b_runs.borrow(), 0);

        sched.clear_single_task_mode();
        sched.step();
        assert_eq!(*b_runs.borrow(), 1);
    }

    #[test]
    fn single_task_mode_suppresses_drain() {
        let (mut sched, _clock) = scheduler_with_clock();
        let delivered = Rc::new(RefCell::new(0));
        let d = delivered.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "t",
                "",
                Box::new(move |_s, _t, _p, _o| *d.borrow_mut() += 1),
            )
            .unwrap();
        let a = sched
            .add_task(Box::new(|_s| {}), None, 0, Priority::Normal)
            .unwrap();

        sched.set_single_task_mode(a);
        sched.publish("t", "m", "").unwrap();
        sched.step();
        assert_eq!(*delivered.borrow(), 0, "drain suppressed while pinned");

        sched.clear_single_task_mode();
        sched.step();
        assert_eq!(*delivered.borrow(), 1);
    }

    #[test]
    fn add_task_then_remove_preserves_count() {
        let (mut sched, _clock) = scheduler_with_clock();
        let a = sched
            .add_task(Box::new(|_s| {}), None, 1000, Priority::Normal)
            .unwrap();
        assert_eq!(sched.task_count(), 1);
        sched.remove_task(a).unwrap();
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn subscribe_then_unsubscribe_preserves_count() {
        let (mut sched, _clock) = scheduler_with_clock();
        let h = sched
            .subscribe(TaskId::MAIN, "t", "", Box::new(|_s, _t, _p, _o| {}))
            .unwrap();
        assert_eq!(sched.subscription_count(), 1);
        sched.unsubscribe(h).unwrap();
        assert_eq!(sched.subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_twice_second_call_fails() {
        let (mut sched, _clock) = scheduler_with_clock();
        let h = sched
            .subscribe(TaskId::MAIN, "t", "", Box::new(|_s, _t, _p, _o| {}))
            .unwrap();
        assert!(sched.unsubscribe(h).is_ok());
        assert!(matches!(sched.unsubscribe(h), Err(Error::UnknownHandle)));
    }

    #[test]
    fn publish_fails_when_queue_full() {
        let mut sched = Scheduler::new(SchedulerConfig {
            queue_capacity: 1,
            ..SchedulerConfig::default()
        });
        sched.publish("a", "1", "").unwrap();
        assert!(matches!(sched.publish("a", "2", ""), Err(Error::QueueFull)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut sched = Scheduler::new(SchedulerConfig {
            max_message_len: 4,
            ..SchedulerConfig::default()
        });
        assert!(matches!(
            sched.publish("a", "12345", ""),
            Err(Error::MessageTooLarge { len: 5, max: 4 })
        ));
    }

    #[test]
    fn a_callback_may_publish_further_messages() {
        let (mut sched, _clock) = scheduler_with_clock();
        let chain = Rc::new(RefCell::new(Vec::new()));
        let c = chain.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "a",
                "",
                Box::new(move |s, _t, _p, _o| {
                    c.borrow_mut().push("a");
                    let _ = s.publish("b", "", "");
                }),
            )
            .unwrap();
        let c2 = chain.clone();
        sched
            .subscribe(
                TaskId::MAIN,
                "b",
                "",
                Box::new(move |_s, _t, _p, _o| c2.borrow_mut().push("b")),
            )
            .unwrap();

        sched.publish("a", "", "").unwrap();
        sched.step();
        assert_eq!(*chain.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn step_is_not_reentrant() {
        let mut sched = Scheduler::new(SchedulerConfig::default());
        sched
            .add_task(
                Box::new(|s| {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        s.step();
                    }));
                    assert!(result.is_err(), "nested step() should panic");
                }),
                None,
                0,
                Priority::Normal,
            )
            .unwrap();
        sched.step();
    }
}
