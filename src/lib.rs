//! # cobus - cooperative scheduler and topic-routed message bus
//!
//! `cobus` is a single-threaded, cooperatively-scheduled task runner paired
//! with an in-process publish/subscribe bus addressed by MQTT-style topic
//! patterns (`+` for one segment, `#` for the rest). It is built for hosts
//! that drive their own main loop — embedded firmware, a simulation tick, a
//! single-threaded daemon — and call [`scheduler::Scheduler::step`] on every
//! iteration instead of spawning threads or an async runtime.
//!
//! There is no preemption, no multi-threading, and no persistence: a task
//! that blocks forever blocks the whole scheduler, by design. See
//! [`scheduler::Scheduler`] for the dispatcher and public API.
//!
//! ## Quick start
//!
//! ```rust
//! use cobus::scheduler::{Scheduler, SchedulerConfig};
//! use cobus::task::{Priority, TaskId};
//!
//! let mut sched = Scheduler::new(SchedulerConfig::default());
//! sched
//!     .subscribe(TaskId::MAIN, "sensors/+/value", "", Box::new(|_s, topic, payload, _originator| {
//!         println!("{topic} = {payload}");
//!     }))
//!     .unwrap();
//! sched.publish("sensors/a/value", "21.5", "").unwrap();
//! sched.step();
//! ```
//!
//! ## Module organization
//!
//! - [`clock`] - monotonic microsecond time source (C1)
//! - [`queue`] - bounded FIFO message queue (C2)
//! - [`topic`] - MQTT-style pattern matcher (C3)
//! - [`subscription`] - subscription registry (C4)
//! - [`task`] - task registry (C5)
//! - [`scheduler`] - dispatcher, public API, and stats (C6-C8)
//! - [`helpers`] - scoped `Beat`/`Timeout` helpers (C9)
//! - [`error`] - error types surfaced at the scheduler boundary
//! - [`config`] - TOML configuration for the demo daemon

pub mod clock;
pub mod config;
pub mod error;
pub mod helpers;
pub mod logutil;
pub mod queue;
pub mod scheduler;
pub mod subscription;
pub mod task;
pub mod topic;
