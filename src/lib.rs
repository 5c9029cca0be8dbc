//! Child process supervision for Unix.
//!
//! This crate spawns an external program as a child process, tracks its lifecycle in the
//! background, and offers graceful and forceful control over it: polling, blocking and
//! timeout-bounded waits, pause/resume, and a graceful-then-forceful termination path.
//!
//! # Usage
//!
//! Describe a launch with [`Launch`](spawn::Launch): a command line (tokenized with quoting and
//! escaping rules, see [`command::tokenize`]), an optional working directory, and optional
//! output silencing. Then [`spawn`](spawn::Launch::spawn) it. On success you get a
//! [`Child`](child::Child): a move-only handle owning the pid and its exit monitor.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use chaperone::spawn::Launch;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let mut child = Launch::new("some-daemon --port 8080")
//!     .spawn()
//!     .expect("spawn failed");
//!
//! // ... later: ask it to exit, give it two seconds, then make sure.
//! child.trigger_exit_within(Duration::from_secs(2)).await;
//! let status = child.wait_then_terminate(Duration::from_secs(2)).await;
//! assert!(!status.is_still_running());
//! # }
//! ```
//!
//! # Theory of Operation
//!
//! Spawning forks and `exec`s directly rather than going through `std::process`, because the
//! handle needs things the standard library doesn't expose together: process-group isolation,
//! control of the signal mask across the fork, and a raw wait status ([`Status`](status::Status)
//! keeps the exit/signal/stop/continue breakdown including core-dump detection). Child-side
//! setup failures are reported to the parent over a close-on-exec pipe, so a failed launch is a
//! structured error and a reaped child, never a zombie or a half-alive handle.
//!
//! Each live [`Child`](child::Child) owns exactly one monitor: a detached task on the Tokio
//! blocking pool that sits in `waitpid(2)` until the OS reports termination, then publishes the
//! decoded status to a one-shot slot. All wait-family operations on the handle await or poll
//! that slot; the first one to observe it resolved materializes the final status and releases
//! the pid. The monitor resolves exactly once, handles are move-only, and only termination
//! resolves it (pause/resume notifications are observed out-of-band and leave it pending).
//! Those rules are what make waits idempotent and double-reaps unrepresentable.
//!
//! Signals used: `SIGTERM` to the pid for a graceful exit request (a death by that signal is
//! normalized to a clean exit, since the process did as asked), `SIGKILL` to the whole process
//! group for forceful termination, and `SIGSTOP`/`SIGCONT` for pause/resume.

#![warn(clippy::unwrap_used, missing_docs, rustdoc::unescaped_backticks)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(rust_2018_idioms)]

pub mod child;
pub mod command;
pub mod errors;
pub mod spawn;
pub mod status;

mod slot;
