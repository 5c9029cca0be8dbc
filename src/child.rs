//! Handles to spawned child processes.

use std::{io, time::Duration};

use nix::{
	errno::Errno,
	sys::signal::{kill, killpg, Signal},
	unistd::Pid,
};
use tokio::{task, time::timeout};
use tracing::{debug, error, trace, warn};

use crate::{slot::OnceSlot, status::Status};

/// The pid sentinel for "no process": a handle whose pid is this value is terminated and its
/// status is final.
pub const NO_CHILD: Pid = Pid::from_raw(-1);

/// Block in `waitpid(2)` for an event on `pid`, retrying on `EINTR`, and return the raw wait
/// status.
///
/// `nix`'s `waitpid` decodes the status into its own enum and discards the raw value; we decode
/// with [`Status::from_raw`] instead, so this calls through `libc` directly.
pub(crate) fn wait_raw(pid: Pid, flags: libc::c_int) -> io::Result<i32> {
	loop {
		let mut wstatus = 0;
		let rc = unsafe { libc::waitpid(pid.as_raw(), &mut wstatus, flags) };
		if rc == pid.as_raw() {
			return Ok(wstatus);
		}

		debug_assert_eq!(rc, -1, "waitpid returned an unrequested pid");
		let err = io::Error::last_os_error();
		if err.raw_os_error() != Some(libc::EINTR) {
			return Err(err);
		}
	}
}

/// A handle to a spawned process and its exit-monitoring task.
///
/// Created by [`Launch::spawn`](crate::spawn::Launch::spawn). Construction starts a monitor: a
/// detached blocking task whose sole job is to `waitpid(2)` for the process's termination and to
/// publish the decoded [`Status`] exactly once. The handle polls or awaits that publication;
/// it never calls a blocking OS wait for termination itself.
///
/// A `Child` is move-only. Exactly one owner may reap or signal the process, which is what makes
/// the "resolve once, reap once" accounting sound; cloning a handle would reintroduce the very
/// double-reap races the monitor exists to prevent.
///
/// The handle is either *running* (pid valid, monitor pending or resolved-but-unobserved) or
/// *terminated* (pid is [`NO_CHILD`], status final). Only the wait family of operations
/// ([`wait`](Child::wait), [`wait_timeout`](Child::wait_timeout), and the terminate operations
/// through them) performs that transition, so status materialization happens in one place.
///
/// Dropping a handle does not affect the process. Dropping one that may still be running is
/// logged as a warning: the owner is expected to decide between waiting and terminating first.
/// Note also that the monitor occupies a blocking-pool thread until the process exits.
#[derive(Debug)]
pub struct Child {
	pid: Pid,
	status: Status,
	monitor: OnceSlot<Status>,
}

impl Child {
	/// Take ownership of `pid` and start its exit monitor.
	///
	/// Must be called from within a Tokio runtime.
	pub(crate) fn new(pid: Pid) -> Self {
		debug_assert!(pid != NO_CHILD);
		debug!(%pid, "starting monitor for child");

		let slot = OnceSlot::default();
		let publish = slot.clone();
		task::spawn_blocking(move || match wait_raw(pid, 0) {
			Ok(raw) => {
				let status = Status::from_raw(raw);
				trace!(%pid, raw, %status, "monitor observed termination");
				publish.set(status);
			}
			Err(err) => {
				// ECHILD here would mean something else reaped our pid, which
				// move-only ownership is supposed to rule out. Publish the terminal
				// unobserved status so waiters settle instead of hanging forever.
				error!(%pid, %err, "monitor cannot wait on child");
				publish.set(Status::UNOBSERVED);
			}
		});

		Self {
			pid,
			status: Status::default(),
			monitor: slot,
		}
	}

	/// The process id, or `None` once the handle has observed termination.
	#[must_use]
	pub fn pid(&self) -> Option<Pid> {
		(self.pid != NO_CHILD).then_some(self.pid)
	}

	/// The last status this handle has materialized.
	///
	/// Before any wait has completed this is the default "still running" status; after the handle
	/// is terminated it is the final one.
	#[must_use]
	pub const fn last_status(&self) -> Status {
		self.status
	}

	/// Whether the monitor has observed termination, without blocking and without transitioning
	/// the handle.
	///
	/// Even when this returns true, the status is only materialized (and the pid released) by a
	/// wait-family call.
	#[must_use]
	pub fn is_ready(&self) -> bool {
		self.pid != NO_CHILD && self.monitor.is_set()
	}

	/// Wait for the process to terminate and return its final status.
	///
	/// Idempotent: once the handle is terminated this returns the cached status immediately,
	/// without touching any OS wait call.
	///
	/// If the monitor itself could not observe the process (its `waitpid` failed), this resolves
	/// to the terminal [`Status::UNOBSERVED`] rather than blocking forever.
	pub async fn wait(&mut self) -> Status {
		if self.pid != NO_CHILD {
			trace!(pid = %self.pid, "waiting for child");
			let status = self.monitor.clone().await;
			trace!(pid = %self.pid, %status, "wait over");
			self.status = status;
			self.pid = NO_CHILD;
		}

		self.status
	}

	/// Wait up to `limit` for the process to terminate.
	///
	/// If the monitor resolves within the window, behaves as [`wait`](Child::wait). Otherwise the
	/// handle stays running and the last known (non-final) status is returned.
	pub async fn wait_timeout(&mut self, limit: Duration) -> Status {
		if self.pid != NO_CHILD {
			if let Ok(status) = timeout(limit, self.monitor.clone()).await {
				self.status = status;
				self.pid = NO_CHILD;
			}
		}

		self.status
	}

	/// Suspend the process with `SIGSTOP` and wait for the stop notification.
	///
	/// Returns the stop-event status. This is a transient event: the handle stays running and the
	/// monitor is not resolved. On a terminated handle this is a no-op returning the cached
	/// status.
	pub async fn pause(&mut self) -> Status {
		debug_assert!(self.pid != NO_CHILD, "pause() on a terminated child");
		if self.pid == NO_CHILD {
			return self.status;
		}

		debug!(pid = %self.pid, "pausing child");
		let status = self.signal_then_wait(Signal::SIGSTOP, libc::WUNTRACED).await;

		debug_assert!(!status.exited);
		debug_assert!(!status.signaled);
		debug_assert!(!status.crashed);
		debug_assert!(status.paused);
		debug_assert_eq!(status.pause_signal, libc::SIGSTOP);
		debug_assert!(!status.resumed);

		status
	}

	/// Resume a stopped process with `SIGCONT` and wait for the continue notification.
	///
	/// The counterpart to [`pause`](Child::pause), with the same non-terminal behaviour.
	pub async fn resume(&mut self) -> Status {
		debug_assert!(self.pid != NO_CHILD, "resume() on a terminated child");
		if self.pid == NO_CHILD {
			return self.status;
		}

		debug!(pid = %self.pid, "resuming child");
		let status = self
			.signal_then_wait(Signal::SIGCONT, libc::WCONTINUED)
			.await;

		debug_assert!(!status.exited);
		debug_assert!(!status.signaled);
		debug_assert!(!status.crashed);
		debug_assert!(!status.paused);
		debug_assert!(status.resumed);

		status
	}

	/// Request a graceful exit with `SIGTERM` and wait for termination.
	///
	/// A process that dies *to that signal* is considered to have shut down as asked: the status
	/// is normalized to a clean exit with code 0 rather than reported as a kill. Any other
	/// outcome (normal exit, death by another signal) is reported as-is.
	pub async fn trigger_exit(&mut self) -> Status {
		if self.pid != NO_CHILD {
			debug!(pid = %self.pid, "asking child to exit");
			self.send(Signal::SIGTERM);
		}

		self.wait().await;
		self.normalize_graceful();
		self.status
	}

	/// Request a graceful exit with `SIGTERM` and wait up to `limit` for termination.
	///
	/// As [`trigger_exit`](Child::trigger_exit), but bounded: if the process outlives the window
	/// the handle stays running and the last known status is returned. Pair with
	/// [`wait_then_terminate`](Child::wait_then_terminate) to escalate.
	pub async fn trigger_exit_within(&mut self, limit: Duration) -> Status {
		if self.pid != NO_CHILD {
			debug!(pid = %self.pid, ?limit, "asking child to exit");
			self.send(Signal::SIGTERM);
		}

		self.wait_timeout(limit).await;
		self.normalize_graceful();
		self.status
	}

	/// Kill the process's entire group with `SIGKILL` and wait for termination.
	///
	/// Always leaves the handle terminated. The resulting status is never normalized: a kill is
	/// reported as the signal death it is.
	pub async fn terminate(&mut self) -> Status {
		if self.pid != NO_CHILD {
			debug!(pid = %self.pid, "terminating child process group");
			if let Err(errno) = killpg(self.pid, Signal::SIGKILL) {
				// the group may already be gone; the wait below settles it.
				warn!(pid = %self.pid, %errno, "cannot kill child process group");
			}
		}

		self.wait().await
	}

	/// Give the process `limit` to end on its own, then forcefully terminate it.
	///
	/// The designed escalation path: callers that have already requested a graceful exit (or
	/// expect one) get a guaranteed deadline. No-op on a terminated handle.
	pub async fn wait_then_terminate(&mut self, limit: Duration) -> Status {
		if self.pid != NO_CHILD {
			debug!(pid = %self.pid, "child is still running");
			let status = self.wait_timeout(limit).await;
			if status.is_still_running() {
				debug!(pid = %self.pid, "child took too long to stop");
				self.terminate().await;
			}
		}

		self.status
	}

	/// Send `signal` to the process, best-effort.
	///
	/// The process may have exited between our check and the kill; that is not a caller error,
	/// so delivery failures are logged and swallowed.
	fn send(&self, signal: Signal) {
		if let Err(errno) = kill(self.pid, signal) {
			warn!(pid = %self.pid, %signal, %errno, "cannot signal child");
			debug_assert_eq!(errno, Errno::ESRCH, "unexpected kill failure");
		}
	}

	/// Send `signal`, then block (on the blocking pool) for the matching stop/continue
	/// notification and decode it.
	async fn signal_then_wait(&self, signal: Signal, flags: libc::c_int) -> Status {
		self.send(signal);

		let pid = self.pid;
		match task::spawn_blocking(move || wait_raw(pid, flags)).await {
			Ok(Ok(raw)) => Status::from_raw(raw),
			Ok(Err(err)) => {
				warn!(%pid, %err, "cannot wait for stop/continue notification");
				self.status
			}
			Err(err) => {
				error!(%pid, %err, "notification wait task failed");
				self.status
			}
		}
	}

	/// Rewrite a death-by-SIGTERM into a clean exit.
	///
	/// Only the graceful-exit operations call this; `terminate()` reports its kill unchanged.
	fn normalize_graceful(&mut self) {
		if self.status.signaled && self.status.signal == libc::SIGTERM {
			self.status = Status {
				exited: true,
				exit_status: 0,
				signaled: false,
				signal: 0,
				crashed: false,
				..self.status
			};
		}
	}
}

/// Handles compare equal iff their pids do.
///
/// Two terminated handles are therefore indistinguishable here (both hold the sentinel); equality
/// cannot disambiguate distinct terminated children.
impl PartialEq for Child {
	fn eq(&self, other: &Self) -> bool {
		self.pid == other.pid
	}
}

impl Eq for Child {}

impl Drop for Child {
	fn drop(&mut self) {
		if self.pid != NO_CHILD && !self.monitor.is_set() {
			warn!(
				pid = %self.pid,
				"child handle dropped while the process may still be running; wait or terminate it"
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{Child, NO_CHILD};
	use crate::{slot::OnceSlot, status::Status};
	use nix::unistd::Pid;

	fn terminated(pid: Pid) -> Child {
		let monitor = OnceSlot::default();
		monitor.set(Status::from_raw(0));
		let mut child = Child {
			pid,
			status: Status::default(),
			monitor,
		};
		child.pid = NO_CHILD;
		child.status = Status::from_raw(0);
		child
	}

	#[test]
	fn terminated_handles_compare_equal() {
		let a = terminated(Pid::from_raw(100));
		let b = terminated(Pid::from_raw(200));
		assert_eq!(a, b);
	}

	#[tokio::test]
	async fn unobserved_monitor_outcome_still_settles_waiters() {
		let monitor = OnceSlot::default();
		monitor.set(Status::UNOBSERVED);
		let mut child = Child {
			pid: Pid::from_raw(100),
			status: Status::default(),
			monitor,
		};

		let status = child.wait().await;
		assert!(!status.is_still_running());
		assert_eq!(status, Status::UNOBSERVED);
		assert_eq!(child.pid(), None);
	}

	#[test]
	fn normalization_rewrites_sigterm_death_only() {
		let mut child = terminated(Pid::from_raw(100));

		child.status = Status::from_raw(libc::SIGTERM);
		child.normalize_graceful();
		assert!(child.status.exited);
		assert_eq!(child.status.exit_status, 0);
		assert!(!child.status.signaled);

		child.status = Status::from_raw(libc::SIGKILL);
		child.normalize_graceful();
		assert!(child.status.signaled);
		assert_eq!(child.status.signal, libc::SIGKILL);
	}
}
