//! Decoded process wait statuses.

use std::fmt;

/// A decoded snapshot of a process's exit, signal, stop, or continue condition.
///
/// This is a structured view over the raw integer reported by `waitpid(2)`. The raw value is kept
/// in [`raw`](Status::raw) for diagnostics; everything else is derived from it with the libc
/// `W*` macros, once, at decode time.
///
/// At most one of [`exited`](Status::exited) and [`signaled`](Status::signaled) is true for a
/// terminal status. [`paused`](Status::paused) and [`resumed`](Status::resumed) describe transient
/// stop/continue events and never mean the process is gone.
///
/// The default value is the all-false "still running" status, which is what a
/// [`Child`](crate::child::Child) reports before its monitor has observed anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
	/// The process exited of its own accord.
	pub exited: bool,

	/// The exit code. Only meaningful if `exited`.
	pub exit_status: i32,

	/// The process was terminated by a signal.
	pub signaled: bool,

	/// The terminating signal. Only meaningful if `signaled`.
	pub signal: i32,

	/// The process was terminated by a signal and dumped core.
	pub crashed: bool,

	/// The process was stopped (but not terminated).
	pub paused: bool,

	/// The stopping signal. Only meaningful if `paused`.
	pub pause_signal: i32,

	/// The process was resumed with `SIGCONT`.
	pub resumed: bool,

	/// The wait status as reported by the OS, unchanged.
	pub raw: i32,
}

impl Status {
	/// The terminal status published when the monitor loses sight of the child.
	///
	/// Produced only when `waitpid` itself fails, meaning the pid was reaped out from under us
	/// and no real status can ever be observed. It is terminal (`signaled` with no signal) so
	/// that waiters settle instead of spinning on a child that will never report, and it is
	/// distinguishable from any decoded status: a real signal death always carries a non-zero
	/// signal number, and no `waitpid` result is `-1`.
	pub const UNOBSERVED: Self = Self {
		exited: false,
		exit_status: 0,
		signaled: true,
		signal: 0,
		crashed: false,
		paused: false,
		pause_signal: 0,
		resumed: false,
		raw: -1,
	};

	/// Decode a raw `waitpid(2)` status.
	///
	/// Pure and total: any value is representable. Semantically contradictory values (which the
	/// kernel does not produce) are asserted against in debug builds rather than papered over.
	#[must_use]
	pub fn from_raw(raw: i32) -> Self {
		let exited = libc::WIFEXITED(raw);
		let signaled = libc::WIFSIGNALED(raw);
		let paused = libc::WIFSTOPPED(raw);
		let status = Self {
			exited,
			exit_status: if exited { libc::WEXITSTATUS(raw) } else { 0 },
			signaled,
			signal: if signaled { libc::WTERMSIG(raw) } else { 0 },
			crashed: signaled && libc::WCOREDUMP(raw),
			paused,
			pause_signal: if paused { libc::WSTOPSIG(raw) } else { 0 },
			resumed: libc::WIFCONTINUED(raw),
			raw,
		};

		debug_assert!(
			!(status.exited && status.signaled),
			"wait status {raw:#x} decodes as both exited and signaled"
		);
		debug_assert!(
			!(status.paused && (status.exited || status.signaled)),
			"wait status {raw:#x} decodes as both stopped and terminated"
		);

		status
	}

	/// Whether the process has neither exited nor been killed by a signal.
	///
	/// True for the default status, and for stop/continue events.
	#[must_use]
	pub const fn is_still_running(&self) -> bool {
		!self.signaled && !self.exited
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{{exited: {}, exit_status: {}, signaled: {}, signal: {}, crashed: {}, paused: {}, pause_signal: {}, resumed: {}}}",
			self.exited,
			self.exit_status,
			self.signaled,
			self.signal,
			self.crashed,
			self.paused,
			self.pause_signal,
			self.resumed,
		)
	}
}
