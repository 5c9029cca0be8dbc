//! Launching child processes.
//!
//! The launch protocol is the classic fork/exec handshake over a close-on-exec pipe: the parent
//! blocks `SIGINT`/`SIGTERM`/`SIGQUIT` around the fork so neither side can take a pending signal
//! in the race window, the child sets itself up (own process group, optional output silencing,
//! optional working directory) and `exec`s, and any child-side failure travels back to the
//! parent as a raw errno over the pipe. A successful `exec` closes the pipe's write end, so the
//! parent's short read *is* the success signal; no status can be delivered twice or not at all.

use std::{
	convert::Infallible,
	ffi::{CStr, CString},
	fs::{self, File},
	io::{ErrorKind, Read},
	os::fd::OwnedFd,
	os::unix::ffi::OsStrExt,
	path::PathBuf,
};

use nix::{
	errno::Errno,
	fcntl::OFlag,
	sys::{
		resource::{getrlimit, setrlimit, Resource},
		signal::{pthread_sigmask, SigSet, SigmaskHow, Signal},
	},
	unistd::{self, chdir, fork, pipe2, setpgid, ForkResult, Pid},
};
use tracing::{debug, error, trace, warn};

use crate::{
	child::{wait_raw, Child},
	command::tokenize,
	errors::SpawnError,
	status::Status,
};

/// A description of one child process launch.
///
/// Fields are public and the struct is plain data; build one with [`Launch::new`] and adjust
/// what you need:
///
/// ```no_run
/// # use chaperone::spawn::Launch;
/// let launch = Launch {
///     silence_output: true,
///     ..Launch::new("ping -c 4 localhost")
/// };
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Launch {
	/// The command line, tokenized by [`tokenize`](crate::command::tokenize): the first token is
	/// the program (resolved against `PATH` if it has no slash), the rest are arguments.
	pub command_line: String,

	/// Working directory for the child, created if missing. `None` inherits the parent's.
	pub working_dir: Option<PathBuf>,

	/// Redirect the child's stdout and stderr to `/dev/null`.
	pub silence_output: bool,

	/// Restore the parent's original signal mask in the child before `exec`.
	///
	/// When false, the child starts with `SIGINT`/`SIGTERM`/`SIGQUIT` still blocked, which is
	/// occasionally what a supervised process wants.
	pub unblock_signals: bool,

	/// Soft `RLIMIT_STACK` for the child, in bytes. `None` inherits.
	pub stack_size: Option<u64>,
}

impl Launch {
	/// A launch of `command_line` with the defaults: inherited working directory, output left
	/// alone, signals unblocked, inherited stack limit.
	#[must_use]
	pub fn new(command_line: impl Into<String>) -> Self {
		Self {
			command_line: command_line.into(),
			working_dir: None,
			silence_output: false,
			unblock_signals: true,
			stack_size: None,
		}
	}

	/// Spawn the process and return a [`Child`] monitoring it.
	///
	/// Either the returned process has successfully replaced its image with the target program,
	/// or this returns an error saying which step failed; it never yields a `Child` wrapping a
	/// pid known to have failed setup. Child-side failures are reaped here, leaving no zombie.
	///
	/// Must be called within a Tokio runtime (the monitor task is spawned on the blocking pool).
	/// The call itself blocks only for the pipe handshake, that is until the child reaches
	/// `exec`, not for the child's runtime.
	pub fn spawn(&self) -> Result<Child, SpawnError> {
		let argv = self.build_argv()?;
		// The exec pointer array is built here too: nothing in the child branch may allocate,
		// and that includes the argv marshalling `nix::unistd::execvp` would do post-fork.
		let argv_ptrs = argv_pointers(&argv);
		let workdir = self.prepare_working_dir()?;

		debug!(command = %self.command_line, "spawning child");

		let (pipe_read, pipe_write) =
			pipe2(OFlag::O_CLOEXEC).map_err(SpawnError::Pipe)?;

		// Block the termination-ish signals until the fork handshake is done, on both sides of
		// the fork. The guard restores the mask on every parent exit path; the child restores it
		// (or not) itself, per `unblock_signals`.
		let mask_guard = MaskGuard::block().map_err(SpawnError::SigMask)?;

		match unsafe { fork() } {
			Err(errno) => {
				error!(%errno, "cannot fork");
				Err(SpawnError::Fork(errno))
			}

			Ok(ForkResult::Child) => {
				// Never returns. Everything it touches was allocated before the fork.
				self.exec_child(
					&argv_ptrs,
					workdir.as_deref(),
					&mask_guard.prev,
					pipe_read,
					&pipe_write,
				)
			}

			Ok(ForkResult::Parent { child }) => {
				drop(pipe_write);
				self.finish_parent(child, mask_guard, pipe_read)
			}
		}
	}

	fn build_argv(&self) -> Result<Vec<CString>, SpawnError> {
		let tokens = tokenize(&self.command_line);
		if tokens.first().map_or(true, String::is_empty) {
			return Err(SpawnError::EmptyCommand);
		}

		tokens
			.into_iter()
			.map(|token| CString::new(token).map_err(SpawnError::from))
			.collect()
	}

	/// Create the working directory (if any) and render it for the post-fork `chdir`.
	///
	/// Creation happens in the parent: `create_dir_all` is not async-signal-safe, so it cannot
	/// run between fork and exec.
	fn prepare_working_dir(&self) -> Result<Option<CString>, SpawnError> {
		self.working_dir
			.as_ref()
			.map(|path| {
				fs::create_dir_all(path).map_err(|err| SpawnError::WorkingDir {
					path: path.clone(),
					err,
				})?;
				CString::new(path.as_os_str().as_bytes()).map_err(SpawnError::from)
			})
			.transpose()
	}

	/// The child branch: finish setup and `exec`, or report the failing errno through the pipe
	/// and die with the distinguished exit code 255.
	///
	/// Restricted to async-signal-safe operations: raw syscall wrappers on memory prepared
	/// before the fork.
	fn exec_child(
		&self,
		argv: &[*const libc::c_char],
		workdir: Option<&CStr>,
		saved_mask: &SigSet,
		pipe_read: OwnedFd,
		pipe_write: &OwnedFd,
	) -> ! {
		let errno = match self.child_setup(argv, workdir, saved_mask, pipe_read) {
			Err(errno) => errno,
			Ok(never) => match never {},
		};

		let code = (errno as i32).to_ne_bytes();
		let _ = unistd::write(pipe_write, &code);
		unsafe { libc::_exit(255) }
	}

	fn child_setup(
		&self,
		argv: &[*const libc::c_char],
		workdir: Option<&CStr>,
		saved_mask: &SigSet,
		pipe_read: OwnedFd,
	) -> Result<Infallible, Errno> {
		if let Some(size) = self.stack_size {
			let (_, hard) = getrlimit(Resource::RLIMIT_STACK)?;
			setrlimit(Resource::RLIMIT_STACK, size.min(hard), hard)?;
		}

		if self.silence_output {
			// Best-effort, as losing the silencing is not worth losing the launch.
			let devnull = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
			if devnull != -1 {
				unsafe {
					libc::dup2(devnull, libc::STDOUT_FILENO);
					libc::dup2(devnull, libc::STDERR_FILENO);
					libc::close(devnull);
				}
			}
		}

		// Root a fresh process group at ourselves, so a later group-wide kill
		// takes down anything we spawn too.
		setpgid(Pid::from_raw(0), Pid::from_raw(0))?;

		if self.unblock_signals {
			pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(saved_mask), None)?;
		}

		drop(pipe_read);

		if let Some(dir) = workdir {
			chdir(dir)?;
		}

		unsafe { libc::execvp(argv[0], argv.as_ptr()) };
		Err(Errno::last())
	}

	/// The parent branch: finish the handshake and decide between a live [`Child`] and a
	/// structured failure.
	fn finish_parent(
		&self,
		pid: Pid,
		mask_guard: MaskGuard,
		pipe_read: OwnedFd,
	) -> Result<Child, SpawnError> {
		// Mirror of the child's own setpgid; whichever side runs first wins, and "the child
		// already moved itself" (EACCES) is fine.
		if let Err(errno) = setpgid(pid, pid) {
			if errno != Errno::EACCES {
				warn!(%pid, %errno, "cannot move child into its own process group");
			}
		}

		drop(mask_guard);

		// A short read means the write end closed on a successful exec; a full errno means the
		// child reported a setup failure before dying.
		let mut pipe = File::from(pipe_read);
		let mut code = [0_u8; 4];
		match pipe.read_exact(&mut code) {
			Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
				trace!(%pid, "child reached exec");
				Ok(Child::new(pid))
			}

			Ok(()) => {
				let errno = i32::from_ne_bytes(code);
				error!(command = %self.command_line, errno, "child setup failed");

				// Reap the doomed child so it cannot linger as a zombie.
				match wait_raw(pid, 0) {
					Ok(raw) => {
						let status = Status::from_raw(raw);
						debug_assert!(status.exited);
						debug_assert_eq!(status.exit_status, 255);
					}
					Err(err) => warn!(%pid, %err, "cannot reap failed child"),
				}

				Err(SpawnError::ChildSetup { errno })
			}

			Err(err) => {
				// The pipe itself failed mid-handshake. The exec outcome is unknown; treat the
				// child as live rather than abandon a possibly-running process unowned and
				// unreaped. If exec did fail, the monitor reports the exit-255 status instead.
				warn!(%pid, %err, "error pipe failed mid-handshake, assuming exec succeeded");
				Ok(Child::new(pid))
			}
		}
	}
}

/// Render a null-terminated pointer array over `argv` for `execvp`.
///
/// The pointers borrow the `CString`s, so `argv` must outlive the array. Done in the parent
/// because collecting a `Vec` is not async-signal-safe.
fn argv_pointers(argv: &[CString]) -> Vec<*const libc::c_char> {
	argv.iter()
		.map(|arg| arg.as_ptr())
		.chain(std::iter::once(std::ptr::null()))
		.collect()
}

/// Blocks `SIGINT`, `SIGTERM`, and `SIGQUIT` on the calling thread, restoring the previous mask
/// on drop.
struct MaskGuard {
	prev: SigSet,
}

impl MaskGuard {
	fn block() -> Result<Self, Errno> {
		let mut mask = SigSet::empty();
		mask.add(Signal::SIGINT);
		mask.add(Signal::SIGTERM);
		mask.add(Signal::SIGQUIT);

		let mut prev = SigSet::empty();
		pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut prev))?;
		Ok(Self { prev })
	}
}

impl Drop for MaskGuard {
	fn drop(&mut self) {
		if let Err(errno) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None) {
			warn!(%errno, "cannot restore the signal mask");
		}
	}
}

/// Detach the current process from its controlling terminal.
///
/// Forks into the background, becomes a session leader, changes to `/` and points the standard
/// streams at `/dev/null`.
pub fn daemonize() -> Result<(), SpawnError> {
	unistd::daemon(false, false).map_err(SpawnError::Daemonize)
}

#[cfg(test)]
mod tests {
	use super::Launch;
	use crate::errors::SpawnError;

	#[test]
	fn empty_command_is_rejected_before_any_fork() {
		for line in ["", "   ", "\t"] {
			assert!(matches!(
				Launch::new(line).build_argv(),
				Err(SpawnError::EmptyCommand)
			));
		}
	}

	#[test]
	fn argv_is_tokenized_and_nul_terminated() {
		let argv = Launch::new(r#"prog "a b" c"#).build_argv().unwrap();
		let rendered: Vec<_> = argv
			.iter()
			.map(|arg| arg.to_str().unwrap().to_string())
			.collect();
		assert_eq!(rendered, ["prog", "a b", "c"]);
	}

	#[test]
	fn exec_pointer_array_is_null_terminated_and_borrows_argv() {
		let argv = Launch::new("prog one two").build_argv().unwrap();
		let ptrs = super::argv_pointers(&argv);

		assert_eq!(ptrs.len(), argv.len() + 1);
		assert!(ptrs.last().unwrap().is_null());
		for (arg, ptr) in argv.iter().zip(&ptrs) {
			assert_eq!(arg.as_ptr(), *ptr);
		}
	}

	#[test]
	fn interior_nul_is_rejected() {
		assert!(matches!(
			Launch::new("prog a\0b").build_argv(),
			Err(SpawnError::NulByte(_))
		));
	}
}
