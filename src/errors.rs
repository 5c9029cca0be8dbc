//! Error types.

use std::path::PathBuf;

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

/// Errors which can occur while spawning a child process.
///
/// Everything here happens before the caller gets a [`Child`](crate::child::Child): a launch
/// either yields a handle to a process that reached `exec`, or one of these. Failures *inside*
/// the forked child are not a separate channel: they surface as
/// [`ChildSetup`](SpawnError::ChildSetup), carried back over the error pipe and reaped
/// transparently, never as a crash of the parent.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum SpawnError {
	/// The command line tokenized to nothing, so there is no program to execute.
	#[error("command line is empty")]
	#[diagnostic(code(chaperone::spawn::empty_command))]
	EmptyCommand,

	/// The command line contains a NUL byte, which cannot cross the `exec` boundary.
	#[error("command line contains a NUL byte")]
	#[diagnostic(code(chaperone::spawn::nul_byte))]
	NulByte(#[from] std::ffi::NulError),

	/// The requested working directory cannot be created.
	#[error("cannot create working directory {path:?}")]
	#[diagnostic(code(chaperone::spawn::working_dir))]
	WorkingDir {
		/// The directory that was asked for.
		path: PathBuf,

		/// The underlying I/O error.
		#[source]
		err: std::io::Error,
	},

	/// The child error-reporting pipe cannot be created.
	#[error("cannot create the child error pipe")]
	#[diagnostic(code(chaperone::spawn::pipe))]
	Pipe(#[source] Errno),

	/// The signal mask cannot be adjusted around the fork.
	#[error("cannot adjust the signal mask")]
	#[diagnostic(code(chaperone::spawn::sigmask))]
	SigMask(#[source] Errno),

	/// The fork itself failed; no process was created and nothing leaked.
	#[error("cannot fork")]
	#[diagnostic(code(chaperone::spawn::fork))]
	Fork(#[source] Errno),

	/// The forked child failed during setup or `exec`, and reported the failing step's errno
	/// back through the error pipe before exiting. The doomed child has already been reaped.
	#[error("child setup or exec failed: {}", Errno::from_raw(*errno).desc())]
	#[diagnostic(code(chaperone::spawn::child_setup))]
	ChildSetup {
		/// The raw OS error code reported by the child.
		errno: i32,
	},

	/// Detaching from the controlling terminal failed.
	#[error("cannot daemonize")]
	#[diagnostic(code(chaperone::spawn::daemonize))]
	Daemonize(#[source] Errno),
}
