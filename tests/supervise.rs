#![cfg(unix)]

use std::time::Duration;

use chaperone::{errors::SpawnError, spawn::Launch};
use tokio::time::sleep;

fn init() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init()
		.ok();
}

#[tokio::test]
async fn true_exits_cleanly() {
	init();
	let mut child = Launch::new("true").spawn().expect("spawn true");
	let status = child.wait().await;

	assert!(status.exited);
	assert_eq!(status.exit_status, 0);
	assert!(!status.signaled);
	assert!(!status.crashed);
	assert!(!status.is_still_running());
}

#[tokio::test]
async fn exit_code_is_reported() {
	init();
	let mut child = Launch::new(r#"sh -c "exit 3""#).spawn().expect("spawn sh");
	let status = child.wait().await;

	assert!(status.exited);
	assert_eq!(status.exit_status, 3);
}

#[tokio::test]
async fn wait_is_idempotent() {
	init();
	let mut child = Launch::new("true").spawn().expect("spawn true");

	let first = child.wait().await;
	let second = child.wait().await;

	assert_eq!(first, second);
	assert!(child.pid().is_none());
	assert!(!child.is_ready(), "terminated handle no longer reports ready");
}

#[tokio::test]
async fn is_ready_does_not_transition() {
	init();
	let mut child = Launch::new("true").spawn().expect("spawn true");

	// bounded poll for the monitor to observe the exit.
	for _ in 0..200 {
		if child.is_ready() {
			break;
		}
		sleep(Duration::from_millis(10)).await;
	}

	assert!(child.is_ready());
	assert!(child.pid().is_some(), "readiness alone must not release the pid");
	assert!(child.last_status().is_still_running());

	let status = child.wait().await;
	assert!(status.exited);
	assert_eq!(status.exit_status, 0);
}

#[tokio::test]
async fn timeout_wait_leaves_child_running() {
	init();
	let mut child = Launch::new("sleep 5").spawn().expect("spawn sleep");

	let status = child.wait_timeout(Duration::from_millis(50)).await;
	assert!(status.is_still_running());
	assert!(child.pid().is_some());

	let status = child.terminate().await;
	assert!(!status.is_still_running());
}

#[tokio::test]
async fn terminate_reports_the_kill_unchanged() {
	init();
	let mut child = Launch::new("sleep 5").spawn().expect("spawn sleep");

	let status = child.terminate().await;
	assert!(status.signaled);
	assert_eq!(status.signal, libc::SIGKILL);
	assert!(!status.exited);
	assert!(child.pid().is_none());
}

#[tokio::test]
async fn trigger_exit_normalizes_a_sigterm_death() {
	init();
	let mut child = Launch::new("sleep 5").spawn().expect("spawn sleep");

	let status = child.trigger_exit().await;
	assert!(status.exited);
	assert_eq!(status.exit_status, 0);
	assert!(!status.signaled);
	assert!(!status.crashed);
}

#[tokio::test]
async fn stubborn_child_is_escalated() {
	init();
	let mut child = Launch::new(r#"sh -c "trap '' TERM; sleep 10""#)
		.spawn()
		.expect("spawn sh");

	// give the shell a moment to install its trap.
	sleep(Duration::from_millis(300)).await;

	let status = child.trigger_exit_within(Duration::from_millis(200)).await;
	assert!(status.is_still_running(), "TERM should have been ignored");

	let status = child.wait_then_terminate(Duration::from_millis(200)).await;
	assert!(status.signaled);
	assert_eq!(status.signal, libc::SIGKILL);
	assert!(child.pid().is_none());
}

#[tokio::test]
async fn pause_then_resume_keeps_the_child_alive() {
	init();
	let mut child = Launch::new("sleep 5").spawn().expect("spawn sleep");

	let paused = child.pause().await;
	assert!(paused.paused);
	assert_eq!(paused.pause_signal, libc::SIGSTOP);
	assert!(!paused.resumed);
	assert!(paused.is_still_running());

	let resumed = child.resume().await;
	assert!(resumed.resumed);
	assert!(!resumed.paused);
	assert!(resumed.is_still_running());

	assert!(child.pid().is_some(), "pause/resume must not terminate the handle");
	child.terminate().await;
}

#[tokio::test]
async fn nonexistent_program_is_a_structured_failure() {
	init();
	let err = Launch::new("/definitely/not/a/real/program")
		.spawn()
		.expect_err("spawn must fail");

	match err {
		SpawnError::ChildSetup { errno } => assert_eq!(errno, libc::ENOENT),
		other => panic!("unexpected error: {other}"),
	}
}

#[tokio::test]
async fn empty_command_line_is_rejected() {
	init();
	assert!(matches!(
		Launch::new("   ").spawn(),
		Err(SpawnError::EmptyCommand)
	));
}

#[tokio::test]
async fn working_directory_is_created() {
	init();
	let dir = std::env::temp_dir().join(format!("chaperone-test-{}", std::process::id()));

	let mut child = Launch {
		working_dir: Some(dir.clone()),
		..Launch::new("true")
	}
	.spawn()
	.expect("spawn true");

	let status = child.wait().await;
	assert!(status.exited);
	assert_eq!(status.exit_status, 0);
	assert!(dir.is_dir(), "working directory should have been created");

	std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn stack_limit_is_applied_before_exec() {
	init();
	// ulimit -s reports kilobytes; the launch field is in bytes.
	let mut child = Launch {
		stack_size: Some(1024 * 1024),
		..Launch::new(r#"sh -c "[ $(ulimit -s) -eq 1024 ]""#)
	}
	.spawn()
	.expect("spawn sh");

	let status = child.wait().await;
	assert!(status.exited);
	assert_eq!(status.exit_status, 0, "child should see a 1 MiB stack limit");
}

#[tokio::test]
async fn silenced_output_still_runs() {
	init();
	let mut child = Launch {
		silence_output: true,
		..Launch::new(r#"sh -c "echo noise; echo more >&2""#)
	}
	.spawn()
	.expect("spawn sh");

	let status = child.wait().await;
	assert!(status.exited);
	assert_eq!(status.exit_status, 0);
}

#[tokio::test]
async fn quoted_arguments_stay_whole() {
	init();
	// the inner token must reach sh as one argument for the exit code to be 7.
	let mut child = Launch::new(r#"sh -c "exit 7""#).spawn().expect("spawn sh");
	let status = child.wait().await;
	assert_eq!(status.exit_status, 7);
}

#[tokio::test]
async fn terminated_handles_compare_equal() {
	init();
	let mut a = Launch::new("true").spawn().expect("spawn true");
	let mut b = Launch::new("true").spawn().expect("spawn true");
	assert_ne!(a, b);

	a.wait().await;
	b.wait().await;
	assert_eq!(a, b, "two terminated handles are indistinguishable by pid");
}
