//! Platform process control: process-group setup, polite and forced
//! termination of a whole group, and a liveness probe. The supervisor
//! only ever talks to this surface.

use tokio::process::Command;

/// Put the child in its own process group so the whole subtree can be
/// signaled as a unit.
#[cfg(unix)]
pub fn setup(cmd: &mut Command) {
	cmd.process_group(0);
}

/// Polite termination of the group rooted at `pid`.
#[cfg(unix)]
pub fn terminate_group(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

/// Forced termination of the group rooted at `pid`.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
	use nix::sys::signal::kill;
	use nix::unistd::Pid;
	kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
pub fn setup(cmd: &mut Command) {
	const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
	const CREATE_NO_WINDOW: u32 = 0x0800_0000;
	cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// Best-effort graceful stop on Windows; console-control delivery does
/// not reach every process type.
#[cfg(windows)]
pub fn terminate_group(pid: u32) {
	let _ = std::process::Command::new("taskkill")
		.args(["/T", "/PID", &pid.to_string()])
		.output();
}

#[cfg(windows)]
pub fn kill_group(pid: u32) {
	let _ = std::process::Command::new("taskkill")
		.args(["/F", "/T", "/PID", &pid.to_string()])
		.output();
}

#[cfg(windows)]
pub fn is_alive(pid: u32) -> bool {
	std::process::Command::new("tasklist")
		.args(["/FI", &format!("PID eq {}", pid), "/NH"])
		.output()
		.map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn own_pid_is_alive() {
		assert!(is_alive(std::process::id()));
	}

	#[cfg(unix)]
	#[test]
	fn bogus_pid_is_not_alive() {
		// PIDs wrap well below this on every Unix we target.
		assert!(!is_alive(0x3fff_fff0));
	}
}
