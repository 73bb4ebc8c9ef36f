use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};
use crate::platform;
use crate::types::{Definition, RestartPolicy, Snapshot, Status};

/// Time allowed for a process group to exit after the polite signal
/// before it is force-killed.
pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between a restart decision and the next spawn attempt, so a
/// crash-looping child cannot spin the host.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(2);

const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// Stream tag for supervisor-originated lines delivered through the log
/// callback (spawn failures, exits, restarts).
pub const SUPERVISOR_STREAM: &str = "supervisor";

/// Called for every captured line as `(process_id, stream, line)`.
pub type LogCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Owns the registry of process definitions and their runtime state.
/// One control loop runs per active id; everything callers see is a
/// copied [`Snapshot`].
pub struct Supervisor {
	entries: RwLock<HashMap<String, RuntimeEntry>>,
	// Own lock, decoupled from the registry: a slow log consumer must
	// not stall lifecycle decisions.
	log_callback: std::sync::RwLock<Option<LogCallback>>,
	shutdown: watch::Sender<bool>,
}

struct RuntimeEntry {
	definition: Definition,
	status: Status,
	restarts: u32,
	last_error: Option<String>,
	pid: Option<u32>,
	// Set by a manual stop; suppresses auto-restart for that stop only.
	manually_stopped: bool,
	cancel: Option<watch::Sender<bool>>,
}

impl RuntimeEntry {
	fn new(definition: Definition) -> Self {
		Self {
			definition,
			status: Status::Stopped,
			restarts: 0,
			last_error: None,
			pid: None,
			manually_stopped: false,
			cancel: None,
		}
	}

	fn snapshot(&self) -> Snapshot {
		Snapshot {
			definition: self.definition.clone(),
			pid: self.pid,
			status: self.status,
			restarts: self.restarts,
			last_error: self.last_error.clone(),
		}
	}
}

impl Supervisor {
	pub fn new() -> Arc<Self> {
		let (shutdown, _) = watch::channel(false);
		Arc::new(Self {
			entries: RwLock::new(HashMap::new()),
			log_callback: std::sync::RwLock::new(None),
			shutdown,
		})
	}

	/// Install the process-wide log callback. Takes effect for
	/// subsequently started processes and, for streams already being
	/// read, on their next line.
	pub fn set_log_callback(&self, cb: LogCallback) {
		if let Ok(mut guard) = self.log_callback.write() {
			*guard = Some(cb);
		}
	}

	/// Insert or replace the entry for `def.id`, initial status
	/// `Stopped`. Never spawns anything. Replacing a live id is
	/// stop-then-replace: the old entry's process group is terminated
	/// before the new entry takes its place. An empty id is synthesized
	/// as `proc-<n>`; the effective id is returned.
	pub async fn register(&self, mut def: Definition) -> String {
		let (id, old_pid) = {
			let mut entries = self.entries.write().await;
			if def.id.is_empty() {
				let mut n = entries.len() + 1;
				while entries.contains_key(&format!("proc-{}", n)) {
					n += 1;
				}
				def.id = format!("proc-{}", n);
			}
			let id = def.id.clone();
			let old_pid = match entries.get_mut(&id) {
				Some(old) if old.status.is_active() => {
					old.manually_stopped = true;
					if let Some(cancel) = old.cancel.take() {
						let _ = cancel.send(true);
					}
					old.pid.take()
				}
				_ => None,
			};
			entries.insert(id.clone(), RuntimeEntry::new(def));
			(id, old_pid)
		};
		if let Some(pid) = old_pid {
			self.terminate_and_wait(&id, pid).await;
		}
		id
	}

	/// Stop the process if it is live, then remove the entry.
	pub async fn unregister(self: &Arc<Self>, id: &str) -> Result<()> {
		let active = {
			let entries = self.entries.read().await;
			entries
				.get(id)
				.ok_or_else(|| Error::NotFound(id.to_string()))?
				.status
				.is_active()
		};
		if active {
			self.stop(id).await?;
		}
		let mut entries = self.entries.write().await;
		entries.remove(id);
		Ok(())
	}

	pub async fn list(&self) -> Vec<Snapshot> {
		let entries = self.entries.read().await;
		entries.values().map(RuntimeEntry::snapshot).collect()
	}

	pub async fn get(&self, id: &str) -> Result<Snapshot> {
		let entries = self.entries.read().await;
		entries
			.get(id)
			.map(RuntimeEntry::snapshot)
			.ok_or_else(|| Error::NotFound(id.to_string()))
	}

	/// Launch the control loop for `id`. Idempotent while the entry is
	/// `Running` or `Starting`. Returns once the loop is scheduled, not
	/// once the child is live; poll [`get`](Self::get) to observe that.
	pub async fn start(self: &Arc<Self>, id: &str) -> Result<()> {
		if *self.shutdown.borrow() {
			return Err(Error::ShutDown);
		}

		let cancel_rx = {
			let mut entries = self.entries.write().await;
			let entry = entries
				.get_mut(id)
				.ok_or_else(|| Error::NotFound(id.to_string()))?;
			if entry.status.is_active() {
				return Ok(());
			}
			entry.status = Status::Starting;
			entry.manually_stopped = false;
			let (cancel_tx, cancel_rx) = watch::channel(false);
			entry.cancel = Some(cancel_tx);
			cancel_rx
		};

		tracing::info!("starting {}", id);
		let sup = Arc::clone(self);
		let id = id.to_string();
		tokio::spawn(async move {
			run_loop(sup, id, cancel_rx).await;
		});
		Ok(())
	}

	/// Mark the entry stopped (suppressing auto-restart) and terminate
	/// the live process group: polite signal first, forced kill once the
	/// grace window elapses. Returns once the group is down or the
	/// forced kill has been issued; a kill that itself fails is left for
	/// a later status query to surface.
	pub async fn stop(&self, id: &str) -> Result<()> {
		let pid = {
			let mut entries = self.entries.write().await;
			let entry = entries
				.get_mut(id)
				.ok_or_else(|| Error::NotFound(id.to_string()))?;
			entry.manually_stopped = true;
			entry.status = Status::Stopped;
			if let Some(cancel) = entry.cancel.take() {
				let _ = cancel.send(true);
			}
			entry.pid.take()
		};

		if let Some(pid) = pid {
			self.terminate_and_wait(id, pid).await;
		}
		Ok(())
	}

	/// Two-phase group termination: polite signal, liveness polling
	/// through the grace window, forced kill if the group outlives it.
	async fn terminate_and_wait(&self, id: &str, pid: u32) {
		tracing::info!("stopping {} (pid {})", id, pid);
		platform::terminate_group(pid);

		let deadline = tokio::time::Instant::now() + GRACEFUL_STOP_TIMEOUT;
		while tokio::time::Instant::now() < deadline {
			if !platform::is_alive(pid) {
				return;
			}
			tokio::time::sleep(LIVENESS_POLL).await;
		}

		tracing::warn!("{} did not exit in time, killing group {}", id, pid);
		platform::kill_group(pid);
	}

	/// Full stop sequence, then start again.
	pub async fn restart(self: &Arc<Self>, id: &str) -> Result<()> {
		self.stop(id).await?;
		self.start(id).await
	}

	/// Concurrently stop every entry that is `Running` or `Starting`;
	/// returns once all have completed.
	pub async fn stop_all(self: &Arc<Self>) {
		let ids: Vec<String> = {
			let entries = self.entries.read().await;
			entries
				.iter()
				.filter(|(_, entry)| entry.status.is_active())
				.map(|(id, _)| id.clone())
				.collect()
		};

		let mut handles = Vec::with_capacity(ids.len());
		for id in ids {
			let sup = Arc::clone(self);
			handles.push(tokio::spawn(async move {
				let _ = sup.stop(&id).await;
			}));
		}
		for handle in handles {
			let _ = handle.await;
		}
	}

	/// Start every registered definition with the auto-start flag set.
	pub async fn start_autostart(self: &Arc<Self>) {
		let ids: Vec<String> = {
			let entries = self.entries.read().await;
			entries
				.iter()
				.filter(|(_, entry)| entry.definition.auto_start)
				.map(|(id, _)| id.clone())
				.collect()
		};
		for id in ids {
			let _ = self.start(&id).await;
		}
	}

	/// Refuse new spawns and stop everything that is live.
	pub async fn shutdown(self: &Arc<Self>) {
		tracing::info!("supervisor shutting down");
		let _ = self.shutdown.send(true);
		self.stop_all().await;
	}

	fn emit(&self, id: &str, stream: &str, line: &str) {
		let cb = self
			.log_callback
			.read()
			.ok()
			.and_then(|guard| guard.clone());
		if let Some(cb) = cb {
			cb(id, stream, line);
		}
	}

	async fn record_error(&self, id: &str, message: String) {
		let mut entries = self.entries.write().await;
		if let Some(entry) = entries.get_mut(id) {
			entry.last_error = Some(message);
			entry.status = Status::Errored;
		}
	}

	/// Apply the restart policy to the last run. Returns the new restart
	/// count when a respawn is permitted; otherwise settles the entry in
	/// `Stopped` (policy says no) or `Errored` (retry cap exceeded).
	async fn should_restart(&self, id: &str) -> Option<u32> {
		let mut entries = self.entries.write().await;
		let entry = entries.get_mut(id)?;

		if entry.manually_stopped {
			entry.status = Status::Stopped;
			return None;
		}

		if !restart_permitted(entry.definition.restart_policy, entry.last_error.is_some()) {
			entry.status = Status::Stopped;
			return None;
		}

		entry.restarts += 1;
		if entry.definition.max_retries > 0 && entry.restarts > entry.definition.max_retries {
			entry.status = Status::Errored;
			return None;
		}

		entry.status = Status::Starting;
		Some(entry.restarts)
	}
}

fn restart_permitted(policy: RestartPolicy, errored: bool) -> bool {
	match policy {
		RestartPolicy::Never => false,
		RestartPolicy::OnFailure => errored,
		RestartPolicy::Always => true,
	}
}

fn exit_error(status: &ExitStatus) -> String {
	match status.code() {
		Some(code) => format!("exit status {}", code),
		None => status.to_string(),
	}
}

/// One iteration per (re)spawn attempt; the task is terminal once this
/// returns. Expensive work (spawning, waiting, terminating) happens
/// outside the registry lock.
async fn run_loop(sup: Arc<Supervisor>, id: String, mut cancel: watch::Receiver<bool>) {
	loop {
		// A signaled cancel means a manual stop won; the entry's state is
		// already settled (and may belong to a newer loop by now).
		if *cancel.borrow() {
			return;
		}
		if *sup.shutdown.borrow() {
			let mut entries = sup.entries.write().await;
			if let Some(entry) = entries.get_mut(&id) {
				entry.status = Status::Stopped;
			}
			return;
		}

		let def = {
			let mut entries = sup.entries.write().await;
			let Some(entry) = entries.get_mut(&id) else {
				return;
			};
			// stop() sets the flag and signals cancel under this same
			// lock; re-check here so a stop that slipped in between the
			// lock-free check above and this acquisition still wins.
			if *cancel.borrow() {
				return;
			}
			// A fresh attempt is not "manual".
			entry.last_error = None;
			entry.manually_stopped = false;
			entry.definition.clone()
		};

		let mut cmd = Command::new(&def.command);
		cmd.args(&def.args)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		if let Some(dir) = &def.working_dir {
			cmd.current_dir(dir);
		}
		for (key, val) in &def.env {
			cmd.env(key, val);
		}
		platform::setup(&mut cmd);

		let mut child = match cmd.spawn() {
			Ok(child) => child,
			Err(e) => {
				tracing::warn!("spawn failed for {}: {}", id, e);
				let message = format!("spawn failed: {}", e);
				sup.emit(&id, SUPERVISOR_STREAM, &message);
				sup.record_error(&id, message).await;
				match sup.should_restart(&id).await {
					Some(count) => {
						sup.emit(
							&id,
							SUPERVISOR_STREAM,
							&format!("restarting (attempt {})", count),
						);
					}
					None => return,
				}
				tokio::select! {
					_ = tokio::time::sleep(RESTART_COOLDOWN) => {}
					_ = cancel.changed() => return,
				}
				continue;
			}
		};

		let pid = child.id();
		let stopped_while_spawning = {
			let mut entries = sup.entries.write().await;
			match entries.get_mut(&id) {
				Some(entry) if entry.manually_stopped => {
					entry.status = Status::Stopped;
					true
				}
				Some(entry) => {
					entry.status = Status::Running;
					entry.pid = pid;
					false
				}
				// Unregistered while we were spawning.
				None => true,
			}
		};
		if stopped_while_spawning {
			if let Some(pid) = pid {
				platform::terminate_group(pid);
				platform::kill_group(pid);
			}
			let _ = child.wait().await;
			return;
		}

		tracing::info!("{} running (pid {})", id, pid.unwrap_or(0));

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(stream_lines(Arc::clone(&sup), id.clone(), "stdout", stdout));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(stream_lines(Arc::clone(&sup), id.clone(), "stderr", stderr));
		}

		let wait_result = child.wait().await;

		// A manual stop terminated the child (or a newer loop owns the
		// entry); its state is settled, so record nothing.
		if *cancel.borrow() {
			return;
		}

		match wait_result {
			Ok(status) if status.success() => {
				sup.emit(&id, SUPERVISOR_STREAM, "exited cleanly");
			}
			Ok(status) => {
				let message = exit_error(&status);
				tracing::warn!("{} exited: {}", id, message);
				sup.emit(&id, SUPERVISOR_STREAM, &message);
				sup.record_error(&id, message).await;
			}
			Err(e) => {
				let message = format!("wait failed: {}", e);
				sup.emit(&id, SUPERVISOR_STREAM, &message);
				sup.record_error(&id, message).await;
			}
		}

		{
			let mut entries = sup.entries.write().await;
			let Some(entry) = entries.get_mut(&id) else {
				return;
			};
			entry.pid = None;
			if entry.manually_stopped {
				entry.status = Status::Stopped;
				return;
			}
		}

		match sup.should_restart(&id).await {
			Some(count) => {
				tracing::info!("restarting {} (attempt {})", id, count);
				sup.emit(
					&id,
					SUPERVISOR_STREAM,
					&format!("restarting (attempt {})", count),
				);
			}
			None => return,
		}

		tokio::select! {
			_ = tokio::time::sleep(RESTART_COOLDOWN) => {}
			_ = cancel.changed() => return,
		}
	}
}

async fn stream_lines<R>(sup: Arc<Supervisor>, id: String, stream: &'static str, reader: R)
where
	R: tokio::io::AsyncRead + Unpin,
{
	let mut lines = tokio::io::BufReader::new(reader).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		sup.emit(&id, stream, &line);
	}
}
