//! Durable side of the log fan-out: a rotating on-disk store plus the
//! reference consumer that feeds both sinks from the supervisor's single
//! log callback.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::output::OutputHub;
use crate::supervisor::LogCallback;
use crate::types::LogEntry;

/// Appends `<RFC3339 timestamp> <stream> <text>` lines to a file named by
/// its creation time. After `max_lines` lines the file is closed and the
/// next append opens a fresh one; files beyond `max_files` are pruned
/// oldest-by-mtime first. Every append flushes before returning.
pub struct RollingStore {
	inner: Mutex<StoreInner>,
}

struct StoreInner {
	dir: PathBuf,
	max_lines: usize,
	max_files: usize,
	file: Option<File>,
	line_count: usize,
}

impl RollingStore {
	pub fn new(dir: impl Into<PathBuf>, max_lines: usize, max_files: usize) -> Self {
		Self {
			inner: Mutex::new(StoreInner {
				dir: dir.into(),
				max_lines,
				max_files,
				file: None,
				line_count: 0,
			}),
		}
	}

	pub fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
		let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

		if inner.file.is_none() {
			fs::create_dir_all(&inner.dir)?;
			let path = fresh_path(&inner.dir, &Utc::now());
			inner.file = Some(OpenOptions::new().create(true).append(true).open(path)?);
		}

		if let Some(file) = inner.file.as_mut() {
			writeln!(
				file,
				"{} {} {}",
				entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
				entry.stream,
				entry.line
			)?;
			file.flush()?;
		}

		inner.line_count += 1;
		if inner.line_count >= inner.max_lines {
			inner.rotate();
		}
		Ok(())
	}
}

impl StoreInner {
	fn rotate(&mut self) {
		self.file = None;
		self.line_count = 0;
		prune(&self.dir, self.max_files);
	}
}

/// Millisecond precision: second-resolution names would reuse a file when
/// rotation fires twice inside one second.
fn file_name(now: &DateTime<Utc>) -> String {
	format!("{}.log", now.format("%Y%m%d_%H%M%S_%3f"))
}

fn fresh_path(dir: &Path, now: &DateTime<Utc>) -> PathBuf {
	let candidate = dir.join(file_name(now));
	if !candidate.exists() {
		return candidate;
	}
	let stem = now.format("%Y%m%d_%H%M%S_%3f");
	let mut seq = 1;
	loop {
		let path = dir.join(format!("{}.{}.log", stem, seq));
		if !path.exists() {
			return path;
		}
		seq += 1;
	}
}

fn prune(dir: &Path, max_files: usize) {
	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(_) => return,
	};

	let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
	for entry in entries.flatten() {
		let path = entry.path();
		if path.extension().and_then(|e| e.to_str()) != Some("log") {
			continue;
		}
		let modified = entry
			.metadata()
			.and_then(|m| m.modified())
			.unwrap_or(std::time::SystemTime::UNIX_EPOCH);
		files.push((path, modified));
	}

	if files.len() <= max_files {
		return;
	}
	files.sort_by_key(|(_, modified)| *modified);
	let excess = files.len() - max_files;
	for (path, _) in files.iter().take(excess) {
		let _ = fs::remove_file(path);
	}
}

pub const DEFAULT_MAX_LOG_LINES: usize = 1000;
pub const DEFAULT_MAX_LOG_FILES: usize = 10;

/// Reference log consumer: one bounded history buffer plus one rotating
/// store rooted at `<log_dir>/<process_id>/` per process, both fed by the
/// single supervisor callback.
pub struct LogFanout {
	log_dir: PathBuf,
	history: OutputHub,
	stores: Mutex<HashMap<String, Arc<RollingStore>>>,
	max_lines: usize,
	max_files: usize,
}

impl LogFanout {
	pub fn new(
		log_dir: impl Into<PathBuf>,
		history_capacity: usize,
		max_lines: usize,
		max_files: usize,
	) -> Arc<Self> {
		Arc::new(Self {
			log_dir: log_dir.into(),
			history: OutputHub::new(history_capacity),
			stores: Mutex::new(HashMap::new()),
			max_lines,
			max_files,
		})
	}

	pub fn record(&self, id: &str, stream: &str, line: &str) {
		let entry = LogEntry::now(stream, line);
		self.history.push(id, entry.clone());
		if let Err(e) = self.store_for(id).append(&entry) {
			tracing::warn!("log append failed for {}: {}", id, e);
		}
	}

	/// Recent entries for live polling, most recent last.
	pub fn history(&self, id: &str) -> Vec<LogEntry> {
		self.history.snapshot(id)
	}

	/// Drop in-memory state for an unregistered process. Files on disk
	/// are left for the host to expire.
	pub fn forget(&self, id: &str) {
		self.history.forget(id);
		let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
		stores.remove(id);
	}

	/// The closure to hand to [`Supervisor::set_log_callback`].
	///
	/// [`Supervisor::set_log_callback`]: crate::Supervisor::set_log_callback
	pub fn callback(self: &Arc<Self>) -> LogCallback {
		let fanout = Arc::clone(self);
		Arc::new(move |id, stream, line| fanout.record(id, stream, line))
	}

	fn store_for(&self, id: &str) -> Arc<RollingStore> {
		let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
		stores
			.entry(id.to_string())
			.or_insert_with(|| {
				Arc::new(RollingStore::new(
					self.log_dir.join(id),
					self.max_lines,
					self.max_files,
				))
			})
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_name_format() {
		let now = DateTime::parse_from_rfc3339("2026-02-14T09:47:03.512Z")
			.unwrap()
			.with_timezone(&Utc);
		assert_eq!(file_name(&now), "20260214_094703_512.log");
	}
}
