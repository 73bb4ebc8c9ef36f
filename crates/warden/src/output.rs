use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::types::LogEntry;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded recent-history buffers, one per process id. Keeps the most
/// recent `capacity` entries in arrival order and hands out independent
/// copies. Guarded by its own lock so a reader never touches supervisor
/// state.
pub struct OutputHub {
	buffers: Mutex<HashMap<String, VecDeque<LogEntry>>>,
	capacity: usize,
}

impl OutputHub {
	pub fn new(capacity: usize) -> Self {
		Self {
			buffers: Mutex::new(HashMap::new()),
			capacity,
		}
	}

	pub fn push(&self, id: &str, entry: LogEntry) {
		let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
		let buf = buffers
			.entry(id.to_string())
			.or_insert_with(|| VecDeque::with_capacity(self.capacity));
		if buf.len() >= self.capacity {
			buf.pop_front();
		}
		buf.push_back(entry);
	}

	/// Point-in-time copy of one process's recent entries.
	pub fn snapshot(&self, id: &str) -> Vec<LogEntry> {
		let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
		buffers
			.get(id)
			.map(|buf| buf.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn forget(&self, id: &str) {
		let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
		buffers.remove(id);
	}
}

impl Default for OutputHub {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_CAPACITY)
	}
}
