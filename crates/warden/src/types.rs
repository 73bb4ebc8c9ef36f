use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Caller-supplied description of a manageable process. Immutable once
/// registered; replace it by registering again under the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
	#[serde(default)]
	pub id: String,
	pub name: String,
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub working_dir: Option<PathBuf>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub auto_start: bool,
	#[serde(default)]
	pub restart_policy: RestartPolicy,
	/// Max automatic restart attempts. 0 means unlimited.
	#[serde(default)]
	pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
	Always,
	#[default]
	OnFailure,
	Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Stopped,
	Starting,
	Running,
	Errored,
}

impl Status {
	pub fn is_active(&self) -> bool {
		matches!(self, Status::Running | Status::Starting)
	}
}

/// Point-in-time copy of one managed process. Never aliases supervisor
/// state; every field is copied out under the registry lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
	pub definition: Definition,
	pub pid: Option<u32>,
	pub status: Status,
	pub restarts: u32,
	pub last_error: Option<String>,
}

/// One captured line. `stream` is `"stdout"`, `"stderr"`, or a component
/// tag such as `"supervisor"` for system-level entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
	pub timestamp: DateTime<Utc>,
	pub stream: String,
	pub line: String,
}

impl LogEntry {
	pub fn now(stream: impl Into<String>, line: impl Into<String>) -> Self {
		Self {
			timestamp: Utc::now(),
			stream: stream.into(),
			line: line.into(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_is_active() {
		assert!(Status::Running.is_active());
		assert!(Status::Starting.is_active());
		assert!(!Status::Stopped.is_active());
		assert!(!Status::Errored.is_active());
	}

	#[test]
	fn policy_defaults_to_on_failure() {
		assert_eq!(RestartPolicy::default(), RestartPolicy::OnFailure);
	}

	#[test]
	fn wire_names() {
		assert_eq!(serde_json::to_string(&Status::Stopped).unwrap(), "\"stopped\"");
		assert_eq!(
			serde_json::to_string(&RestartPolicy::OnFailure).unwrap(),
			"\"on_failure\""
		);

		let def: Definition =
			serde_json::from_str(r#"{"name":"web","command":"sleep","args":["100"]}"#).unwrap();
		assert_eq!(def.id, "");
		assert_eq!(def.restart_policy, RestartPolicy::OnFailure);
		assert_eq!(def.max_retries, 0);
	}
}
