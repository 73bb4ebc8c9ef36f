//! # warden
//!
//! Process supervisor library: register process definitions, then start,
//! monitor, restart, and gracefully stop the children they describe.
//! Captured stdout/stderr lines are delivered to a single callback; the
//! bundled [`LogFanout`] feeds them into a bounded in-memory history and
//! a rotating on-disk store.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use warden::{Definition, LogFanout, RestartPolicy, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sup = Supervisor::new();
//!
//! let fanout = LogFanout::new("/tmp/myapp/logs", 100, 1000, 10);
//! sup.set_log_callback(fanout.callback());
//!
//! let id = sup
//! 	.register(Definition {
//! 		id: "web".into(),
//! 		name: "Web server".into(),
//! 		command: "python3".into(),
//! 		args: vec!["-m".into(), "http.server".into()],
//! 		working_dir: None,
//! 		env: Default::default(),
//! 		auto_start: false,
//! 		restart_policy: RestartPolicy::OnFailure,
//! 		max_retries: 3,
//! 	})
//! 	.await;
//!
//! sup.start(&id).await.unwrap();
//! let snap = sup.get(&id).await.unwrap();
//! println!("{:?} pid {:?}", snap.status, snap.pid);
//!
//! sup.stop(&id).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod logs;
pub mod output;
pub mod platform;
pub mod supervisor;
pub mod types;

pub use error::{Error, Result};
pub use logs::{LogFanout, RollingStore};
pub use output::OutputHub;
pub use supervisor::{LogCallback, Supervisor, SUPERVISOR_STREAM};
pub use types::{Definition, LogEntry, RestartPolicy, Snapshot, Status};
