use std::collections::HashMap;
use warden::{Definition, LogFanout, RestartPolicy, Supervisor};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let log_dir = std::env::temp_dir().join("warden-echo-example");
	let sup = Supervisor::new();
	let fanout = LogFanout::new(&log_dir, 100, 1000, 10);
	sup.set_log_callback(fanout.callback());

	sup.register(Definition {
		id: "ticker".into(),
		name: "Ticker".into(),
		command: "sh".into(),
		args: vec![
			"-c".into(),
			"for i in 1 2 3; do echo tick $i; sleep 1; done".into(),
		],
		working_dir: None,
		env: HashMap::new(),
		auto_start: true,
		restart_policy: RestartPolicy::Never,
		max_retries: 0,
	})
	.await;

	sup.start_autostart().await;
	tokio::time::sleep(std::time::Duration::from_millis(500)).await;

	for snap in sup.list().await {
		eprintln!(
			"{}: {:?} pid {:?} restarts {}",
			snap.definition.id, snap.status, snap.pid, snap.restarts
		);
	}

	tokio::time::sleep(std::time::Duration::from_secs(3)).await;

	for entry in fanout.history("ticker") {
		println!("{} {} {}", entry.timestamp.to_rfc3339(), entry.stream, entry.line);
	}

	sup.shutdown().await;
	eprintln!("logs written under {}", log_dir.display());
}
