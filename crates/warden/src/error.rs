use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("process not found: {0}")]
	NotFound(String),

	/// The supervisor has been shut down; no new processes may start.
	#[error("supervisor is shut down")]
	ShutDown,
}

pub type Result<T> = std::result::Result<T, Error>;
