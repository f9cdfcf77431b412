use std::process::ExitStatus;

/// Domain-level failures surfaced by the pipeline and the controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The operation is not legal in the current session state.
	#[error("wrong status")]
	WrongStatus,

	/// A session start was attempted without an RTMP destination.
	#[error("wrong status: no rtmp destination")]
	NoDestination,

	/// A session start was attempted with nothing to play.
	#[error("wrong status: empty playlist")]
	EmptyPlaylist,

	/// Malformed operator input.
	#[error("bad input: {0}")]
	BadInput(String),

	/// A ranged GET answered with something other than 206.
	#[error("unexpected status {0} for range request")]
	RangeStatus(u16),

	/// Playlist document problems.
	#[error("hls error: {0}")]
	Hls(String),

	/// Streaming-site resolution failed.
	#[error("resolve error: {0}")]
	Resolve(String),

	/// The encoder never dialed back within the accept deadline.
	#[error("timed out waiting for the encoder connection")]
	ListenerTimeout,

	/// The encoder exited with a non-zero status.
	#[error("encoder exited: {0}")]
	EncoderExit(ExitStatus),

	/// The encoder was killed by a stop signal.
	#[error("encoder killed")]
	EncoderKilled,

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("url error: {0}")]
	Url(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
