use clap::Args;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Logging configuration, flattened into the CLI arguments.
#[derive(Args, Clone)]
pub struct Log {
	/// The default log level, overridable per-module via RUST_LOG.
	#[arg(long = "log-level", default_value = "info")]
	pub level: tracing::Level,
}

impl Log {
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(LevelFilter::from_level(self.level).into())
			.from_env_lossy();

		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}
