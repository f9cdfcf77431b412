mod log;
mod web;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use envivo::{Binaries, Controller, FileReceiver};

#[derive(Parser, Clone)]
pub struct Cli {
	#[command(flatten)]
	log: log::Log,

	/// Address for the HTTP control surface.
	#[arg(long, default_value = "127.0.0.1:4000")]
	bind: SocketAddr,

	/// Working directory for upload staging and the clip cache.
	///
	/// Defaults to a fresh temporary directory that is removed on exit.
	#[arg(long)]
	dir: Option<PathBuf>,

	/// Optionally serve the management UI from the given directory.
	#[arg(long)]
	ui: Option<PathBuf>,

	/// RTMP ingest base URL the operator's stream key is appended to.
	#[arg(long, default_value = "rtmp://a.rtmp.youtube.com/live2/")]
	rtmp_base: String,

	/// Parallel connections for ranged downloads.
	#[arg(long, default_value_t = 10)]
	download_workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	cli.log.init();

	// Keep the guard alive for the lifetime of the process so a generated
	// working directory is cleaned up on exit.
	let mut tempdir = None;
	let workdir = match &cli.dir {
		Some(dir) => dir.clone(),
		None => {
			let dir = tempfile::tempdir().context("failed to create working directory")?;
			let path = dir.path().to_path_buf();
			tempdir = Some(dir);
			path
		}
	};
	let _tempdir = tempdir;

	let download = workdir.join("download");
	let assets = workdir.join("assets");
	tokio::fs::create_dir_all(&download).await?;
	tokio::fs::create_dir_all(&assets).await?;
	tracing::info!(dir = %workdir.display(), "working directory ready");

	// The encoder and probe live next to the process, never inside the
	// (possibly temporary) media directory.
	let binaries = Binaries::new(&std::env::current_dir()?);
	if !binaries.ready() {
		tracing::warn!(
			ffmpeg = %binaries.ffmpeg.display(),
			ffprobe = %binaries.ffprobe.display(),
			"external binaries missing; streaming is disabled until both appear"
		);
		let watch = binaries.clone();
		tokio::spawn(async move {
			loop {
				tokio::time::sleep(Duration::from_secs(10)).await;
				if watch.ready() {
					tracing::info!("external binaries found; streaming enabled");
					return;
				}
			}
		});
	}

	let client = reqwest::Client::builder()
		.user_agent(concat!("envivo/", env!("CARGO_PKG_VERSION")))
		.build()
		.context("failed to build HTTP client")?;

	let controller = Controller::new(
		client,
		binaries.clone(),
		assets,
		cli.rtmp_base.clone(),
		cli.download_workers,
	);
	let receiver = FileReceiver::new(binaries.clone(), download);

	web::serve(cli.bind, controller, receiver, binaries, cli.ui).await
}
