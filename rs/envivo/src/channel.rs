//! Per-session video channel: pairs the session-long RTMP leg with
//! per-asset ingest jobs and drives the clip lifecycle.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ffmpeg::Binaries;
use crate::ingest::VideoIngest;
use crate::rtmp::{MediaStream, RtmpOutput};
use crate::{Error, Result, VideoFile};

/// Clip-level failure protocol between the channel and the controller.
///
/// `Aborted` means the session is dead and the channel has torn itself
/// down; `Ingest` means only this clip failed and the session continues.
/// The controller's reaction is an exhaustive match over
/// `Result<(), ClipError>`.
#[derive(Debug, thiserror::Error)]
pub enum ClipError {
	#[error("session aborted")]
	Aborted,
	#[error("ingest failed: {0}")]
	Ingest(#[source] Error),
}

/// One live session: a stream of video files in, per-clip outcomes out,
/// and a one-shot abort. The unit of cancellation is the whole session.
pub struct VideoChannel {
	pub input: mpsc::Sender<Option<VideoFile>>,
	pub output: mpsc::Receiver<Result<(), ClipError>>,
	abort: CancellationToken,
}

impl VideoChannel {
	/// Open the RTMP leg for `rtmp` and start the clip loop. `storage` is
	/// the directory of per-clip archives.
	pub async fn new(
		client: &Client,
		binaries: &Binaries,
		rtmp: &str,
		storage: &Path,
		workers: usize,
	) -> Result<Self> {
		let stage = RtmpOutput::new(binaries, rtmp).await?;

		let (input_tx, input_rx) = mpsc::channel(1);
		let (output_tx, output_rx) = mpsc::channel(1);
		let abort = CancellationToken::new();

		let session = Session {
			client: client.clone(),
			binaries: binaries.clone(),
			storage: storage.to_path_buf(),
			workers,
			abort: abort.clone(),
		};
		tokio::spawn(session.run(stage, input_rx, output_tx));

		Ok(Self {
			input: input_tx,
			output: output_rx,
			abort,
		})
	}

	/// Abort the whole session; per-clip cancellation is not exposed.
	pub fn stop(&self) {
		self.abort.cancel();
	}

	/// Abort handle the controller keeps after handing the channel to the
	/// feeder.
	pub fn abort_token(&self) -> CancellationToken {
		self.abort.clone()
	}
}

struct Session {
	client: Client,
	binaries: Binaries,
	storage: PathBuf,
	workers: usize,
	abort: CancellationToken,
}

impl Session {
	async fn run(
		self,
		mut stage: RtmpOutput,
		mut input: mpsc::Receiver<Option<VideoFile>>,
		output: mpsc::Sender<Result<(), ClipError>>,
	) {
		info!("video channel started");
		loop {
			let video = tokio::select! {
				_ = self.abort.cancelled() => None,
				received = input.recv() => received.flatten(),
			};

			// Graceful drain, or abort between clips: close the RTMP leg
			// and say goodbye.
			let Some(video) = video else {
				let _ = stage.input.send(None).await;
				let _ = stage.output.recv().await;
				let _ = output.send(Ok(())).await;
				break;
			};

			let local = self.storage.join(&video.local);
			let mut ingest = None;

			let opened: Result<MediaStream> = if tokio::fs::try_exists(&local).await.unwrap_or(false) {
				info!(path = %local.display(), "serving cached clip");
				match tokio::fs::File::open(&local).await {
					Ok(file) => Ok(Box::new(file)),
					Err(err) => Err(err.into()),
				}
			} else {
				info!(remote = %video.remote, "no cached copy, starting ingest");
				match VideoIngest::new(&self.client, &self.binaries, &video.remote, &local, self.workers).await {
					Ok((job, tap)) => {
						ingest = Some(job);
						Ok(Box::new(tap))
					}
					Err(err) => {
						// The encoder may have touched the archive already.
						self.discard_partial(&local).await;
						Err(err)
					}
				}
			};

			let stream = match opened {
				Ok(stream) => stream,
				Err(err) => {
					warn!(%err, "failed to open clip");
					let _ = output.send(Err(ClipError::Ingest(err))).await;
					continue;
				}
			};

			if stage.input.send(Some(stream)).await.is_err() {
				// The forwarding loop is gone; the session cannot continue.
				let _ = output.send(Err(ClipError::Aborted)).await;
				break;
			}

			// Clip in flight: wait for abort or completion. The decision is
			// made first so the completion future is dropped before the
			// teardown below touches the stage again.
			let completed = tokio::select! {
				_ = self.abort.cancelled() => None,
				completed = stage.output.recv() => Some(completed.unwrap_or(Err(Error::EncoderKilled))),
			};

			match completed {
				None => {
					info!("session abort requested");
					stage.stop();
					let _ = stage.output.recv().await;
					if let Some(mut job) = ingest.take() {
						job.stop();
						let _ = job.wait().await;
						self.discard_partial(&local).await;
					}
					let _ = output.send(Err(ClipError::Aborted)).await;
					break;
				}
				Some(Ok(())) => {
					let result = match ingest.take() {
						Some(mut job) => match job.wait().await {
							Ok(()) => Ok(()),
							Err(err) => {
								self.discard_partial(&local).await;
								Err(ClipError::Ingest(err))
							}
						},
						None => Ok(()),
					};
					let _ = output.send(result).await;
				}
				Some(Err(err)) => {
					warn!(%err, "rtmp stage failed");
					if let Some(mut job) = ingest.take() {
						job.stop();
						let _ = job.wait().await;
						self.discard_partial(&local).await;
					}
					let _ = output.send(Err(ClipError::Aborted)).await;
					break;
				}
			}
		}
		info!("video channel ended");
	}

	/// A failed or aborted ingest leaves a truncated archive behind; drop it
	/// so the next attempt re-ingests instead of replaying the stub.
	async fn discard_partial(&self, local: &Path) {
		if let Err(err) = tokio::fs::remove_file(local).await {
			if err.kind() != std::io::ErrorKind::NotFound {
				warn!(path = %local.display(), %err, "failed to remove partial archive");
			}
		}
	}
}
