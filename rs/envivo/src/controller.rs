//! Operator command serialization and the session feeder.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::{ClipError, VideoChannel};
use crate::ffmpeg::Binaries;
use crate::playlist::{Asset, Playlist, PlaylistSnapshot};
use crate::{Error, Result};

/// Session status as the operator sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Stop,
	Start,
}

/// Full operator-facing state document. Building one drains the pending
/// notifications.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
	#[serde(flatten)]
	pub playlist: PlaylistSnapshot,
	pub output: String,
	pub status: Status,
	#[serde(rename = "loop")]
	pub looping: bool,
	pub notifications: Vec<String>,
}

struct Inner {
	playlist: Playlist,
	/// Abort handle of the active channel, if a session is live.
	channel: Option<CancellationToken>,
	output: String,
	status: Status,
	looping: bool,
	notifications: Vec<String>,
}

/// Serializes operator commands onto the pipeline.
///
/// One coarse async mutex guards the controller-local state; it is never
/// held across a send to a subsystem, so operator commands cannot deadlock
/// behind a stalled pipeline.
#[derive(Clone)]
pub struct Controller {
	inner: Arc<Mutex<Inner>>,
	client: Client,
	binaries: Binaries,
	storage: PathBuf,
	rtmp_base: String,
	workers: usize,
}

impl Controller {
	/// `storage` is the per-clip archive directory; `rtmp_base` is the
	/// ingest URL the operator's stream key gets appended to.
	pub fn new(client: Client, binaries: Binaries, storage: PathBuf, rtmp_base: String, workers: usize) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner {
				playlist: Playlist::new(),
				channel: None,
				output: String::new(),
				status: Status::Stop,
				looping: false,
				notifications: Vec::new(),
			})),
			client,
			binaries,
			storage,
			rtmp_base,
			workers,
		}
	}

	/// Begin a session: open the RTMP leg and spawn the feeder.
	pub async fn start(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		if inner.status != Status::Stop || inner.channel.is_some() {
			return Err(Error::WrongStatus);
		}
		if inner.output.is_empty() {
			return Err(Error::NoDestination);
		}
		if inner.playlist.is_empty() {
			return Err(Error::EmptyPlaylist);
		}

		let channel =
			VideoChannel::new(&self.client, &self.binaries, &inner.output, &self.storage, self.workers).await?;
		inner.channel = Some(channel.abort_token());
		inner.status = Status::Start;
		drop(inner);

		let controller = self.clone();
		tokio::spawn(async move { controller.feed(channel).await });
		info!("session started");
		Ok(())
	}

	/// Stop the running session by aborting its channel.
	pub async fn stop(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		if inner.status != Status::Start {
			return Err(Error::WrongStatus);
		}
		if let Some(abort) = &inner.channel {
			abort.cancel();
		}
		inner.status = Status::Stop;
		info!("session stop requested");
		Ok(())
	}

	/// Feeder: walk the playlist one clip at a time until it runs dry or
	/// the session dies. Re-reads the queue under the lock each iteration,
	/// so operator edits take effect at the next clip boundary.
	async fn feed(self, mut channel: VideoChannel) {
		loop {
			let asset = {
				let mut inner = self.inner.lock().await;
				if inner.playlist.in_queue() == 0 && !inner.looping {
					inner.status = Status::Stop;
				}
				let end = inner.status == Status::Stop;
				inner.playlist.shift(end)
			};

			let Some(asset) = asset else {
				// Nothing left: drain the channel and retire.
				let _ = channel.input.send(None).await;
				let _ = channel.output.recv().await;
				let mut inner = self.inner.lock().await;
				inner.channel = None;
				info!("session drained");
				return;
			};

			info!(name = %asset.name, id = %asset.id, "feeding clip");
			if channel.input.send(Some(asset.video.clone())).await.is_err() {
				self.abort_reset().await;
				return;
			}

			match channel.output.recv().await {
				Some(Ok(())) => {}
				Some(Err(ClipError::Ingest(err))) => {
					warn!(name = %asset.name, %err, "clip failed to ingest");
					let mut inner = self.inner.lock().await;
					inner
						.notifications
						.push(format!("No se pudo reproducir el video {}", asset.name));
				}
				Some(Err(ClipError::Aborted)) | None => {
					info!("session aborted");
					self.abort_reset().await;
					return;
				}
			}
		}
	}

	/// The session died: reset status, drop the channel, and drain the
	/// played list back into the queue without advancing.
	async fn abort_reset(&self) {
		let mut inner = self.inner.lock().await;
		inner.status = Status::Stop;
		inner.channel = None;
		inner.playlist.shift(true);
	}

	/// Prefix the configured RTMP ingest base with the operator's key.
	pub async fn set_output(&self, key: &str) {
		let mut inner = self.inner.lock().await;
		inner.output = format!("{}{}", self.rtmp_base, key);
	}

	pub async fn set_loop(&self, looping: bool) {
		self.inner.lock().await.looping = looping;
	}

	pub async fn append(&self, asset: Asset) -> String {
		self.inner.lock().await.playlist.append(asset)
	}

	pub async fn remove(&self, id: &str) -> bool {
		self.inner.lock().await.playlist.remove(id)
	}

	/// Clear the playlist; rejected while a session is live.
	pub async fn remove_all(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		if inner.status == Status::Start {
			return Err(Error::WrongStatus);
		}
		inner.playlist.remove_all();
		Ok(())
	}

	pub async fn move_asset(&self, id: &str, position: usize) -> bool {
		self.inner.lock().await.playlist.move_by_id_to_position(id, position)
	}

	pub async fn status(&self) -> Status {
		self.inner.lock().await.status
	}

	pub async fn snapshot(&self) -> StatusSnapshot {
		let mut inner = self.inner.lock().await;
		StatusSnapshot {
			playlist: inner.playlist.snapshot(),
			output: inner.output.clone(),
			status: inner.status,
			looping: inner.looping,
			notifications: std::mem::take(&mut inner.notifications),
		}
	}
}
