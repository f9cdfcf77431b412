//! Per-asset ingest: normalize any source into a transport-stream feed.
//!
//! One encoder is spawned per asset. Its input is a TCP connection dialed
//! back to a local listener we feed the source bytes into; its output is a
//! tee into the local archive file and a second TCP connection exposed to
//! the RTMP stage.

use std::path::Path;

use reqwest::{Client, header};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::ffmpeg::{Binaries, DIAL_DEADLINE, Ffmpeg, Preset, StopHandle};
use crate::{Error, Result, download, hls, resolve};

/// The classified source: the ordered sub-URIs to feed, one for files and
/// direct HTTP, many for HLS.
struct Source {
	uris: Vec<String>,
	local: bool,
}

/// One per-asset ingest job: encoder A plus the plumbing around it.
pub struct VideoIngest {
	stop: StopHandle,
	output: mpsc::Receiver<Result<()>>,
}

impl VideoIngest {
	/// Classify the source, spawn the encoder wired to two local listeners,
	/// and start feeding. `archive` is the local cache path to tee into.
	///
	/// Returns the job handle and the accepted tee tap: the encoder's
	/// MPEG-TS output, to be handed to the RTMP stage.
	pub async fn new(
		client: &Client,
		binaries: &Binaries,
		uri: &str,
		archive: &Path,
		workers: usize,
	) -> Result<(Self, TcpStream)> {
		let source = classify(client, uri).await?;

		let tap = TcpListener::bind("127.0.0.1:0").await?;
		let tap_addr = tap.local_addr()?;

		let feed = TcpListener::bind("127.0.0.1:0").await?;
		let feed_addr = feed.local_addr()?;

		let input = format!("tcp://{feed_addr}");
		let tee = format!("[f=mpegts]{}|[f=mpegts]tcp://{}", archive.display(), tap_addr);
		info!(listen = %input, archive = %archive.display(), tap = %tap_addr, "starting ingest");

		let encoder = Ffmpeg::spawn(&binaries.ffmpeg, &Preset::save(), &input, &tee)?;
		let stop = encoder.stop_handle();

		let (output_tx, output_rx) = mpsc::channel(1);
		tokio::spawn(run(encoder, feed, source, client.clone(), workers, output_tx));

		// The encoder dials the tap once it starts producing output.
		let file = match timeout(DIAL_DEADLINE, tap.accept()).await {
			Ok(Ok((socket, _))) => socket,
			Ok(Err(err)) => {
				stop.stop();
				return Err(err.into());
			}
			Err(_) => {
				stop.stop();
				return Err(Error::ListenerTimeout);
			}
		};

		Ok((Self { stop, output: output_rx }, file))
	}

	/// Kill the encoder; the coordinator drains and surfaces the kill.
	pub fn stop(&self) {
		self.stop.stop();
	}

	/// The encoder exit status, surfaced exactly once.
	pub async fn wait(&mut self) -> Result<()> {
		match self.output.recv().await {
			Some(result) => result,
			None => Err(Error::EncoderKilled),
		}
	}
}

/// Coordinator: accept the encoder's dial-back, feed every sub-URI in
/// order, then surface the encoder exit on the output channel.
async fn run(
	encoder: Ffmpeg,
	feed: TcpListener,
	source: Source,
	client: Client,
	workers: usize,
	output: mpsc::Sender<Result<()>>,
) {
	let mut socket = match timeout(DIAL_DEADLINE, feed.accept()).await {
		Ok(Ok((socket, _))) => socket,
		Ok(Err(err)) => {
			encoder.stop();
			let _ = encoder.wait().await;
			let _ = output.send(Err(err.into())).await;
			return;
		}
		Err(_) => {
			encoder.stop();
			let _ = encoder.wait().await;
			let _ = output.send(Err(Error::ListenerTimeout)).await;
			return;
		}
	};
	drop(feed);

	for uri in &source.uris {
		info!(%uri, "feeding source");
		if let Err(err) = send_to_writer(&mut socket, &client, uri, source.local, workers).await {
			warn!(%uri, %err, "source read failed");
			encoder.stop();
			let _ = encoder.wait().await;
			let _ = output.send(Err(err)).await;
			return;
		}
	}

	// Exhausted cleanly: close the feed so the encoder drains and exits.
	let _ = socket.shutdown().await;
	drop(socket);

	let _ = output.send(encoder.wait().await).await;
	debug!("ingest finished");
}

/// Feed one source URI into the encoder socket with a uniform writer:
/// local file copy, ranged parallel download when the server supports it,
/// or a plain streaming GET.
async fn send_to_writer<W>(dst: &mut W, client: &Client, uri: &str, local: bool, workers: usize) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	if local {
		let mut file = tokio::fs::File::open(uri).await?;
		tokio::io::copy(&mut file, dst).await?;
		return Ok(());
	}

	if let Some(length) = download::supports_range(client, uri).await? {
		return download::download(dst, client, uri, length, workers).await;
	}

	let mut response = client.get(uri).send().await?.error_for_status()?;
	while let Some(chunk) = response.chunk().await? {
		dst.write_all(&chunk).await?;
	}
	Ok(())
}

/// Classify one asset URI into the list of sub-URIs to feed.
async fn classify(client: &Client, uri: &str) -> Result<Source> {
	if !uri.starts_with("http") {
		return Ok(Source {
			uris: vec![uri.to_string()],
			local: true,
		});
	}

	let mut uri = uri.to_string();
	if resolve::is_streaming_site(&uri) {
		uri = resolve::stream_url(&uri).await?;
		debug!("resolved streaming-site url");
	}

	if is_hls(&content_type(client, &uri).await?) {
		let playlist = Url::parse(&uri)?;
		let media = hls::resolve_variant(client, &playlist).await?;
		let segments = hls::segments(client, &media).await?;
		info!(count = segments.len(), "expanded hls playlist");
		return Ok(Source {
			uris: segments.into_iter().map(String::from).collect(),
			local: false,
		});
	}

	Ok(Source { uris: vec![uri], local: false })
}

async fn content_type(client: &Client, uri: &str) -> Result<String> {
	let response = client.head(uri).header(header::ACCEPT, "*/*").send().await?;
	Ok(response
		.headers()
		.get(header::CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
		.unwrap_or_default()
		.to_string())
}

fn is_hls(content_type: &str) -> bool {
	let essence = content_type.split(';').next().unwrap_or_default().trim();
	essence.eq_ignore_ascii_case("application/x-mpegURL")
		|| essence.eq_ignore_ascii_case("application/vnd.apple.mpegurl")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hls_content_types() {
		assert!(is_hls("application/x-mpegURL"));
		assert!(is_hls("application/x-mpegurl"));
		assert!(is_hls("application/vnd.apple.mpegurl"));
		assert!(is_hls("application/vnd.apple.mpegurl; charset=utf-8"));
		assert!(!is_hls("video/mp4"));
		assert!(!is_hls(""));
	}

	#[tokio::test]
	async fn local_paths_stay_single_uri() {
		let client = Client::new();
		let source = classify(&client, "/videos/clip.mp4").await.expect("classify");
		assert!(source.local);
		assert_eq!(source.uris, ["/videos/clip.mp4"]);
	}
}
