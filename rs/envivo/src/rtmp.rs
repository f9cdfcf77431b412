//! The session-long RTMP leg: one encoder in copy mode fed through a single
//! TCP connection, forwarding a sequence of readable streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ffmpeg::{Binaries, DIAL_DEADLINE, Ffmpeg, Preset, StopHandle};
use crate::{Error, Result};

/// A readable media stream handed to the RTMP stage.
pub type MediaStream = Box<dyn AsyncRead + Send + Unpin>;

/// The session-long RTMP output stage.
///
/// The encoder and its TCP connection are created once per session; handing
/// over the next input stream does not restart either, which is what keeps
/// clip boundaries invisible to the RTMP peer.
pub struct RtmpOutput {
	/// Next stream to forward; `None` drains the stage.
	pub input: mpsc::Sender<Option<MediaStream>>,
	/// One completion per input handed over.
	pub output: mpsc::Receiver<Result<()>>,
	stop: StopHandle,
}

impl RtmpOutput {
	pub async fn new(binaries: &Binaries, rtmp: &str) -> Result<Self> {
		let listener = TcpListener::bind("127.0.0.1:0").await?;
		let addr = listener.local_addr()?;
		let input_url = format!("tcp://{addr}");

		info!(listen = %input_url, dest = %rtmp, "starting rtmp output");
		let encoder = Ffmpeg::spawn(&binaries.ffmpeg, &Preset::copy(), &input_url, rtmp)?;
		let stop = encoder.stop_handle();

		let socket = match timeout(DIAL_DEADLINE, listener.accept()).await {
			Ok(Ok((socket, _))) => socket,
			Ok(Err(err)) => {
				stop.stop();
				let _ = encoder.wait().await;
				return Err(err.into());
			}
			Err(_) => {
				stop.stop();
				let _ = encoder.wait().await;
				return Err(Error::ListenerTimeout);
			}
		};

		let (input_tx, input_rx) = mpsc::channel(1);
		let (output_tx, output_rx) = mpsc::channel(1);
		tokio::spawn(run(encoder, socket, input_rx, output_tx));

		Ok(Self {
			input: input_tx,
			output: output_rx,
			stop,
		})
	}

	/// Kill the encoder; the forwarding loop surfaces the exit.
	pub fn stop(&self) {
		self.stop.stop();
	}
}

async fn run(
	encoder: Ffmpeg,
	mut socket: TcpStream,
	mut input: mpsc::Receiver<Option<MediaStream>>,
	output: mpsc::Sender<Result<()>>,
) {
	debug!("rtmp forwarding loop started");
	while let Some(next) = input.recv().await {
		let Some(mut stream) = next else {
			debug!("rtmp output draining");
			encoder.stop();
			let _ = output.send(encoder.wait().await).await;
			return;
		};

		let copied = forward(&mut stream, &mut socket).await;
		drop(stream);

		match copied {
			Ok(bytes) => {
				debug!(bytes, "clip forwarded");
				let _ = output.send(Ok(())).await;
			}
			Err((0, err)) => {
				// Nothing reached the encoder; the connection is still good,
				// so treat the clip as empty and keep the session alive.
				warn!(%err, "input stream failed before producing data");
				let _ = output.send(Ok(())).await;
			}
			Err((bytes, err)) => {
				// The encoder died mid-copy; its exit status is the story.
				warn!(bytes, %err, "forwarding failed mid-stream");
				let _ = output.send(encoder.wait().await).await;
				return;
			}
		}
	}

	// Every input sender is gone without a drain marker; shut down anyway.
	encoder.stop();
	let _ = encoder.wait().await;
	debug!("rtmp forwarding loop ended");
}

/// Copy `src` into `dst`, reporting how many bytes were written before any
/// failure.
async fn forward<R, W>(src: &mut R, dst: &mut W) -> std::result::Result<u64, (u64, std::io::Error)>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut buf = [0u8; 16 * 1024];
	let mut written = 0u64;

	loop {
		let n = match src.read(&mut buf).await {
			Ok(0) => return Ok(written),
			Ok(n) => n,
			Err(err) => return Err((written, err)),
		};
		if let Err(err) = dst.write_all(&buf[..n]).await {
			return Err((written, err));
		}
		written += n as u64;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[tokio::test]
	async fn forward_counts_written_bytes() {
		let mut src = Cursor::new(vec![7u8; 40_000]);
		let mut dst = Vec::new();
		let written = forward(&mut src, &mut dst).await.expect("forward");
		assert_eq!(written, 40_000);
		assert_eq!(dst.len(), 40_000);
	}

	#[tokio::test]
	async fn forward_reports_progress_on_failure() {
		struct Failing {
			left: usize,
		}

		impl AsyncRead for Failing {
			fn poll_read(
				mut self: std::pin::Pin<&mut Self>,
				_cx: &mut std::task::Context<'_>,
				buf: &mut tokio::io::ReadBuf<'_>,
			) -> std::task::Poll<std::io::Result<()>> {
				if self.left == 0 {
					return std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
				}
				let n = self.left.min(buf.remaining());
				buf.put_slice(&vec![1u8; n]);
				self.left -= n;
				std::task::Poll::Ready(Ok(()))
			}
		}

		let mut src = Failing { left: 1000 };
		let mut dst = Vec::new();
		let (written, err) = forward(&mut src, &mut dst).await.expect_err("must fail");
		assert_eq!(written, 1000);
		assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
	}
}
