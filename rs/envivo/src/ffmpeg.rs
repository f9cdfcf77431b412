//! External encoder handling: transcoding presets, the on-disk binary
//! layout, and the supervised subprocess wrapper.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How long the encoder gets to dial back a local listener.
pub(crate) const DIAL_DEADLINE: Duration = Duration::from_secs(10);

/// An opaque encoder flag vector: input-side flags plus output config.
#[derive(Clone, Debug)]
pub struct Preset {
	flags: &'static [&'static str],
	config: &'static [&'static str],
}

impl Preset {
	/// Full argument vector for one input and one output.
	pub fn command(&self, input: &str, output: &str) -> Vec<String> {
		let mut args: Vec<String> = self.flags.iter().map(|flag| flag.to_string()).collect();
		args.push("-i".to_string());
		args.push(input.to_string());
		args.extend(self.config.iter().map(|flag| flag.to_string()));
		args.push(output.to_string());
		args
	}

	/// Re-encode to a broadcast-friendly H.264/AAC stream, teed as MPEG-TS.
	pub fn save() -> Self {
		Self {
			flags: &[],
			config: &[
				"-err_detect",
				"ignore_err",
				"-vcodec",
				"libx264",
				"-preset",
				"fast",
				"-r",
				"30",
				"-bf",
				"0",
				"-g",
				"60",
				"-vb",
				"1500k",
				"-vprofile",
				"baseline",
				"-level",
				"3.0",
				"-pix_fmt",
				"yuv420p",
				"-acodec",
				"aac",
				"-ab",
				"128k",
				"-ar",
				"44100",
				"-ac",
				"2",
				"-strict",
				"experimental",
				"-f",
				"tee",
				"-map",
				"0:v",
				"-map",
				"0:a?",
			],
		}
	}

	/// Pure remux at source pacing, for the session-long RTMP leg.
	pub fn copy() -> Self {
		Self {
			flags: &["-re"],
			config: &[
				"-vcodec",
				"copy",
				"-acodec",
				"copy",
				"-f",
				"flv",
				"-flvflags",
				"no_duration_filesize",
			],
		}
	}

	/// Remux an upload with the index atom up front.
	pub fn faststart() -> Self {
		Self {
			flags: &["-y", "-v", "quiet"],
			config: &["-codec", "copy", "-movflags", "faststart"],
		}
	}
}

/// On-disk locations of the external encoder and probe binaries.
#[derive(Clone, Debug)]
pub struct Binaries {
	pub ffmpeg: PathBuf,
	pub ffprobe: PathBuf,
}

impl Binaries {
	/// Expected binary locations under the given directory.
	pub fn new(dir: &Path) -> Self {
		let suffix = if cfg!(windows) { ".exe" } else { "" };
		Self {
			ffmpeg: dir.join(format!("ffmpeg{suffix}")),
			ffprobe: dir.join(format!("ffprobe{suffix}")),
		}
	}

	/// Both binaries are present. Streaming stays disabled until they are.
	pub fn ready(&self) -> bool {
		self.ffmpeg.is_file() && self.ffprobe.is_file()
	}
}

/// Cloneable kill switch for a running encoder.
///
/// Only the subsystem that owns the [`Ffmpeg`] reaps the exit; any holder of
/// the handle may request the kill.
#[derive(Clone)]
pub struct StopHandle {
	stop: CancellationToken,
}

impl StopHandle {
	pub fn stop(&self) {
		self.stop.cancel();
	}
}

/// One running encoder process.
///
/// A monitor task reaps the child exactly once, racing process exit against
/// the stop token. Stopping after a natural exit keeps the real status.
pub struct Ffmpeg {
	stop: CancellationToken,
	exit: oneshot::Receiver<Result<()>>,
}

impl Ffmpeg {
	/// Spawn the encoder with one input and one output per the preset.
	pub fn spawn(binary: &Path, preset: &Preset, input: &str, output: &str) -> Result<Self> {
		let args = preset.command(input, output);
		debug!(binary = %binary.display(), ?args, "spawning encoder");

		let mut child = Command::new(binary)
			.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()?;

		let stop = CancellationToken::new();
		let (exit_tx, exit_rx) = oneshot::channel();

		let token = stop.clone();
		tokio::spawn(async move {
			let exited = tokio::select! {
				status = child.wait() => Some(status),
				_ = token.cancelled() => None,
			};

			let result = match exited {
				Some(status) => exit_result(status),
				None => {
					if let Err(err) = child.start_kill() {
						warn!(%err, "failed to kill encoder");
					}
					match child.wait().await {
						Ok(_) => Err(Error::EncoderKilled),
						Err(err) => Err(err.into()),
					}
				}
			};
			let _ = exit_tx.send(result);
		});

		Ok(Self { stop, exit: exit_rx })
	}

	/// Kill switch usable from outside the owning task.
	pub fn stop_handle(&self) -> StopHandle {
		StopHandle { stop: self.stop.clone() }
	}

	/// Signal a kill without waiting for the exit.
	pub fn stop(&self) {
		self.stop.cancel();
	}

	/// Wait for the process to exit. `Ok` only for a clean zero exit.
	pub async fn wait(self) -> Result<()> {
		match self.exit.await {
			Ok(result) => result,
			Err(_) => Err(Error::EncoderKilled),
		}
	}
}

fn exit_result(status: std::io::Result<ExitStatus>) -> Result<()> {
	match status {
		Ok(status) if status.success() => Ok(()),
		Ok(status) => Err(Error::EncoderExit(status)),
		Err(err) => Err(err.into()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preset_places_input_between_flags_and_config() {
		let args = Preset::copy().command("tcp://127.0.0.1:9000", "rtmp://ingest/live");
		assert_eq!(args[0], "-re");
		assert_eq!(args[1], "-i");
		assert_eq!(args[2], "tcp://127.0.0.1:9000");
		assert_eq!(args.last().map(String::as_str), Some("rtmp://ingest/live"));
	}

	#[test]
	fn save_preset_tees_mpegts() {
		let args = Preset::save().command("tcp://in", "out.ts|tcp://tap");
		assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "tee"));
		assert!(args.contains(&"libx264".to_string()));
	}

	#[test]
	fn binaries_live_under_the_working_directory() {
		let binaries = Binaries::new(Path::new("/work"));
		if cfg!(windows) {
			assert!(binaries.ffmpeg.ends_with("ffmpeg.exe"));
		} else {
			assert_eq!(binaries.ffmpeg, Path::new("/work/ffmpeg"));
			assert_eq!(binaries.ffprobe, Path::new("/work/ffprobe"));
		}
		assert!(!binaries.ready());
	}
}
