//! Upload handling: spool, validate, probe, faststart remux, register.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::ffmpeg::{Binaries, Ffmpeg, Preset};
use crate::{Asset, Error, Result, probe, resolve};

/// Accepts uploads and streaming-site references, turning both into
/// playlist assets.
pub struct FileReceiver {
	binaries: Binaries,
	download: PathBuf,
}

impl FileReceiver {
	/// `download` is the staging directory uploads are remuxed into.
	pub fn new(binaries: Binaries, download: PathBuf) -> Self {
		Self { binaries, download }
	}

	/// Register one uploaded file: spool it, extract its duration, remux it
	/// with the index up front, and hand back the playlist asset.
	pub async fn receive(&self, filename: &str, data: &[u8]) -> Result<Asset> {
		let Some(name) = Path::new(filename).file_name().and_then(|name| name.to_str()) else {
			return Err(Error::BadInput(format!("unusable filename: {filename}")));
		};
		if !valid_extension(name) {
			return Err(Error::BadInput(format!("invalid extension: {name}")));
		}

		let spool = NamedTempFile::new()?;
		tokio::fs::write(spool.path(), data).await?;

		let duration = probe::duration(&self.binaries, spool.path()).await?;

		let local = self.download.join(name);
		let encoder = Ffmpeg::spawn(
			&self.binaries.ffmpeg,
			&Preset::faststart(),
			&spool.path().to_string_lossy(),
			&local.to_string_lossy(),
		)?;
		encoder.wait().await?;

		info!(file = %local.display(), %duration, "registered upload");
		Ok(Asset::new(name, &local.to_string_lossy(), &duration))
	}

	/// Expand a streaming-site URL (single video or playlist) into assets.
	pub async fn remote(&self, url: &str) -> Result<Vec<Asset>> {
		if !resolve::is_streaming_site(url) {
			return Err(Error::BadInput("the video is not from a supported streaming site".to_string()));
		}
		resolve::remote_assets(url).await
	}
}

fn valid_extension(filename: &str) -> bool {
	filename.ends_with(".mp4")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn receiver() -> FileReceiver {
		FileReceiver::new(Binaries::new(Path::new("/nonexistent")), PathBuf::from("/tmp/download"))
	}

	#[test]
	fn only_mp4_uploads_are_valid() {
		assert!(valid_extension("clip.mp4"));
		assert!(!valid_extension("clip.mkv"));
		assert!(!valid_extension("clip.mp4.part"));
		assert!(!valid_extension("mp4"));
	}

	#[tokio::test]
	async fn receive_rejects_other_extensions() {
		let err = receiver().receive("clip.webm", b"data").await.expect_err("must fail");
		assert!(matches!(err, Error::BadInput(_)));
	}

	#[tokio::test]
	async fn remote_rejects_unsupported_sites() {
		let err = receiver()
			.remote("https://vimeo.com/12345")
			.await
			.expect_err("must fail");
		assert!(matches!(err, Error::BadInput(_)));
	}
}
