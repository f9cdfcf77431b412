//! Duration extraction via the external probe binary.

use std::path::Path;

use tokio::process::Command;

use crate::ffmpeg::Binaries;
use crate::{Error, Result};

/// Ask the probe for the container duration, in seconds.
pub async fn duration(binaries: &Binaries, path: &Path) -> Result<String> {
	let output = Command::new(&binaries.ffprobe)
		.arg("-v")
		.arg("error")
		.arg("-show_entries")
		.arg("format=duration")
		.arg("-of")
		.arg("csv=p=0")
		.arg(path)
		.output()
		.await?;

	if !output.status.success() {
		return Err(Error::BadInput(format!(
			"probe failed: {}",
			String::from_utf8_lossy(&output.stderr).trim()
		)));
	}

	let duration = String::from_utf8_lossy(&output.stdout).trim().to_string();
	if duration.is_empty() {
		return Err(Error::BadInput("probe reported no duration".to_string()));
	}
	Ok(duration)
}
