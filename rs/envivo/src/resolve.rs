//! Streaming-site resolution: map a video page URL to a direct stream URL
//! and expand playlist pages into individual videos.

use rusty_ytdl::search::Playlist;
use rusty_ytdl::{Video, VideoOptions, VideoQuality, VideoSearchOptions, choose_format};
use url::Url;

use crate::{Asset, Error, Result};

/// Whether the URL points at a supported streaming site.
pub fn is_streaming_site(uri: &str) -> bool {
	let Ok(url) = Url::parse(uri) else {
		return false;
	};
	let Some(host) = url.host_str() else {
		return false;
	};

	let labels: Vec<&str> = host.split('.').collect();
	if labels.len() < 2 {
		return false;
	}

	let domain = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
	domain == "youtube.com" || domain == "youtu.be"
}

fn options() -> VideoOptions {
	VideoOptions {
		quality: VideoQuality::Highest,
		filter: VideoSearchOptions::VideoAudio,
		..Default::default()
	}
}

/// Resolve the direct, playable stream URL behind a video page.
pub async fn stream_url(uri: &str) -> Result<String> {
	let video = Video::new_with_options(uri, options()).map_err(resolve_err)?;
	let info = video.get_info().await.map_err(resolve_err)?;
	let format = choose_format(&info.formats, &options()).map_err(resolve_err)?;
	Ok(format.url)
}

/// Expand a video or playlist URL into playlist assets carrying the title,
/// the original watch URL, and the duration in seconds.
pub async fn remote_assets(uri: &str) -> Result<Vec<Asset>> {
	let urls = if Playlist::is_playlist(uri) {
		let playlist = Playlist::get(uri, None).await.map_err(resolve_err)?;
		playlist
			.videos
			.iter()
			.map(|video| format!("https://www.youtube.com/watch?v={}", video.id))
			.collect()
	} else {
		vec![uri.to_string()]
	};

	let mut assets = Vec::with_capacity(urls.len());
	for url in urls {
		let video = Video::new(url.as_str()).map_err(resolve_err)?;
		let info = video.get_basic_info().await.map_err(resolve_err)?;
		let details = info.video_details;
		assets.push(Asset::new(&details.title, &url, &details.length_seconds));
	}
	Ok(assets)
}

fn resolve_err(err: rusty_ytdl::VideoError) -> Error {
	Error::Resolve(err.to_string())
}
