//! Minimal HLS resolution: pick the best variant out of a master playlist
//! and enumerate the segments of a media playlist.
//!
//! Parsing is pure over fetched bytes so it can be exercised without a
//! server; the async wrappers only add the HTTP round trip.

use m3u8_rs::Playlist;
use reqwest::Client;
use url::Url;

use crate::{Error, Result};

/// Resolve a playlist URL to a media playlist URL.
///
/// A master playlist yields its highest-bandwidth variant (ties keep the
/// first in document order), resolved against the base. A media playlist
/// passes through unchanged.
pub async fn resolve_variant(client: &Client, uri: &Url) -> Result<Url> {
	let body = fetch(client, uri).await?;
	resolve_variant_from(uri, &body)
}

/// Enumerate the media segments of a media playlist, resolved against it.
/// A master playlist here is an error.
pub async fn segments(client: &Client, uri: &Url) -> Result<Vec<Url>> {
	let body = fetch(client, uri).await?;
	segments_from(uri, &body)
}

async fn fetch(client: &Client, uri: &Url) -> Result<bytes::Bytes> {
	let response = client.get(uri.clone()).send().await?.error_for_status()?;
	Ok(response.bytes().await?)
}

fn parse(body: &[u8]) -> Result<Playlist> {
	let (_, playlist) =
		m3u8_rs::parse_playlist(body).map_err(|err| Error::Hls(format!("failed to parse playlist: {err}")))?;
	Ok(playlist)
}

fn resolve_variant_from(base: &Url, body: &[u8]) -> Result<Url> {
	match parse(body)? {
		Playlist::MasterPlaylist(master) => {
			let mut best: Option<&m3u8_rs::VariantStream> = None;
			for variant in &master.variants {
				if best.is_none_or(|current| variant.bandwidth > current.bandwidth) {
					best = Some(variant);
				}
			}

			let variant = best.ok_or_else(|| Error::Hls("master playlist has no variants".to_string()))?;
			resolve_uri(base, &variant.uri)
		}
		Playlist::MediaPlaylist(_) => Ok(base.clone()),
	}
}

fn segments_from(base: &Url, body: &[u8]) -> Result<Vec<Url>> {
	match parse(body)? {
		Playlist::MasterPlaylist(_) => Err(Error::Hls("expected a media playlist, found a master".to_string())),
		Playlist::MediaPlaylist(media) => media
			.segments
			.iter()
			.filter(|segment| !segment.uri.is_empty())
			.map(|segment| resolve_uri(base, &segment.uri))
			.collect(),
	}
}

/// Absolute URIs pass through; relative ones join against the base, which
/// replaces the last path segment and drops the query.
fn resolve_uri(base: &Url, value: &str) -> Result<Url> {
	if let Ok(url) = Url::parse(value) {
		return Ok(url);
	}

	Ok(base.join(value)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	const MASTER: &[u8] = b"#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1920x1080
tie/index.m3u8
";

	const MEDIA: &[u8] = b"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:6.0,
seg0.ts
#EXTINF:6.0,
seg1.ts
#EXTINF:4.5,
https://other.example.com/seg2.ts
#EXT-X-ENDLIST
";

	fn base(path: &str) -> Url {
		Url::parse(&format!("https://cdn.example.com{path}")).expect("base url")
	}

	#[test]
	fn master_picks_highest_bandwidth_first_on_ties() {
		let base = base("/live/master.m3u8?token=abc");
		let variant = resolve_variant_from(&base, MASTER).expect("variant");

		// 2560000 appears twice; document order keeps "hi". The join also
		// strips the query of the original URL.
		assert_eq!(variant.as_str(), "https://cdn.example.com/live/hi/index.m3u8");
	}

	#[test]
	fn media_playlist_passes_through() {
		let base = base("/live/index.m3u8");
		let variant = resolve_variant_from(&base, MEDIA).expect("variant");
		assert_eq!(variant, base);
	}

	#[test]
	fn segments_resolve_against_the_media_url() {
		let base = base("/live/hi/index.m3u8");
		let segments = segments_from(&base, MEDIA).expect("segments");

		let segments: Vec<&str> = segments.iter().map(Url::as_str).collect();
		assert_eq!(
			segments,
			[
				"https://cdn.example.com/live/hi/seg0.ts",
				"https://cdn.example.com/live/hi/seg1.ts",
				"https://other.example.com/seg2.ts",
			]
		);
	}

	#[test]
	fn segments_reject_master_playlists() {
		let err = segments_from(&base("/live/master.m3u8"), MASTER).expect_err("must fail");
		assert!(matches!(err, Error::Hls(_)));
	}
}
