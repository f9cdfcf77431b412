//! The operator-managed playlist: an ordered queue of assets with a
//! play/reproduced partition, reordering, and loop rotation.

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

/// Where the bytes of one playable video live.
#[derive(Clone, Debug)]
pub struct VideoFile {
	/// Remote URI or local path of the original source.
	pub remote: String,
	/// Cache file name under the assets directory, derived from the asset id.
	pub local: String,
}

/// One playlist entry referencing one playable video.
#[derive(Clone, Debug, Serialize)]
pub struct Asset {
	pub id: String,
	pub name: String,
	/// Duration in seconds, as reported by the probe.
	pub duration: String,
	#[serde(skip)]
	pub video: VideoFile,
}

impl Asset {
	pub fn new(name: &str, path: &str, duration: &str) -> Self {
		let id = Uuid::new_v4().to_string();
		let video = VideoFile {
			remote: path.to_string(),
			local: format!("{id}.ts"),
		};
		Self {
			id,
			name: name.to_string(),
			duration: duration.to_string(),
			video,
		}
	}
}

/// Immutable view of the playlist, serialized for the operator.
#[derive(Clone, Debug, Serialize)]
pub struct PlaylistSnapshot {
	#[serde(rename = "inPlay")]
	pub in_play: Option<Asset>,
	#[serde(rename = "videoQueue")]
	pub video_queue: Vec<Asset>,
	pub reproduced: Vec<Asset>,
	pub total: usize,
	/// Cumulative duration of the pending and played lists, two decimals.
	pub duration: String,
}

/// Ordered queue of assets.
///
/// An asset lives in exactly one of three places: the pending `queue`, the
/// `reproduced` list of assets already played this cycle, or the `in_play`
/// slot. Not internally synchronized; the controller serializes access.
#[derive(Default)]
pub struct Playlist {
	queue: VecDeque<Asset>,
	reproduced: VecDeque<Asset>,
	in_play: Option<Asset>,
}

impl Playlist {
	pub fn new() -> Self {
		Self::default()
	}

	/// Push to the tail of the pending queue.
	pub fn append(&mut self, asset: Asset) -> String {
		let id = asset.id.clone();
		self.queue.push_back(asset);
		id
	}

	/// Remove from the pending queue only; played and in-play assets stay.
	pub fn remove(&mut self, id: &str) -> bool {
		match self.queue.iter().position(|asset| asset.id == id) {
			Some(index) => {
				self.queue.remove(index);
				true
			}
			None => false,
		}
	}

	/// Clear every slot. The controller only allows this while stopped.
	pub fn remove_all(&mut self) {
		self.queue.clear();
		self.reproduced.clear();
		self.in_play = None;
	}

	/// Move an asset to a 0-based position in the pending queue.
	///
	/// An asset still in `reproduced` is detached and re-inserted before the
	/// element at `position`. Fails when `position` is outside the queue,
	/// which also forbids moving into an empty queue.
	pub fn move_by_id_to_position(&mut self, id: &str, position: usize) -> bool {
		if position >= self.queue.len() {
			return false;
		}

		if let Some(current) = self.queue.iter().position(|asset| asset.id == id) {
			if current == position {
				return true;
			}
			let Some(asset) = self.queue.remove(current) else {
				return false;
			};
			self.queue.insert(position, asset);
			return true;
		}

		if let Some(index) = self.reproduced.iter().position(|asset| asset.id == id) {
			let Some(asset) = self.reproduced.remove(index) else {
				return false;
			};
			self.queue.insert(position, asset);
			return true;
		}

		false
	}

	/// Advance the playhead.
	///
	/// The in-play asset always retires to the back of `reproduced`. With
	/// `end` unset, an exhausted queue is first refilled from `reproduced`
	/// (loop rotation) and the new head goes in play. With `end` set, the
	/// played list drains back into the queue and nothing goes in play.
	pub fn shift(&mut self, end: bool) -> Option<Asset> {
		if let Some(asset) = self.in_play.take() {
			self.reproduced.push_back(asset);
		}
		if self.queue.is_empty() {
			self.queue.append(&mut self.reproduced);
		}
		if end {
			self.queue.append(&mut self.reproduced);
			return None;
		}
		self.in_play = self.queue.pop_front();
		self.in_play.clone()
	}

	pub fn len(&self) -> usize {
		self.queue.len() + self.reproduced.len() + usize::from(self.in_play.is_some())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of assets still pending this cycle.
	pub fn in_queue(&self) -> usize {
		self.queue.len()
	}

	pub fn snapshot(&self) -> PlaylistSnapshot {
		let mut duration = 0f64;
		for asset in self.queue.iter().chain(self.reproduced.iter()) {
			if let Ok(seconds) = asset.duration.parse::<f64>() {
				duration += seconds;
			}
		}

		PlaylistSnapshot {
			in_play: self.in_play.clone(),
			video_queue: self.queue.iter().cloned().collect(),
			reproduced: self.reproduced.iter().cloned().collect(),
			total: self.len(),
			duration: format!("{duration:.2}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn asset(name: &str) -> Asset {
		Asset::new(name, &format!("/videos/{name}.mp4"), "10")
	}

	fn names(list: &[Asset]) -> Vec<&str> {
		list.iter().map(|asset| asset.name.as_str()).collect()
	}

	fn fill(names: &[&str]) -> Playlist {
		let mut playlist = Playlist::new();
		for name in names {
			playlist.append(asset(name));
		}
		playlist
	}

	#[test]
	fn append_preserves_order() {
		let playlist = fill(&["a", "b", "c"]);
		let snapshot = playlist.snapshot();
		assert_eq!(names(&snapshot.video_queue), ["a", "b", "c"]);
		assert_eq!(playlist.len(), 3);
		assert_eq!(playlist.in_queue(), 3);
	}

	#[test]
	fn asset_cache_name_derives_from_id() {
		let asset = asset("clip");
		assert_eq!(asset.video.local, format!("{}.ts", asset.id));
	}

	#[test]
	fn shift_advances_and_retires() {
		let mut playlist = fill(&["a", "b"]);

		let first = playlist.shift(false).expect("a goes in play");
		assert_eq!(first.name, "a");
		assert_eq!(playlist.len(), 2);

		let second = playlist.shift(false).expect("b goes in play");
		assert_eq!(second.name, "b");

		let snapshot = playlist.snapshot();
		assert_eq!(names(&snapshot.reproduced), ["a"]);
		assert_eq!(snapshot.in_play.map(|a| a.name), Some("b".to_string()));
		assert_eq!(snapshot.total, 2);
	}

	#[test]
	fn shift_loops_when_queue_runs_dry() {
		let mut playlist = fill(&["a", "b"]);
		playlist.shift(false);
		playlist.shift(false);

		// Queue is empty, both assets retire; the rotation refills the queue
		// in original order and keeps playing.
		let next = playlist.shift(false).expect("rotation restarts at a");
		assert_eq!(next.name, "a");

		let snapshot = playlist.snapshot();
		assert_eq!(names(&snapshot.video_queue), ["b"]);
		assert!(snapshot.reproduced.is_empty());
	}

	#[test]
	fn shift_end_drains_without_advancing() {
		let mut playlist = fill(&["a", "b", "c"]);
		playlist.shift(false); // a in play
		playlist.shift(false); // b in play, a reproduced

		assert!(playlist.shift(true).is_none());

		// Everything is pending again and relative order is preserved.
		let snapshot = playlist.snapshot();
		assert!(snapshot.in_play.is_none());
		assert!(snapshot.reproduced.is_empty());
		assert_eq!(names(&snapshot.video_queue), ["c", "a", "b"]);
		assert_eq!(playlist.len(), 3);
	}

	#[test]
	fn shift_on_empty_playlist_returns_none() {
		let mut playlist = Playlist::new();
		assert!(playlist.shift(false).is_none());
		assert!(playlist.shift(true).is_none());
		assert_eq!(playlist.len(), 0);
	}

	#[test]
	fn remove_only_touches_queue() {
		let mut playlist = fill(&["a", "b"]);
		let played = playlist.shift(false); // a in play
		let in_play_id = played.expect("in play").id;

		assert!(!playlist.remove(&in_play_id));
		assert!(!playlist.remove("no-such-id"));

		let snapshot = playlist.snapshot();
		let pending_id = snapshot.video_queue[0].id.clone();
		assert!(playlist.remove(&pending_id));
		assert_eq!(playlist.len(), 1);
	}

	#[test]
	fn move_forward_and_backward() {
		let mut playlist = fill(&["a", "b", "c", "d"]);
		let snapshot = playlist.snapshot();
		let a = snapshot.video_queue[0].id.clone();
		let d = snapshot.video_queue[3].id.clone();

		// Forward: a lands right after the element that was at position 2.
		assert!(playlist.move_by_id_to_position(&a, 2));
		assert_eq!(names(&playlist.snapshot().video_queue), ["b", "c", "a", "d"]);

		// Backward: d lands right before the element at position 0.
		assert!(playlist.move_by_id_to_position(&d, 0));
		assert_eq!(names(&playlist.snapshot().video_queue), ["d", "b", "c", "a"]);

		// Same position is a no-op that still succeeds.
		assert!(playlist.move_by_id_to_position(&d, 0));
		assert_eq!(names(&playlist.snapshot().video_queue), ["d", "b", "c", "a"]);
	}

	#[test]
	fn move_preserves_multiset() {
		let mut playlist = fill(&["a", "b", "c"]);
		let id = playlist.snapshot().video_queue[2].id.clone();
		assert!(playlist.move_by_id_to_position(&id, 1));

		let snapshot = playlist.snapshot();
		let mut sorted = names(&snapshot.video_queue);
		sorted.sort_unstable();
		assert_eq!(sorted, ["a", "b", "c"]);
		assert_eq!(playlist.len(), 3);
	}

	#[test]
	fn move_out_of_range_fails() {
		let mut playlist = fill(&["a", "b"]);
		let id = playlist.snapshot().video_queue[0].id.clone();
		assert!(!playlist.move_by_id_to_position(&id, 2));
		assert!(!playlist.move_by_id_to_position("no-such-id", 0));
	}

	#[test]
	fn move_from_reproduced_reinserts_into_queue() {
		let mut playlist = fill(&["a", "b", "c"]);
		playlist.shift(false); // a in play
		playlist.shift(false); // b in play, a reproduced

		let a = playlist.snapshot().reproduced[0].id.clone();
		assert!(playlist.move_by_id_to_position(&a, 0));

		let snapshot = playlist.snapshot();
		assert!(snapshot.reproduced.is_empty());
		assert_eq!(names(&snapshot.video_queue), ["a", "c"]);
		assert_eq!(playlist.len(), 3);
	}

	#[test]
	fn move_from_reproduced_into_empty_queue_fails() {
		let mut playlist = fill(&["a"]);
		playlist.shift(false);
		playlist.shift(false); // rotation pops a again, queue stays empty

		let snapshot = playlist.snapshot();
		let id = snapshot.in_play.expect("a in play").id;
		assert!(!playlist.move_by_id_to_position(&id, 0));
	}

	#[test]
	fn snapshot_sums_pending_and_played_durations() {
		let mut playlist = Playlist::new();
		playlist.append(Asset::new("a", "/a.mp4", "12.5"));
		playlist.append(Asset::new("b", "/b.mp4", "7.25"));
		playlist.append(Asset::new("bad", "/c.mp4", "not-a-number"));

		let snapshot = playlist.snapshot();
		assert_eq!(snapshot.duration, "19.75");
		assert_eq!(snapshot.total, 3);
	}

	#[test]
	fn serialized_asset_hides_the_video_file() {
		let asset = asset("clip");
		let value = serde_json::to_value(&asset).expect("serialize");
		assert!(value.get("video").is_none());
		assert_eq!(value["name"], "clip");
	}
}
