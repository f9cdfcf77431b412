//! Parallel HTTP byte-range download with in-order reassembly.
//!
//! The source is partitioned into fixed-size chunks, fetched by a small pool
//! of workers, and written back in strict byte order regardless of worker
//! completion order. The first worker error aborts the whole download.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Fixed byte size of one ranged request.
const CHUNK_SIZE: u64 = 10 * 1024;

/// One byte range of the source, fetched independently.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Chunk {
	index: usize,
	start: u64,
	/// Inclusive, per the Range header grammar.
	end: u64,
}

impl Chunk {
	fn range_header(&self) -> String {
		format!("bytes={}-{}", self.start, self.end)
	}
}

/// A chunk that came back from a worker.
struct Filled {
	index: usize,
	data: Bytes,
}

/// Probe whether the server accepts ranged requests, returning the content
/// length when it does. Callers fall back to a plain streaming GET on `None`.
pub async fn supports_range(client: &Client, uri: &str) -> Result<Option<u64>> {
	let response = client.head(uri).header(header::ACCEPT, "*/*").send().await?;

	let ranges = response
		.headers()
		.get(header::ACCEPT_RANGES)
		.and_then(|value| value.to_str().ok());
	if ranges != Some("bytes") {
		return Ok(None);
	}

	let length = response
		.headers()
		.get(header::CONTENT_LENGTH)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.parse::<u64>().ok());
	Ok(length)
}

/// Download `length` bytes of `uri` with `workers` parallel ranged fetchers,
/// writing to `dst` in strict byte order.
pub async fn download<W>(dst: &mut W, client: &Client, uri: &str, length: u64, workers: usize) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let chunks = partition(length);
	let total = chunks.len();
	if total == 0 {
		return Ok(());
	}
	let workers = workers.clamp(1, total);

	let (chunk_tx, mut chunk_rx) = mpsc::channel::<Filled>(workers * 5);
	let (err_tx, mut err_rx) = mpsc::channel::<Error>(workers);
	let cancel = CancellationToken::new();

	let mut tasks = JoinSet::new();
	for lane in round_robin(chunks, workers) {
		let client = client.clone();
		let uri = uri.to_string();
		let chunk_tx = chunk_tx.clone();
		let err_tx = err_tx.clone();
		let cancel = cancel.clone();

		tasks.spawn(async move {
			for chunk in lane {
				let data = tokio::select! {
					_ = cancel.cancelled() => return,
					fetched = fetch_chunk(&client, &uri, &chunk) => match fetched {
						Ok(data) => data,
						Err(err) => {
							let _ = err_tx.try_send(err);
							return;
						}
					},
				};

				tokio::select! {
					_ = cancel.cancelled() => return,
					_ = chunk_tx.send(Filled { index: chunk.index, data }) => {}
				}
			}
		});
	}
	drop(chunk_tx);
	drop(err_tx);

	let result = reassemble(dst, &mut chunk_rx, &mut err_rx, total).await;

	// Unblock any worker still fetching or waiting to send, then drain the
	// pool so no task outlives this call.
	cancel.cancel();
	while tasks.join_next().await.is_some() {}

	debug!(%uri, total, ok = result.is_ok(), "ranged download finished");
	result
}

/// Write chunks to `dst` in index order, buffering any that arrive early.
async fn reassemble<W>(
	dst: &mut W,
	chunks: &mut mpsc::Receiver<Filled>,
	errors: &mut mpsc::Receiver<Error>,
	total: usize,
) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut pending: HashMap<usize, Bytes> = HashMap::new();
	let mut expected = 0usize;

	loop {
		let arrival = tokio::select! {
			Some(err) = errors.recv() => Err(err),
			filled = chunks.recv() => Ok(filled),
		};

		let Some(filled) = arrival? else {
			// Workers are gone. Either a late error is sitting in the error
			// channel or the feed broke off short.
			return match errors.try_recv() {
				Ok(err) => Err(err),
				Err(_) => Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
			};
		};

		if filled.index == expected {
			dst.write_all(&filled.data).await?;
			expected += 1;
			while let Some(data) = pending.remove(&expected) {
				dst.write_all(&data).await?;
				expected += 1;
			}
		} else {
			pending.insert(filled.index, filled.data);
		}

		if expected == total {
			return Ok(());
		}
	}
}

async fn fetch_chunk(client: &Client, uri: &str, chunk: &Chunk) -> Result<Bytes> {
	let response = client
		.get(uri)
		.header(header::RANGE, chunk.range_header())
		.send()
		.await?;

	if response.status() != StatusCode::PARTIAL_CONTENT {
		return Err(Error::RangeStatus(response.status().as_u16()));
	}

	Ok(response.bytes().await?)
}

/// Split `[0, length)` into fixed-size chunks; the last covers the remainder.
fn partition(length: u64) -> Vec<Chunk> {
	let mut chunks = Vec::new();
	let mut start = 0;
	while start < length {
		let end = (start + CHUNK_SIZE).min(length) - 1;
		chunks.push(Chunk {
			index: chunks.len(),
			start,
			end,
		});
		start = end + 1;
	}
	chunks
}

/// Assign chunks to worker lanes by index modulo the worker count.
fn round_robin(chunks: Vec<Chunk>, workers: usize) -> Vec<Vec<Chunk>> {
	let mut lanes = vec![Vec::new(); workers];
	for chunk in chunks {
		lanes[chunk.index % workers].push(chunk);
	}
	lanes
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partition_covers_exact_multiple() {
		let chunks = partition(CHUNK_SIZE * 3);
		assert_eq!(chunks.len(), 3);
		assert_eq!(chunks[0].start, 0);
		assert_eq!(chunks[0].end, CHUNK_SIZE - 1);
		assert_eq!(chunks[2].end, CHUNK_SIZE * 3 - 1);
	}

	#[test]
	fn partition_last_chunk_covers_remainder() {
		let chunks = partition(CHUNK_SIZE + 100);
		assert_eq!(chunks.len(), 2);
		assert_eq!(chunks[1].start, CHUNK_SIZE);
		assert_eq!(chunks[1].end, CHUNK_SIZE + 99);
	}

	#[test]
	fn partition_of_nothing_is_empty() {
		assert!(partition(0).is_empty());
	}

	#[test]
	fn range_header_is_inclusive() {
		let chunks = partition(CHUNK_SIZE * 2);
		assert_eq!(chunks[0].range_header(), format!("bytes=0-{}", CHUNK_SIZE - 1));
		assert_eq!(
			chunks[1].range_header(),
			format!("bytes={}-{}", CHUNK_SIZE, CHUNK_SIZE * 2 - 1)
		);
	}

	#[test]
	fn round_robin_assigns_by_index_modulo() {
		let lanes = round_robin(partition(CHUNK_SIZE * 7), 3);
		assert_eq!(lanes.len(), 3);
		assert_eq!(
			lanes[0].iter().map(|c| c.index).collect::<Vec<_>>(),
			[0, 3, 6]
		);
		assert_eq!(lanes[1].iter().map(|c| c.index).collect::<Vec<_>>(), [1, 4]);
		assert_eq!(lanes[2].iter().map(|c| c.index).collect::<Vec<_>>(), [2, 5]);
	}

	#[tokio::test]
	async fn reassemble_orders_out_of_order_chunks() {
		let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
		let (_err_tx, mut err_rx) = mpsc::channel(1);

		for index in [2usize, 0, 1] {
			chunk_tx
				.send(Filled {
					index,
					data: Bytes::from(vec![index as u8; 2]),
				})
				.await
				.expect("send");
		}

		let mut written = Vec::new();
		reassemble(&mut written, &mut chunk_rx, &mut err_rx, 3)
			.await
			.expect("reassemble");
		assert_eq!(written, vec![0, 0, 1, 1, 2, 2]);
	}

	#[tokio::test]
	async fn reassemble_surfaces_worker_errors() {
		let (chunk_tx, mut chunk_rx) = mpsc::channel::<Filled>(8);
		let (err_tx, mut err_rx) = mpsc::channel(1);

		err_tx.send(Error::RangeStatus(200)).await.expect("send");
		drop(err_tx);
		drop(chunk_tx);

		let mut written = Vec::new();
		let err = reassemble(&mut written, &mut chunk_rx, &mut err_rx, 2)
			.await
			.expect_err("must fail");
		assert!(matches!(err, Error::RangeStatus(200)));
		assert!(written.is_empty());
	}

	#[tokio::test]
	async fn reassemble_rejects_truncated_feeds() {
		let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
		let (_err_tx, mut err_rx) = mpsc::channel::<Error>(1);

		chunk_tx
			.send(Filled {
				index: 0,
				data: Bytes::from_static(b"xx"),
			})
			.await
			.expect("send");
		drop(chunk_tx);

		let mut written = Vec::new();
		let err = reassemble(&mut written, &mut chunk_rx, &mut err_rx, 2)
			.await
			.expect_err("must fail");
		assert!(matches!(err, Error::Io(_)));
	}
}
