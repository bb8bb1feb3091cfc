//! A FIFO of byte chunks with a cap on the total amount of bytes it holds.

use bytes::Bytes;
use std::collections::VecDeque;

/// A queue of chunks waiting to be written that never holds more than
/// `limit` bytes.
///
/// When a push takes the queue over its limit, the *oldest* chunks are thrown
/// away until it fits again. A single chunk larger than the limit only keeps
/// its trailing `limit` bytes. So no matter what gets pushed, the queue always
/// holds a suffix of everything that was pushed into it.
///
/// None of the operations block, this is owned by exactly one task.
#[derive(Debug)]
pub struct BoundedByteQueue {
	chunks: VecDeque<Bytes>,
	limit: usize,
	size: usize,
}

impl BoundedByteQueue {
	/// Create a new empty queue that will hold at most `limit` bytes.
	#[must_use]
	pub fn new(limit: usize) -> Self {
		Self {
			chunks: VecDeque::new(),
			limit,
			size: 0,
		}
	}

	/// Append a chunk to the back of the queue, evicting the oldest chunks if
	/// we go over our limit.
	///
	/// Returns how many bytes had to be thrown away to fit it (including any
	/// truncated from the front of `chunk` itself).
	pub fn push(&mut self, chunk: Bytes) -> usize {
		if chunk.is_empty() {
			return 0;
		}
		let mut dropped = 0;
		let chunk = if chunk.len() > self.limit {
			dropped += chunk.len() - self.limit;
			chunk.slice(chunk.len() - self.limit..)
		} else {
			chunk
		};
		if chunk.is_empty() {
			return dropped;
		}

		self.size += chunk.len();
		self.chunks.push_back(chunk);
		while self.size > self.limit {
			let Some(oldest) = self.chunks.pop_front() else {
				break;
			};
			self.size -= oldest.len();
			dropped += oldest.len();
		}

		dropped
	}

	/// Peek at the oldest chunk in the queue.
	#[must_use]
	pub fn front(&self) -> Option<&Bytes> {
		self.chunks.front()
	}

	/// Remove the oldest chunk from the queue.
	pub fn pop(&mut self) -> Option<Bytes> {
		let chunk = self.chunks.pop_front()?;
		self.size -= chunk.len();
		Some(chunk)
	}

	/// The total amount of bytes across every chunk.
	#[must_use]
	pub const fn size(&self) -> usize {
		self.size
	}

	/// The most bytes this queue will ever hold.
	#[must_use]
	pub const fn limit(&self) -> usize {
		self.limit
	}

	/// The amount of chunks (not bytes) in the queue.
	#[must_use]
	pub fn len(&self) -> usize {
		self.chunks.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.chunks.is_empty()
	}
}
