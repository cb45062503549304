//! Admission queue: accepted-but-unassigned clients waiting for a
//! worker, stored as a FIFO in fixed-size chunks. The queue poller
//! walks the chunks once a second, streams position updates to every
//! waiting client, and evicts the dead ones in place.

use std::sync::Arc;

use tokio::net::TcpStream;

use crate::params::*;
use crate::protocol::{write_frame, Frame};
use crate::server::ServerState;

/// Chunked FIFO. Live entries always occupy a contiguous logical
/// prefix; removal shifts the tail left by one across chunk
/// boundaries. The chunk holding the next free slot is allocated
/// eagerly, so `idx` points into the last chunk at all times.
pub struct AdmissionQueue<T = TcpStream> {
    chunks: Vec<Vec<Option<T>>>,
    /// Next free slot within the last chunk.
    idx: usize,
    /// Index of the last allocated chunk.
    batch_idx: usize,
}

fn new_chunk<T>() -> Vec<Option<T>> {
    (0..QUEUE_CHUNK).map(|_| None).collect()
}

impl<T> AdmissionQueue<T> {
    pub fn new() -> Self {
        AdmissionQueue {
            chunks: vec![new_chunk()],
            idx: 0,
            batch_idx: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.batch_idx * QUEUE_CHUNK + self.idx
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_idx(&self) -> usize {
        self.batch_idx
    }

    fn is_full(&self) -> bool {
        self.batch_idx == QUEUE_BUFFERS - 1 && self.idx == QUEUE_CHUNK
    }

    /// Append at the tail. A full queue hands the entry back so the
    /// listener can turn the client away.
    pub fn push(&mut self, entry: T) -> Result<(), T> {
        if self.is_full() {
            return Err(entry);
        }
        self.chunks[self.batch_idx][self.idx] = Some(entry);
        self.idx += 1;
        if self.idx == QUEUE_CHUNK && self.batch_idx + 1 < QUEUE_BUFFERS {
            self.idx = 0;
            self.batch_idx += 1;
            self.chunks.push(new_chunk());
        }
        Ok(())
    }

    /// Take the head, shifting everything left by one.
    pub fn pop(&mut self) -> Option<T> {
        self.remove_at(0)
    }

    /// Remove the entry at logical position `at` (also the eviction
    /// path for dead waiting connections).
    pub fn remove_at(&mut self, at: usize) -> Option<T> {
        let n = self.len();
        if at >= n {
            return None;
        }
        let taken = self.slot(at).take();
        for k in at..n - 1 {
            let next = self.slot(k + 1).take();
            *self.slot(k) = next;
        }
        if self.idx == 0 {
            // the last chunk was empty; drop it along with the shrink
            self.chunks.pop();
            self.batch_idx -= 1;
            self.idx = QUEUE_CHUNK - 1;
        } else {
            self.idx -= 1;
        }
        taken
    }

    /// Entry at chunk slot `(chunk, j)`, if any.
    pub fn slot_ref_mut(&mut self, chunk: usize, j: usize) -> Option<&mut T> {
        self.chunks.get_mut(chunk)?.get_mut(j)?.as_mut()
    }

    fn slot(&mut self, at: usize) -> &mut Option<T> {
        &mut self.chunks[at / QUEUE_CHUNK][at % QUEUE_CHUNK]
    }

    /// Empty the queue, dropping every waiting entry. Used by shutdown.
    pub fn drain(&mut self) -> usize {
        let n = self.len();
        self.chunks = vec![new_chunk()];
        self.idx = 0;
        self.batch_idx = 0;
        n
    }
}

impl<T> Default for AdmissionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Queue Poller ───────────────────────────────────────────────────

/// Broadcast queue positions to waiting clients, one chunk per second.
/// The sweep ends at the first empty slot it sees in a chunk and
/// restarts from chunk zero, so holes at the tail stop a tick early;
/// later chunks catch up on the next sweep. Sends happen under the
/// queue lock because a failed send evicts the slot in place.
pub async fn queue_poller(state: Arc<ServerState>) {
    loop {
        let mut chunk = 0usize;
        loop {
            let mut hole = false;
            {
                let mut q = state.queue.lock().await;
                if chunk > q.batch_idx() {
                    break;
                }
                for j in 0..QUEUE_CHUNK - 1 {
                    let position = (chunk * QUEUE_CHUNK + j) as u16;
                    let dead = match q.slot_ref_mut(chunk, j) {
                        None => {
                            hole = true;
                            break;
                        }
                        Some(stream) => {
                            write_frame(stream, &Frame::Queue { position })
                                .await
                                .is_err()
                        }
                    };
                    if dead {
                        tracing::debug!("dropping dead waiting connection at {}", position);
                        q.remove_at(chunk * QUEUE_CHUNK + j);
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            if hole {
                break;
            }
            chunk += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_chunks() {
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        for v in 0..(QUEUE_CHUNK as i32 * 2 + 5) {
            q.push(v).unwrap();
        }
        assert_eq!(q.batch_idx(), 2);
        for v in 0..(QUEUE_CHUNK as i32 * 2 + 5) {
            assert_eq!(q.pop(), Some(v));
        }
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_shifts_across_chunk_boundary() {
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        for v in 0..(QUEUE_CHUNK as i32 + 1) {
            q.push(v).unwrap();
        }
        q.pop();
        // the old second chunk's head slid into the first chunk's tail
        assert_eq!(q.slot_ref_mut(0, QUEUE_CHUNK - 1).copied(), Some(QUEUE_CHUNK as i32));
        assert_eq!(q.len(), QUEUE_CHUNK);
        // the emptied tail chunk lingers until the next removal
        assert_eq!(q.batch_idx(), 1);
        q.pop();
        assert_eq!(q.batch_idx(), 0);
    }

    #[test]
    fn test_evict_preserves_order() {
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        for v in 0..10 {
            q.push(v).unwrap();
        }
        assert_eq!(q.remove_at(3), Some(3));
        assert_eq!(q.remove_at(0), Some(0));
        let rest: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(rest, [1, 2, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_push_pop_evict_multiset() {
        // invariant: contents equal pushes minus pops minus evictions
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        let mut expect: Vec<i32> = Vec::new();
        for v in 0..100 {
            q.push(v).unwrap();
            expect.push(v);
        }
        for _ in 0..20 {
            let got = q.pop().unwrap();
            assert_eq!(got, expect.remove(0));
        }
        expect.remove(40);
        q.remove_at(40);
        let rest: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(rest, expect);
    }

    #[test]
    fn test_full_queue_rejects_push() {
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        let cap = QUEUE_BUFFERS * QUEUE_CHUNK;
        for v in 0..cap as i32 {
            q.push(v).unwrap();
        }
        assert_eq!(q.len(), cap);
        assert_eq!(q.push(-1), Err(-1));
        assert_eq!(q.pop(), Some(0));
        q.push(-2).unwrap();
        assert_eq!(q.len(), cap);
    }

    #[test]
    fn test_remove_out_of_range_is_none() {
        let mut q: AdmissionQueue<i32> = AdmissionQueue::new();
        q.push(7).unwrap();
        assert_eq!(q.remove_at(1), None);
        assert_eq!(q.remove_at(0), Some(7));
        assert_eq!(q.remove_at(0), None);
    }
}
