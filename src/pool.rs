//! A bounded pool of reusable read buffers.
//!
//! The selector thread takes a buffer before every read and the decode
//! worker returns it once the bytes are consumed. The bound is the engine's
//! backpressure valve: when every buffer is out on loan, the selector blocks
//! in [`BufferPool::acquire`] and stops reading until decoding catches up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};

/// A fixed-capacity pool of `BytesMut` read buffers.
///
/// Buffers are created lazily up to the capacity; after that, `acquire`
/// blocks until one comes back. Clones share the same pool.
#[derive(Clone)]
pub(crate) struct BufferPool {
    tx: Sender<BytesMut>,
    rx: Receiver<BytesMut>,
    size: usize,
    cap: usize,
    created: Arc<AtomicUsize>,
}

impl BufferPool {
    /// A pool of up to `cap` buffers of `size` bytes each.
    pub(crate) fn new(size: usize, cap: usize) -> Self {
        let (tx, rx) = bounded(cap);
        BufferPool {
            tx,
            rx,
            size,
            cap,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a buffer, blocking while all of them are loaned out.
    pub(crate) fn acquire(&self) -> Option<BytesMut> {
        self.grow();
        self.rx.recv().ok()
    }

    /// Return a buffer. The contents are discarded, the allocation kept.
    pub(crate) fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.tx.try_send(buf);
    }

    /// Create one more buffer while under the capacity.
    fn grow(&self) {
        let mut count = self.created.load(Ordering::Relaxed);
        while count < self.cap {
            match self.created.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // never overfills: at most `cap` buffers exist in total
                    let _ = self.tx.try_send(BytesMut::with_capacity(self.size));
                    return;
                }
                Err(actual) => count = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn buffers_come_back_empty_with_their_allocation() {
        let pool = BufferPool::new(64, 2);
        let mut buf = pool.acquire().unwrap();
        buf.extend_from_slice(b"leftovers");
        pool.release(buf);

        let again = pool.acquire().unwrap();
        assert!(again.is_empty());
        assert!(again.capacity() >= 64);
    }

    #[test]
    fn acquire_blocks_at_capacity_until_a_release() {
        let pool = BufferPool::new(16, 2);
        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();

        let returner = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                pool.release(first);
            })
        };

        // only unblocks once the loaned buffer returns
        let third = pool.acquire();
        assert!(third.is_some());
        returner.join().unwrap();
    }

    #[test]
    fn clones_share_one_pool() {
        let pool = BufferPool::new(16, 1);
        let clone = pool.clone();

        let buf = pool.acquire().unwrap();
        clone.release(buf);
        assert!(clone.acquire().is_some());
    }
}
