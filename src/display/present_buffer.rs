//! Triple buffer handing the latest rendered frame to a presenter
//!
//! Three slots rotate between a writer (the display graph's render thread) and a
//! reader (whoever shows the frame):
//! - **write slot**: being filled by the writer
//! - **ready slot**: the most recently committed frame
//! - **read slot**: currently being read
//!
//! Committing swaps the write slot with the ready slot; reading first swaps the
//! ready slot with the read slot if a newer frame was committed. Swaps go through
//! one atomic word holding the ready index plus a "new frame" bit, so every slot
//! belongs to exactly one role at a time and the reader never observes a frame
//! that is still being written. The writer never waits for the reader.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::utils::lock;

const INDEX_MASK: usize = 0b011;
const NEW_FRAME: usize = 0b100;

/// Latest-value triple buffer for one writer and one reader
pub struct PresentBuffer<T> {
    slots: [Mutex<T>; 3],
    write_idx: Mutex<usize>,
    read_idx: Mutex<usize>,
    /// Ready index, or-ed with [`NEW_FRAME`] after a commit the reader has not consumed
    ready: AtomicUsize,
}

impl<T> PresentBuffer<T> {
    pub fn new<F>(mut init_fn: F) -> Self
    where
        F: FnMut() -> T,
    {
        Self {
            slots: [
                Mutex::new(init_fn()),
                Mutex::new(init_fn()),
                Mutex::new(init_fn()),
            ],
            write_idx: Mutex::new(0),
            read_idx: Mutex::new(2),
            ready: AtomicUsize::new(1),
        }
    }

    /// Borrow the write slot. The frame is published when the guard drops.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let index = lock(&self.write_idx);
        let slot = lock(&self.slots[*index]);
        WriteGuard {
            ready: &self.ready,
            index,
            slot,
        }
    }

    /// Borrow the most recently committed frame
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut index = lock(&self.read_idx);
        if self.ready.load(Ordering::Acquire) & NEW_FRAME != 0 {
            let previous = self.ready.swap(*index, Ordering::AcqRel);
            *index = previous & INDEX_MASK;
        }
        let slot = lock(&self.slots[*index]);
        ReadGuard {
            _index: index,
            slot,
        }
    }

    /// Check if a frame was committed since the last read
    pub fn has_new_frame(&self) -> bool {
        self.ready.load(Ordering::Acquire) & NEW_FRAME != 0
    }
}

pub struct WriteGuard<'a, T> {
    ready: &'a AtomicUsize,
    index: MutexGuard<'a, usize>,
    slot: MutexGuard<'a, T>,
}

impl<T> WriteGuard<'_, T> {
    /// Publish the frame
    pub fn commit(self) {}
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let previous = self.ready.swap(*self.index | NEW_FRAME, Ordering::AcqRel);
        *self.index = previous & INDEX_MASK;
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot
    }
}

pub struct ReadGuard<'a, T> {
    _index: MutexGuard<'a, usize>,
    slot: MutexGuard<'a, T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_write_read() {
        let buffer = PresentBuffer::new(Vec::<u8>::new);
        {
            let mut write = buffer.write();
            write.extend_from_slice(&[1, 2, 3, 4]);
            write.commit();
        }

        assert!(buffer.has_new_frame());
        assert_eq!(&**buffer.read(), &[1, 2, 3, 4]);
        assert!(!buffer.has_new_frame());

        // Reading again returns the same frame
        assert_eq!(&**buffer.read(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_reader_sees_latest_commit() {
        let buffer = PresentBuffer::new(Vec::<u8>::new);
        for i in 0..10 {
            let mut write = buffer.write();
            write.clear();
            write.push(i);
        }
        assert_eq!(&**buffer.read(), &[9]);
    }

    #[test]
    fn test_no_torn_frames() {
        let buffer = Arc::new(PresentBuffer::new(|| vec![0u8; 1024]));
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..2000u32 {
                    let mut write = buffer.write();
                    write.fill((i % 256) as u8);
                }
            })
        };

        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let read = buffer.read();
                    let first = read[0];
                    assert!(read.iter().all(|&b| b == first), "torn frame observed");
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(buffer.read()[0], (1999 % 256) as u8);
    }
}
