use std::collections::VecDeque;
use std::sync::Mutex;

/// Tracks which physical frames are in use and hands out free frame indices.
///
/// Reuse is strict FIFO: the first frame freed is the first handed out
/// again, so placement is deterministic for a deterministic request order.
/// The used bitset and the free list partition the frame set at all times.
pub struct FrameAllocator {
    inner: Mutex<FrameState>,
    total_frames: usize,
    frame_size: usize,
}

struct FrameState {
    used: Vec<bool>,
    free: VecDeque<usize>,
}

impl FrameAllocator {
    pub fn new(total_memory: usize, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        let total_frames = total_memory / frame_size;
        Self {
            inner: Mutex::new(FrameState {
                used: vec![false; total_frames],
                free: (0..total_frames).collect(),
            }),
            total_frames,
            frame_size,
        }
    }

    /// Hands out the oldest free frame, or `None` when all frames are in use.
    pub fn allocate(&self) -> Option<usize> {
        let mut state = self.inner.lock().unwrap();
        let frame = state.free.pop_front()?;
        state.used[frame] = true;
        Some(frame)
    }

    /// Returns a frame to the free list. A frame that is out of range or not
    /// currently allocated is ignored.
    pub fn deallocate(&self, frame: usize) {
        let mut state = self.inner.lock().unwrap();
        if frame < self.total_frames && state.used[frame] {
            state.used[frame] = false;
            state.free.push_back(frame);
        }
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_frames_in_order() {
        let frames = FrameAllocator::new(64, 16);
        assert_eq!(frames.total_frames(), 4);
        assert_eq!(frames.allocate(), Some(0));
        assert_eq!(frames.allocate(), Some(1));
        assert_eq!(frames.allocate(), Some(2));
        assert_eq!(frames.allocate(), Some(3));
        assert_eq!(frames.allocate(), None);
    }

    #[test]
    fn reuses_freed_frames_fifo() {
        let frames = FrameAllocator::new(64, 16);
        for _ in 0..4 {
            frames.allocate();
        }
        frames.deallocate(2);
        frames.deallocate(0);
        // First freed is first reused.
        assert_eq!(frames.allocate(), Some(2));
        assert_eq!(frames.allocate(), Some(0));
        assert_eq!(frames.allocate(), None);
    }

    #[test]
    fn deallocate_of_unallocated_frame_is_a_noop() {
        let frames = FrameAllocator::new(32, 16);
        frames.deallocate(1);
        frames.deallocate(99);
        assert_eq!(frames.free_count(), 2);
        assert_eq!(frames.allocate(), Some(0));
        frames.deallocate(0);
        frames.deallocate(0);
        assert_eq!(frames.free_count(), 2);
    }
}
