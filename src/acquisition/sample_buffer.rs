// src/acquisition/sample_buffer.rs
//! Bounded circular buffer of recent acquisition samples

use crate::acquisition::AcquisitionSample;
use std::sync::Mutex;

/// Fixed capacity of the sample ring
pub const BUFFER_CAPACITY: usize = 256;

struct BufferState {
    slots: Vec<Option<AcquisitionSample>>,
    head: usize,
    size: usize,
}

/// Fixed-capacity overwrite-on-full ring with chronological snapshots.
///
/// All operations take the interior mutex for a constant-time critical
/// section, so producers and consumers may share the buffer freely.
pub struct SampleBuffer {
    state: Mutex<BufferState>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(BUFFER_CAPACITY);
        slots.resize_with(BUFFER_CAPACITY, || None);
        Self {
            state: Mutex::new(BufferState {
                slots,
                head: 0,
                size: 0,
            }),
        }
    }

    /// Append a sample, overwriting the oldest when full. Never fails.
    pub fn push(&self, sample: AcquisitionSample) {
        let mut state = self.state.lock().unwrap();
        let head = state.head;
        state.slots[head] = Some(sample);
        state.head = (head + 1) % BUFFER_CAPACITY;
        if state.size < BUFFER_CAPACITY {
            state.size += 1;
        }
    }

    /// Copy of all live samples in chronological order
    pub fn snapshot(&self) -> Vec<AcquisitionSample> {
        let state = self.state.lock().unwrap();
        let start = if state.size == BUFFER_CAPACITY {
            state.head
        } else {
            0
        };

        let mut result = Vec::with_capacity(state.size);
        for i in 0..state.size {
            let index = (start + i) % BUFFER_CAPACITY;
            if let Some(sample) = &state.slots[index] {
                result.push(sample.clone());
            }
        }
        result
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.head = 0;
        state.size = 0;
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}
