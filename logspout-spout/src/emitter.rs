//! Downstream pipeline seam.

#![allow(clippy::significant_drop_tightening)]

use std::sync::{Arc, Mutex};

use logspout_core::MessageId;

use crate::decoder::Tuple;

/// Hands tuples to the downstream pipeline.
///
/// Emission is fire-and-forget: the pipeline later reports the outcome by
/// calling ack or fail on the driver with the same [`MessageId`].
pub trait PipelineEmitter: Send {
    /// Emits `tuple` on `stream_id`, tagged with `message_id`.
    fn emit(&mut self, stream_id: &str, tuple: Tuple, message_id: MessageId);
}

/// A tuple captured by [`RecordingEmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    /// Stream the tuple was emitted on.
    pub stream_id: String,
    /// The tuple.
    pub tuple: Tuple,
    /// Id to ack or fail it with.
    pub message_id: MessageId,
}

/// Emitter that records every emission in memory.
///
/// Clones share the same buffer, so a test keeps one handle and gives the
/// other to the driver.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    emissions: Arc<Mutex<Vec<Emission>>>,
}

impl RecordingEmitter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything emitted so far.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn take(&self) -> Vec<Emission> {
        let mut emissions = self.emissions.lock().expect("emissions lock poisoned");
        std::mem::take(&mut *emissions)
    }

    /// Number of emissions not yet taken.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.emissions.lock().expect("emissions lock poisoned").len()
    }

    /// Returns true if nothing is waiting to be taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineEmitter for RecordingEmitter {
    fn emit(&mut self, stream_id: &str, tuple: Tuple, message_id: MessageId) {
        let mut emissions = self.emissions.lock().expect("emissions lock poisoned");
        emissions.push(Emission {
            stream_id: stream_id.to_string(),
            tuple,
            message_id,
        });
    }
}
