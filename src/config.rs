// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Construction-time configuration.

Everything a stream needs to know is passed in explicitly through these types;
there is no ambient backend or arena-size state anywhere in the crate.
*/

use crate::ring_store::RECORD_ALIGN;

/// Free space guaranteed after every flush, unless configured otherwise.
pub const DEFAULT_REQUIRED_SIZE: usize = 1024 * 1024;
/// Total ring store capacity, unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 3 * DEFAULT_REQUIRED_SIZE;

/**
Sizing for a [crate::queue::CommandBufferQueue].

* `required_size` - bytes of records guaranteed to fit, wrap padding included, once any
  `flush()` returns.  Pick it from the expected command volume of one frame.
* `buffer_size` - total ring store capacity.  Must be at least `required_size`
  and a multiple of [RECORD_ALIGN].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueConfig {
    required_size: usize,
    buffer_size: usize,
}

impl QueueConfig {
    pub fn new(required_size: usize, buffer_size: usize) -> Result<Self, ConfigError> {
        if required_size == 0 {
            return Err(ConfigError::ZeroRequiredSize);
        }
        if buffer_size < required_size {
            return Err(ConfigError::BufferSmallerThanRequired {
                required_size,
                buffer_size,
            });
        }
        if buffer_size % RECORD_ALIGN != 0 {
            return Err(ConfigError::Misaligned {
                buffer_size,
                align: RECORD_ALIGN,
            });
        }
        Ok(QueueConfig {
            required_size,
            buffer_size,
        })
    }

    pub fn required_size(&self) -> usize {
        self.required_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            required_size: DEFAULT_REQUIRED_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Which backend executes decoded commands on the driver thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum BackendKind {
    /// Validates the command stream and discards it.
    #[default]
    Nop,
}

/// Configuration for a [crate::stream::CommandStream].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub queue: QueueConfig,
    pub backend: BackendKind,
    /// Name given to the spawned driver thread.
    pub thread_name: String,
}

impl StreamConfig {
    pub fn new(queue: QueueConfig) -> Self {
        StreamConfig {
            queue,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            queue: QueueConfig::default(),
            backend: BackendKind::default(),
            thread_name: "command_stream driver".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("required_size must be nonzero")]
    ZeroRequiredSize,
    #[error("buffer_size {buffer_size} is smaller than required_size {required_size}")]
    BufferSmallerThanRequired {
        required_size: usize,
        buffer_size: usize,
    },
    #[error("buffer_size {buffer_size} is not a multiple of {align}")]
    Misaligned { buffer_size: usize, align: usize },
}
