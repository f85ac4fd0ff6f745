/*! command_stream is an asynchronous GPU command stream.

The application thread records rendering commands (resource creation and destruction,
buffer updates, frame boundaries, draws) into a fixed-size ring buffer.  A dedicated driver
thread decodes and executes them against a backend.  The two sides meet only at slice
boundaries, so recording is cheap and never blocks, and the driver thread can batch.

Here is how the pieces fit:

| Type                   | Thread      | Role                                                             |
|------------------------|-------------|------------------------------------------------------------------|
| [CommandStream]        | application | Facade: typed recording, frames, fences, orderly shutdown        |
| [CommandRecorder]      | application | Serializes [Command]s into the ring store                        |
| [CommandBufferQueue]   | both        | Seals flushed bytes into [Slice]s, applies backpressure          |
| [CommandExecutor]      | driver      | Waits for slices, dispatches to a [Driver], releases the slices  |
| [HandleAllocator]      | both        | Hands out generation-checked [Handle]s before the resource exists |

# Memory

The ring store is allocated once.  [QueueConfig] gives two sizes: `required_size`, the
room for records guaranteed after every flush, and `buffer_size`, the total capacity.  A
flush blocks until that room exists again, which bounds memory use no matter how far
ahead the application runs.  Records never straddle the end of the store, so the room
includes whatever padding the next wrap costs.  Pick `required_size` to cover one frame
of commands and `buffer_size` as a small multiple of it.

Recording more than `required_size` bytes of records between two flushes is a sizing
bug, and the recorder panics with the sizes involved rather than silently dropping
commands.

# Handles

Resources are named by [Handle]s, which are allocated on the recording thread and usable
immediately.  The backend object is created when the driver thread reaches the create
command.  Handles carry a generation, so a handle whose resource was destroyed and whose
id was reused is detected instead of resolving to the wrong object.

# Backends

Backends implement [Driver].  The built-in [NopDriver] executes nothing but validates the
stream, which makes it useful for tests and for measuring recording overhead.
*/

mod sys;

pub mod command;
pub mod config;
pub mod driver;
pub mod executor;
pub mod fence;
pub mod handle;
mod imp;
pub mod queue;
pub mod recorder;
pub mod ring_store;
pub mod stream;

pub use command::{Command, DecodeError};
pub use config::{BackendKind, ConfigError, QueueConfig, StreamConfig};
pub use driver::Driver;
pub use executor::{CommandExecutor, ExecutorState};
pub use fence::{FenceId, FenceRegistry, FenceStatus};
pub use handle::{Handle, HandleAllocator, HandleError, ResourceTable};
pub use imp::NopDriver;
pub use queue::{CommandBufferQueue, QueueError, QueueStats, Slice};
pub use recorder::CommandRecorder;
pub use ring_store::{ReserveError, RingStore, WriteCursor};
pub use stream::{CommandStream, StreamError};

/// Any error this crate reports.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Reserve(#[from] ReserveError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
