// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The application-facing command stream.

[CommandStream] ties the pieces together.  It owns the [CommandRecorder] and the
[HandleAllocator] on the calling thread, and spawns a dedicated driver thread that runs a
[CommandExecutor] over the same [CommandBufferQueue].

```text
 application thread                         driver thread
 ------------------                         -------------
 create/draw/update ... --record-->  ring  --wait_for_commands-->  Driver
 flush/end_frame  ------seal------>  store <--release_buffer------
```

Creating a resource returns its handle immediately; the backend object is created later,
when the driver thread reaches the command.  The handle is valid to record against right
away.

# Shutdown

[CommandStream::shutdown] (or dropping the stream) flushes, requests exit, and joins the
driver thread after it has drained everything recorded.  If the driver thread panics,
exit is requested from its unwind so the application never blocks on a dead consumer.
*/

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::command::{Command, DrawCall};
use crate::config::{ConfigError, QueueConfig, StreamConfig};
use crate::driver::Driver;
use crate::executor::CommandExecutor;
use crate::fence::{FenceRegistry, FenceStatus};
use crate::handle::{
    Bindable, Buffer, Creatable, Destroyable, Handle, HandleAllocator, SwapChain,
};
use crate::queue::{CommandBufferQueue, QueueError, QueueStats};
use crate::recorder::CommandRecorder;

/// Requests exit when dropped, so an unwinding driver thread can't strand the producer
/// or anyone awaiting a fence.
struct ExitOnDrop {
    queue: Arc<CommandBufferQueue>,
    fences: Arc<FenceRegistry>,
}

impl Drop for ExitOnDrop {
    fn drop(&mut self) {
        self.queue.request_exit();
        if std::thread::panicking() {
            logwise::error_sync!("driver thread panicked; exit requested");
            self.fences.abandon_all();
        }
    }
}

/// A command stream with its own driver thread.
#[derive(Debug)]
pub struct CommandStream {
    recorder: CommandRecorder,
    handles: Arc<HandleAllocator>,
    fences: Arc<FenceRegistry>,
    next_frame: u64,
    next_marker: u64,
    driver_thread: Option<JoinHandle<()>>,
}

impl CommandStream {
    /// Creates a stream running the built-in backend named by `config`.
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        Self::with_driver(config, crate::imp::driver_for(config.backend))
    }

    /// Creates a stream with the default backend and the given queue sizing.
    pub fn with_queue_sizes(required_size: usize, buffer_size: usize) -> Result<Self, StreamError> {
        let queue = QueueConfig::new(required_size, buffer_size)?;
        Self::new(&StreamConfig::new(queue))
    }

    /// Creates a stream running `driver` on the driver thread.
    pub fn with_driver<D: Driver + 'static>(
        config: &StreamConfig,
        driver: D,
    ) -> Result<Self, StreamError> {
        let queue = Arc::new(CommandBufferQueue::new(config.queue));
        let handles = Arc::new(HandleAllocator::new());
        let fences = Arc::new(FenceRegistry::new());
        let recorder = CommandRecorder::new(queue.clone())?;
        let mut executor =
            CommandExecutor::new(queue.clone(), driver, handles.clone(), fences.clone());
        let exit = ExitOnDrop {
            queue,
            fences: fences.clone(),
        };

        let parent = logwise::context::Context::current();
        let driver_thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let c = logwise::context::Context::new_task(
                    Some(parent),
                    "command_stream driver".to_string(),
                );
                let id = c.context_id();
                c.set_current();
                let _exit = exit;
                executor.run();
                logwise::context::Context::pop(id);
            })?;
        logwise::info_sync!(
            "CommandStream started driver thread {name}",
            name = logwise::privacy::LogIt(&config.thread_name)
        );
        Ok(CommandStream {
            recorder,
            handles,
            fences,
            next_frame: 0,
            next_marker: 0,
            driver_thread: Some(driver_thread),
        })
    }

    pub fn queue(&self) -> &Arc<CommandBufferQueue> {
        self.recorder.queue()
    }

    pub fn handles(&self) -> &Arc<HandleAllocator> {
        &self.handles
    }

    pub fn stats(&self) -> QueueStats {
        self.queue().stats()
    }

    /// Records an arbitrary command.
    pub fn record(&mut self, command: &Command<'_>) {
        self.recorder.record(command);
    }

    /// Allocates a handle and records the command creating its resource.
    pub fn create<T: Creatable>(&mut self, descriptor: T::Descriptor<'_>) -> Handle<T> {
        let handle = self.handles.allocate::<T>();
        self.recorder.record(&T::create_command(handle, descriptor));
        handle
    }

    /**
    Records the command destroying `handle`'s resource.

    The id becomes reusable only after the driver thread has executed the destroy, so
    commands already recorded against it stay unambiguous.
    */
    pub fn destroy<T: Destroyable>(&mut self, handle: Handle<T>) {
        self.recorder.record(&T::destroy_command(handle));
    }

    pub fn bind<T: Bindable>(&mut self, slot: u32, handle: Handle<T>) {
        self.recorder.record(&T::bind_command(slot, handle));
    }

    /// Records a write of `data` at `offset`.  `data` is copied; it need not outlive the call.
    pub fn update_buffer(&mut self, buffer: Handle<Buffer>, offset: u64, data: &[u8]) {
        self.recorder.record(&Command::UpdateBuffer {
            handle: buffer,
            offset,
            data,
        });
    }

    pub fn draw(&mut self, call: DrawCall) {
        self.recorder.record(&Command::Draw(call));
    }

    /// Starts a frame on `swap_chain` and returns its id.
    pub fn begin_frame(&mut self, swap_chain: Handle<SwapChain>) -> u64 {
        let frame_id = self.next_frame;
        self.next_frame += 1;
        self.recorder.record(&Command::BeginFrame {
            swap_chain,
            frame_id,
        });
        frame_id
    }

    /// Ends the frame and flushes it to the driver thread.
    pub fn end_frame(&mut self, frame_id: u64) {
        self.recorder.record(&Command::EndFrame { frame_id });
        self.flush();
    }

    /// Records a debug marker and returns its id.
    pub fn marker(&mut self, label: &str) -> u64 {
        let id = self.next_marker;
        self.next_marker += 1;
        self.recorder.record(&Command::Marker { id, label });
        id
    }

    /// See [CommandRecorder::flush].
    pub fn flush(&mut self) {
        self.recorder.flush();
    }

    /**
    Flushes and returns a future that completes once the driver thread has executed
    everything recorded so far and the backend is idle.

    Resolves to [FenceStatus::Abandoned] if the stream shuts down first.
    */
    pub fn finish(&mut self) -> impl Future<Output = FenceStatus> + use<> {
        let (fence, future) = self.fences.register();
        self.recorder.record(&Command::Fence { fence });
        self.flush();
        future
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        let Some(thread) = self.driver_thread.take() else {
            return Ok(());
        };
        self.recorder.flush();
        self.queue().request_exit();
        let joined = thread.join();
        //anything the driver thread didn't reach can never be signaled now
        self.fences.abandon_all();
        match joined {
            Ok(()) => {
                logwise::info_sync!("CommandStream shut down");
                Ok(())
            }
            Err(_) => Err(StreamError::DriverPanicked),
        }
    }

    /// Drains everything recorded, then stops the driver thread.
    pub fn shutdown(mut self) -> Result<(), StreamError> {
        self.stop()
    }
}

impl Drop for CommandStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            logwise::error_sync!(
                "CommandStream dropped: {error}",
                error = logwise::privacy::LogIt(&e)
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("could not spawn the driver thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("the driver thread panicked")]
    DriverPanicked,
}
