// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The consumer side of the command stream.

A [CommandExecutor] runs on the driver thread.  It waits for slices, decodes each command
and hands it to a [Driver], then releases the slice so the recording thread can reuse the
space.

```text
          wait_for_commands
 Waiting ------------------> Draining --(all slices released)--> Idle --> Waiting ...
    |
    | (exit requested and nothing pending)
    v
 Stopped
```
*/

use std::sync::Arc;

use crate::command::Command;
use crate::driver::Driver;
use crate::fence::FenceRegistry;
use crate::handle::{HandleAllocator, HandleError};
use crate::queue::{CommandBufferQueue, Slice};

/// Where a [CommandExecutor] is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    /// Blocked (or about to block) in [CommandBufferQueue::wait_for_commands].
    Waiting,
    /// Executing a batch of slices.
    Draining,
    /// Finished a batch; the next step waits again.
    Idle,
    /// Exit was requested and everything has been drained.  Terminal.
    Stopped,
}

/// Drains a [CommandBufferQueue] into a [Driver].
#[derive(Debug)]
pub struct CommandExecutor<D> {
    queue: Arc<CommandBufferQueue>,
    driver: D,
    handles: Arc<HandleAllocator>,
    fences: Arc<FenceRegistry>,
    state: ExecutorState,
    executed: u64,
    decode_errors: u64,
}

impl<D: Driver> CommandExecutor<D> {
    /**
    Creates an executor.

    `handles` is the allocator the recording side allocates from; destroy commands retire
    their handle there once the driver has processed them, so the id can't be reused while
    earlier commands referring to it are still in flight.  `fences` is signaled as fence
    commands execute.
    */
    pub fn new(
        queue: Arc<CommandBufferQueue>,
        driver: D,
        handles: Arc<HandleAllocator>,
        fences: Arc<FenceRegistry>,
    ) -> Self {
        CommandExecutor {
            queue,
            driver,
            handles,
            fences,
            state: ExecutorState::Waiting,
            executed: 0,
            decode_errors: 0,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Number of commands executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Number of slices cut short by a record that failed to decode.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /**
    Waits for one batch of slices and executes it.

    Returns the new state: [ExecutorState::Idle] after a batch, or [ExecutorState::Stopped]
    once exit has been requested and nothing is left.  Calling this after `Stopped` returns
    `Stopped` without blocking.

    A record that fails to decode is logged and ends execution of its slice, since the
    framing can't be trusted past it.  The slice is still released and the loop goes on.
    */
    pub fn run_once(&mut self) -> ExecutorState {
        if self.state == ExecutorState::Stopped {
            return self.state;
        }
        self.state = ExecutorState::Waiting;
        let slices = self.queue.wait_for_commands();
        if slices.is_empty() {
            logwise::info_sync!(
                "CommandExecutor stopping after {executed} commands",
                executed = self.executed
            );
            self.state = ExecutorState::Stopped;
            return self.state;
        }
        self.state = ExecutorState::Draining;
        for slice in slices {
            self.execute_slice(&slice);
            self.queue.release_buffer(slice);
        }
        self.state = ExecutorState::Idle;
        self.state
    }

    /// Runs until stopped, then terminates the driver and abandons any fences left pending.
    pub fn run(&mut self) {
        while self.run_once() != ExecutorState::Stopped {}
        self.driver.terminate();
        let abandoned = self.fences.abandon_all();
        if abandoned > 0 {
            logwise::warn_sync!(
                "CommandExecutor abandoned {abandoned} fences at shutdown",
                abandoned = abandoned
            );
        }
    }

    fn execute_slice(&mut self, slice: &Slice) {
        let _interval = logwise::perfwarn_begin!("CommandExecutor::execute_slice");
        logwise::trace_sync!(
            "executing slice {sequence} ({len} bytes)",
            sequence = slice.sequence(),
            len = slice.len()
        );
        for command in slice.commands() {
            match command {
                Ok(command) => self.execute(&command),
                Err(e) => {
                    logwise::error_sync!(
                        "undecodable command in slice {sequence}, skipping the rest: {error}",
                        sequence = slice.sequence(),
                        error = logwise::privacy::LogIt(&e)
                    );
                    self.decode_errors += 1;
                    return;
                }
            }
        }
    }

    fn execute(&mut self, command: &Command<'_>) {
        logwise::trace_sync!(
            "dispatch {opcode}",
            opcode = logwise::privacy::LogIt(&command.opcode())
        );
        self.driver.execute(command);
        self.executed += 1;
        let retired = match *command {
            Command::DestroyTexture { handle } => self.handles.retire(handle),
            Command::DestroyBuffer { handle } => self.handles.retire(handle),
            Command::DestroyProgram { handle } => self.handles.retire(handle),
            Command::DestroyRenderTarget { handle } => self.handles.retire(handle),
            Command::DestroySwapChain { handle } => self.handles.retire(handle),
            Command::Fence { fence } => {
                if !self.fences.signal(fence) {
                    logwise::warn_sync!(
                        "fence {fence} was not pending",
                        fence = fence.raw()
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = retired {
            log_retire_error(e);
        }
    }
}

fn log_retire_error(error: HandleError) {
    logwise::error_sync!(
        "destroy of an invalid handle: {error}",
        error = logwise::privacy::LogIt(&error)
    );
}
