// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The producer side of the command stream.

A [CommandRecorder] serializes [Command]s into the queue's ring store.  Recording never
blocks and never allocates; the only blocking point on this thread is
[CommandRecorder::flush].
*/

use std::sync::Arc;

use crate::command::Command;
use crate::queue::{CommandBufferQueue, QueueError};
use crate::ring_store::{ReserveError, WriteCursor};

/// Serializes commands for one [CommandBufferQueue].
#[derive(Debug)]
pub struct CommandRecorder {
    cursor: WriteCursor,
    queue: Arc<CommandBufferQueue>,
    //logical position of the last flush
    flushed_at: u64,
}

impl CommandRecorder {
    /**
    Creates the recorder for `queue`.

    Each queue has one producer, so this fails if a recorder (or a cursor) already exists.
    */
    pub fn new(queue: Arc<CommandBufferQueue>) -> Result<Self, QueueError> {
        let cursor = queue.write_cursor()?;
        Ok(CommandRecorder {
            flushed_at: cursor.position(),
            cursor,
            queue,
        })
    }

    pub fn queue(&self) -> &Arc<CommandBufferQueue> {
        &self.queue
    }

    /**
    Appends one command.

    Variable-length arguments are copied into the store, so `command` may borrow
    short-lived data.

    # Panics
    If the command doesn't fit.  A flush guarantees room for `required_size` bytes of
    records, wrap padding included; recording
    more than that between two flushes, or a single command larger than the whole store, is
    a sizing bug in the caller, and there is no way to recover without losing commands.
    */
    pub fn record(&mut self, command: &Command<'_>) {
        let len = command.record_len();
        if self.cursor.cost_of(len) > self.cursor.bytes_free() {
            //the consumer may have released space since the last flush
            self.queue.refresh(&mut self.cursor);
        }
        match self.cursor.reserve(len) {
            Ok(mut reservation) => command.encode_record(&mut reservation),
            Err(e) => overflow(command, e, self.queue.required_size()),
        }
    }

    /// Seals everything recorded since the last flush and hands it to the consumer.
    ///
    /// Blocks until another `required_size` bytes of records are sure to fit, or exit is
    /// requested.  See [CommandBufferQueue::flush].
    pub fn flush(&mut self) {
        self.queue.flush(&mut self.cursor);
        self.flushed_at = self.cursor.position();
    }

    /// Bytes consumed in the store since the last flush, padding included.
    pub fn bytes_since_flush(&self) -> usize {
        (self.cursor.position() - self.flushed_at) as usize
    }

    /// Free bytes as of the last flush, minus what was recorded since.
    pub fn bytes_free(&self) -> usize {
        self.cursor.bytes_free()
    }
}

#[cold]
fn overflow(command: &Command<'_>, error: ReserveError, required_size: usize) -> ! {
    logwise::error_sync!(
        "command buffer overflow recording {opcode}: {error}",
        opcode = logwise::privacy::LogIt(&command.opcode()),
        error = logwise::privacy::LogIt(&error)
    );
    panic!(
        "command buffer overflow recording {:?}: {error}. Flush more often or raise required_size (currently {required_size})",
        command.opcode()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::handle::{Buffer, Handle};

    fn update(data: &[u8]) -> Command<'_> {
        Command::UpdateBuffer {
            handle: Handle::<Buffer>::from_parts(1, 0),
            offset: 0,
            data,
        }
    }

    #[test]
    fn records_decode_in_order() {
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::new(256, 1024).unwrap()));
        let mut recorder = CommandRecorder::new(queue.clone()).unwrap();
        recorder.record(&Command::EndFrame { frame_id: 1 });
        recorder.record(&update(b"abc"));
        recorder.record(&Command::Marker { id: 9, label: "m" });
        assert!(recorder.bytes_since_flush() > 0);
        recorder.flush();
        assert_eq!(recorder.bytes_since_flush(), 0);
        let slices = queue.wait_for_commands();
        assert_eq!(slices.len(), 1);
        let commands: Vec<_> = slices[0].commands().map(Result::unwrap).collect();
        assert_eq!(
            commands,
            vec![
                Command::EndFrame { frame_id: 1 },
                update(b"abc"),
                Command::Marker { id: 9, label: "m" },
            ]
        );
        for slice in slices {
            queue.release_buffer(slice);
        }
    }

    #[test]
    fn only_one_recorder_per_queue() {
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::default()));
        let _recorder = CommandRecorder::new(queue.clone()).unwrap();
        assert!(CommandRecorder::new(queue).is_err());
    }

    #[test]
    fn sees_space_released_since_flush() {
        //the first flush leaves exactly the required space, which the second batch fills
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::new(64, 128).unwrap()));
        let mut recorder = CommandRecorder::new(queue.clone()).unwrap();
        let payload = [0u8; 36];
        //8 header + 8 handle + 8 offset + 4 length + 36 = 64
        assert_eq!(update(&payload).record_len(), 64);
        recorder.record(&update(&payload));
        recorder.flush();
        recorder.record(&update(&payload));
        assert_eq!(recorder.bytes_free(), 0);
        for slice in queue.wait_for_commands() {
            queue.release_buffer(slice);
        }
        //no flush, but the released space is picked up on demand
        recorder.record(&update(&payload));
        assert_eq!(recorder.bytes_free(), 0);
        assert_eq!(recorder.bytes_since_flush(), 128);
        assert_eq!(queue.stats().slices_flushed, 1);
    }

    #[test]
    fn a_flushed_batch_always_fits_across_the_wrap() {
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::new(64, 128).unwrap()));
        let mut recorder = CommandRecorder::new(queue.clone()).unwrap();
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut commands = 0;
                loop {
                    let slices = queue.wait_for_commands();
                    if slices.is_empty() {
                        return commands;
                    }
                    for slice in slices {
                        commands += slice.commands().map(Result::unwrap).count();
                        queue.release_buffer(slice);
                    }
                }
            })
        };
        //32 bytes, then 64 bytes starting 32 short of the end
        recorder.record(&update(&[0u8; 4]));
        recorder.flush();
        recorder.record(&update(&[0u8; 36]));
        recorder.flush();
        recorder.record(&update(&[0u8; 36]));
        recorder.flush();
        //batches of 64, 48 and 40 bytes land at every alignment
        let batches: [&[usize]; 4] = [&[4, 4], &[36], &[20], &[12]];
        let mut recorded = 3;
        for round in 0..200 {
            for data in batches[round % batches.len()] {
                recorder.record(&update(&vec![0u8; *data]));
                recorded += 1;
            }
            recorder.flush();
        }
        queue.request_exit();
        assert_eq!(consumer.join().unwrap(), recorded);
    }

    #[test]
    #[should_panic(expected = "command buffer overflow")]
    fn oversized_command_panics() {
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::new(64, 128).unwrap()));
        let mut recorder = CommandRecorder::new(queue).unwrap();
        recorder.record(&update(&[0u8; 200]));
    }

    #[test]
    #[should_panic(expected = "command buffer overflow")]
    fn recording_past_free_space_panics() {
        let queue = Arc::new(CommandBufferQueue::new(QueueConfig::new(64, 128).unwrap()));
        let mut recorder = CommandRecorder::new(queue).unwrap();
        let payload = [0u8; 36];
        recorder.record(&update(&payload));
        recorder.record(&update(&payload));
        recorder.record(&update(&payload));
    }
}
