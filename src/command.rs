// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Commands and their serialized form.

Every recorded API call becomes one record in the ring store:

```text
+----------------+-------------+-----------+---------------------+---------+
| payload len u32| opcode u16  | 0u16      | payload             | padding |
+----------------+-------------+-----------+---------------------+---------+
```

All integers are little-endian.  Records are padded to [RECORD_ALIGN].  Variable-length
arguments (shader source, buffer contents, labels) are a `u32` length followed by the
bytes, and decode as borrows of the ring store, so executing a command never copies its
payload.
*/

use crate::fence::FenceId;
use crate::handle::{Buffer, Handle, Program, RenderTarget, SwapChain, Texture};
use crate::queue::Slice;
use crate::ring_store::{HEADER_SIZE, RECORD_ALIGN, RingStore, WRAP_MARKER, align_up};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TextureUsage {
    Sampled = 0,
    ColorAttachment = 1,
    DepthAttachment = 2,
}

impl TextureUsage {
    fn from_u32(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(TextureUsage::Sampled),
            1 => Ok(TextureUsage::ColorAttachment),
            2 => Ok(TextureUsage::DepthAttachment),
            _ => Err(DecodeError::InvalidValue {
                field: "TextureUsage",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub usage: TextureUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferUsage {
    Vertex = 0,
    Index = 1,
    Uniform = 2,
    Storage = 3,
}

impl BufferUsage {
    fn from_u32(value: u32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(BufferUsage::Vertex),
            1 => Ok(BufferUsage::Index),
            2 => Ok(BufferUsage::Uniform),
            3 => Ok(BufferUsage::Storage),
            _ => Err(DecodeError::InvalidValue {
                field: "BufferUsage",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsage,
}

/// Shader source is opaque to the stream; only the backend interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetDescriptor {
    pub color: Handle<Texture>,
    /// May be null.
    pub depth: Handle<Texture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainDescriptor {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawCall {
    pub program: Handle<Program>,
    pub target: Handle<RenderTarget>,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    CreateTexture = 1,
    DestroyTexture = 2,
    CreateBuffer = 3,
    DestroyBuffer = 4,
    UpdateBuffer = 5,
    CreateProgram = 6,
    DestroyProgram = 7,
    CreateRenderTarget = 8,
    DestroyRenderTarget = 9,
    CreateSwapChain = 10,
    DestroySwapChain = 11,
    BeginFrame = 12,
    EndFrame = 13,
    BindTexture = 14,
    BindBuffer = 15,
    Draw = 16,
    Fence = 17,
    Marker = 18,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            1 => CreateTexture,
            2 => DestroyTexture,
            3 => CreateBuffer,
            4 => DestroyBuffer,
            5 => UpdateBuffer,
            6 => CreateProgram,
            7 => DestroyProgram,
            8 => CreateRenderTarget,
            9 => DestroyRenderTarget,
            10 => CreateSwapChain,
            11 => DestroySwapChain,
            12 => BeginFrame,
            13 => EndFrame,
            14 => BindTexture,
            15 => BindBuffer,
            16 => Draw,
            17 => Fence,
            18 => Marker,
            _ => return None,
        })
    }
}

/// One recorded API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    CreateTexture {
        handle: Handle<Texture>,
        descriptor: TextureDescriptor,
    },
    DestroyTexture {
        handle: Handle<Texture>,
    },
    CreateBuffer {
        handle: Handle<Buffer>,
        descriptor: BufferDescriptor,
    },
    DestroyBuffer {
        handle: Handle<Buffer>,
    },
    UpdateBuffer {
        handle: Handle<Buffer>,
        offset: u64,
        data: &'a [u8],
    },
    CreateProgram {
        handle: Handle<Program>,
        descriptor: ProgramDescriptor<'a>,
    },
    DestroyProgram {
        handle: Handle<Program>,
    },
    CreateRenderTarget {
        handle: Handle<RenderTarget>,
        descriptor: RenderTargetDescriptor,
    },
    DestroyRenderTarget {
        handle: Handle<RenderTarget>,
    },
    CreateSwapChain {
        handle: Handle<SwapChain>,
        descriptor: SwapChainDescriptor,
    },
    DestroySwapChain {
        handle: Handle<SwapChain>,
    },
    BeginFrame {
        swap_chain: Handle<SwapChain>,
        frame_id: u64,
    },
    EndFrame {
        frame_id: u64,
    },
    BindTexture {
        slot: u32,
        texture: Handle<Texture>,
    },
    BindBuffer {
        slot: u32,
        buffer: Handle<Buffer>,
    },
    Draw(DrawCall),
    /// Waits for the backend to go idle, then signals the fence.
    Fence {
        fence: FenceId,
    },
    /// Debug marker; backends may forward it to a GPU debugger.
    Marker {
        id: u64,
        label: &'a str,
    },
}

trait Sink {
    fn put(&mut self, bytes: &[u8]);

    fn u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }
    fn u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }
    fn handle<T>(&mut self, handle: Handle<T>) {
        self.u64(handle.raw());
    }
    fn blob(&mut self, bytes: &[u8]) {
        let len = u32::try_from(bytes.len()).expect("command argument longer than u32::MAX");
        self.u32(len);
        self.put(bytes);
    }
}

struct Counter(usize);
impl Sink for Counter {
    fn put(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

struct Writer<'a> {
    out: &'a mut [u8],
    at: usize,
}
impl Sink for Writer<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.out[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }
}

struct Decoder<'a> {
    opcode: Opcode,
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.bytes.len() - self.at;
        if available < n {
            return Err(DecodeError::Truncated {
                opcode: self.opcode,
                needed: n,
                available,
            });
        }
        let bytes = self.bytes;
        let taken = &bytes[self.at..self.at + n];
        self.at += n;
        Ok(taken)
    }
    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }
    fn handle<T>(&mut self) -> Result<Handle<T>, DecodeError> {
        Ok(Handle::from_raw(self.u64()?))
    }
    fn blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }
    fn str(&mut self) -> Result<&'a str, DecodeError> {
        Ok(std::str::from_utf8(self.blob()?)?)
    }
    fn finish<T>(self, value: T) -> Result<T, DecodeError> {
        if self.at != self.bytes.len() {
            return Err(DecodeError::TrailingBytes {
                opcode: self.opcode,
                extra: self.bytes.len() - self.at,
            });
        }
        Ok(value)
    }
}

impl<'a> Command<'a> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::CreateTexture { .. } => Opcode::CreateTexture,
            Command::DestroyTexture { .. } => Opcode::DestroyTexture,
            Command::CreateBuffer { .. } => Opcode::CreateBuffer,
            Command::DestroyBuffer { .. } => Opcode::DestroyBuffer,
            Command::UpdateBuffer { .. } => Opcode::UpdateBuffer,
            Command::CreateProgram { .. } => Opcode::CreateProgram,
            Command::DestroyProgram { .. } => Opcode::DestroyProgram,
            Command::CreateRenderTarget { .. } => Opcode::CreateRenderTarget,
            Command::DestroyRenderTarget { .. } => Opcode::DestroyRenderTarget,
            Command::CreateSwapChain { .. } => Opcode::CreateSwapChain,
            Command::DestroySwapChain { .. } => Opcode::DestroySwapChain,
            Command::BeginFrame { .. } => Opcode::BeginFrame,
            Command::EndFrame { .. } => Opcode::EndFrame,
            Command::BindTexture { .. } => Opcode::BindTexture,
            Command::BindBuffer { .. } => Opcode::BindBuffer,
            Command::Draw(_) => Opcode::Draw,
            Command::Fence { .. } => Opcode::Fence,
            Command::Marker { .. } => Opcode::Marker,
        }
    }

    fn encode_payload<S: Sink>(&self, s: &mut S) {
        match *self {
            Command::CreateTexture { handle, descriptor } => {
                s.handle(handle);
                s.u32(descriptor.width);
                s.u32(descriptor.height);
                s.u32(descriptor.mip_levels);
                s.u32(descriptor.usage as u32);
            }
            Command::CreateBuffer { handle, descriptor } => {
                s.handle(handle);
                s.u64(descriptor.size);
                s.u32(descriptor.usage as u32);
            }
            Command::UpdateBuffer {
                handle,
                offset,
                data,
            } => {
                s.handle(handle);
                s.u64(offset);
                s.blob(data);
            }
            Command::CreateProgram { handle, descriptor } => {
                s.handle(handle);
                s.blob(descriptor.label.as_bytes());
                s.blob(descriptor.source);
            }
            Command::CreateRenderTarget { handle, descriptor } => {
                s.handle(handle);
                s.handle(descriptor.color);
                s.handle(descriptor.depth);
            }
            Command::CreateSwapChain { handle, descriptor } => {
                s.handle(handle);
                s.u32(descriptor.width);
                s.u32(descriptor.height);
            }
            Command::DestroyTexture { handle } => s.handle(handle),
            Command::DestroyBuffer { handle } => s.handle(handle),
            Command::DestroyProgram { handle } => s.handle(handle),
            Command::DestroyRenderTarget { handle } => s.handle(handle),
            Command::DestroySwapChain { handle } => s.handle(handle),
            Command::BeginFrame {
                swap_chain,
                frame_id,
            } => {
                s.handle(swap_chain);
                s.u64(frame_id);
            }
            Command::EndFrame { frame_id } => s.u64(frame_id),
            Command::BindTexture { slot, texture } => {
                s.u32(slot);
                s.handle(texture);
            }
            Command::BindBuffer { slot, buffer } => {
                s.u32(slot);
                s.handle(buffer);
            }
            Command::Draw(call) => {
                s.handle(call.program);
                s.handle(call.target);
                s.u32(call.first_vertex);
                s.u32(call.vertex_count);
                s.u32(call.instance_count);
            }
            Command::Fence { fence } => s.u64(fence.raw()),
            Command::Marker { id, label } => {
                s.u64(id);
                s.blob(label.as_bytes());
            }
        }
    }

    /// Size of the encoded arguments, excluding the record header.
    pub fn payload_len(&self) -> usize {
        let mut counter = Counter(0);
        self.encode_payload(&mut counter);
        counter.0
    }

    /// Size of the whole record in the ring store, header and alignment padding included.
    pub fn record_len(&self) -> usize {
        align_up(HEADER_SIZE + self.payload_len(), RECORD_ALIGN)
    }

    /**
    Writes the record into `out`, which must be exactly [Self::record_len] bytes.
    */
    pub fn encode_record(&self, out: &mut [u8]) {
        let payload_len = self.payload_len();
        assert_eq!(out.len(), align_up(HEADER_SIZE + payload_len, RECORD_ALIGN));
        let len = u32::try_from(payload_len)
            .ok()
            .filter(|len| *len != WRAP_MARKER)
            .expect("command payload too large to encode");
        out[0..4].copy_from_slice(&len.to_le_bytes());
        out[4..6].copy_from_slice(&(self.opcode() as u16).to_le_bytes());
        out[6..8].fill(0);
        let (payload, padding) = out[HEADER_SIZE..].split_at_mut(payload_len);
        let mut writer = Writer {
            out: payload,
            at: 0,
        };
        self.encode_payload(&mut writer);
        debug_assert_eq!(writer.at, payload_len);
        padding.fill(0);
    }

    /// Decodes the payload of a record with the given opcode.
    pub fn decode(opcode: u16, payload: &'a [u8]) -> Result<Self, DecodeError> {
        let opcode = Opcode::from_u16(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
        let mut d = Decoder {
            opcode,
            bytes: payload,
            at: 0,
        };
        let command = match opcode {
            Opcode::CreateTexture => Command::CreateTexture {
                handle: d.handle()?,
                descriptor: TextureDescriptor {
                    width: d.u32()?,
                    height: d.u32()?,
                    mip_levels: d.u32()?,
                    usage: TextureUsage::from_u32(d.u32()?)?,
                },
            },
            Opcode::DestroyTexture => Command::DestroyTexture {
                handle: d.handle()?,
            },
            Opcode::CreateBuffer => Command::CreateBuffer {
                handle: d.handle()?,
                descriptor: BufferDescriptor {
                    size: d.u64()?,
                    usage: BufferUsage::from_u32(d.u32()?)?,
                },
            },
            Opcode::DestroyBuffer => Command::DestroyBuffer {
                handle: d.handle()?,
            },
            Opcode::UpdateBuffer => Command::UpdateBuffer {
                handle: d.handle()?,
                offset: d.u64()?,
                data: d.blob()?,
            },
            Opcode::CreateProgram => Command::CreateProgram {
                handle: d.handle()?,
                descriptor: ProgramDescriptor {
                    label: d.str()?,
                    source: d.blob()?,
                },
            },
            Opcode::DestroyProgram => Command::DestroyProgram {
                handle: d.handle()?,
            },
            Opcode::CreateRenderTarget => Command::CreateRenderTarget {
                handle: d.handle()?,
                descriptor: RenderTargetDescriptor {
                    color: d.handle()?,
                    depth: d.handle()?,
                },
            },
            Opcode::DestroyRenderTarget => Command::DestroyRenderTarget {
                handle: d.handle()?,
            },
            Opcode::CreateSwapChain => Command::CreateSwapChain {
                handle: d.handle()?,
                descriptor: SwapChainDescriptor {
                    width: d.u32()?,
                    height: d.u32()?,
                },
            },
            Opcode::DestroySwapChain => Command::DestroySwapChain {
                handle: d.handle()?,
            },
            Opcode::BeginFrame => Command::BeginFrame {
                swap_chain: d.handle()?,
                frame_id: d.u64()?,
            },
            Opcode::EndFrame => Command::EndFrame {
                frame_id: d.u64()?,
            },
            Opcode::BindTexture => Command::BindTexture {
                slot: d.u32()?,
                texture: d.handle()?,
            },
            Opcode::BindBuffer => Command::BindBuffer {
                slot: d.u32()?,
                buffer: d.handle()?,
            },
            Opcode::Draw => Command::Draw(DrawCall {
                program: d.handle()?,
                target: d.handle()?,
                first_vertex: d.u32()?,
                vertex_count: d.u32()?,
                instance_count: d.u32()?,
            }),
            Opcode::Fence => Command::Fence {
                fence: FenceId::from_raw(d.u64()?),
            },
            Opcode::Marker => Command::Marker {
                id: d.u64()?,
                label: d.str()?,
            },
        };
        d.finish(command)
    }
}

/**
Iterator over the commands of a [Slice], in recording order.

Stops after the first error; a malformed record means the framing can't be trusted past it.
*/
#[derive(Debug)]
pub struct Commands<'a> {
    store: &'a RingStore,
    position: u64,
    end: u64,
    failed: bool,
}

impl<'a> Commands<'a> {
    pub(crate) fn new(slice: &'a Slice) -> Self {
        Commands {
            store: slice.store(),
            position: slice.begin(),
            end: slice.end(),
            failed: false,
        }
    }
}

impl<'a> Iterator for Commands<'a> {
    type Item = Result<Command<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.position < self.end {
            let remaining = self.store.contiguous_from(self.position);
            if remaining < HEADER_SIZE {
                self.position += remaining as u64;
                continue;
            }
            //safety: the slice we borrow owns [position, end) and nobody writes there while it lives
            let header = unsafe { self.store.region(self.position, HEADER_SIZE) };
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if len == WRAP_MARKER {
                self.position += remaining as u64;
                continue;
            }
            let opcode = u16::from_le_bytes([header[4], header[5]]);
            let total = align_up(HEADER_SIZE + len as usize, RECORD_ALIGN);
            if total > remaining || self.position + total as u64 > self.end {
                self.failed = true;
                return Some(Err(DecodeError::Framing {
                    offset: self.position,
                    len,
                }));
            }
            let payload = unsafe {
                self.store
                    .region(self.position + HEADER_SIZE as u64, len as usize)
            };
            self.position += total as u64;
            let decoded = Command::decode(opcode, payload);
            self.failed = decoded.is_err();
            return Some(decoded);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("{opcode:?} needs {needed} more bytes but only {available} remain")]
    Truncated {
        opcode: Opcode,
        needed: usize,
        available: usize,
    },
    #[error("{opcode:?} has {extra} unexpected trailing bytes")]
    TrailingBytes { opcode: Opcode, extra: usize },
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },
    #[error("string argument is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("record at offset {offset} with length {len} runs past its slice")]
    Framing { offset: u64, len: u32 },
}
