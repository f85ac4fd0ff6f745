// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred resource handles.
//!
//! A [Handle] names a backend resource that may not exist yet.  Its id is handed out
//! synchronously on the recording thread when the create command is *recorded*, so it
//! can be used as an argument to later commands right away.  The backend object only
//! comes into existence when the driver thread executes that create command.
//!
//! # Id reuse
//!
//! A handle's slot goes back on the free list only after the driver thread has executed
//! the matching destroy command ([HandleAllocator::retire]).  Since create and destroy for
//! one id are recorded, and therefore executed, in order, a new `create` can never alias a
//! resource the driver still considers live.
//!
//! Every reuse bumps the slot's generation.  The raw id packs `(generation << 32) | index`
//! with indices starting at 1, so raw id 0 is reserved for [Handle::null] and a stale copy
//! of an old handle never compares equal to the new one.

use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::command::{
    BufferDescriptor, Command, ProgramDescriptor, RenderTargetDescriptor, SwapChainDescriptor,
    TextureDescriptor,
};

/// Runtime tag for each resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Texture = 0,
    Buffer = 1,
    Program = 2,
    RenderTarget = 3,
    SwapChain = 4,
}

impl Kind {
    pub const COUNT: usize = 5;
    pub const ALL: [Kind; Kind::COUNT] = [
        Kind::Texture,
        Kind::Buffer,
        Kind::Program,
        Kind::RenderTarget,
        Kind::SwapChain,
    ];
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// A kind of backend resource.  Implemented by the marker types in this module.
pub trait ResourceKind: sealed::Sealed + Sized + 'static {
    const KIND: Kind;
}

/// Kinds that can be created by recording a command.
pub trait Creatable: ResourceKind {
    type Descriptor<'a>;
    fn create_command<'a>(handle: Handle<Self>, descriptor: Self::Descriptor<'a>) -> Command<'a>;
}

/// Kinds that can be destroyed by recording a command.
pub trait Destroyable: ResourceKind {
    fn destroy_command(handle: Handle<Self>) -> Command<'static>;
}

/// Kinds that can be bound to a slot for subsequent draws.
pub trait Bindable: ResourceKind {
    fn bind_command(slot: u32, handle: Handle<Self>) -> Command<'static>;
}

macro_rules! resource_kind {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $name {}
        impl sealed::Sealed for $name {}
        impl ResourceKind for $name {
            const KIND: Kind = Kind::$name;
        }
    };
}

resource_kind!(
    /// A sampled or attachable image.
    Texture
);
resource_kind!(
    /// Linear GPU memory.
    Buffer
);
resource_kind!(
    /// A compiled shader program.
    Program
);
resource_kind!(
    /// A set of attachments draws render into.
    RenderTarget
);
resource_kind!(
    /// A presentable surface.
    SwapChain
);

impl Creatable for Texture {
    type Descriptor<'a> = TextureDescriptor;
    fn create_command<'a>(handle: Handle<Self>, descriptor: Self::Descriptor<'a>) -> Command<'a> {
        Command::CreateTexture { handle, descriptor }
    }
}
impl Creatable for Buffer {
    type Descriptor<'a> = BufferDescriptor;
    fn create_command<'a>(handle: Handle<Self>, descriptor: Self::Descriptor<'a>) -> Command<'a> {
        Command::CreateBuffer { handle, descriptor }
    }
}
impl Creatable for Program {
    type Descriptor<'a> = ProgramDescriptor<'a>;
    fn create_command<'a>(handle: Handle<Self>, descriptor: Self::Descriptor<'a>) -> Command<'a> {
        Command::CreateProgram { handle, descriptor }
    }
}
impl Creatable for RenderTarget {
    type Descriptor<'a> = RenderTargetDescriptor;
    fn create_command<'a>(
        handle: Handle<Self>,
        descriptor: Self::Descriptor<'a>,
    ) -> Command<'a> {
        Command::CreateRenderTarget { handle, descriptor }
    }
}
impl Creatable for SwapChain {
    type Descriptor<'a> = SwapChainDescriptor;
    fn create_command<'a>(handle: Handle<Self>, descriptor: Self::Descriptor<'a>) -> Command<'a> {
        Command::CreateSwapChain { handle, descriptor }
    }
}

impl Destroyable for Texture {
    fn destroy_command(handle: Handle<Self>) -> Command<'static> {
        Command::DestroyTexture { handle }
    }
}
impl Destroyable for Buffer {
    fn destroy_command(handle: Handle<Self>) -> Command<'static> {
        Command::DestroyBuffer { handle }
    }
}
impl Destroyable for Program {
    fn destroy_command(handle: Handle<Self>) -> Command<'static> {
        Command::DestroyProgram { handle }
    }
}
impl Destroyable for RenderTarget {
    fn destroy_command(handle: Handle<Self>) -> Command<'static> {
        Command::DestroyRenderTarget { handle }
    }
}
impl Destroyable for SwapChain {
    fn destroy_command(handle: Handle<Self>) -> Command<'static> {
        Command::DestroySwapChain { handle }
    }
}

impl Bindable for Texture {
    fn bind_command(slot: u32, handle: Handle<Self>) -> Command<'static> {
        Command::BindTexture {
            slot,
            texture: handle,
        }
    }
}
impl Bindable for Buffer {
    fn bind_command(slot: u32, handle: Handle<Self>) -> Command<'static> {
        Command::BindBuffer {
            slot,
            buffer: handle,
        }
    }
}

/**
An opaque reference to a backend resource of kind `T`.

Handles are only meaningful to the stream (and driver) that issued them.
*/
pub struct Handle<T> {
    raw: u64,
    //fn() -> T keeps the handle Send + Sync whatever T is
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The null handle.  Never aliases a live resource.
    pub const fn null() -> Self {
        Handle {
            raw: 0,
            _kind: PhantomData,
        }
    }

    pub(crate) const fn from_parts(index: u32, generation: u32) -> Self {
        Handle {
            raw: ((generation as u64) << 32) | index as u64,
            _kind: PhantomData,
        }
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Handle {
            raw,
            _kind: PhantomData,
        }
    }

    pub const fn raw(&self) -> u64 {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Slot index, starting at 1.
    pub const fn index(&self) -> u32 {
        self.raw as u32
    }

    pub const fn generation(&self) -> u32 {
        (self.raw >> 32) as u32
    }
}

//manual impls so that T needn't implement anything
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state)
    }
}
impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}
impl<T: ResourceKind> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Handle<{:?}>(null)", T::KIND)
        } else {
            write!(
                f,
                "Handle<{:?}>({}v{})",
                T::KIND,
                self.index(),
                self.generation()
            )
        }
    }
}

#[derive(Debug, Default)]
struct KindTable {
    //generation of each slot, indexed by index - 1
    generations: Vec<u32>,
    live: Vec<bool>,
    free: std::collections::VecDeque<u32>,
}

impl KindTable {
    fn allocate(&mut self) -> (u32, u32) {
        let index = match self.free.pop_front() {
            Some(index) => index,
            None => {
                self.generations.push(0);
                self.live.push(false);
                u32::try_from(self.generations.len()).expect("handle index space exhausted")
            }
        };
        let slot = index as usize - 1;
        self.live[slot] = true;
        (index, self.generations[slot])
    }

    fn retire(&mut self, kind: Kind, index: u32, generation: u32) -> Result<(), HandleError> {
        let slot = (index as usize)
            .checked_sub(1)
            .filter(|slot| *slot < self.generations.len())
            .ok_or(HandleError::Unknown { kind, index })?;
        if self.generations[slot] != generation {
            return Err(HandleError::Stale {
                kind,
                index,
                expected: self.generations[slot],
                found: generation,
            });
        }
        if !self.live[slot] {
            return Err(HandleError::NotLive { kind, index });
        }
        self.live[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push_back(index);
        Ok(())
    }

    fn live_count(&self) -> usize {
        self.live.iter().filter(|l| **l).count()
    }
}

/**
Issues handle ids, one id space per [Kind].

Shared between the recording thread, which allocates, and the driver thread, which
retires ids after executing destroy commands.
*/
#[derive(Debug)]
pub struct HandleAllocator {
    tables: wasm_safe_mutex::Mutex<[KindTable; Kind::COUNT]>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        HandleAllocator {
            tables: wasm_safe_mutex::Mutex::new(Default::default()),
        }
    }

    pub fn allocate<T: ResourceKind>(&self) -> Handle<T> {
        let (index, generation) = self.tables.lock_sync()[T::KIND as usize].allocate();
        Handle::from_parts(index, generation)
    }

    /// Returns the handle's slot to the free list.  Called once the destroy command executed.
    pub fn retire<T: ResourceKind>(&self, handle: Handle<T>) -> Result<(), HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null { kind: T::KIND });
        }
        self.tables.lock_sync()[T::KIND as usize].retire(
            T::KIND,
            handle.index(),
            handle.generation(),
        )
    }

    /// Number of handles of `kind` allocated and not yet retired.
    pub fn live_count(&self, kind: Kind) -> usize {
        self.tables.lock_sync()[kind as usize].live_count()
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/**
A backend-side slot table from handles to backend objects.

Lookups check the generation, so a stale handle (one whose slot was destroyed and
reused) is reported rather than silently resolving to the new occupant.
*/
pub struct ResourceTable<T, V> {
    slots: Vec<Option<(u32, V)>>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: ResourceKind, V: Debug> Debug for ResourceTable<T, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTable")
            .field("kind", &T::KIND)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: ResourceKind, V> ResourceTable<T, V> {
    pub fn new() -> Self {
        ResourceTable {
            slots: Vec::new(),
            _kind: PhantomData,
        }
    }

    fn slot(handle: Handle<T>) -> Result<usize, HandleError> {
        if handle.is_null() {
            Err(HandleError::Null { kind: T::KIND })
        } else if handle.index() == 0 {
            Err(HandleError::Unknown {
                kind: T::KIND,
                index: 0,
            })
        } else {
            Ok(handle.index() as usize - 1)
        }
    }

    pub fn insert(&mut self, handle: Handle<T>, value: V) -> Result<(), HandleError> {
        let slot = Self::slot(handle)?;
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        if self.slots[slot].is_some() {
            return Err(HandleError::AlreadyLive {
                kind: T::KIND,
                index: handle.index(),
            });
        }
        self.slots[slot] = Some((handle.generation(), value));
        Ok(())
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&V, HandleError> {
        let slot = Self::slot(handle)?;
        match self.slots.get(slot) {
            Some(Some((generation, value))) if *generation == handle.generation() => Ok(value),
            Some(Some((generation, _))) => Err(HandleError::Stale {
                kind: T::KIND,
                index: handle.index(),
                expected: *generation,
                found: handle.generation(),
            }),
            _ => Err(HandleError::NotLive {
                kind: T::KIND,
                index: handle.index(),
            }),
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut V, HandleError> {
        //validate first to share the error reporting with get
        self.get(handle)?;
        let slot = Self::slot(handle)?;
        match self.slots[slot].as_mut() {
            Some((_, value)) => Ok(value),
            None => unreachable!("validated above"),
        }
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Result<V, HandleError> {
        self.get(handle)?;
        let slot = Self::slot(handle)?;
        match self.slots[slot].take() {
            Some((_, value)) => Ok(value),
            None => unreachable!("validated above"),
        }
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ResourceKind, V> Default for ResourceTable<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HandleError {
    #[error("null {kind:?} handle")]
    Null { kind: Kind },
    #[error("{kind:?} {index} was never allocated")]
    Unknown { kind: Kind, index: u32 },
    #[error("{kind:?} {index} is not live")]
    NotLive { kind: Kind, index: u32 },
    #[error("{kind:?} {index} is already live")]
    AlreadyLive { kind: Kind, index: u32 },
    #[error("{kind:?} {index} is stale: slot is at generation {expected}, handle has {found}")]
    Stale {
        kind: Kind,
        index: u32,
        expected: u32,
        found: u32,
    },
}
