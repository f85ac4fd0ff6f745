// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A backend that renders nothing.

It still keeps a table of every live resource, so it catches the mistakes a real
backend would trip over: using a handle before it is created, after it is destroyed, or
from a previous generation; drawing outside a frame; mismatched frame ids.  Violations
are logged and counted rather than panicking, which makes it useful for tests.
*/

use crate::command::{
    BufferDescriptor, Command, DrawCall, ProgramDescriptor, RenderTargetDescriptor, SwapChainDescriptor,
    TextureDescriptor,
};
use crate::driver::{Driver, dispatch};
use crate::handle::{
    Buffer, Handle, HandleError, Kind, Program, RenderTarget, ResourceTable, SwapChain, Texture,
};

#[derive(Debug, Default)]
pub struct NopDriver {
    textures: ResourceTable<Texture, TextureDescriptor>,
    //size of each buffer
    buffers: ResourceTable<Buffer, u64>,
    //label of each program
    programs: ResourceTable<Program, String>,
    render_targets: ResourceTable<RenderTarget, RenderTargetDescriptor>,
    swap_chains: ResourceTable<SwapChain, SwapChainDescriptor>,
    current_frame: Option<u64>,
    executed: u64,
    frames: u64,
    draws: u64,
    bytes_uploaded: u64,
    errors: u64,
    finished: u64,
    terminated: bool,
}

impl NopDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands dispatched through [Driver::execute].
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Number of validation failures seen so far.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Number of frames ended.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// Number of times [Driver::finish] was called.
    pub fn finished(&self) -> u64 {
        self.finished
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Resources of `kind` currently live in the backend.
    pub fn live(&self, kind: Kind) -> usize {
        match kind {
            Kind::Texture => self.textures.len(),
            Kind::Buffer => self.buffers.len(),
            Kind::Program => self.programs.len(),
            Kind::RenderTarget => self.render_targets.len(),
            Kind::SwapChain => self.swap_chains.len(),
        }
    }

    fn check<T>(&mut self, operation: &'static str, result: Result<T, HandleError>) -> Option<T> {
        match result {
            Ok(t) => Some(t),
            Err(e) => {
                self.violation(operation, &e);
                None
            }
        }
    }

    fn violation(&mut self, operation: &'static str, error: &dyn std::fmt::Debug) {
        self.errors += 1;
        logwise::error_sync!(
            "NopDriver: {operation} failed: {error}",
            operation = operation,
            error = logwise::privacy::LogIt(&error)
        );
    }
}

impl Driver for NopDriver {
    fn create_texture(&mut self, handle: Handle<Texture>, descriptor: &TextureDescriptor) {
        let r = self.textures.insert(handle, *descriptor);
        self.check("create_texture", r);
    }

    fn destroy_texture(&mut self, handle: Handle<Texture>) {
        let r = self.textures.remove(handle);
        self.check("destroy_texture", r);
    }

    fn create_buffer(&mut self, handle: Handle<Buffer>, descriptor: &BufferDescriptor) {
        let r = self.buffers.insert(handle, descriptor.size);
        self.check("create_buffer", r);
    }

    fn destroy_buffer(&mut self, handle: Handle<Buffer>) {
        let r = self.buffers.remove(handle);
        self.check("destroy_buffer", r);
    }

    fn update_buffer(&mut self, handle: Handle<Buffer>, offset: u64, data: &[u8]) {
        let r = self.buffers.get(handle).copied();
        let Some(size) = self.check("update_buffer", r) else {
            return;
        };
        let end = offset.saturating_add(data.len() as u64);
        if end > size {
            self.violation("update_buffer", &format!("write to {end} past buffer of {size} bytes"));
            return;
        }
        self.bytes_uploaded += data.len() as u64;
    }

    fn create_program(&mut self, handle: Handle<Program>, descriptor: &ProgramDescriptor<'_>) {
        let r = self.programs.insert(handle, descriptor.label.to_owned());
        self.check("create_program", r);
    }

    fn destroy_program(&mut self, handle: Handle<Program>) {
        let r = self.programs.remove(handle);
        self.check("destroy_program", r);
    }

    fn create_render_target(
        &mut self,
        handle: Handle<RenderTarget>,
        descriptor: &RenderTargetDescriptor,
    ) {
        let color = self.textures.get(descriptor.color).map(|_| ());
        if self.check("create_render_target color", color).is_none() {
            return;
        }
        if !descriptor.depth.is_null() {
            let depth = self.textures.get(descriptor.depth).map(|_| ());
            if self.check("create_render_target depth", depth).is_none() {
                return;
            }
        }
        let r = self.render_targets.insert(handle, *descriptor);
        self.check("create_render_target", r);
    }

    fn destroy_render_target(&mut self, handle: Handle<RenderTarget>) {
        let r = self.render_targets.remove(handle);
        self.check("destroy_render_target", r);
    }

    fn create_swap_chain(&mut self, handle: Handle<SwapChain>, descriptor: &SwapChainDescriptor) {
        let r = self.swap_chains.insert(handle, *descriptor);
        self.check("create_swap_chain", r);
    }

    fn destroy_swap_chain(&mut self, handle: Handle<SwapChain>) {
        let r = self.swap_chains.remove(handle);
        self.check("destroy_swap_chain", r);
    }

    fn begin_frame(&mut self, swap_chain: Handle<SwapChain>, frame_id: u64) {
        let r = self.swap_chains.get(swap_chain).map(|_| ());
        self.check("begin_frame", r);
        if let Some(open) = self.current_frame {
            self.violation("begin_frame", &format!("frame {open} is still open"));
        }
        self.current_frame = Some(frame_id);
    }

    fn end_frame(&mut self, frame_id: u64) {
        match self.current_frame.take() {
            Some(open) if open == frame_id => {}
            Some(open) => {
                self.violation("end_frame", &format!("ending {frame_id} but {open} is open"));
            }
            None => self.violation("end_frame", &format!("frame {frame_id} was never begun")),
        }
        self.frames += 1;
    }

    fn bind_texture(&mut self, _slot: u32, texture: Handle<Texture>) {
        let r = self.textures.get(texture).map(|_| ());
        self.check("bind_texture", r);
    }

    fn bind_buffer(&mut self, _slot: u32, buffer: Handle<Buffer>) {
        let r = self.buffers.get(buffer).map(|_| ());
        self.check("bind_buffer", r);
    }

    fn draw(&mut self, call: &DrawCall) {
        let program = self.programs.get(call.program).map(|_| ());
        self.check("draw program", program);
        let target = self.render_targets.get(call.target).map(|_| ());
        self.check("draw target", target);
        if self.current_frame.is_none() {
            self.violation("draw", &"draw outside a frame");
        }
        self.draws += 1;
    }

    fn marker(&mut self, id: u64, label: &str) {
        logwise::trace_sync!(
            "NopDriver marker {id}: {label}",
            id = id,
            label = logwise::privacy::LogIt(&label)
        );
    }

    fn finish(&mut self) {
        self.finished += 1;
    }

    fn execute(&mut self, command: &Command<'_>) {
        self.executed += 1;
        dispatch(self, command)
    }

    fn terminate(&mut self) {
        let leaked: usize = Kind::ALL.iter().map(|kind| self.live(*kind)).sum();
        if leaked > 0 {
            logwise::warn_sync!(
                "NopDriver terminating with {leaked} live resources",
                leaked = leaked
            );
        }
        self.terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BufferUsage, TextureUsage};
    use crate::handle::HandleAllocator;

    fn texture_descriptor() -> TextureDescriptor {
        TextureDescriptor {
            width: 8,
            height: 8,
            mip_levels: 1,
            usage: TextureUsage::ColorAttachment,
        }
    }

    #[test]
    fn valid_lifecycle_has_no_errors() {
        let handles = HandleAllocator::new();
        let mut driver = NopDriver::new();
        let color = handles.allocate::<Texture>();
        let target = handles.allocate::<RenderTarget>();
        let program = handles.allocate::<Program>();
        let swap_chain = handles.allocate::<SwapChain>();
        driver.create_texture(color, &texture_descriptor());
        driver.create_render_target(
            target,
            &RenderTargetDescriptor {
                color,
                depth: Handle::null(),
            },
        );
        driver.create_program(
            program,
            &ProgramDescriptor {
                label: "p",
                source: b"",
            },
        );
        driver.create_swap_chain(
            swap_chain,
            &SwapChainDescriptor {
                width: 8,
                height: 8,
            },
        );
        driver.begin_frame(swap_chain, 0);
        driver.draw(&DrawCall {
            program,
            target,
            first_vertex: 0,
            vertex_count: 3,
            instance_count: 1,
        });
        driver.end_frame(0);
        assert_eq!(driver.errors(), 0);
        assert_eq!(driver.frames(), 1);
        assert_eq!(driver.draws(), 1);
        assert_eq!(driver.live(Kind::Texture), 1);
    }

    #[test]
    fn use_after_destroy_is_counted() {
        let handles = HandleAllocator::new();
        let mut driver = NopDriver::new();
        let buffer = handles.allocate::<Buffer>();
        driver.create_buffer(
            buffer,
            &BufferDescriptor {
                size: 16,
                usage: BufferUsage::Uniform,
            },
        );
        driver.update_buffer(buffer, 0, &[0; 16]);
        assert_eq!(driver.bytes_uploaded(), 16);
        driver.update_buffer(buffer, 8, &[0; 16]);
        assert_eq!(driver.errors(), 1);
        driver.destroy_buffer(buffer);
        driver.bind_buffer(0, buffer);
        assert_eq!(driver.errors(), 2);
    }

    #[test]
    fn frames_must_pair() {
        let mut driver = NopDriver::new();
        driver.end_frame(3);
        assert_eq!(driver.errors(), 1);
    }
}
