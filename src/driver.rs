// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The backend seam.

A [Driver] is the code that turns decoded commands into real work on the driver thread.
It owns whatever native state the backend needs, keyed by the [Handle]s the recording
thread allocated.  Drivers only ever run on the thread that owns the
[crate::executor::CommandExecutor], so they need to be [Send] but not [Sync].
*/

use crate::command::{
    BufferDescriptor, Command, DrawCall, ProgramDescriptor, RenderTargetDescriptor,
    SwapChainDescriptor, TextureDescriptor,
};
use crate::handle::{Buffer, Handle, Program, RenderTarget, SwapChain, Texture};

/// Executes commands on the driver thread.
pub trait Driver: Send {
    fn create_texture(&mut self, handle: Handle<Texture>, descriptor: &TextureDescriptor);
    fn destroy_texture(&mut self, handle: Handle<Texture>);
    fn create_buffer(&mut self, handle: Handle<Buffer>, descriptor: &BufferDescriptor);
    fn destroy_buffer(&mut self, handle: Handle<Buffer>);
    fn update_buffer(&mut self, handle: Handle<Buffer>, offset: u64, data: &[u8]);
    fn create_program(&mut self, handle: Handle<Program>, descriptor: &ProgramDescriptor<'_>);
    fn destroy_program(&mut self, handle: Handle<Program>);
    fn create_render_target(
        &mut self,
        handle: Handle<RenderTarget>,
        descriptor: &RenderTargetDescriptor,
    );
    fn destroy_render_target(&mut self, handle: Handle<RenderTarget>);
    fn create_swap_chain(&mut self, handle: Handle<SwapChain>, descriptor: &SwapChainDescriptor);
    fn destroy_swap_chain(&mut self, handle: Handle<SwapChain>);
    fn begin_frame(&mut self, swap_chain: Handle<SwapChain>, frame_id: u64);
    fn end_frame(&mut self, frame_id: u64);
    fn bind_texture(&mut self, slot: u32, texture: Handle<Texture>);
    fn bind_buffer(&mut self, slot: u32, buffer: Handle<Buffer>);
    fn draw(&mut self, call: &DrawCall);

    /// Debug marker.  Ignored unless the backend has somewhere to send it.
    fn marker(&mut self, _id: u64, _label: &str) {}

    /// Blocks until all submitted work is complete.
    fn finish(&mut self);

    /// Called once after the last command, on the driver thread.
    fn terminate(&mut self) {}

    /**
    Dispatches one command to the matching method.

    [Command::Fence] calls [Self::finish]; signaling the fence is the executor's job.
    */
    fn execute(&mut self, command: &Command<'_>) {
        dispatch(self, command)
    }
}

pub(crate) fn dispatch<D: Driver + ?Sized>(driver: &mut D, command: &Command<'_>) {
    match *command {
        Command::CreateTexture { handle, descriptor } => driver.create_texture(handle, &descriptor),
        Command::DestroyTexture { handle } => driver.destroy_texture(handle),
        Command::CreateBuffer { handle, descriptor } => driver.create_buffer(handle, &descriptor),
        Command::DestroyBuffer { handle } => driver.destroy_buffer(handle),
        Command::UpdateBuffer {
            handle,
            offset,
            data,
        } => driver.update_buffer(handle, offset, data),
        Command::CreateProgram { handle, descriptor } => driver.create_program(handle, &descriptor),
        Command::DestroyProgram { handle } => driver.destroy_program(handle),
        Command::CreateRenderTarget { handle, descriptor } => {
            driver.create_render_target(handle, &descriptor)
        }
        Command::DestroyRenderTarget { handle } => driver.destroy_render_target(handle),
        Command::CreateSwapChain { handle, descriptor } => {
            driver.create_swap_chain(handle, &descriptor)
        }
        Command::DestroySwapChain { handle } => driver.destroy_swap_chain(handle),
        Command::BeginFrame {
            swap_chain,
            frame_id,
        } => driver.begin_frame(swap_chain, frame_id),
        Command::EndFrame { frame_id } => driver.end_frame(frame_id),
        Command::BindTexture { slot, texture } => driver.bind_texture(slot, texture),
        Command::BindBuffer { slot, buffer } => driver.bind_buffer(slot, buffer),
        Command::Draw(call) => driver.draw(&call),
        Command::Fence { .. } => driver.finish(),
        Command::Marker { id, label } => driver.marker(id, label),
    }
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn create_texture(&mut self, handle: Handle<Texture>, descriptor: &TextureDescriptor) {
        (**self).create_texture(handle, descriptor)
    }
    fn destroy_texture(&mut self, handle: Handle<Texture>) {
        (**self).destroy_texture(handle)
    }
    fn create_buffer(&mut self, handle: Handle<Buffer>, descriptor: &BufferDescriptor) {
        (**self).create_buffer(handle, descriptor)
    }
    fn destroy_buffer(&mut self, handle: Handle<Buffer>) {
        (**self).destroy_buffer(handle)
    }
    fn update_buffer(&mut self, handle: Handle<Buffer>, offset: u64, data: &[u8]) {
        (**self).update_buffer(handle, offset, data)
    }
    fn create_program(&mut self, handle: Handle<Program>, descriptor: &ProgramDescriptor<'_>) {
        (**self).create_program(handle, descriptor)
    }
    fn destroy_program(&mut self, handle: Handle<Program>) {
        (**self).destroy_program(handle)
    }
    fn create_render_target(
        &mut self,
        handle: Handle<RenderTarget>,
        descriptor: &RenderTargetDescriptor,
    ) {
        (**self).create_render_target(handle, descriptor)
    }
    fn destroy_render_target(&mut self, handle: Handle<RenderTarget>) {
        (**self).destroy_render_target(handle)
    }
    fn create_swap_chain(&mut self, handle: Handle<SwapChain>, descriptor: &SwapChainDescriptor) {
        (**self).create_swap_chain(handle, descriptor)
    }
    fn destroy_swap_chain(&mut self, handle: Handle<SwapChain>) {
        (**self).destroy_swap_chain(handle)
    }
    fn begin_frame(&mut self, swap_chain: Handle<SwapChain>, frame_id: u64) {
        (**self).begin_frame(swap_chain, frame_id)
    }
    fn end_frame(&mut self, frame_id: u64) {
        (**self).end_frame(frame_id)
    }
    fn bind_texture(&mut self, slot: u32, texture: Handle<Texture>) {
        (**self).bind_texture(slot, texture)
    }
    fn bind_buffer(&mut self, slot: u32, buffer: Handle<Buffer>) {
        (**self).bind_buffer(slot, buffer)
    }
    fn draw(&mut self, call: &DrawCall) {
        (**self).draw(call)
    }
    fn marker(&mut self, id: u64, label: &str) {
        (**self).marker(id, label)
    }
    fn finish(&mut self) {
        (**self).finish()
    }
    fn terminate(&mut self) {
        (**self).terminate()
    }
    fn execute(&mut self, command: &Command<'_>) {
        (**self).execute(command)
    }
}
