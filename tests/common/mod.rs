//! A driver that writes down what it was asked to do, for inspection from the test thread.
#![allow(dead_code)]

use command_stream::Driver;
use command_stream::command::{
    BufferDescriptor, DrawCall, ProgramDescriptor, RenderTargetDescriptor, SwapChainDescriptor,
    TextureDescriptor,
};
use command_stream::handle::{Buffer, Handle, Kind, Program, RenderTarget, SwapChain, Texture};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created(Kind, u64),
    Destroyed(Kind, u64),
    Updated { buffer: u64, offset: u64, data: Vec<u8> },
    BeginFrame(u64),
    EndFrame(u64),
    Bound(Kind, u32, u64),
    Draw { vertex_count: u32 },
    Marker(u64, String),
    Finish,
    Terminate,
}

#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn markers(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Marker(_, label) => Some(label),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

/// Records every call into a shared [Log].  Panics on the draw whose vertex count is
/// `panic_on_vertex_count`, if set.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub log: Log,
    pub panic_on_vertex_count: Option<u32>,
}

impl RecordingDriver {
    pub fn new() -> (Self, Log) {
        let driver = RecordingDriver::default();
        let log = driver.log.clone();
        (driver, log)
    }
}

impl Driver for RecordingDriver {
    fn create_texture(&mut self, handle: Handle<Texture>, _: &TextureDescriptor) {
        self.log.push(Event::Created(Kind::Texture, handle.raw()));
    }
    fn destroy_texture(&mut self, handle: Handle<Texture>) {
        self.log.push(Event::Destroyed(Kind::Texture, handle.raw()));
    }
    fn create_buffer(&mut self, handle: Handle<Buffer>, _: &BufferDescriptor) {
        self.log.push(Event::Created(Kind::Buffer, handle.raw()));
    }
    fn destroy_buffer(&mut self, handle: Handle<Buffer>) {
        self.log.push(Event::Destroyed(Kind::Buffer, handle.raw()));
    }
    fn update_buffer(&mut self, handle: Handle<Buffer>, offset: u64, data: &[u8]) {
        self.log.push(Event::Updated {
            buffer: handle.raw(),
            offset,
            data: data.to_vec(),
        });
    }
    fn create_program(&mut self, handle: Handle<Program>, _: &ProgramDescriptor<'_>) {
        self.log.push(Event::Created(Kind::Program, handle.raw()));
    }
    fn destroy_program(&mut self, handle: Handle<Program>) {
        self.log.push(Event::Destroyed(Kind::Program, handle.raw()));
    }
    fn create_render_target(&mut self, handle: Handle<RenderTarget>, _: &RenderTargetDescriptor) {
        self.log.push(Event::Created(Kind::RenderTarget, handle.raw()));
    }
    fn destroy_render_target(&mut self, handle: Handle<RenderTarget>) {
        self.log.push(Event::Destroyed(Kind::RenderTarget, handle.raw()));
    }
    fn create_swap_chain(&mut self, handle: Handle<SwapChain>, _: &SwapChainDescriptor) {
        self.log.push(Event::Created(Kind::SwapChain, handle.raw()));
    }
    fn destroy_swap_chain(&mut self, handle: Handle<SwapChain>) {
        self.log.push(Event::Destroyed(Kind::SwapChain, handle.raw()));
    }
    fn begin_frame(&mut self, _: Handle<SwapChain>, frame_id: u64) {
        self.log.push(Event::BeginFrame(frame_id));
    }
    fn end_frame(&mut self, frame_id: u64) {
        self.log.push(Event::EndFrame(frame_id));
    }
    fn bind_texture(&mut self, slot: u32, texture: Handle<Texture>) {
        self.log.push(Event::Bound(Kind::Texture, slot, texture.raw()));
    }
    fn bind_buffer(&mut self, slot: u32, buffer: Handle<Buffer>) {
        self.log.push(Event::Bound(Kind::Buffer, slot, buffer.raw()));
    }
    fn draw(&mut self, call: &DrawCall) {
        if self.panic_on_vertex_count == Some(call.vertex_count) {
            panic!("draw with {} vertices", call.vertex_count);
        }
        self.log.push(Event::Draw {
            vertex_count: call.vertex_count,
        });
    }
    fn marker(&mut self, id: u64, label: &str) {
        self.log.push(Event::Marker(id, label.to_owned()));
    }
    fn finish(&mut self) {
        self.log.push(Event::Finish);
    }
    fn terminate(&mut self) {
        self.log.push(Event::Terminate);
    }
}
