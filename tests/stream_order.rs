//! Commands reach the driver in recording order, across flushes and frames.

mod common;

use command_stream::command::{
    BufferDescriptor, BufferUsage, DrawCall, ProgramDescriptor, RenderTargetDescriptor,
    SwapChainDescriptor, TextureDescriptor, TextureUsage,
};
use command_stream::handle::{Buffer, Handle, Kind, Program, RenderTarget, SwapChain, Texture};
use command_stream::{CommandStream, FenceStatus, QueueConfig, StreamConfig};
use common::{Event, RecordingDriver};

fn small_config() -> StreamConfig {
    StreamConfig::new(QueueConfig::new(4096, 16384).unwrap()).with_thread_name("stream_order driver")
}

#[test]
fn markers_arrive_in_order() {
    let (driver, log) = RecordingDriver::new();
    let mut stream = CommandStream::with_driver(&small_config(), driver).unwrap();
    let mut expected = Vec::new();
    for i in 0..200 {
        let label = format!("marker {i}");
        stream.marker(&label);
        expected.push(label);
        if i % 13 == 0 {
            stream.flush();
        }
    }
    let done = stream.finish();
    assert_eq!(test_executors::sleep_on(done), FenceStatus::Signaled);
    assert_eq!(log.markers(), expected);
    stream.shutdown().unwrap();
    assert_eq!(log.events().last(), Some(&Event::Terminate));
}

#[test]
fn a_frame() {
    let (driver, log) = RecordingDriver::new();
    let mut stream = CommandStream::with_driver(&small_config(), driver).unwrap();
    let swap_chain = stream.create::<SwapChain>(SwapChainDescriptor {
        width: 320,
        height: 240,
    });
    let color = stream.create::<Texture>(TextureDescriptor {
        width: 320,
        height: 240,
        mip_levels: 1,
        usage: TextureUsage::ColorAttachment,
    });
    let target = stream.create::<RenderTarget>(RenderTargetDescriptor {
        color,
        depth: Handle::null(),
    });
    let program = stream.create::<Program>(ProgramDescriptor {
        label: "triangle",
        source: b"@vertex fn vs() {}",
    });
    let uniforms = stream.create::<Buffer>(BufferDescriptor {
        size: 16,
        usage: BufferUsage::Uniform,
    });

    let frame = stream.begin_frame(swap_chain);
    stream.update_buffer(uniforms, 0, &[1, 2, 3, 4]);
    stream.bind(0, uniforms);
    stream.bind(1, color);
    stream.draw(DrawCall {
        program,
        target,
        first_vertex: 0,
        vertex_count: 3,
        instance_count: 1,
    });
    stream.end_frame(frame);
    assert_eq!(
        test_executors::sleep_on(stream.finish()),
        FenceStatus::Signaled
    );

    assert_eq!(
        log.events(),
        vec![
            Event::Created(Kind::SwapChain, swap_chain.raw()),
            Event::Created(Kind::Texture, color.raw()),
            Event::Created(Kind::RenderTarget, target.raw()),
            Event::Created(Kind::Program, program.raw()),
            Event::Created(Kind::Buffer, uniforms.raw()),
            Event::BeginFrame(frame),
            Event::Updated {
                buffer: uniforms.raw(),
                offset: 0,
                data: vec![1, 2, 3, 4],
            },
            Event::Bound(Kind::Buffer, 0, uniforms.raw()),
            Event::Bound(Kind::Texture, 1, color.raw()),
            Event::Draw { vertex_count: 3 },
            Event::EndFrame(frame),
            Event::Finish,
        ]
    );
}

#[test]
fn destroyed_ids_are_reused_with_a_new_generation() {
    let (driver, log) = RecordingDriver::new();
    let mut stream = CommandStream::with_driver(&small_config(), driver).unwrap();
    let descriptor = BufferDescriptor {
        size: 4,
        usage: BufferUsage::Storage,
    };
    let first = stream.create::<Buffer>(descriptor);
    stream.destroy(first);
    //the destroy hasn't executed yet, so the id is still taken
    let second = stream.create::<Buffer>(descriptor);
    assert_ne!(first.index(), second.index());

    test_executors::sleep_on(stream.finish());
    assert_eq!(stream.handles().live_count(Kind::Buffer), 1);
    let third = stream.create::<Buffer>(descriptor);
    assert_eq!(third.index(), first.index());
    assert_eq!(third.generation(), first.generation() + 1);
    assert_ne!(third, first);
    test_executors::sleep_on(stream.finish());
    assert!(log.events().contains(&Event::Created(Kind::Buffer, third.raw())));
}

#[test]
fn nop_backend_validates_a_clean_stream() {
    let mut stream = CommandStream::new(&StreamConfig::default()).unwrap();
    let texture = stream.create::<Texture>(TextureDescriptor {
        width: 1,
        height: 1,
        mip_levels: 1,
        usage: TextureUsage::Sampled,
    });
    stream.bind(0, texture);
    stream.destroy(texture);
    assert_eq!(
        test_executors::sleep_on(stream.finish()),
        FenceStatus::Signaled
    );
    assert_eq!(stream.handles().live_count(Kind::Texture), 0);
    stream.shutdown().unwrap();
}
