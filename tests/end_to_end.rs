use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use half::f16;

use depthlink::capture::frame::{FrameShape, PixelFormat};
use depthlink::capture::{DepthFrame, SyntheticSensor};
use depthlink::codec::{CodecAlgorithm, DecodeOutcome, DepthCodec, DepthRange, DepthTranscoder};
use depthlink::device::VirtualCamera;
use depthlink::error::WireError;
use depthlink::pipeline::heartbeat::poll_once;
use depthlink::pipeline::{
    ControlSurface, FrameOrigin, FrameQueue, FrameSink, QueueEntry, SinkStatus, StreamScheduler,
    TickOutcome,
};
use depthlink::wire::{FrameFramer, FrameHeader, FrameReceiver};
use depthlink::{FrameSlot, PixelBuffer, WireConfig};

#[test]
fn test_packed_depth_survives_the_wire() {
    let range = DepthRange::new(0.0, 6.0).unwrap();
    let codec = DepthCodec::new(CodecAlgorithm::Packed, range);
    let mut sensor = SyntheticSensor::new(64, 48, 0.3, 5.0);
    let depth = sensor.render(1.0).clone();

    let mut sender = DepthTranscoder::new();
    let encoded = sender.encode(&depth, &codec).unwrap();
    let message = FrameFramer::default().serialize_buffer(&encoded).unwrap();

    let slot = Arc::new(FrameSlot::new());
    let (mut receiver, ready_rx) = FrameReceiver::new(&WireConfig::default(), slot.clone());
    receiver.receive(&message).unwrap();
    let ready = ready_rx.try_recv().unwrap();

    let mut decoder = DepthTranscoder::new();
    let (decoded, outcome) = decoder.decode(&ready.buffer, &codec).unwrap();
    assert_eq!(outcome, DecodeOutcome::Decoded);

    let step = range.packed_step();
    for y in 0..depth.height {
        for x in 0..depth.width {
            let sent = depth.get(x, y).unwrap().to_f32();
            let back = decoded.get(x, y).unwrap().to_f32();
            // dropouts and out-of-range returns arrive as the minimum
            let expected = if sent.is_finite() && sent <= range.max() { sent } else { range.min() };
            assert!((back - expected).abs() <= step, "({}, {}): {} -> {}", x, y, expected, back);
        }
    }
}

#[test]
fn test_nan_encodes_like_min() {
    let codec = DepthCodec::new(CodecAlgorithm::Hue, DepthRange::new(0.0, 6.0).unwrap());
    let nan = codec.encode(&DepthFrame::filled(2, 2, f32::NAN)).unwrap();
    let zero = codec.encode(&DepthFrame::filled(2, 2, 0.0)).unwrap();
    assert_eq!(nan.data, zero.data);
}

#[test]
fn test_hue_midpoint_bytes() {
    let codec = DepthCodec::new(CodecAlgorithm::Hue, DepthRange::new(0.0, 6.0).unwrap());
    let frame = DepthFrame::from_samples(1, 1, vec![f16::from_f32(3.0)]).unwrap();
    assert_eq!(codec.encode(&frame).unwrap().pixel(0, 0), Some([255, 255, 0, 255]));
}

#[test]
fn test_truncated_message_rejected() {
    let slot = Arc::new(FrameSlot::new());
    let (mut receiver, _ready_rx) = FrameReceiver::new(&WireConfig::default(), slot.clone());

    let shape = FrameShape::packed(10, 10, PixelFormat::Bgra32);
    let full = FrameFramer::default().serialize(&shape, &[1u8; 400]).unwrap();
    receiver.receive(&full).unwrap();

    // declare 10x10 at 40 bytes per row but carry 24 bytes of pixels
    let mut block = FrameHeader::from_shape(&shape).unwrap().to_bytes().to_vec();
    block.extend_from_slice(&[2u8; 24]);
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&block).unwrap();
    let forged = encoder.finish().unwrap();

    assert!(matches!(
        receiver.receive(&forged),
        Err(WireError::PayloadTruncated { declared: 400, actual: 24 })
    ));
    let latest = slot.latest().unwrap();
    assert_eq!(latest.sequence, 1);
    assert!(latest.buffer.read().unwrap().iter().all(|b| *b == 1));
}

#[test]
fn test_queue_capacity_five() {
    let output = FrameShape::packed(4, 4, PixelFormat::Bgra32);
    let (mut producer, consumer) = FrameQueue::new(5, output).split();

    let statuses: Vec<SinkStatus> = (0..6)
        .map(|sequence| {
            producer.submit(QueueEntry {
                buffer: Arc::new(PixelBuffer::allocate(output).unwrap()),
                presentation_time: Instant::now(),
                sequence,
                origin: FrameOrigin::Forwarded,
            })
        })
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == SinkStatus::Accepted).count(), 5);
    assert_eq!(statuses[5], SinkStatus::QueueFull);
    assert_eq!(consumer.len(), 5);
}

#[test]
fn test_receiver_to_camera() {
    let output = FrameShape::packed(32, 16, PixelFormat::Bgra32);
    let (producer, consumer) = FrameQueue::new(5, output).split();
    let mut camera = VirtualCamera::new(output, consumer);

    let control = Arc::new(ControlSurface::default());
    let slot = Arc::new(FrameSlot::new());
    let (mut receiver, _ready_rx) = FrameReceiver::new(&WireConfig::default(), slot.clone());
    let mut scheduler = StreamScheduler::new(producer, slot, control.clone());

    // nobody is watching yet
    poll_once(camera.status_property().as_ref(), &control);
    assert_eq!(scheduler.tick(), TickOutcome::Disabled);

    camera.connect_client();
    poll_once(camera.status_property().as_ref(), &control);
    assert_eq!(scheduler.tick(), TickOutcome::Enqueued(FrameOrigin::Filler));
    assert_eq!(camera.present().unwrap().entry.origin, FrameOrigin::Filler);

    // sender runs at a different resolution than the device
    let codec = DepthCodec::new(CodecAlgorithm::Log, DepthRange::default());
    let mut sender = DepthTranscoder::new();
    let encoded = sender.encode(&DepthFrame::filled(64, 32, 2.0), &codec).unwrap();
    receiver
        .receive(&FrameFramer::default().serialize_buffer(&encoded).unwrap())
        .unwrap();

    assert_eq!(scheduler.tick(), TickOutcome::Enqueued(FrameOrigin::Resized));
    let presented = camera.present().unwrap();
    assert_eq!(*presented.entry.buffer.shape(), output);

    let expected = encoded.read().unwrap()[..4].to_vec();
    let plane = presented.entry.buffer.to_vec().unwrap();
    assert!(plane.chunks_exact(4).all(|px| px == &expected[..]));

    camera.disconnect_client();
    poll_once(camera.status_property().as_ref(), &control);
    assert_eq!(scheduler.tick(), TickOutcome::Disabled);
    assert_eq!(camera.stats().presented, 2);
}
