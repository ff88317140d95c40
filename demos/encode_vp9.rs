//! Example: VP9 Video Encoding
//!
//! Demonstrates the VP9 encode pipeline against the in-process mock backend:
//! keyframe scheduling, reference refresh, and packet metadata. Swap the
//! backend for a real acceleration API to encode actual pixels.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use vaforge::{Encoder, EncoderConfig, MockBackend, RateControlMode, VideoFrame};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const NUM_FRAMES: u64 = 30;
const KEYFRAME_PERIOD: u32 = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    println!("VaForge VP9 Encode Example\n");

    let backend = Arc::new(MockBackend::new());

    // Configure encoder.
    let config = EncoderConfig::vp9(WIDTH, HEIGHT)
        .with_rate_control(RateControlMode::Cqp)
        .with_keyframe_period(KEYFRAME_PERIOD)
        .with_frame_rate(30, 1);

    println!(
        "Config: {WIDTH}x{HEIGHT}, {:?}, keyframe period {}\n",
        config.rate_control,
        config.keyframe_period
    );

    let mut encoder = Encoder::new(backend, &config)?;
    let mut total_bytes = 0;

    // Encode frames. Timestamps tick at ~30fps in milliseconds.
    for n in 0..NUM_FRAMES {
        let frame = VideoFrame::new(n * 33, n * 33);

        for packet in encoder.encode(frame)? {
            total_bytes += packet.data.len();
            println!(
                "  pts={:<4} dts={:<4}: {:>5} bytes, {:?}{}",
                packet.pts,
                packet.dts,
                packet.data.len(),
                packet.picture_type,
                if packet.sync_point { " [KEY]" } else { "" }
            );
        }
    }

    // Flush remaining pictures. The VP9 pipeline buffers nothing, so this
    // drains empty.
    for packet in encoder.flush()? {
        total_bytes += packet.data.len();
        println!(
            "  pts={:<4} dts={:<4}: {:>5} bytes, {:?} (flushed)",
            packet.pts,
            packet.dts,
            packet.data.len(),
            packet.picture_type
        );
    }

    let raw_bytes = NUM_FRAMES as usize * (WIDTH * HEIGHT * 3 / 2) as usize;
    let ratio = raw_bytes as f64 / total_bytes as f64;
    println!("\nEncoded {NUM_FRAMES} frames, {total_bytes} bytes, {ratio:.1}:1 compression");

    Ok(())
}
