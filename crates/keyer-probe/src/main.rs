//! Pushes synthetic green-screen frames through a keying context and prints
//! the context's statistics as JSON.
//!
//! Usage: `keyer-probe [FRAMES]`. The engine comes from `KEYER_ENGINE`.

use std::io::IsTerminal;

use keyer::{create_engine, destroy_context, process_frame, EngineKind, KeyContext};
use keyer_frame::{NativeFrame, PixelFormat};
use tracing::info;

const DEFAULT_FRAMES: usize = 30;

/// BT.601 YUV of the chroma key colour 0x70de77.
const GREEN_YUV: (u8, u8, u8) = (177, 95, 81);
/// The colour key colour 0x00fa00 in BGRA byte order.
const GREEN_BGRA: [u8; 4] = [0x00, 0xfa, 0x00, 0xff];

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

/// I420 frame whose left half is key green and right half mid grey.
fn key_i420(ctx: &mut KeyContext, width: u32, height: u32) {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut y = vec![128u8; w * h];
    let mut u = vec![128u8; cw * ch];
    let mut v = vec![128u8; cw * ch];
    for row in 0..h {
        y[row * w..row * w + w / 2].fill(GREEN_YUV.0);
    }
    for row in 0..ch {
        u[row * cw..row * cw + cw / 2].fill(GREEN_YUV.1);
        v[row * cw..row * cw + cw / 2].fill(GREEN_YUV.2);
    }
    let mut frame = NativeFrame::new(width, height, PixelFormat::I420)
        .with_plane(&mut y, w)
        .with_plane(&mut u, cw)
        .with_plane(&mut v, cw);
    let outcome = process_frame(ctx, &mut frame);
    tracing::debug!("{width}x{height} I420 frame: {outcome:?}");
}

/// BGRX frame alternating key green and red pixels.
fn key_bgrx(ctx: &mut KeyContext, width: u32, height: u32) {
    let stride = width as usize * 4;
    let mut pixels = vec![0u8; stride * height as usize];
    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        if i % 2 == 0 {
            px.copy_from_slice(&GREEN_BGRA);
        } else {
            px.copy_from_slice(&[0x20, 0x20, 0xe0, 0x00]);
        }
    }
    let mut frame =
        NativeFrame::new(width, height, PixelFormat::Bgrx).with_plane(&mut pixels, stride);
    let outcome = process_frame(ctx, &mut frame);
    tracing::debug!("{width}x{height} BGRX frame: {outcome:?} (now {})", frame.format);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let frames = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<usize>()?,
        None => DEFAULT_FRAMES,
    };

    let engine = create_engine(EngineKind::from_env());
    info!("probing {} engine with {frames} frames", engine.name());
    let mut context = Some(KeyContext::new(engine));

    if let Some(ctx) = context.as_mut() {
        for i in 0..frames {
            // Switch resolution halfway through to exercise a rebuild.
            if i < frames / 2 {
                key_i420(ctx, 1280, 720);
            } else {
                key_i420(ctx, 640, 360);
            }
        }
        key_bgrx(ctx, 320, 180);

        let snapshot = ctx.stats().snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    destroy_context(&mut context);
    Ok(())
}
