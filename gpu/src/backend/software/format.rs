//! Color encoding for render targets.

use half::f16;

use crate::types::PixelFormat;

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn uint8(value: f32) -> u8 {
    value.clamp(0.0, u8::MAX as f32) as u8
}

/// Linear to sRGB transfer function.
fn srgb_encode(linear: f32) -> f32 {
    let linear = linear.clamp(0.0, 1.0);
    if linear <= 0.003_130_8 {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

fn put<const N: usize>(out: &mut [u8], bytes: [u8; N]) {
    out[..N].copy_from_slice(&bytes);
}

fn put_f16(out: &mut [u8], values: &[f32]) {
    for (i, value) in values.iter().enumerate() {
        put(&mut out[i * 2..], f16::from_f32(*value).to_le_bytes());
    }
}

fn put_f32(out: &mut [u8], values: &[f32]) {
    for (i, value) in values.iter().enumerate() {
        put(&mut out[i * 4..], value.to_le_bytes());
    }
}

/// Encode an RGBA color into one pixel of `format`.
///
/// `out` must hold at least `format.bytes_per_pixel()` bytes. Channels the
/// format does not store are dropped.
pub(crate) fn encode_color(format: PixelFormat, color: [f32; 4], out: &mut [u8]) {
    let [r, g, b, a] = color;
    match format {
        PixelFormat::R8Unorm => put(out, [unorm8(r)]),
        PixelFormat::R8Uint => put(out, [uint8(r)]),
        PixelFormat::Rg8Unorm => put(out, [unorm8(r), unorm8(g)]),
        PixelFormat::Rgba8Unorm => put(out, [unorm8(r), unorm8(g), unorm8(b), unorm8(a)]),
        PixelFormat::Rgba8UnormSrgb => put(
            out,
            [
                unorm8(srgb_encode(r)),
                unorm8(srgb_encode(g)),
                unorm8(srgb_encode(b)),
                unorm8(a),
            ],
        ),
        PixelFormat::Rgba8Uint => put(out, [uint8(r), uint8(g), uint8(b), uint8(a)]),
        PixelFormat::Bgra8Unorm => put(out, [unorm8(b), unorm8(g), unorm8(r), unorm8(a)]),
        PixelFormat::Bgra8UnormSrgb => put(
            out,
            [
                unorm8(srgb_encode(b)),
                unorm8(srgb_encode(g)),
                unorm8(srgb_encode(r)),
                unorm8(a),
            ],
        ),
        PixelFormat::R16Float => put_f16(out, &[r]),
        PixelFormat::Rg16Float => put_f16(out, &[r, g]),
        PixelFormat::Rgba16Float => put_f16(out, &[r, g, b, a]),
        PixelFormat::R32Float | PixelFormat::Depth32Float => put_f32(out, &[r]),
        PixelFormat::Rg32Float => put_f32(out, &[r, g]),
        PixelFormat::Rgba32Float => put_f32(out, &[r, g, b, a]),
        PixelFormat::R32Uint => put(out, (r.max(0.0) as u32).to_le_bytes()),
        PixelFormat::R32Sint => put(out, (r as i32).to_le_bytes()),
        PixelFormat::Invalid => {}
    }
}

/// Fill a packed subresource with one color.
pub(crate) fn fill_color(format: PixelFormat, color: [f32; 4], texels: &mut [u8]) {
    let bytes_per_pixel = format.bytes_per_pixel();
    if bytes_per_pixel == 0 {
        return;
    }
    let mut pixel = [0u8; 16];
    encode_color(format, color, &mut pixel);
    for chunk in texels.chunks_exact_mut(bytes_per_pixel) {
        chunk.copy_from_slice(&pixel[..bytes_per_pixel]);
    }
}
