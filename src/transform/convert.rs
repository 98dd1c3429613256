//! Colour conversions between planar YUV, RGBA and single-channel luma.
//!
//! YUV → RGB uses BT.601 limited-range coefficients in 20-bit fixed point:
//!
//! ```text
//! R = 1.164 (Y - 16)                  + 1.596 (V - 128)
//! G = 1.164 (Y - 16) - 0.391 (U - 128) - 0.813 (V - 128)
//! B = 1.164 (Y - 16) + 2.018 (U - 128)
//! ```
//!
//! RGB → luma uses 0.299 / 0.587 / 0.114 in 14-bit fixed point. Alpha is
//! always written as 255.

use crate::capture::frame::PixelFormat;

const YUV_SHIFT: u32 = 20;
const YUV_ROUND: i32 = 1 << (YUV_SHIFT - 1);
const C_Y: i32 = 1_220_542;
const C_VR: i32 = 1_673_527;
const C_VG: i32 = -852_492;
const C_UG: i32 = -409_993;
const C_UB: i32 = 2_116_026;

const GRAY_SHIFT: u32 = 14;
const GRAY_ROUND: u32 = 1 << (GRAY_SHIFT - 1);
const G_R: u32 = 4_899;
const G_G: u32 = 9_617;
const G_B: u32 = 1_868;

#[inline(always)]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline(always)]
fn yuv_pixel(out: &mut [u8], y: u8, ruv: i32, guv: i32, buv: i32) {
    let yy = (i32::from(y) - 16).max(0) * C_Y;
    out[0] = clamp_u8((yy + ruv + YUV_ROUND) >> YUV_SHIFT);
    out[1] = clamp_u8((yy + guv + YUV_ROUND) >> YUV_SHIFT);
    out[2] = clamp_u8((yy + buv + YUV_ROUND) >> YUV_SHIFT);
    out[3] = 255;
}

/// Convert one NV21/NV12 frame into `dst` (`width*height*4` bytes).
///
/// `width` and `height` must be even; `src` must hold `width*height*3/2`
/// bytes. Both are checked by the engine before calling.
pub fn planar_to_rgba(src: &[u8], width: usize, height: usize, format: PixelFormat, dst: &mut [u8]) {
    let (u_off, v_off) = format.chroma_order();
    let (luma, chroma) = src.split_at(width * height);

    for (y, dst_row) in dst.chunks_exact_mut(width * 4).take(height).enumerate() {
        let y_row = &luma[y * width..(y + 1) * width];
        let uv_row = &chroma[(y / 2) * width..(y / 2 + 1) * width];

        for ((out, ys), uv) in dst_row
            .chunks_exact_mut(8)
            .zip(y_row.chunks_exact(2))
            .zip(uv_row.chunks_exact(2))
        {
            let u = i32::from(uv[u_off]) - 128;
            let v = i32::from(uv[v_off]) - 128;
            let ruv = C_VR * v;
            let guv = C_VG * v + C_UG * u;
            let buv = C_UB * u;

            let (left, right) = out.split_at_mut(4);
            yuv_pixel(left, ys[0], ruv, guv, buv);
            yuv_pixel(right, ys[1], ruv, guv, buv);
        }
    }
}

/// Reduce RGBA to single-channel luma.
pub fn rgba_to_luma(src: &[u8], dst: &mut [u8]) {
    for (px, out) in src.chunks_exact(4).zip(dst.iter_mut()) {
        let sum = u32::from(px[0]) * G_R + u32::from(px[1]) * G_G + u32::from(px[2]) * G_B;
        *out = ((sum + GRAY_ROUND) >> GRAY_SHIFT) as u8;
    }
}

/// Expand single-channel data to opaque RGBA with R = G = B.
pub fn luma_to_rgba(src: &[u8], dst: &mut [u8]) {
    for (&v, out) in src.iter().zip(dst.chunks_exact_mut(4)) {
        out.copy_from_slice(&[v, v, v, 255]);
    }
}
