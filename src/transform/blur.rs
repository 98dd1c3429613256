//! 5×5 separable Gaussian smoothing, sigma 1.5

/// Integer taps for sigma 1.5, summing to 256.
const KERNEL: [u32; 5] = [31, 60, 74, 60, 31];

/// Mirror an out-of-range index without repeating the edge sample
/// (`gfedcb|abcdefgh|gfedcba`).
#[inline]
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Blur `src` into `dst`. `tmp` holds the unnormalised horizontal pass.
pub fn gaussian_5x5(src: &[u8], tmp: &mut [u16], dst: &mut [u8], width: usize, height: usize) {
    for (src_row, tmp_row) in src
        .chunks_exact(width)
        .zip(tmp.chunks_exact_mut(width))
        .take(height)
    {
        for (x, out) in tmp_row.iter_mut().enumerate() {
            let mut acc = 0u32;
            if x >= 2 && x + 2 < width {
                for (k, &w) in KERNEL.iter().enumerate() {
                    acc += w * u32::from(src_row[x + k - 2]);
                }
            } else {
                for (k, &w) in KERNEL.iter().enumerate() {
                    let sx = reflect101(x as isize + k as isize - 2, width);
                    acc += w * u32::from(src_row[sx]);
                }
            }
            // At most 255 * 256, fits in u16.
            *out = acc as u16;
        }
    }

    for (y, dst_row) in dst.chunks_exact_mut(width).take(height).enumerate() {
        let rows: [usize; 5] =
            std::array::from_fn(|k| reflect101(y as isize + k as isize - 2, height) * width);
        for (x, out) in dst_row.iter_mut().enumerate() {
            let mut acc = 0u32;
            for (k, &w) in KERNEL.iter().enumerate() {
                acc += w * u32::from(tmp[rows[k] + x]);
            }
            *out = ((acc + (1 << 15)) >> 16) as u8;
        }
    }
}
