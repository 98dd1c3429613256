//! Two-threshold gradient edge detector.
//!
//! 3×3 Sobel gradients with replicated borders, L1 magnitude, non-maximum
//! suppression along the quantised gradient direction, then hysteresis:
//! pixels above `high` seed edges, which grow through 8-connected pixels
//! above `low`.

/// tan(22.5°) in Q15.
const TG22: i32 = 13_573;

const NONE: u8 = 0;
const WEAK: u8 = 1;
const EDGE: u8 = 2;

/// Scratch buffers for one geometry. Nothing here allocates after `new`.
pub struct EdgeDetector {
    width: usize,
    height: usize,
    dx: Vec<i16>,
    dy: Vec<i16>,
    mag: Vec<i32>,
    map: Vec<u8>,
    stack: Vec<usize>,
}

impl EdgeDetector {
    pub fn new(width: usize, height: usize) -> Self {
        let len = width * height;
        Self {
            width,
            height,
            dx: vec![0; len],
            dy: vec![0; len],
            mag: vec![0; len],
            map: vec![NONE; len],
            stack: Vec::with_capacity(len),
        }
    }

    /// Write a binary mask (0 or 255) of the edges of `src` into `dst`.
    pub fn detect(&mut self, src: &[u8], dst: &mut [u8], low: f64, high: f64) {
        let (mut low, mut high) = (low.floor() as i32, high.floor() as i32);
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }

        self.gradients(src);
        self.suppress(low, high);
        self.link();

        for (out, &state) in dst.iter_mut().zip(&self.map) {
            *out = if state == EDGE { 255 } else { 0 };
        }
    }

    fn gradients(&mut self, src: &[u8]) {
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            let up = &src[y.saturating_sub(1) * w..][..w];
            let mid = &src[y * w..][..w];
            let down = &src[(y + 1).min(h - 1) * w..][..w];
            for x in 0..w {
                let l = x.saturating_sub(1);
                let r = (x + 1).min(w - 1);
                let px = |row: &[u8], i: usize| i32::from(row[i]);

                let gx = (px(up, r) + 2 * px(mid, r) + px(down, r))
                    - (px(up, l) + 2 * px(mid, l) + px(down, l));
                let gy = (px(down, l) + 2 * px(down, x) + px(down, r))
                    - (px(up, l) + 2 * px(up, x) + px(up, r));

                let i = y * w + x;
                self.dx[i] = gx as i16;
                self.dy[i] = gy as i16;
                self.mag[i] = gx.abs() + gy.abs();
            }
        }
    }

    #[inline]
    fn mag_at(&self, x: isize, y: isize) -> i32 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            0
        } else {
            self.mag[y as usize * self.width + x as usize]
        }
    }

    fn suppress(&mut self, low: i32, high: i32) {
        self.stack.clear();
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let m = self.mag[i];
                if m <= low {
                    self.map[i] = NONE;
                    continue;
                }

                let (gx, gy) = (i32::from(self.dx[i]), i32::from(self.dy[i]));
                let (ax, ay) = (gx.abs(), gy.abs() << 15);
                let tg22x = ax * TG22;
                let (xi, yi) = (x as isize, y as isize);

                let is_max = if ay < tg22x {
                    m > self.mag_at(xi - 1, yi) && m >= self.mag_at(xi + 1, yi)
                } else if ay > tg22x + (ax << 16) {
                    m > self.mag_at(xi, yi - 1) && m >= self.mag_at(xi, yi + 1)
                } else {
                    let s: isize = if (gx ^ gy) < 0 { -1 } else { 1 };
                    m > self.mag_at(xi - s, yi - 1) && m > self.mag_at(xi + s, yi + 1)
                };

                self.map[i] = if !is_max {
                    NONE
                } else if m > high {
                    self.stack.push(i);
                    EDGE
                } else {
                    WEAK
                };
            }
        }
    }

    fn link(&mut self) {
        let (w, h) = (self.width as isize, self.height as isize);
        while let Some(i) = self.stack.pop() {
            let (x, y) = ((i % self.width) as isize, (i / self.width) as isize);
            for ny in (y - 1)..=(y + 1) {
                for nx in (x - 1)..=(x + 1) {
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let j = (ny * w + nx) as usize;
                    if self.map[j] == WEAK {
                        self.map[j] = EDGE;
                        self.stack.push(j);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_has_no_edges() {
        let mut det = EdgeDetector::new(16, 8);
        let src = vec![128u8; 16 * 8];
        let mut dst = vec![1u8; 16 * 8];
        det.detect(&src, &mut dst, 50.0, 150.0);
        assert!(dst.iter().all(|&v| v == 0));
    }

    #[test]
    fn blurred_step_yields_single_column() {
        let (w, h) = (12, 6);
        let row = [0u8, 0, 0, 0, 31, 91, 164, 224, 255, 255, 255, 255];
        let src: Vec<u8> = row.iter().copied().cycle().take(w * h).collect();
        let mut det = EdgeDetector::new(w, h);
        let mut dst = vec![0u8; w * h];
        det.detect(&src, &mut dst, 50.0, 150.0);

        for y in 0..h {
            let line = &dst[y * w..(y + 1) * w];
            let white: Vec<usize> = (0..w).filter(|&x| line[x] == 255).collect();
            assert_eq!(white, vec![5], "row {y}");
        }
    }

    #[test]
    fn weak_pixels_need_a_strong_neighbour() {
        // A faint isolated step (magnitude 4*30 = 120) sits between the
        // thresholds and has no strong seed.
        let (w, h) = (10, 4);
        let src: Vec<u8> = (0..w * h).map(|i| if i % w < 5 { 100 } else { 130 }).collect();
        let mut det = EdgeDetector::new(w, h);
        let mut dst = vec![0u8; w * h];

        det.detect(&src, &mut dst, 50.0, 150.0);
        assert!(dst.iter().all(|&v| v == 0));

        det.detect(&src, &mut dst, 50.0, 100.0);
        assert!(dst.iter().any(|&v| v == 255));
    }

    #[test]
    fn thresholds_are_order_insensitive() {
        let (w, h) = (10, 4);
        let src: Vec<u8> = (0..w * h).map(|i| if i % w < 5 { 0 } else { 200 }).collect();
        let mut det = EdgeDetector::new(w, h);
        let mut a = vec![0u8; w * h];
        let mut b = vec![0u8; w * h];
        det.detect(&src, &mut a, 50.0, 150.0);
        det.detect(&src, &mut b, 150.0, 50.0);
        assert_eq!(a, b);
    }
}
