//! Grid resampling: imagery-to-elevation alignment and stride downsampling.

use crate::config::Resampling;

/// Keep every `factor`-th pixel in both directions, starting at (0, 0).
///
/// Works on interleaved data with `channels` samples per pixel. Returns the
/// new buffer and its dimensions, `ceil(width / factor)` by
/// `ceil(height / factor)`.
pub fn stride_downsample<T: Copy>(
    data: &[T],
    width: usize,
    height: usize,
    channels: usize,
    factor: u32,
) -> (Vec<T>, usize, usize) {
    let factor = factor.max(1) as usize;
    if factor == 1 {
        return (data.to_vec(), width, height);
    }
    let out_w = width.div_ceil(factor);
    let out_h = height.div_ceil(factor);
    let mut out = Vec::with_capacity(out_w * out_h * channels);
    for row in (0..height).step_by(factor) {
        for col in (0..width).step_by(factor) {
            let idx = (row * width + col) * channels;
            out.extend_from_slice(&data[idx..idx + channels]);
        }
    }
    (out, out_w, out_h)
}

/// Resample interleaved 8-bit pixels from `src_w` x `src_h` to `dst_w` x `dst_h`.
pub fn resample_u8(
    data: &[u8],
    src_w: usize,
    src_h: usize,
    channels: usize,
    dst_w: usize,
    dst_h: usize,
    method: Resampling,
) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return data.to_vec();
    }
    if src_w == 0 || src_h == 0 {
        return vec![0; dst_w * dst_h * channels];
    }
    match method {
        Resampling::Nearest => nearest(data, src_w, src_h, channels, dst_w, dst_h),
        Resampling::Bilinear => bilinear(data, src_w, src_h, channels, dst_w, dst_h),
    }
}

/// Source index for destination index `d` under pixel-center alignment.
fn nearest_index(d: usize, src: usize, dst: usize) -> usize {
    let s = ((d as f64 + 0.5) * src as f64 / dst as f64).floor() as usize;
    s.min(src - 1)
}

fn nearest(
    data: &[u8],
    src_w: usize,
    src_h: usize,
    channels: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let cols: Vec<usize> = (0..dst_w).map(|c| nearest_index(c, src_w, dst_w)).collect();
    let mut out = Vec::with_capacity(dst_w * dst_h * channels);
    for row in 0..dst_h {
        let src_row = nearest_index(row, src_h, dst_h);
        for &src_col in &cols {
            let idx = (src_row * src_w + src_col) * channels;
            out.extend_from_slice(&data[idx..idx + channels]);
        }
    }
    out
}

fn bilinear(
    data: &[u8],
    src_w: usize,
    src_h: usize,
    channels: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let position = |d: usize, src: usize, dst: usize| -> (usize, usize, f64) {
        let s = ((d as f64 + 0.5) * src as f64 / dst as f64 - 0.5).clamp(0.0, (src - 1) as f64);
        let s0 = s.floor() as usize;
        let s1 = (s0 + 1).min(src - 1);
        (s0, s1, s - s0 as f64)
    };

    let mut out = Vec::with_capacity(dst_w * dst_h * channels);
    for row in 0..dst_h {
        let (y0, y1, fy) = position(row, src_h, dst_h);
        for col in 0..dst_w {
            let (x0, x1, fx) = position(col, src_w, dst_w);
            for ch in 0..channels {
                let at = |x: usize, y: usize| f64::from(data[(y * src_w + x) * channels + ch]);
                let v = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                out.push(v.round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_downsample_dimensions() {
        let data: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let (out, w, h) = stride_downsample(&data, 5, 4, 1, 2);
        assert_eq!((w, h), (3, 2));
        assert_eq!(out, vec![0.0, 2.0, 4.0, 10.0, 12.0, 14.0]);
    }

    #[test]
    fn test_stride_downsample_interleaved() {
        let data: Vec<u8> = vec![
            1, 1, 1, 2, 2, 2, //
            3, 3, 3, 4, 4, 4,
        ];
        let (out, w, h) = stride_downsample(&data, 2, 2, 3, 2);
        assert_eq!((w, h), (1, 1));
        assert_eq!(out, vec![1, 1, 1]);
    }

    #[test]
    fn test_nearest_upsample_replicates() {
        let data = vec![10u8, 20, 30, 40];
        let out = resample_u8(&data, 2, 2, 1, 4, 4, Resampling::Nearest);
        assert_eq!(
            out,
            vec![
                10, 10, 20, 20, //
                10, 10, 20, 20, //
                30, 30, 40, 40, //
                30, 30, 40, 40,
            ]
        );
    }

    #[test]
    fn test_nearest_downsample_picks_centers() {
        let data: Vec<u8> = (0..16).collect();
        let out = resample_u8(&data, 4, 4, 1, 2, 2, Resampling::Nearest);
        assert_eq!(out, vec![5, 7, 13, 15]);
    }

    #[test]
    fn test_bilinear_blends() {
        let data = vec![0u8, 100];
        let out = resample_u8(&data, 2, 1, 1, 4, 1, Resampling::Bilinear);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
        assert_eq!(out[3], 100);
        assert!(out[1] > 0 && out[1] < out[2] && out[2] < 100);
    }

    #[test]
    fn test_same_size_is_copy() {
        let data = vec![1u8, 2, 3, 4, 5, 6];
        assert_eq!(resample_u8(&data, 2, 1, 3, 2, 1, Resampling::Bilinear), data);
    }
}
