use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};

/// Same-shape 2-D convolution with zero padding. The kernel origin is
/// `(kh / 2, kw / 2)`.
pub fn convolve_same(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (kh, kw) = kernel.dim();
    scatter_2d(image, kernel, (kh / 2, kw / 2))
}

/// Adjoint of [`convolve_same`]: same-shape cross-correlation with the kernel.
pub fn correlate_same(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (kh, kw) = kernel.dim();
    let flipped = kernel.slice(s![..;-1, ..;-1]);
    scatter_2d(image, &flipped, (kh - 1 - kh / 2, kw - 1 - kw / 2))
}

/// Same-shape convolution with the separable kernel `vertical ⊗ horizontal`.
pub fn convolve_separable_same(
    image: &ArrayView2<f64>,
    vertical: &ArrayView1<f64>,
    horizontal: &ArrayView1<f64>,
) -> Array2<f64> {
    let after_rows = filter_axis(image, horizontal, horizontal.len() / 2, Axis(1));
    filter_axis(&after_rows.view(), vertical, vertical.len() / 2, Axis(0))
}

/// Adjoint of [`convolve_separable_same`].
pub fn correlate_separable_same(
    image: &ArrayView2<f64>,
    vertical: &ArrayView1<f64>,
    horizontal: &ArrayView1<f64>,
) -> Array2<f64> {
    let (vh, hw) = (vertical.len(), horizontal.len());
    let horizontal = horizontal.slice(s![..;-1]);
    let vertical = vertical.slice(s![..;-1]);
    let after_rows = filter_axis(image, &horizontal, hw - 1 - hw / 2, Axis(1));
    filter_axis(&after_rows.view(), &vertical, vh - 1 - vh / 2, Axis(0))
}

/// Range of kernel taps `u` for which `p + u - offset` lands inside `0..n`.
fn valid_taps(p: usize, offset: usize, n: usize, taps: usize) -> (usize, usize) {
    let u0 = offset.saturating_sub(p);
    let u1 = taps.min(n + offset - p);
    (u0, u1.max(u0))
}

/// out[p + u - oh, q + v - ow] += image[p, q] * kernel[u, v]
fn scatter_2d(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>, offset: (usize, usize)) -> Array2<f64> {
    let (h, w) = image.dim();
    let (kh, kw) = kernel.dim();
    let (oh, ow) = offset;
    let mut out = Array2::<f64>::zeros((h, w));

    for ((p, q), &a) in image.indexed_iter() {
        if a == 0.0 {
            continue;
        }
        let (u0, u1) = valid_taps(p, oh, h, kh);
        let (v0, v1) = valid_taps(q, ow, w, kw);
        if u0 == u1 || v0 == v1 {
            continue;
        }
        let mut region = out.slice_mut(s![p + u0 - oh..p + u1 - oh, q + v0 - ow..q + v1 - ow]);
        region.scaled_add(a, &kernel.slice(s![u0..u1, v0..v1]));
    }

    out
}

fn filter_axis(image: &ArrayView2<f64>, kernel: &ArrayView1<f64>, offset: usize, axis: Axis) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(image.dim());
    for (src, mut dst) in image.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        scatter_line(&src, &mut dst, kernel, offset);
    }
    out
}

fn scatter_line(src: &ArrayView1<f64>, dst: &mut ArrayViewMut1<f64>, kernel: &ArrayView1<f64>, offset: usize) {
    let n = src.len();
    for (p, &a) in src.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        let (u0, u1) = valid_taps(p, offset, n, kernel.len());
        for u in u0..u1 {
            dst[p + u - offset] += a * kernel[u];
        }
    }
}
