//! Raster pixel lists.
//!
//! Pixels are `(row, col)` in grid coordinates relative to the region of
//! interest. A sampling `ratio` keeps every `ratio`-th row and column, which
//! is how an acquisition pixel larger than the grid pixel is scanned.

/// A scanned pixel, `(row, col)` relative to the region of interest.
pub type Pixel = (usize, usize);

/// Every lattice pixel of a region in raster (row-major) order.
#[must_use]
pub fn pixel_sampling(dim: (usize, usize), ratio: usize) -> Vec<Pixel> {
    let ratio = ratio.max(1);
    let (rows, cols) = dim;
    (0..rows)
        .step_by(ratio)
        .flat_map(|row| (0..cols).step_by(ratio).map(move |col| (row, col)))
        .collect()
}

/// Lattice pixel following `pixel` in raster order, wrapping to the origin
/// after the last one.
#[must_use]
pub fn set_starting_pixel(pixel: Pixel, dim: (usize, usize), ratio: usize) -> Pixel {
    let ratio = ratio.max(1);
    let (rows, cols) = dim;
    let (row, col) = pixel;
    let next_col = col + ratio;
    if next_col < cols {
        return (row, next_col);
    }
    let next_row = row + ratio;
    if next_row < rows {
        (next_row, 0)
    } else {
        (0, 0)
    }
}

/// `n_pixels` lattice pixels in raster order starting at `start`, wrapping
/// around the region as often as needed.
#[must_use]
pub fn generate_raster_pixel_list(
    n_pixels: usize,
    start: Pixel,
    dim: (usize, usize),
    ratio: usize,
) -> Vec<Pixel> {
    if dim.0 == 0 || dim.1 == 0 {
        return Vec::new();
    }
    let mut pixels = Vec::with_capacity(n_pixels);
    let mut pixel = start;
    for _ in 0..n_pixels {
        pixels.push(pixel);
        pixel = set_starting_pixel(pixel, dim, ratio);
    }
    pixels
}
