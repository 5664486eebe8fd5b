//! Generates a labeled dataset of small grayscale digit images
//!
//! Each sample is an 8x8 image flattened to 64 features in `[0, 1]`, rendered
//! from a fixed glyph per digit and perturbed with a random shift, a random
//! ink intensity, and per-pixel noise. The perturbations come from a caller
//! supplied generator, so a fixed seed reproduces the dataset exactly.

use rand::Rng;

/// Images are square with this side length
pub const IMAGE_SIDE: usize = 8;
/// Flattened feature count per image
pub const N_FEATURES: usize = IMAGE_SIDE * IMAGE_SIDE;
/// Digits 0 through 9
pub const N_CLASSES: usize = 10;

// One 8x8 bitmap per digit, one byte per row with the leftmost pixel in the
// high bit
const GLYPHS: [[u8; IMAGE_SIDE]; N_CLASSES] = [
    [
        0b0011_1100,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0011_1100,
    ],
    [
        0b0001_1000,
        0b0011_1000,
        0b0001_1000,
        0b0001_1000,
        0b0001_1000,
        0b0001_1000,
        0b0001_1000,
        0b0111_1110,
    ],
    [
        0b0011_1100,
        0b0110_0110,
        0b0000_0110,
        0b0000_1100,
        0b0001_1000,
        0b0011_0000,
        0b0110_0000,
        0b0111_1110,
    ],
    [
        0b0011_1100,
        0b0110_0110,
        0b0000_0110,
        0b0001_1100,
        0b0000_0110,
        0b0000_0110,
        0b0110_0110,
        0b0011_1100,
    ],
    [
        0b0000_1100,
        0b0001_1100,
        0b0011_1100,
        0b0110_1100,
        0b0111_1110,
        0b0000_1100,
        0b0000_1100,
        0b0000_1100,
    ],
    [
        0b0111_1110,
        0b0110_0000,
        0b0110_0000,
        0b0111_1100,
        0b0000_0110,
        0b0000_0110,
        0b0110_0110,
        0b0011_1100,
    ],
    [
        0b0011_1100,
        0b0110_0110,
        0b0110_0000,
        0b0111_1100,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0011_1100,
    ],
    [
        0b0111_1110,
        0b0000_0110,
        0b0000_1100,
        0b0001_1000,
        0b0011_0000,
        0b0011_0000,
        0b0011_0000,
        0b0011_0000,
    ],
    [
        0b0011_1100,
        0b0110_0110,
        0b0110_0110,
        0b0011_1100,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0011_1100,
    ],
    [
        0b0011_1100,
        0b0110_0110,
        0b0110_0110,
        0b0110_0110,
        0b0011_1110,
        0b0000_0110,
        0b0110_0110,
        0b0011_1100,
    ],
];

/// Generates `class_size` noisy images of every digit, with the class index as label
pub fn gen_digit_data(class_size: usize, rng: &mut impl Rng) -> (Vec<Vec<f32>>, Vec<u8>) {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for digit in 0..N_CLASSES {
        for _ in 0..class_size {
            let dx = rng.random_range(-1..=1);
            let dy = rng.random_range(-1..=1);
            let intensity = rng.random_range(0.7..1.0);
            data.push(render_digit(&GLYPHS[digit], dx, dy, intensity, rng));
            labels.push(digit as u8);
        }
    }

    (data, labels)
}

/// Rasterizes a glyph shifted by `(dx, dy)` pixels, with additive noise per pixel
fn render_digit(
    glyph: &[u8; IMAGE_SIDE],
    dx: i32,
    dy: i32,
    intensity: f32,
    rng: &mut impl Rng,
) -> Vec<f32> {
    let mut pixels = vec![0.0; N_FEATURES];
    for row in 0..IMAGE_SIDE {
        for col in 0..IMAGE_SIDE {
            let src_row = row as i32 - dy;
            let src_col = col as i32 - dx;
            let lit = src_row >= 0
                && src_row < IMAGE_SIDE as i32
                && src_col >= 0
                && src_col < IMAGE_SIDE as i32
                && (glyph[src_row as usize] >> (IMAGE_SIDE - 1 - src_col as usize)) & 1 == 1;
            let value = if lit { intensity } else { 0.0 };
            let noise = rng.random_range(0.0..0.15);
            pixels[row * IMAGE_SIDE + col] = (value + noise).clamp(0.0, 1.0);
        }
    }
    pixels
}
