//! # Random Lookup Texture
//!
//! Emission perturbs spawns with texels from a precomputed low-discrepancy
//! table instead of a per-particle host RNG, so no random state crosses the
//! host/device boundary.
//!
//! Texel `i` holds the radical inverses of `i + 1` in bases 2, 3, 5 and 7,
//! remapped to `[-1, 1]`.

use ember_gfx::{TextureDesc, TextureFormat};

/// Bases of the four channels.
pub const HALTON_BASES: [u32; 4] = [2, 3, 5, 7];

/// Radical inverse of `index` in `base`, in `[0, 1)`.
#[must_use]
pub fn halton(mut index: u32, base: u32) -> f32 {
    let inv_base = 1.0 / f64::from(base);
    let mut f = 1.0;
    let mut r = 0.0;
    while index > 0 {
        f *= inv_base;
        r += f * f64::from(index % base);
        index /= base;
    }
    r as f32
}

/// Descriptor of the `size` x `size` lookup texture.
#[must_use]
pub fn random_texture_desc(size: u32) -> TextureDesc {
    TextureDesc {
        width: size,
        height: size,
        format: TextureFormat::Rgba32Float,
    }
}

/// Texels of the `size` x `size` lookup texture, row-major.
#[must_use]
pub fn random_texture_data(size: u32) -> Vec<[f32; 4]> {
    let count = size * size;
    (0..count)
        .map(|i| HALTON_BASES.map(|base| halton(i + 1, base) * 2.0 - 1.0))
        .collect()
}

/// Texel coordinates of sequence position `index` in a `size`-wide table.
#[inline]
#[must_use]
pub const fn random_texel(index: u32, size: u32) -> (i32, i32) {
    let wrapped = index % (size * size);
    ((wrapped % size) as i32, (wrapped / size) as i32)
}

/// PCG output permutation of `index`.
///
/// A second draw keyed on the same sequence position reads
/// `scramble_index(i)` so it is decorrelated from the in-order draw at `i`.
#[inline]
#[must_use]
pub const fn scramble_index(index: u32) -> u32 {
    let state = index.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_two_sequence() {
        let values: Vec<f32> = (1..=4).map(|i| halton(i, 2)).collect();
        assert_eq!(values, vec![0.5, 0.25, 0.75, 0.125]);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_texels_in_signed_unit_range() {
        let data = random_texture_data(16);
        assert_eq!(data.len(), 256);
        assert!(data.iter().flatten().all(|v| (-1.0..1.0).contains(v)));
        // First texel is halton(1, b) remapped.
        assert_eq!(data[0][0], 0.0);
    }

    #[test]
    fn test_texel_wraps() {
        assert_eq!(random_texel(0, 4), (0, 0));
        assert_eq!(random_texel(5, 4), (1, 1));
        assert_eq!(random_texel(16, 4), (0, 0));
    }

    #[test]
    fn test_scrambled_parity_is_mixed() {
        // Consecutive positions must not map to a fixed parity pattern.
        let odd = (0..256).filter(|&i| scramble_index(i) % 2 == 1).count();
        assert!((64..=192).contains(&odd), "odd scrambled indices: {odd}");
        let even_to_odd = (0..256)
            .step_by(2)
            .filter(|&i| scramble_index(i) % 2 == 1)
            .count();
        assert!(even_to_odd > 16 && even_to_odd < 112);
    }
}
