//! Synthetic frames shared by the unit tests (`crate::testutil`) and the
//! integration tests in this directory.
#![allow(dead_code)]

use scroll_stitch_common::frame::{Frame, PixelLayout};

/// Deterministic grayscale noise, `width * height` bytes.
pub fn noise_page(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..width as usize * height as usize)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 56) as u8
        })
        .collect()
}

/// `height` rows of noise that repeat every `period` rows.
pub fn periodic_page(width: u32, period: u32, height: u32, seed: u64) -> Vec<u8> {
    let tile = noise_page(width, period, seed);
    let w = width as usize;
    (0..height as usize)
        .flat_map(|y| {
            let r = y % period as usize;
            tile[r * w..(r + 1) * w].iter().copied()
        })
        .collect()
}

pub fn slice_rows(page: &[u8], width: u32, start: u32, rows: u32) -> &[u8] {
    let w = width as usize;
    &page[start as usize * w..(start + rows) as usize * w]
}

/// An `Rgb8` frame whose channels all carry the given gray values.
pub fn gray_frame(width: u32, height: u32, gray: &[u8], scale: f64) -> Frame {
    let data = gray.iter().flat_map(|&v| [v, v, v]).collect();
    Frame::new(width, height, PixelLayout::Rgb8, data, scale).unwrap()
}

/// Like [`gray_frame`] but `Rgba8` with an opaque alpha channel.
pub fn gray_frame_rgba(width: u32, height: u32, gray: &[u8], scale: f64) -> Frame {
    let data = gray.iter().flat_map(|&v| [v, v, v, 255]).collect();
    Frame::new(width, height, PixelLayout::Rgba8, data, scale).unwrap()
}
