use image::{imageops, DynamicImage, RgbaImage};
use scroll_stitch_common::frame::{Frame, FrameError, PixelLayout};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("frame widths differ: top {top}px, bottom {bottom}px")]
    WidthMismatch { top: u32, bottom: u32 },
    #[error("frame scale factors differ: top {top}, bottom {bottom}")]
    ScaleMismatch { top: f64, bottom: f64 },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Two frames can only be stacked when their rows line up pixel for pixel.
pub fn check_geometry(top: &Frame, bottom: &Frame) -> Result<(), CompositeError> {
    if top.scale_factor() != bottom.scale_factor() {
        return Err(CompositeError::ScaleMismatch {
            top: top.scale_factor(),
            bottom: bottom.scale_factor(),
        });
    }
    if top.width() != bottom.width() {
        return Err(CompositeError::WidthMismatch {
            top: top.width(),
            bottom: bottom.width(),
        });
    }
    Ok(())
}

/// Stack `bottom` under `top` so that `overlap` raw rows coincide.
///
/// The canvas is `top + bottom - overlap` logical units tall and `top` logical
/// units wide, rendered at the frames' scale factor. `top` is painted first
/// against the upper edge and `bottom` second against the lower edge, so the
/// newer frame's pixels win inside the overlap band. No blending.
pub fn composite(top: &Frame, bottom: &Frame, overlap: u32) -> Result<Frame, CompositeError> {
    check_geometry(top, bottom)?;

    let scale = top.scale_factor();
    let overlap = overlap.min(top.height()).min(bottom.height());
    let logical_overlap = overlap as f64 / scale;
    let logical_height = top.logical_height() + bottom.logical_height() - logical_overlap;
    let canvas_height = (logical_height * scale).round() as u32;
    let canvas_width = (top.logical_width() * scale).round() as u32;

    let mut canvas = RgbaImage::new(canvas_width, canvas_height);
    imageops::replace(&mut canvas, &top.to_rgba_image()?, 0, 0);
    let bottom_y = canvas_height as i64 - bottom.height() as i64;
    imageops::replace(&mut canvas, &bottom.to_rgba_image()?, 0, bottom_y);

    debug!(
        top_height = top.height(),
        bottom_height = bottom.height(),
        overlap,
        canvas_width,
        canvas_height,
        logical_height,
        "frames composited"
    );

    let canvas = DynamicImage::ImageRgba8(canvas);
    let canvas = if top.layout() == PixelLayout::Rgb8 && bottom.layout() == PixelLayout::Rgb8 {
        DynamicImage::ImageRgb8(canvas.into_rgb8())
    } else {
        canvas
    };
    Ok(Frame::from_dynamic(canvas, scale)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8, scale: f64) -> Frame {
        Frame::new(
            width,
            height,
            PixelLayout::Rgb8,
            vec![value; (width * height * 3) as usize],
            scale,
        )
        .unwrap()
    }

    #[test]
    fn canvas_height_subtracts_overlap() {
        let top = solid(10, 100, 10, 2.0);
        let bottom = solid(10, 60, 200, 2.0);
        let out = composite(&top, &bottom, 20).unwrap();
        assert_eq!(out.width(), 10);
        assert_eq!(out.height(), 140);
        assert_eq!(out.logical_height(), 70.0);
        assert_eq!(out.scale_factor(), 2.0);
        assert_eq!(out.layout(), PixelLayout::Rgb8);
    }

    #[test]
    fn bottom_frame_wins_in_overlap_band() {
        let top = solid(4, 10, 10, 1.0);
        let bottom = solid(4, 10, 200, 1.0);
        let out = composite(&top, &bottom, 4).unwrap();
        assert_eq!(out.height(), 16);
        let row = |y: usize| out.data()[y * 4 * 3];
        assert_eq!(row(0), 10);
        assert_eq!(row(5), 10);
        // rows 6..10 are the overlap band
        assert_eq!(row(6), 200);
        assert_eq!(row(9), 200);
        assert_eq!(row(15), 200);
    }

    #[test]
    fn full_overlap_keeps_height() {
        let top = solid(4, 30, 10, 2.0);
        let out = composite(&top, &top, 30).unwrap();
        assert_eq!(out, top);
    }

    #[test]
    fn overlap_larger_than_frames_is_clamped() {
        let top = solid(4, 30, 10, 1.0);
        let bottom = solid(4, 20, 10, 1.0);
        let out = composite(&top, &bottom, 500).unwrap();
        assert_eq!(out.height(), 30);
    }

    #[test]
    fn mixed_layouts_produce_rgba() {
        let top = solid(2, 4, 10, 1.0);
        let bottom = Frame::new(2, 4, PixelLayout::Rgba8, vec![50; 32], 1.0).unwrap();
        let out = composite(&top, &bottom, 2).unwrap();
        assert_eq!(out.layout(), PixelLayout::Rgba8);
        assert_eq!(out.height(), 6);
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let a = solid(10, 20, 0, 2.0);
        assert!(matches!(
            composite(&a, &solid(12, 20, 0, 2.0), 5),
            Err(CompositeError::WidthMismatch { top: 10, bottom: 12 })
        ));
        assert!(matches!(
            composite(&a, &solid(10, 20, 0, 1.0), 5),
            Err(CompositeError::ScaleMismatch { .. })
        ));
    }
}
