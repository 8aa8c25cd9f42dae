//! YUV 4:2:0 to interleaved RGB.
//!
//! Raw images arrive with per-plane row and pixel strides. The chroma
//! layout is inferred from those strides, the planes are packed into one
//! tight host buffer, and the packed buffer is converted with BT.601
//! full-range coefficients.

use crate::capture::{Frame, RGB_CHANNELS};
use crate::platform::{PixelFormat, Plane, RawImage};
use thiserror::Error;

/// Why a raw image cannot be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Not three planes.
    #[error("expected 3 planes, got {0}")]
    PlaneCount(usize),
    /// Not YUV 4:2:0.
    #[error("expected YUV 4:2:0, got {0:?}")]
    UnexpectedFormat(PixelFormat),
    /// Image size differs from the negotiated size.
    #[error("image is {actual_width}x{actual_height}, camera negotiated {expected_width}x{expected_height}")]
    DimensionMismatch {
        /// Negotiated width.
        expected_width: u32,
        /// Negotiated height.
        expected_height: u32,
        /// Width of the image.
        actual_width: u32,
        /// Height of the image.
        actual_height: u32,
    },
    /// Chroma strides match neither NV21 nor YV12.
    #[error("unsupported chroma layout: pixel stride {pixel_stride}, row stride {row_stride}")]
    UnsupportedLayout {
        /// Chroma pixel stride.
        pixel_stride: usize,
        /// Chroma row stride.
        row_stride: usize,
    },
    /// A plane ends before its last sample.
    #[error("plane {plane} holds {len} bytes, needs {needed}")]
    PlaneTooShort {
        /// Plane index.
        plane: usize,
        /// Bytes in the plane.
        len: usize,
        /// Bytes the strides require.
        needed: usize,
    },
}

/// Arrangement of the chroma samples in a packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaLayout {
    /// One interleaved V/U plane (NV21).
    SemiPlanarVu,
    /// Separate V then U planes (YV12).
    PlanarVu,
}

/// A YUV 4:2:0 image with all planes packed tightly into one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedYuv {
    /// Luma width.
    pub width: u32,
    /// Luma height.
    pub height: u32,
    /// Chroma arrangement after the luma plane.
    pub layout: ChromaLayout,
    /// Luma plane, then chroma, no padding.
    pub data: Vec<u8>,
}

impl PackedYuv {
    fn chroma_size(&self) -> (usize, usize) {
        (chroma_dim(self.width), chroma_dim(self.height))
    }
}

fn chroma_dim(luma: u32) -> usize {
    (luma as usize).div_ceil(2)
}

/// Checks plane count, format and size against the negotiated stream.
pub fn validate(image: &RawImage, width: u32, height: u32) -> Result<(), FormatError> {
    if image.planes.len() != 3 {
        return Err(FormatError::PlaneCount(image.planes.len()));
    }
    if image.format != PixelFormat::Yuv420 {
        return Err(FormatError::UnexpectedFormat(image.format));
    }
    if image.width != width || image.height != height {
        return Err(FormatError::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width: image.width,
            actual_height: image.height,
        });
    }
    Ok(())
}

/// Infers the chroma layout from the strides of planes 1 and 2.
pub fn infer_layout(image: &RawImage) -> Result<ChromaLayout, FormatError> {
    if image.planes.len() != 3 {
        return Err(FormatError::PlaneCount(image.planes.len()));
    }
    let cw = chroma_dim(image.width);
    let u = &image.planes[1];
    let v = &image.planes[2];

    let layout = match (u.pixel_stride, v.pixel_stride) {
        (2, 2) => ChromaLayout::SemiPlanarVu,
        (1, 1) => ChromaLayout::PlanarVu,
        _ => {
            return Err(FormatError::UnsupportedLayout {
                pixel_stride: u.pixel_stride.max(v.pixel_stride),
                row_stride: u.row_stride,
            })
        }
    };

    for plane in [u, v] {
        if plane.row_stride < row_span(cw, plane.pixel_stride) {
            return Err(FormatError::UnsupportedLayout {
                pixel_stride: plane.pixel_stride,
                row_stride: plane.row_stride,
            });
        }
    }
    Ok(layout)
}

/// Bytes touched by one row of `cols` samples.
fn row_span(cols: usize, pixel_stride: usize) -> usize {
    if cols == 0 {
        0
    } else {
        (cols - 1) * pixel_stride + 1
    }
}

/// Appends `cols` x `rows` samples of `plane` to `out`.
fn gather(
    plane: &Plane,
    index: usize,
    cols: usize,
    rows: usize,
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let needed = (rows - 1) * plane.row_stride + row_span(cols, plane.pixel_stride);
    if plane.data.len() < needed {
        return Err(FormatError::PlaneTooShort {
            plane: index,
            len: plane.data.len(),
            needed,
        });
    }

    for row in plane.data.chunks(plane.row_stride.max(1)).take(rows) {
        if plane.pixel_stride == 1 {
            out.extend_from_slice(&row[..cols]);
        } else {
            out.extend(row.iter().step_by(plane.pixel_stride).take(cols));
        }
    }
    Ok(())
}

/// Copies the image's planes into a tight buffer in the given layout.
pub fn pack(image: &RawImage, layout: ChromaLayout) -> Result<PackedYuv, FormatError> {
    if image.planes.len() != 3 {
        return Err(FormatError::PlaneCount(image.planes.len()));
    }
    let w = image.width as usize;
    let h = image.height as usize;
    let cw = chroma_dim(image.width);
    let ch = chroma_dim(image.height);

    let mut data = Vec::with_capacity(w * h + 2 * cw * ch);
    gather(&image.planes[0], 0, w, h, &mut data)?;

    match layout {
        ChromaLayout::SemiPlanarVu => {
            let mut v = Vec::with_capacity(cw * ch);
            let mut u = Vec::with_capacity(cw * ch);
            gather(&image.planes[2], 2, cw, ch, &mut v)?;
            gather(&image.planes[1], 1, cw, ch, &mut u)?;
            data.extend(v.into_iter().zip(u).flat_map(|(v, u)| [v, u]));
        }
        ChromaLayout::PlanarVu => {
            gather(&image.planes[2], 2, cw, ch, &mut data)?;
            gather(&image.planes[1], 1, cw, ch, &mut data)?;
        }
    }

    Ok(PackedYuv {
        width: image.width,
        height: image.height,
        layout,
        data,
    })
}

#[inline]
fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// BT.601 full-range conversion of one sample.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    ]
}

/// Converts a packed image to interleaved RGB.
pub fn to_rgb(packed: &PackedYuv) -> Frame {
    let w = packed.width as usize;
    let h = packed.height as usize;
    let (cw, ch) = packed.chroma_size();
    let luma = &packed.data[..w * h];
    let chroma = &packed.data[w * h..];

    let mut pixels = Vec::with_capacity(w * h * RGB_CHANNELS);
    for (y, row) in luma.chunks_exact(w.max(1)).enumerate() {
        let chroma_row = (y / 2) * cw;
        for (x, &luma) in row.iter().enumerate() {
            let ci = chroma_row + x / 2;
            let (u, v) = match packed.layout {
                ChromaLayout::SemiPlanarVu => (chroma[2 * ci + 1], chroma[2 * ci]),
                ChromaLayout::PlanarVu => (chroma[cw * ch + ci], chroma[ci]),
            };
            pixels.extend_from_slice(&yuv_to_rgb(luma, u, v));
        }
    }

    Frame::new(pixels, packed.width, packed.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Facing, SyntheticCamera, SyntheticChroma, TestPattern};

    fn render(chroma: SyntheticChroma, pattern: TestPattern) -> RawImage {
        SyntheticCamera::new("t", Facing::Back, 6, 4)
            .with_chroma(chroma)
            .with_pattern(pattern)
            .render(0, 0, None)
    }

    #[test]
    fn test_mid_gray_semi_planar_is_gray() {
        let image = render(SyntheticChroma::SemiPlanar, TestPattern::MidGray);
        let layout = infer_layout(&image).unwrap();
        assert_eq!(layout, ChromaLayout::SemiPlanarVu);

        let frame = to_rgb(&pack(&image, layout).unwrap());
        assert!(frame.is_valid());
        assert!(frame.pixels().iter().all(|&c| c.abs_diff(128) <= 2));
    }

    #[test]
    fn test_planar_layout_inferred() {
        let image = render(SyntheticChroma::Planar, TestPattern::MidGray);
        assert_eq!(infer_layout(&image).unwrap(), ChromaLayout::PlanarVu);
    }

    #[test]
    fn test_unsupported_pixel_stride() {
        let image = render(
            SyntheticChroma::Unsupported { pixel_stride: 3 },
            TestPattern::MidGray,
        );
        assert!(matches!(
            infer_layout(&image),
            Err(FormatError::UnsupportedLayout { pixel_stride: 3, .. })
        ));
    }

    #[test]
    fn test_short_row_stride_rejected() {
        let mut image = render(SyntheticChroma::Planar, TestPattern::MidGray);
        image.planes[1].row_stride = 1;
        assert!(infer_layout(&image).is_err());
    }

    #[test]
    fn test_layouts_agree() {
        let semi = render(SyntheticChroma::SemiPlanar, TestPattern::Gradient);
        let planar = render(SyntheticChroma::Planar, TestPattern::Gradient);

        let a = to_rgb(&pack(&semi, infer_layout(&semi).unwrap()).unwrap());
        let b = to_rgb(&pack(&planar, infer_layout(&planar).unwrap()).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_chroma_order() {
        // Pure V pushes red up and blue down.
        let mut image = render(SyntheticChroma::Planar, TestPattern::MidGray);
        image.planes[2].data.fill(255);
        let frame = to_rgb(&pack(&image, ChromaLayout::PlanarVu).unwrap());
        let [r, _, b] = frame.pixel(0, 0).unwrap();
        assert!(r > 200);
        assert!(b.abs_diff(128) <= 2);
    }

    #[test]
    fn test_truncated_plane() {
        let mut image = render(SyntheticChroma::Planar, TestPattern::MidGray);
        image.planes[0].data.truncate(3);
        assert!(matches!(
            pack(&image, ChromaLayout::PlanarVu),
            Err(FormatError::PlaneTooShort { plane: 0, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_mismatches() {
        let image = render(SyntheticChroma::Planar, TestPattern::MidGray);
        assert!(validate(&image, 6, 4).is_ok());
        assert!(matches!(
            validate(&image, 8, 4),
            Err(FormatError::DimensionMismatch { .. })
        ));

        let mut two_planes = image.clone();
        two_planes.planes.pop();
        assert_eq!(validate(&two_planes, 6, 4), Err(FormatError::PlaneCount(2)));

        let mut jpeg = image;
        jpeg.format = PixelFormat::Jpeg;
        assert_eq!(
            validate(&jpeg, 6, 4),
            Err(FormatError::UnexpectedFormat(PixelFormat::Jpeg))
        );
    }
}
