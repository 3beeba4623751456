//! Lightfield images and the quilt codec
//!
//! A quilt tiles `rows × columns` equally sized views into one image. View 0
//! sits in the top-left cell; views run left to right, then top to bottom.
//!
//! Pixel data is held as `Array3<u8>` shaped `(height, width, channels)`.
//! Decoding reinterprets the quilt as `(rows, view_h, columns, view_w, ch)`,
//! swaps the row/column axes and flattens to one array per view; encoding is
//! the exact inverse.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use ndarray::{s, Array, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

use crate::layout::{LayoutCatalog, QuiltLayout};

#[derive(Error, Debug)]
pub enum QuiltError {
    #[error("Expected {expected} views for this quilt layout, got {actual}")]
    ViewCount { expected: usize, actual: usize },
    #[error("View {index} has shape {actual:?}, expected {expected:?}")]
    ViewShape {
        index: usize,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("Views are {actual:?} pixels (h, w), the layout expects {expected:?}")]
    ViewSize {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("{channels} channels do not match color mode {mode:?}")]
    ChannelMismatch { mode: ColorMode, channels: usize },
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(usize),
    #[error("No quilt layout matches an image of {width}x{height} pixels")]
    NoMatchingLayout { width: u32, height: u32 },
    #[error("Quilt of {width}x{height} pixels is too small for a {columns}x{rows} grid")]
    TooSmall {
        width: usize,
        height: usize,
        columns: u32,
        rows: u32,
    },
    #[error("Lightfield has no views")]
    NoViews,
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Pixel color layout of views and quilts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Gray,
    Rgb,
    Rgba,
}

impl ColorMode {
    pub fn channels(self) -> usize {
        match self {
            ColorMode::Gray => 1,
            ColorMode::Rgb => 3,
            ColorMode::Rgba => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(ColorMode::Gray),
            3 => Some(ColorMode::Rgb),
            4 => Some(ColorMode::Rgba),
            _ => None,
        }
    }
}

/// Storage format the views of a lightfield were supplied in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewFormat {
    /// In-memory pixel arrays
    Array,
    /// Decoded images
    Image,
    /// PNG encoded buffers
    Png,
}

/// A set of views handed to [`Lightfield::set_views`]
#[derive(Debug, Clone)]
pub enum ViewSet {
    Arrays(Vec<Array3<u8>>),
    Images(Vec<DynamicImage>),
    Png(Vec<Vec<u8>>),
}

impl ViewSet {
    pub fn len(&self) -> usize {
        match self {
            ViewSet::Arrays(v) => v.len(),
            ViewSet::Images(v) => v.len(),
            ViewSet::Png(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> ViewFormat {
        match self {
            ViewSet::Arrays(_) => ViewFormat::Array,
            ViewSet::Images(_) => ViewFormat::Image,
            ViewSet::Png(_) => ViewFormat::Png,
        }
    }

    fn into_arrays(self) -> Result<Vec<Array3<u8>>, QuiltError> {
        match self {
            ViewSet::Arrays(views) => Ok(views),
            ViewSet::Images(images) => images.iter().map(image_to_array).collect(),
            ViewSet::Png(buffers) => buffers
                .iter()
                .map(|bytes| {
                    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
                    image_to_array(&image)
                })
                .collect(),
        }
    }
}

/// A set of views bound to one quilt layout
#[derive(Debug, Clone)]
pub struct Lightfield {
    layout: QuiltLayout,
    color_mode: ColorMode,
    format: ViewFormat,
    views: Vec<Array3<u8>>,
}

impl Lightfield {
    /// Empty lightfield; views are supplied with [`Lightfield::set_views`]
    pub fn new(layout: QuiltLayout, color_mode: ColorMode) -> Self {
        Self {
            layout,
            color_mode,
            format: ViewFormat::Array,
            views: Vec::new(),
        }
    }

    pub fn layout(&self) -> &QuiltLayout {
        &self.layout
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn channels(&self) -> usize {
        self.color_mode.channels()
    }

    pub fn format(&self) -> ViewFormat {
        self.format
    }

    pub fn views(&self) -> &[Array3<u8>] {
        &self.views
    }

    pub fn has_views(&self) -> bool {
        !self.views.is_empty()
    }

    /// Replace the views. The count must equal `rows × columns`, every view
    /// must have the layout's view size and the lightfield's channel count.
    pub fn set_views(&mut self, views: ViewSet) -> Result<(), QuiltError> {
        let expected = self.layout.view_count();
        if views.len() != expected {
            return Err(QuiltError::ViewCount {
                expected,
                actual: views.len(),
            });
        }

        let format = views.format();
        let views = views.into_arrays()?;
        check_uniform(&views)?;
        check_view_size(&views, &self.layout)?;

        let channels = views[0].dim().2;
        if channels != self.color_mode.channels() {
            return Err(QuiltError::ChannelMismatch {
                mode: self.color_mode,
                channels,
            });
        }

        self.views = views;
        self.format = format;
        Ok(())
    }

    /// Views as decoded images
    pub fn view_images(&self) -> Result<Vec<DynamicImage>, QuiltError> {
        self.views.iter().map(|v| array_to_image(v.view())).collect()
    }

    /// Composite quilt as a pixel array
    pub fn to_quilt(&self) -> Result<Array3<u8>, QuiltError> {
        if self.views.is_empty() {
            return Err(QuiltError::NoViews);
        }
        encode_quilt(&self.views, &self.layout)
    }

    /// Composite quilt as an in-memory PNG
    pub fn to_png(&self) -> Result<Vec<u8>, QuiltError> {
        let quilt = self.to_quilt()?;
        let image = array_to_image(quilt.view())?;

        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        debug!(
            width = image.width(),
            height = image.height(),
            size = bytes.len(),
            "Encoded quilt"
        );
        Ok(bytes)
    }

    /// Split a quilt array into views, picking the layout from the catalog
    pub fn from_quilt(quilt: Array3<u8>, catalog: &LayoutCatalog) -> Result<Self, QuiltError> {
        let (height, width, channels) = quilt.dim();
        let (id, layout) = catalog
            .match_dimensions(width as u32, height as u32)
            .ok_or(QuiltError::NoMatchingLayout {
                width: width as u32,
                height: height as u32,
            })?;
        let color_mode =
            ColorMode::from_channels(channels).ok_or(QuiltError::UnsupportedChannels(channels))?;

        debug!(layout = %id, width, height, "Matched quilt to layout");

        let views = decode_quilt(quilt.view(), layout)?;
        // Views follow the image, which may be off the catalog size by the tolerance
        let layout = QuiltLayout {
            quilt_width: width as u32,
            quilt_height: height as u32,
            view_width: (width / layout.columns as usize) as u32,
            view_height: (height / layout.rows as usize) as u32,
            ..layout.clone()
        };
        Ok(Self {
            layout,
            color_mode,
            format: ViewFormat::Array,
            views,
        })
    }

    pub fn from_image(image: &DynamicImage, catalog: &LayoutCatalog) -> Result<Self, QuiltError> {
        let mut lightfield = Self::from_quilt(image_to_array(image)?, catalog)?;
        lightfield.format = ViewFormat::Image;
        Ok(lightfield)
    }

    pub fn from_png(bytes: &[u8], catalog: &LayoutCatalog) -> Result<Self, QuiltError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        let mut lightfield = Self::from_quilt(image_to_array(&image)?, catalog)?;
        lightfield.format = ViewFormat::Png;
        Ok(lightfield)
    }
}

/// Tile views into a quilt of `(rows × view_h, columns × view_w, channels)`
pub fn encode_quilt(views: &[Array3<u8>], layout: &QuiltLayout) -> Result<Array3<u8>, QuiltError> {
    let expected = layout.view_count();
    if views.len() != expected {
        return Err(QuiltError::ViewCount {
            expected,
            actual: views.len(),
        });
    }
    check_uniform(views)?;
    check_view_size(views, layout)?;

    let (view_h, view_w, channels) = views[0].dim();
    let rows = layout.rows as usize;
    let columns = layout.columns as usize;

    let mut data = Vec::with_capacity(views.len() * view_h * view_w * channels);
    for view in views {
        data.extend(view.iter().copied());
    }

    // (rows, columns, view_h, view_w, ch) -> (rows, view_h, columns, view_w, ch)
    let stacked = Array::from_shape_vec((rows, columns, view_h, view_w, channels), data)?;
    let interleaved = stacked.permuted_axes([0, 2, 1, 3, 4]);
    let pixels: Vec<u8> = interleaved.iter().copied().collect();

    Ok(Array3::from_shape_vec(
        (rows * view_h, columns * view_w, channels),
        pixels,
    )?)
}

/// Split a quilt into its views, cropping any slack beyond whole cells
pub fn decode_quilt(quilt: ArrayView3<u8>, layout: &QuiltLayout) -> Result<Vec<Array3<u8>>, QuiltError> {
    let (height, width, channels) = quilt.dim();
    let rows = layout.rows as usize;
    let columns = layout.columns as usize;
    let view_h = height / rows;
    let view_w = width / columns;

    if view_h == 0 || view_w == 0 {
        return Err(QuiltError::TooSmall {
            width,
            height,
            columns: layout.columns,
            rows: layout.rows,
        });
    }

    let cropped = quilt.slice(s![..rows * view_h, ..columns * view_w, ..]);
    let data: Vec<u8> = cropped.iter().copied().collect();

    // (rows, view_h, columns, view_w, ch) -> (rows, columns, view_h, view_w, ch)
    let grid = Array::from_shape_vec((rows, view_h, columns, view_w, channels), data)?;
    let cells = grid.permuted_axes([0, 2, 1, 3, 4]);
    let flat: Vec<u8> = cells.iter().copied().collect();
    let stacked = Array::from_shape_vec((rows * columns, view_h, view_w, channels), flat)?;

    Ok(stacked.outer_iter().map(|view| view.to_owned()).collect())
}

fn check_uniform(views: &[Array3<u8>]) -> Result<(), QuiltError> {
    let Some(first) = views.first() else {
        return Ok(());
    };
    let expected = first.dim();
    for (index, view) in views.iter().enumerate() {
        if view.dim() != expected {
            return Err(QuiltError::ViewShape {
                index,
                expected,
                actual: view.dim(),
            });
        }
    }
    Ok(())
}

fn check_view_size(views: &[Array3<u8>], layout: &QuiltLayout) -> Result<(), QuiltError> {
    let expected = (layout.view_height as usize, layout.view_width as usize);
    match views.first() {
        Some(view) if (view.dim().0, view.dim().1) != expected => Err(QuiltError::ViewSize {
            expected,
            actual: (view.dim().0, view.dim().1),
        }),
        _ => Ok(()),
    }
}

/// Convert an image to a `(height, width, channels)` array, keeping alpha
/// and grayscale where present
pub fn image_to_array(image: &DynamicImage) -> Result<Array3<u8>, QuiltError> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let color = image.color();
    let (channels, raw) = if color.channel_count() == 1 {
        (1, image.to_luma8().into_raw())
    } else if color.has_alpha() {
        (4, image.to_rgba8().into_raw())
    } else {
        (3, image.to_rgb8().into_raw())
    };
    Ok(Array3::from_shape_vec((height, width, channels), raw)?)
}

/// Convert a `(height, width, channels)` array to an image
pub fn array_to_image(array: ArrayView3<u8>) -> Result<DynamicImage, QuiltError> {
    let (height, width, channels) = array.dim();
    let raw: Vec<u8> = array.iter().copied().collect();
    let (w, h) = (width as u32, height as u32);

    let image = match channels {
        1 => GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, raw).map(DynamicImage::ImageRgba8),
        other => return Err(QuiltError::UnsupportedChannels(other)),
    };
    image.ok_or(QuiltError::UnsupportedChannels(channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutId;

    /// Solid view whose first channel carries the view index
    fn solid_view(height: usize, width: usize, index: usize) -> Array3<u8> {
        let mut view = Array3::<u8>::zeros((height, width, 3));
        view.slice_mut(s![.., .., 0]).fill(index as u8);
        view.slice_mut(s![.., .., 1]).fill(255 - index as u8);
        view
    }

    /// Views with a per-pixel gradient so misplaced pixels are detectable
    fn gradient_views(layout: &QuiltLayout, channels: usize) -> Vec<Array3<u8>> {
        let (h, w) = (layout.view_height as usize, layout.view_width as usize);
        (0..layout.view_count())
            .map(|i| Array3::from_shape_fn((h, w, channels), |(y, x, c)| ((i * 31 + y * 7 + x * 3 + c) % 251) as u8))
            .collect()
    }

    #[test]
    fn test_view_count_rejected() {
        let layout = QuiltLayout::new(4, 2, 8, 6).unwrap();
        let mut lightfield = Lightfield::new(layout.clone(), ColorMode::Rgb);

        for count in [0, 7, 9] {
            let views = gradient_views(&layout, 3).into_iter().cycle().take(count).collect();
            match lightfield.set_views(ViewSet::Arrays(views)) {
                Err(QuiltError::ViewCount { expected, actual }) => {
                    assert_eq!(expected, 8);
                    assert_eq!(actual, count);
                }
                other => panic!("expected view count error, got {:?}", other),
            }
        }
        assert!(!lightfield.has_views());

        lightfield.set_views(ViewSet::Arrays(gradient_views(&layout, 3))).unwrap();
        assert_eq!(lightfield.views().len(), 8);
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let layout = QuiltLayout::new(2, 1, 4, 4).unwrap();
        let mut lightfield = Lightfield::new(layout, ColorMode::Rgb);
        let views = vec![Array3::zeros((4, 4, 3)), Array3::zeros((4, 5, 3))];
        assert!(matches!(
            lightfield.set_views(ViewSet::Arrays(views)),
            Err(QuiltError::ViewShape { index: 1, .. })
        ));

        let views = vec![Array3::zeros((4, 4, 4)), Array3::zeros((4, 4, 4))];
        assert!(matches!(
            lightfield.set_views(ViewSet::Arrays(views)),
            Err(QuiltError::ChannelMismatch { channels: 4, .. })
        ));
    }

    #[test]
    fn test_view_size_must_match_layout() {
        let catalog = LayoutCatalog::builtin();
        let portrait = catalog.get(LayoutId(3)).unwrap().clone();
        let mut lightfield = Lightfield::new(portrait.clone(), ColorMode::Rgb);

        let views = vec![Array3::<u8>::zeros((4, 4, 3)); 48];
        match lightfield.set_views(ViewSet::Arrays(views.clone())) {
            Err(QuiltError::ViewSize { expected, actual }) => {
                assert_eq!(expected, (560, 420));
                assert_eq!(actual, (4, 4));
            }
            other => panic!("expected view size error, got {:?}", other),
        }
        assert!(!lightfield.has_views());
        assert!(matches!(
            encode_quilt(&views, &portrait),
            Err(QuiltError::ViewSize { .. })
        ));
    }

    #[test]
    fn test_layout_follows_decoded_views() {
        let catalog = LayoutCatalog::builtin();
        let quilt = Array3::<u8>::zeros((2047, 2047, 3));

        let lightfield = Lightfield::from_quilt(quilt, &catalog).unwrap();
        let layout = lightfield.layout();
        assert_eq!(layout.description, "2k Quilt, 32 Views");
        assert_eq!((layout.columns, layout.rows), (4, 8));
        assert_eq!((layout.quilt_width, layout.quilt_height), (2047, 2047));
        assert_eq!((layout.view_width, layout.view_height), (511, 255));
        assert_eq!(lightfield.views()[0].dim(), (255, 511, 3));
        assert!(layout.same_format(catalog.get(LayoutId(0)).unwrap()));

        // The decoded lightfield encodes again without a size mismatch
        let encoded = lightfield.to_quilt().unwrap();
        assert_eq!(encoded.dim(), (2040, 2044, 3));
    }

    #[test]
    fn test_encode_decode_inverse() {
        let layout = QuiltLayout::new(3, 2, 5, 4).unwrap();
        for channels in [1, 3, 4] {
            let views = gradient_views(&layout, channels);
            let quilt = encode_quilt(&views, &layout).unwrap();
            assert_eq!(quilt.dim(), (8, 15, channels));

            let decoded = decode_quilt(quilt.view(), &layout).unwrap();
            assert_eq!(decoded, views);

            let reencoded = encode_quilt(&decoded, &layout).unwrap();
            assert_eq!(reencoded, quilt);
        }
    }

    #[test]
    fn test_view_placement() {
        // 2 columns, 2 rows: view 1 is top-right, view 2 bottom-left
        let layout = QuiltLayout::new(2, 2, 3, 2).unwrap();
        let views: Vec<_> = (0..4).map(|i| solid_view(2, 3, i)).collect();
        let quilt = encode_quilt(&views, &layout).unwrap();

        assert_eq!(quilt[[0, 0, 0]], 0);
        assert_eq!(quilt[[0, 3, 0]], 1);
        assert_eq!(quilt[[2, 0, 0]], 2);
        assert_eq!(quilt[[3, 5, 0]], 3);
    }

    #[test]
    fn test_decode_crops_slack() {
        let mut catalog = LayoutCatalog::empty();
        let layout = QuiltLayout::from_quilt("small", 10, 9, 2, 3).unwrap();
        let id = catalog.append(layout.clone());
        assert_eq!(id, LayoutId(0));

        let views: Vec<_> = (0..6).map(|i| solid_view(3, 5, i)).collect();
        let quilt = encode_quilt(&views, &layout).unwrap();

        // One extra column and row of slack
        let mut padded = Array3::<u8>::from_elem((10, 11, 3), 200);
        padded.slice_mut(s![..9, ..10, ..]).assign(&quilt);

        let lightfield = Lightfield::from_quilt(padded, &catalog).unwrap();
        assert_eq!(lightfield.views(), views.as_slice());
        assert_eq!(lightfield.color_mode(), ColorMode::Rgb);
    }

    #[test]
    fn test_no_matching_layout() {
        let catalog = LayoutCatalog::builtin();
        let quilt = Array3::<u8>::zeros((100, 120, 3));
        assert!(matches!(
            Lightfield::from_quilt(quilt, &catalog),
            Err(QuiltError::NoMatchingLayout { width: 120, height: 100 })
        ));
    }

    #[test]
    fn test_png_round_trip() {
        let mut catalog = LayoutCatalog::empty();
        let layout = QuiltLayout::new(4, 2, 6, 5).unwrap();
        catalog.append(layout.clone());

        let mut lightfield = Lightfield::new(layout.clone(), ColorMode::Rgba);
        let views = gradient_views(&layout, 4);
        lightfield.set_views(ViewSet::Arrays(views.clone())).unwrap();

        let png = lightfield.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let restored = Lightfield::from_png(&png, &catalog).unwrap();
        assert_eq!(restored.format(), ViewFormat::Png);
        assert_eq!(restored.color_mode(), ColorMode::Rgba);
        assert_eq!(restored.views(), views.as_slice());
    }

    #[test]
    fn test_views_from_images() {
        let layout = QuiltLayout::new(2, 1, 3, 3).unwrap();
        let mut lightfield = Lightfield::new(layout, ColorMode::Rgb);
        let images = vec![
            DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, image::Rgb([1, 2, 3]))),
            DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, image::Rgb([4, 5, 6]))),
        ];
        lightfield.set_views(ViewSet::Images(images)).unwrap();

        assert_eq!(lightfield.format(), ViewFormat::Image);
        assert_eq!(lightfield.views()[1][[2, 2, 2]], 6);

        let quilt = lightfield.to_quilt().unwrap();
        assert_eq!(quilt.dim(), (3, 6, 3));
        assert_eq!(quilt[[0, 3, 0]], 4);
    }

    #[test]
    fn test_four_k_quilt_ordering() {
        let layout = QuiltLayout::new(5, 9, 819, 455).unwrap();
        let views: Vec<_> = (0..45).map(|i| solid_view(455, 819, i)).collect();

        let mut lightfield = Lightfield::new(layout.clone(), ColorMode::Rgb);
        lightfield.set_views(ViewSet::Arrays(views)).unwrap();

        let quilt = lightfield.to_quilt().unwrap();
        let (height, width, _) = quilt.dim();
        assert!(height.abs_diff(4095) <= 1);
        assert!(width.abs_diff(4095) <= 1);

        let catalog = LayoutCatalog::builtin();
        let decoded = Lightfield::from_quilt(quilt, &catalog).unwrap();
        assert_eq!(decoded.layout().view_count(), 45);
        for (i, view) in decoded.views().iter().enumerate() {
            assert_eq!(view.dim(), (455, 819, 3));
            assert_eq!(view[[0, 0, 0]], i as u8);
            assert_eq!(view[[454, 818, 0]], i as u8);
            assert_eq!(view[[227, 409, 1]], 255 - i as u8);
        }
    }
}
