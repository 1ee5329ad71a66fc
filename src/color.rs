//! Scalar to color conversion for display.
//!
//! The color stage turns a resliced image into 8-bit pixels, either through
//! a [`LookupTable`] applied to the first component or, without a table, by
//! treating the scalars as colors that only need clamping and a change of
//! layout. In bypass mode the scalars are handed on as `f32` for windowing
//! further down the line.

use crate::enums::ColorFormat;
use crate::error::ResliceError;
use crate::volume::{Scalar, Scalars, Volume, dispatch_scalars};

use ndarray::{Array3, Array4, Axis, Zip};

/// Maps a scalar range onto a table of RGBA entries.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupTable {
    range: (f64, f64),
    table: Vec<[u8; 4]>,
}

impl LookupTable {
    /// 256-entry opaque greyscale ramp over `range`.
    pub fn grayscale(range: (f64, f64)) -> Self {
        Self {
            range,
            table: (0..=255u8).map(|v| [v, v, v, 255]).collect(),
        }
    }

    /// Greyscale ramp over `level ± window / 2`.
    pub fn from_window_level(window: f64, level: f64) -> Self {
        let half = 0.5 * window.abs();
        Self::grayscale((level - half, level + half))
    }

    pub fn with_table(range: (f64, f64), table: Vec<[u8; 4]>) -> Self {
        if table.is_empty() {
            return Self::grayscale(range);
        }
        Self { range, table }
    }

    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    pub fn set_range(&mut self, range: (f64, f64)) {
        self.range = range;
    }

    #[inline]
    pub fn map(&self, value: f64) -> [u8; 4] {
        let (lo, hi) = self.range;
        let last = self.table.len() - 1;
        let index = if hi <= lo {
            if value < lo { 0 } else { last }
        } else if value.is_nan() {
            0
        } else {
            let t = (value - lo) / (hi - lo);
            ((t * self.table.len() as f64).floor().max(0.0) as usize).min(last)
        };
        self.table[index]
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::grayscale((0.0, 255.0))
    }
}

/// Converts resliced scalars into display pixels.
#[derive(Clone, Debug)]
pub struct ColorStage {
    lookup_table: Option<LookupTable>,
    output_format: ColorFormat,
    bypass: bool,
    background: [f64; 4],
    opacity: f64,
}

impl Default for ColorStage {
    fn default() -> Self {
        Self {
            lookup_table: None,
            output_format: ColorFormat::Rgba,
            bypass: false,
            background: [0.0; 4],
            opacity: 1.0,
        }
    }
}

impl ColorStage {
    pub fn new(lookup_table: Option<LookupTable>, output_format: ColorFormat) -> Self {
        Self {
            lookup_table,
            output_format,
            ..Default::default()
        }
    }

    pub fn lookup_table(&self) -> Option<&LookupTable> {
        self.lookup_table.as_ref()
    }

    pub fn set_lookup_table(&mut self, table: Option<LookupTable>) {
        self.lookup_table = table;
    }

    pub fn output_format(&self) -> ColorFormat {
        self.output_format
    }

    pub fn set_output_format(&mut self, format: ColorFormat) {
        self.output_format = format;
    }

    pub fn bypass(&self) -> bool {
        self.bypass
    }

    /// When bypassed, [`ColorStage::map_to_colors`] always produces `f32`
    /// scalars with the input components instead of 8-bit colors.
    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    /// RGBA color, 0 to 255 per channel, for pixels outside the input.
    pub fn set_background_color(&mut self, color: [f64; 4]) {
        self.background = color;
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Map `image` to colors. Pixels whose `stencil` entry is false get the
    /// background color.
    pub fn map_to_colors(
        &self,
        image: &Volume,
        stencil: Option<&Array3<bool>>,
    ) -> Result<Volume, ResliceError> {
        let _span = tracing::info_span!("map_to_colors", bypass = self.bypass).entered();
        let (depth, height, width, components) = image.scalars().dim();

        let scalars = if self.bypass {
            Scalars::F32(dispatch_scalars!(image.scalars(), a => a.mapv(|v| v.to_f64() as f32)))
        } else {
            if self.lookup_table.is_none() && !(1..=4).contains(&components) {
                return Err(ResliceError::UnsupportedComponents(components));
            }
            let format = self.output_format;
            let background = self.background.map(|v| v.clamp(0.0, 255.0).round() as u8);
            let mut colors = Array4::<u8>::zeros((depth, height, width, format.components()));
            dispatch_scalars!(image.scalars(), a => {
                Zip::indexed(colors.lanes_mut(Axis(3)))
                    .and(a.lanes(Axis(3)))
                    .for_each(|(z, y, x), mut out, input| {
                        let inside = stencil.and_then(|s| s.get((z, y, x)).copied()).unwrap_or(true);
                        let rgba = if inside {
                            self.to_rgba(input.iter().map(|v| v.to_f64()))
                        } else {
                            background
                        };
                        let pixel = convert(rgba, format);
                        for (o, p) in out.iter_mut().zip(pixel.iter()) {
                            *o = *p;
                        }
                    });
            });
            Scalars::U8(colors)
        };

        Volume::try_new(
            scalars,
            image.extent(),
            image.spacing(),
            image.origin(),
            image.direction(),
        )
    }

    fn to_rgba(&self, mut values: impl Iterator<Item = f64>) -> [u8; 4] {
        let mut rgba = match &self.lookup_table {
            Some(table) => table.map(values.next().unwrap_or(0.0)),
            None => {
                let mut channel = || values.next().map(clamp_u8);
                match (channel(), channel(), channel(), channel()) {
                    (Some(l), None, ..) => [l, l, l, 255],
                    (Some(l), Some(a), None, _) => [l, l, l, a],
                    (Some(r), Some(g), Some(b), None) => [r, g, b, 255],
                    (Some(r), Some(g), Some(b), Some(a)) => [r, g, b, a],
                    (None, ..) => [0, 0, 0, 255],
                }
            }
        };
        if self.opacity < 1.0 {
            rgba[3] = (rgba[3] as f64 * self.opacity).round() as u8;
        }
        rgba
    }
}

#[inline]
fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 255.0).round() as u8
    }
}

#[inline]
fn luminance(rgba: [u8; 4]) -> u8 {
    (0.30 * rgba[0] as f64 + 0.59 * rgba[1] as f64 + 0.11 * rgba[2] as f64)
        .round()
        .min(255.0) as u8
}

fn convert(rgba: [u8; 4], format: ColorFormat) -> [u8; 4] {
    match format {
        ColorFormat::Luminance => [luminance(rgba), 0, 0, 0],
        ColorFormat::LuminanceAlpha => [luminance(rgba), rgba[3], 0, 0],
        ColorFormat::Rgb | ColorFormat::Rgba => rgba,
    }
}

/// Alternating cells with zero alpha, for comparing two stacked images.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Checkerboard {
    /// Cell size in slice units.
    pub spacing: [f64; 2],
    /// Shift of the pattern as a fraction of a cell.
    pub offset: [f64; 2],
}

impl Default for Checkerboard {
    fn default() -> Self {
        Self {
            spacing: [10.0, 10.0],
            offset: [0.0, 0.0],
        }
    }
}

impl Checkerboard {
    /// Clear the alpha of every other cell of an 8-bit image with alpha.
    ///
    /// The pattern is anchored at `center`, normally the camera focal point
    /// in slice coordinates, so it stays put while the image grid moves.
    pub fn apply(&self, image: &mut Volume, center: [f64; 2]) {
        let origin = image.origin();
        let pixel_spacing = image.spacing();
        let extent = image.extent();
        let Scalars::U8(data) = image.scalars_mut() else {
            tracing::warn!("checkerboard needs 8-bit colors, skipping");
            return;
        };
        let alpha = match data.dim().3 {
            2 => 1,
            4 => 3,
            _ => return,
        };

        let mut cell = [0.0; 2];
        let mut shift = [0.0; 2];
        for axis in 0..2 {
            let step = if pixel_spacing[axis] == 0.0 { 1.0 } else { pixel_spacing[axis] };
            cell[axis] = (self.spacing[axis] / step).abs().max(f64::MIN_POSITIVE);
            let anchor = self.offset[axis] * self.spacing[axis] + center[axis];
            shift[axis] = (anchor - origin[axis]) / step;
        }

        for ((_, y, x, c), value) in data.indexed_iter_mut() {
            if c != alpha {
                continue;
            }
            let i = (extent[0] + x as i32) as f64;
            let j = (extent[2] + y as i32) as f64;
            let ix = ((i - shift[0]) / cell[0]).floor() as i64;
            let iy = ((j - shift[1]) / cell[1]).floor() as i64;
            if (ix + iy).rem_euclid(2) == 1 {
                *value = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_image(values: Vec<f64>, components: usize) -> Volume {
        let width = values.len() / components;
        let data = Array4::from_shape_vec((1, 1, width, components), values).unwrap();
        Volume::new(Scalars::F64(data), [1.0; 3])
    }

    fn pixels(volume: &Volume) -> Vec<u8> {
        match volume.scalars() {
            Scalars::U8(a) => a.iter().copied().collect(),
            other => panic!("expected u8 colors, got {:?}", other.scalar_type()),
        }
    }

    #[test]
    fn test_window_level_table() {
        let table = LookupTable::from_window_level(100.0, 50.0);
        assert_eq!(table.range(), (0.0, 100.0));
        assert_eq!(table.map(-10.0), [0, 0, 0, 255]);
        assert_eq!(table.map(100.0), [255, 255, 255, 255]);
        assert_eq!(table.map(50.0), [128, 128, 128, 255]);
        assert_eq!(table.map(f64::NAN), [0, 0, 0, 255]);
    }

    #[test]
    fn test_lookup_table_to_rgba() {
        let image = scalar_image(vec![0.0, 255.0], 1);
        let stage = ColorStage::new(Some(LookupTable::default()), ColorFormat::Rgba);
        let colors = stage.map_to_colors(&image, None).unwrap();
        assert_eq!(colors.number_of_components(), 4);
        assert_eq!(pixels(&colors), vec![0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_rgb_without_table_to_luminance() {
        let image = scalar_image(vec![100.0, 200.0, 300.0], 3);
        let stage = ColorStage::new(None, ColorFormat::Luminance);
        let colors = stage.map_to_colors(&image, None).unwrap();
        assert_eq!(pixels(&colors), vec![176]);
    }

    #[test]
    fn test_luminance_alpha_gets_opaque() {
        let image = scalar_image(vec![-20.0], 1);
        let stage = ColorStage::new(None, ColorFormat::LuminanceAlpha);
        assert_eq!(pixels(&stage.map_to_colors(&image, None).unwrap()), vec![0, 255]);
    }

    #[test]
    fn test_background_and_opacity() {
        let image = scalar_image(vec![10.0, 20.0], 1);
        let mut stage = ColorStage::new(None, ColorFormat::Rgba);
        stage.set_background_color([1.0, 2.0, 3.0, 0.0]);
        stage.set_opacity(0.5);
        let stencil = Array3::from_shape_vec((1, 1, 2), vec![true, false]).unwrap();
        let colors = stage.map_to_colors(&image, Some(&stencil)).unwrap();
        assert_eq!(pixels(&colors), vec![10, 10, 10, 128, 1, 2, 3, 0]);
    }

    #[test]
    fn test_bypass_keeps_scalars() {
        let image = scalar_image(vec![-1000.5, 3000.0], 1);
        let mut stage = ColorStage::default();
        stage.set_bypass(true);
        let out = stage.map_to_colors(&image, None).unwrap();
        match out.scalars() {
            Scalars::F32(a) => assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![-1000.5, 3000.0]),
            other => panic!("expected f32, got {:?}", other.scalar_type()),
        }
    }

    #[test]
    fn test_too_many_components() {
        let image = scalar_image(vec![0.0; 5], 5);
        let stage = ColorStage::default();
        assert!(matches!(
            stage.map_to_colors(&image, None),
            Err(ResliceError::UnsupportedComponents(5))
        ));
    }

    #[test]
    fn test_checkerboard_alternates() {
        let data = Array4::from_elem((1, 2, 4, 4), 255u8);
        let mut image = Volume::new(Scalars::U8(data), [1.0; 3]);
        let board = Checkerboard {
            spacing: [2.0, 1.0],
            offset: [0.0, 0.0],
        };
        board.apply(&mut image, [0.0, 0.0]);
        let alpha: Vec<u8> = pixels(&image).chunks(4).map(|p| p[3]).collect();
        assert_eq!(alpha, vec![255, 255, 0, 0, 0, 0, 255, 255]);
    }
}
