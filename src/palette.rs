//! Colour table with semantic ranges (company colours, animated lights,
//! process colours, non-renderable ranges).
//!
//! Mirrors `palette.go`'s `Palette`/`PaletteRange`, but loaded via `serde`
//! instead of `encoding/json`, and with the per-category subpalettes
//! pre-built once at load time rather than recomputed per lookup.

use std::io::Read;

use serde::Deserialize;

use crate::error::{RenderError, Result};

/// Sentinel colour used in the category subpalettes to mark indices that do
/// not belong to that category, so nearest-colour search never picks them.
pub const SENTINEL: Rgb = Rgb { r: 65535.0, g: 0.0, b: 65535.0 };

/// A 16-bit-per-channel linear colour.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Rgb { r, g, b }
    }

    pub fn is_sentinel(self) -> bool {
        self == SENTINEL
    }

    pub fn add(self, other: Self) -> Self {
        Rgb::new(self.r + other.r, self.g + other.g, self.b + other.b)
    }

    pub fn subtract(self, other: Self) -> Self {
        Rgb::new(self.r - other.r, self.g - other.g, self.b - other.b)
    }

    pub fn multiply_by(self, by: f64) -> Self {
        Rgb::new(self.r * by, self.g * by, self.b * by)
    }

    pub fn lerp(self, other: Self, amt: f64) -> Self {
        self.multiply_by(1.0 - amt).add(other.multiply_by(amt))
    }

    /// Squared distance between two colours, used by nearest-colour search.
    pub fn square_diff(self, other: Self) -> f64 {
        let d = self.subtract(other);
        d.r * d.r + d.g * d.g + d.b * d.b
    }

    /// Clamp to `[256, 65535-256]`, avoiding the palette's index-0/255
    /// sentinels when this colour is later quantised.
    pub fn clamp_strict(self) -> Self {
        Rgb::new(
            self.r.clamp(256.0, 65535.0 - 256.0),
            self.g.clamp(256.0, 65535.0 - 256.0),
            self.b.clamp(256.0, 65535.0 - 256.0),
        )
    }

    /// Clamp to the full `[0, 65535]` channel range.
    pub fn clamp_permissive(self) -> Self {
        Rgb::new(self.r.clamp(0.0, 65535.0), self.g.clamp(0.0, 65535.0), self.b.clamp(0.0, 65535.0))
    }
}

fn default_gap() -> i32 {
    6
}

fn default_expected_range() -> i32 {
    3
}

/// A contiguous, disjoint span of palette indices sharing semantics.
#[derive(Debug, Clone, Deserialize)]
pub struct PaletteRange {
    pub start: usize,
    pub end: usize,
    #[serde(default, rename = "is_primary_company_colour")]
    pub primary_company_colour: bool,
    #[serde(default, rename = "is_secondary_company_colour")]
    pub secondary_company_colour: bool,
    #[serde(default, rename = "is_animated_light")]
    pub animated_light: bool,
    #[serde(default, rename = "is_process_colour")]
    pub process_colour: bool,
    #[serde(default)]
    pub non_renderable: bool,
    #[serde(default)]
    pub smoothness: i32,
    #[serde(default = "default_expected_range")]
    pub expected_colour_range: i32,
    #[serde(default = "default_gap")]
    pub max_gap_in_region: i32,
}

impl PaletteRange {
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    pub fn is_company_colour(&self) -> bool {
        self.primary_company_colour || self.secondary_company_colour
    }
}

#[derive(Debug, Deserialize)]
struct PaletteJson {
    entries: Vec<[u8; 3]>,
    #[serde(default)]
    ranges: Vec<PaletteRange>,
    #[serde(default)]
    company_colour_lighting_contribution: f64,
    #[serde(default)]
    default_brightness: f64,
    #[serde(default = "default_cc_lighting_scale")]
    company_colour_lighting_scale: f64,
}

fn default_cc_lighting_scale() -> f64 {
    1.0
}

/// A loaded, validated palette plus its precomputed category subpalettes.
#[derive(Debug, Clone)]
pub struct Palette {
    entries: Vec<[u8; 3]>,
    ranges: Vec<PaletteRange>,
    company_colour_lighting_contribution: f64,
    default_brightness: f64,
    company_colour_lighting_scale: f64,
    regular: Vec<Rgb>,
    primary_cc: Vec<Rgb>,
    secondary_cc: Vec<Rgb>,
}

impl Palette {
    /// Parses a palette from JSON, validating that ranges are disjoint.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        let doc: PaletteJson = serde_json::from_str(&buf)
            .map_err(|source| RenderError::Json { path: "<palette>".into(), source })?;
        Self::validate_ranges(&doc.ranges)?;

        let mut palette = Palette {
            entries: doc.entries,
            ranges: doc.ranges,
            company_colour_lighting_contribution: doc.company_colour_lighting_contribution,
            default_brightness: doc.default_brightness,
            company_colour_lighting_scale: doc.company_colour_lighting_scale,
            regular: Vec::new(),
            primary_cc: Vec::new(),
            secondary_cc: Vec::new(),
        };
        palette.build_subpalettes();
        Ok(palette)
    }

    fn validate_ranges(ranges: &[PaletteRange]) -> Result<()> {
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if a.start < b.end && b.start < a.end {
                    return Err(RenderError::Configuration(format!(
                        "palette ranges [{},{}) and [{},{}) overlap",
                        a.start, a.end, b.start, b.end
                    )));
                }
            }
        }
        Ok(())
    }

    fn build_subpalettes(&mut self) {
        let len = self.entries.len();
        self.regular = vec![SENTINEL; len];
        self.primary_cc = vec![SENTINEL; len];
        self.secondary_cc = vec![SENTINEL; len];
        for i in 0..len {
            let range = self.range_at(i);
            let is_special = range.map(|r| r.is_company_colour() || r.animated_light).unwrap_or(false);
            let raw = self.raw_rgb(i);
            if let Some(r) = range {
                if r.primary_company_colour {
                    self.primary_cc[i] = raw;
                    continue;
                }
                if r.secondary_company_colour {
                    self.secondary_cc[i] = raw;
                    continue;
                }
            }
            if !is_special {
                self.regular[i] = raw;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn range_at(&self, index: usize) -> Option<&PaletteRange> {
        self.ranges.iter().find(|r| r.contains(index))
    }

    /// Position of the range containing `index` within the range list, used
    /// as a cheap identity for "same range" comparisons.
    pub fn range_index_at(&self, index: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(index))
    }

    pub fn range_by_index(&self, id: usize) -> &PaletteRange {
        &self.ranges[id]
    }

    fn raw_rgb(&self, index: usize) -> Rgb {
        let [r, g, b] = self.entries.get(index).copied().unwrap_or([0, 0, 0]);
        // Scale an 8-bit channel to the 16-bit (0..65535) space this crate
        // works in throughout, matching FromPaletteEntry's *255 expansion.
        Rgb::new(r as f64 * 257.0, g as f64 * 257.0, b as f64 * 257.0)
    }

    /// Linear-space RGB for `index`, scaled to 16-bit. Company-coloured and
    /// animated indices resolve to a neutral substitute when
    /// `resolve_special` is set.
    pub fn rgb_at(&self, index: usize, resolve_special: bool) -> Rgb {
        let range = self.range_at(index);
        if resolve_special {
            if let Some(r) = range {
                if r.animated_light {
                    return Rgb::new(22000.0, 22000.0, 22000.0);
                }
                if r.is_company_colour() {
                    let raw = self.raw_rgb(index);
                    let luma = ((19595.0 * raw.r / 257.0
                        + 38470.0 * raw.g / 257.0
                        + 7471.0 * raw.b / 257.0
                        + 32768.0) as i64
                        >> 8) as f64;
                    let c = self.company_colour_lighting_contribution;
                    let brightness_component = self.default_brightness * 32767.0 * (1.0 - c);
                    let y = brightness_component + luma * c;
                    return Rgb::new(y, y, y);
                }
            }
        }
        self.raw_rgb(index)
    }

    /// Lit colour for `index` at lighting scalar `l`, with brightness and
    /// contrast applied, scaled by `influence`.
    pub fn lit_rgb(
        &self,
        index: usize,
        mut l: f64,
        brightness: f64,
        contrast: f64,
        resolve_special: bool,
        influence: f64,
    ) -> Rgb {
        let base = self.rgb_at(index, resolve_special);
        let range = self.range_at(index);
        if let Some(r) = range {
            if r.animated_light {
                l = 0.5;
            } else if r.is_company_colour() {
                l *= self.company_colour_lighting_scale;
            }
        }
        l = l.clamp(-1.0, 1.0);
        let lit = if l >= 0.0 {
            base.lerp(Rgb::new(65535.0, 65535.0, 65535.0), l)
        } else {
            base.multiply_by(1.0 + l)
        };
        let brightened = lit.add(Rgb::new(brightness, brightness, brightness));
        let contrasted = Rgb::new(
            contrast * (brightened.r - 32767.0) + 32767.0,
            contrast * (brightened.g - 32767.0) + 32767.0,
            contrast * (brightened.b - 32767.0) + 32767.0,
        );
        contrasted.multiply_by(influence)
    }

    pub fn regular_palette(&self) -> &[Rgb] {
        &self.regular
    }

    pub fn primary_cc_palette(&self) -> &[Rgb] {
        &self.primary_cc
    }

    pub fn secondary_cc_palette(&self) -> &[Rgb] {
        &self.secondary_cc
    }

    pub fn is_renderable(&self, index: usize) -> bool {
        match self.range_at(index) {
            Some(r) => !r.non_renderable,
            None => true,
        }
    }

    pub fn is_process_colour(&self, index: usize) -> bool {
        self.range_at(index).map(|r| r.process_colour).unwrap_or(false)
    }

    pub fn smoothness(&self, index: usize) -> i32 {
        self.range_at(index).map(|r| r.smoothness).unwrap_or(0)
    }

    pub fn is_animated(&self, index: usize) -> bool {
        self.range_at(index).map(|r| r.animated_light).unwrap_or(false)
    }

    pub fn is_company_colour(&self, index: usize) -> bool {
        self.range_at(index).map(|r| r.is_company_colour()).unwrap_or(false)
    }

    /// A palette colour is "special" (company or animated) for masking
    /// purposes.
    pub fn is_special(&self, index: usize) -> bool {
        self.range_at(index).map(|r| r.is_company_colour() || r.animated_light).unwrap_or(false)
    }

    /// Whether a pixel dithered to this index belongs in the mask image.
    pub fn is_mask_colour(&self, index: usize) -> bool {
        self.is_special(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_palette_json() -> &'static str {
        r#"{
            "entries": [[0,0,0],[0,0,0],[10,20,30],[255,0,0],[0,255,0]],
            "ranges": [
                {"start": 2, "end": 4, "is_primary_company_colour": true, "smoothness": 1},
                {"start": 4, "end": 5, "is_animated_light": true}
            ],
            "company_colour_lighting_contribution": 0.5,
            "default_brightness": 0.6,
            "company_colour_lighting_scale": 0.8
        }"#
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let json = r#"{
            "entries": [[0,0,0],[0,0,0],[0,0,0],[0,0,0]],
            "ranges": [{"start": 0, "end": 3}, {"start": 2, "end": 4}]
        }"#;
        let result = Palette::from_reader(json.as_bytes());
        assert!(matches!(result, Err(RenderError::Configuration(_))));
    }

    #[test]
    fn defaults_are_applied_when_omitted() {
        let palette = Palette::from_reader(sample_palette_json().as_bytes()).unwrap();
        let range = palette.range_at(2).unwrap();
        assert_eq!(range.expected_colour_range, 3);
        assert_eq!(range.max_gap_in_region, 6);
    }

    #[test]
    fn primary_cc_index_is_sentinel_elsewhere() {
        let palette = Palette::from_reader(sample_palette_json().as_bytes()).unwrap();
        assert!(!palette.primary_cc_palette()[2].is_sentinel());
        assert!(palette.regular_palette()[2].is_sentinel());
        assert!(palette.secondary_cc_palette()[2].is_sentinel());
    }

    #[test]
    fn animated_light_rgb_at_is_fixed_grey() {
        let palette = Palette::from_reader(sample_palette_json().as_bytes()).unwrap();
        assert_eq!(palette.rgb_at(4, true), Rgb::new(22000.0, 22000.0, 22000.0));
    }

    #[test]
    fn is_renderable_defaults_true_outside_ranges() {
        let palette = Palette::from_reader(sample_palette_json().as_bytes()).unwrap();
        assert!(palette.is_renderable(0));
    }
}
