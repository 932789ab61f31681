//! Render manifest: per-model JSON configuration plus per-sprite framing.
//!
//! Grounded on `manifest.go`'s `Manifest`/`Sprite` structs and `FromJson`'s
//! defaulting/auto-height pass.

use std::io::Read;

use serde::Deserialize;

use crate::error::{RenderError, Result};
use crate::preprocess::TilingMode;

fn default_accuracy() -> u32 {
    2
}

fn default_edge_threshold() -> f64 {
    0.5
}

fn default_hard_edge_threshold() -> f64 {
    0.1
}

fn default_sampler() -> String {
    "square".to_string()
}

/// One requested camera angle and framing within the finished sheet.
#[derive(Debug, Clone, Deserialize)]
pub struct Sprite {
    pub angle: f64,
    pub width: u32,
    /// `0` means "auto": computed by [`Manifest::resolve_sprite_sizes`].
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub flip: bool,
    #[serde(default)]
    pub slice: i32,
    /// `0` means "use the manifest's `render_elevation`".
    #[serde(default)]
    pub render_elevation: f64,
    #[serde(default)]
    pub joggle: f64,

    /// Filled in by [`Manifest::resolve_sprite_sizes`] when `height==0`; the
    /// fractional remainder lost to rounding the auto-computed height up to
    /// a whole pixel, used to nudge the viewport so the silhouette still
    /// fits.
    #[serde(skip, default)]
    pub z_error: f64,
}

/// Render configuration loaded from the manifest JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub lighting_angle: f64,
    #[serde(default)]
    pub lighting_elevation: f64,
    pub size: (f64, f64, f64),
    #[serde(default)]
    pub render_elevation: f64,
    #[serde(default)]
    pub sprites: Vec<Sprite>,
    #[serde(default)]
    pub depth_influence: f64,
    #[serde(default)]
    pub tiled_normals: bool,
    #[serde(default)]
    pub tiling_mode: String,
    #[serde(default)]
    pub has_base: bool,
    #[serde(default)]
    pub soften_edges: f64,
    #[serde(default = "default_accuracy")]
    pub accuracy: u32,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default)]
    pub overlap: f64,
    #[serde(default)]
    pub brightness: f64,
    #[serde(default = "default_contrast")]
    pub contrast: f64,
    #[serde(default)]
    pub fade_to_black: bool,
    #[serde(default = "default_edge_threshold")]
    pub alpha_edge_threshold: f64,
    #[serde(default)]
    pub pad_to_full_length: bool,
    #[serde(default)]
    pub slice_threshold: i32,
    #[serde(default)]
    pub slice_length: i32,
    #[serde(default)]
    pub slice_overlap: i32,
    #[serde(default)]
    pub detail_boost: f64,
    #[serde(default)]
    pub recovered_voxel_suppression: f64,
    #[serde(default)]
    pub fosterise: bool,
    #[serde(default)]
    pub suppress_edge_fosterisation: bool,
    #[serde(default)]
    pub dither_flat_areas: bool,
    #[serde(default = "default_shadow_threshold")]
    pub shadow_threshold: f64,
    #[serde(default)]
    pub soft_shadow: bool,
    #[serde(default)]
    pub joggle: f64,
    #[serde(default = "default_hard_edge_threshold")]
    pub hard_edge_threshold: f64,
}

fn default_contrast() -> f64 {
    0.0
}

fn default_shadow_threshold() -> f64 {
    0.0
}

impl Manifest {
    /// Loads and defaults a manifest from its JSON document, then resolves
    /// any auto-height sprites against `size`.
    ///
    /// Mirrors `FromJson`: `brightness` arrives as a `[0,1]` fraction and is
    /// rescaled to the 16-bit channel range; `contrast` arrives centred on
    /// `0` and is shifted so `1.0` is neutral.
    pub fn from_reader<R: Read>(reader: R) -> Result<Manifest> {
        let mut manifest: Manifest =
            serde_json::from_reader(reader).map_err(|source| RenderError::Configuration(source.to_string()))?;

        manifest.brightness *= 65535.0;
        manifest.contrast += 1.0;
        manifest.resolve_sprite_sizes();

        Ok(manifest)
    }

    pub fn tiling_mode(&self) -> TilingMode {
        TilingMode::parse(&self.tiling_mode)
    }

    /// Fills in `height` and `z_error` for every sprite whose `height==0`,
    /// from the model's silhouette extent at that sprite's angle.
    ///
    /// Grounded on `getCalculatedSpriteHeight`: the silhouette's vertical
    /// extent in voxel units is a weighted combination of the model's X/Y
    /// footprint (seen edge-on at this angle) and its Z extent, scaled by
    /// the same ratio used to turn the horizontal footprint into `width`.
    fn resolve_sprite_sizes(&mut self) {
        for sprite in &mut self.sprites {
            if sprite.height != 0 {
                continue;
            }
            let (height, z_error) = calculate_sprite_height(self.size, self.render_elevation, sprite);
            sprite.height = height;
            sprite.z_error = z_error;
        }
    }
}

fn calculate_sprite_height(size: (f64, f64, f64), render_elevation: f64, sprite: &Sprite) -> (u32, f64) {
    let (sx, sy, _) = size;
    let rad = sprite.angle.to_radians();
    let (cos, sin) = (rad.cos(), rad.sin());

    let x_component = (sx * cos).abs();
    let y_component = (sy * sin).abs();

    let plane_x_component = (sx * sin).abs();
    let plane_y_component = (sy * cos).abs();

    let horizontal_size = (x_component + y_component) * render_elevation.to_radians().sin();

    let ratio = (horizontal_size + size.2) / (plane_x_component + plane_y_component);
    let sprite_size = ratio * sprite.width as f64;

    let rounded = sprite_size.ceil();
    let delta = (rounded - sprite_size) / rounded;

    (rounded as u32, delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn defaults_apply_when_fields_are_omitted() {
        let m = Manifest::from_reader(Cursor::new(r#"{"size": [10.0, 10.0, 10.0]}"#)).unwrap();
        assert_eq!(m.accuracy, 2);
        assert_eq!(m.alpha_edge_threshold, 0.5);
        assert_eq!(m.contrast, 1.0);
        assert_eq!(m.brightness, 0.0);
    }

    #[test]
    fn brightness_and_contrast_are_rescaled() {
        let m = Manifest::from_reader(Cursor::new(r#"{"size": [10.0,10.0,10.0], "brightness": 0.5, "contrast": 0.2}"#))
            .unwrap();
        assert!((m.brightness - 32767.5).abs() < 1e-9);
        assert!((m.contrast - 1.2).abs() < 1e-9);
    }

    #[test]
    fn auto_height_sprite_gets_resolved() {
        let json = r#"{
            "size": [126.0, 40.0, 40.0],
            "render_elevation": 30,
            "sprites": [{"angle": 0.0, "width": 64, "height": 0}]
        }"#;
        let m = Manifest::from_reader(Cursor::new(json)).unwrap();
        assert!(m.sprites[0].height > 0);
    }

    #[test]
    fn explicit_height_sprite_is_left_alone() {
        let json = r#"{"size": [10.0,10.0,10.0], "sprites": [{"angle": 0.0, "width": 20, "height": 20}]}"#;
        let m = Manifest::from_reader(Cursor::new(json)).unwrap();
        assert_eq!(m.sprites[0].height, 20);
        assert_eq!(m.sprites[0].z_error, 0.0);
    }
}
