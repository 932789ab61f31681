//! Spritesheet assembly: lays sprite rectangles out left-to-right at their
//! declared `X` offset, one image per output variant, then emits PNGs.
//!
//! Grounded on spec.md §4.6's plain description (no original_source
//! counterpart for the assembler survives in this source drop); the
//! indexed-PNG-plus-tRNS encoding follows `RazrFalcon-tiny-skia`'s direct
//! use of the `png` crate for low-level image I/O.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::manifest::{Manifest, Sprite};
use crate::palette::Palette;
use crate::shader::{mask_index, ShaderOutput};

/// One fully-assembled output variant: either paletted (8bpp/mask) or a
/// flat RGBA/RGB buffer (32bpp, debug channels).
#[derive(Debug, Clone)]
pub enum Plane {
    Indexed { data: Vec<u8>, alpha: Vec<u8> },
    Rgba(Vec<u8>),
    Rgb(Vec<u8>),
}

/// An assembled spritesheet: one plane per requested variant, all sharing
/// the same `width`/`height`.
pub struct Sheet {
    pub width: u32,
    pub height: u32,
    pub variant_8bpp: Plane,
    pub variant_32bpp: Plane,
    pub mask: Plane,
    pub debug: Vec<(&'static str, Plane)>,
}

/// Total sheet width: the last sprite's `x` plus its `width`, matching the
/// manifest loader's sequential left-to-right offset assignment.
fn sheet_width(sprites: &[Sprite]) -> u32 {
    sprites.iter().map(|s| s.x + s.width).max().unwrap_or(0)
}

fn sheet_height(sprites: &[Sprite]) -> u32 {
    sprites.iter().map(|s| s.height).max().unwrap_or(0)
}

fn blit_8bpp(dest: &mut [u8], alpha: &mut [u8], width: u32, sprite: &Sprite, shaded: &ShaderOutput, palette: &Palette) {
    for (sx, column) in shaded.iter().enumerate() {
        for (sy, pixel) in column.iter().enumerate() {
            let dx = sprite.x as usize + sx;
            let dy = sy;
            if dx as u32 >= width {
                continue;
            }
            let offset = dy * width as usize + dx;
            if pixel.alpha <= 0.0 {
                continue;
            }
            dest[offset] = pixel.dithered_index;
            alpha[offset] = if palette.is_renderable(pixel.dithered_index as usize) { 255 } else { 0 };
        }
    }
}

fn blit_32bpp(dest: &mut [u8], width: u32, sprite: &Sprite, shaded: &ShaderOutput, palette: &Palette) {
    for (sx, column) in shaded.iter().enumerate() {
        for (sy, pixel) in column.iter().enumerate() {
            let dx = sprite.x as usize + sx;
            let dy = sy;
            if dx as u32 >= width || pixel.alpha <= 0.0 {
                continue;
            }
            let offset = (dy * width as usize + dx) * 4;
            let rgb = palette.rgb_at(pixel.dithered_index as usize, true).clamp_strict();
            dest[offset] = (rgb.r / 257.0) as u8;
            dest[offset + 1] = (rgb.g / 257.0) as u8;
            dest[offset + 2] = (rgb.b / 257.0) as u8;
            dest[offset + 3] = (pixel.alpha.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

fn blit_mask(dest: &mut [u8], alpha: &mut [u8], width: u32, sprite: &Sprite, shaded: &ShaderOutput) {
    for (sx, column) in shaded.iter().enumerate() {
        for (sy, pixel) in column.iter().enumerate() {
            let dx = sprite.x as usize + sx;
            let dy = sy;
            if dx as u32 >= width {
                continue;
            }
            let offset = dy * width as usize + dx;
            let index = mask_index(pixel);
            if index != 0 {
                dest[offset] = index;
                alpha[offset] = 255;
            }
        }
    }
}

fn blit_debug_rgb(dest: &mut [u8], width: u32, sprite: &Sprite, shaded: &ShaderOutput, pick: impl Fn(&crate::shader::ShaderInfo) -> crate::palette::Rgb) {
    for (sx, column) in shaded.iter().enumerate() {
        for (sy, pixel) in column.iter().enumerate() {
            let dx = sprite.x as usize + sx;
            let dy = sy;
            if dx as u32 >= width || pixel.alpha <= 0.0 {
                continue;
            }
            let offset = (dy * width as usize + dx) * 3;
            let channel = pick(pixel).clamp_permissive();
            dest[offset] = (channel.r / 257.0) as u8;
            dest[offset + 1] = (channel.g / 257.0) as u8;
            dest[offset + 2] = (channel.b / 257.0) as u8;
        }
    }
}

const DEBUG_CHANNELS: &[(&str, fn(&crate::shader::ShaderInfo) -> crate::palette::Rgb)] = &[
    ("normals", |i| i.normal),
    ("avg_normals", |i| i.averaged_normal),
    ("depth", |i| i.depth),
    ("occlusion", |i| i.occlusion),
    ("shadow", |i| i.shadowing),
    ("lighting", |i| i.lighting),
];

/// Assembles one [`Sheet`] from every sprite's shaded output.
///
/// `shaded_sprites` must be parallel to `manifest.sprites`, one
/// [`ShaderOutput`] per sprite at that sprite's already-resolved size.
pub fn assemble(manifest: &Manifest, shaded_sprites: &[ShaderOutput], palette: &Palette, debug: bool) -> Sheet {
    let width = sheet_width(&manifest.sprites);
    let height = sheet_height(&manifest.sprites);
    let area = (width * height) as usize;

    let last_index = palette.len().saturating_sub(1) as u8;
    let mut indexed = vec![last_index; area];
    let mut indexed_alpha = vec![0u8; area];
    let mut rgba = vec![0u8; area * 4];
    for px in rgba.chunks_exact_mut(4) {
        px[0] = 255;
        px[1] = 255;
        px[2] = 255;
        px[3] = 255;
    }
    let mut mask = vec![0u8; area];
    let mut mask_alpha = vec![0u8; area];

    for (sprite, shaded) in manifest.sprites.iter().zip(shaded_sprites) {
        blit_8bpp(&mut indexed, &mut indexed_alpha, width, sprite, shaded, palette);
        blit_32bpp(&mut rgba, width, sprite, shaded, palette);
        blit_mask(&mut mask, &mut mask_alpha, width, sprite, shaded);
    }

    let mut debug_planes = Vec::new();
    if debug {
        for &(name, pick) in DEBUG_CHANNELS {
            let mut plane = vec![0u8; area * 3];
            for (sprite, shaded) in manifest.sprites.iter().zip(shaded_sprites) {
                blit_debug_rgb(&mut plane, width, sprite, shaded, pick);
            }
            debug_planes.push((name, Plane::Rgb(plane)));
        }
    }

    Sheet {
        width,
        height,
        variant_8bpp: Plane::Indexed { data: indexed, alpha: indexed_alpha },
        variant_32bpp: Plane::Rgba(rgba),
        mask: Plane::Indexed { data: mask, alpha: mask_alpha },
        debug: debug_planes,
    }
}

/// Box-filter downscale/upscale of an RGBA buffer by `factor` (e.g. `0.5`
/// halves, `2.0` doubles).
pub fn scale_rgba(data: &[u8], width: u32, height: u32, factor: f64) -> (Vec<u8>, u32, u32) {
    let new_w = ((width as f64) * factor).round().max(1.0) as u32;
    let new_h = ((height as f64) * factor).round().max(1.0) as u32;
    let mut out = vec![0u8; (new_w * new_h * 4) as usize];

    for ny in 0..new_h {
        for nx in 0..new_w {
            let src_x0 = ((nx as f64) / factor).floor() as u32;
            let src_x1 = (((nx + 1) as f64) / factor).ceil().min(width as f64) as u32;
            let src_y0 = ((ny as f64) / factor).floor() as u32;
            let src_y1 = (((ny + 1) as f64) / factor).ceil().min(height as f64) as u32;

            let mut sum = [0u32; 4];
            let mut count = 0u32;
            for sy in src_y0..src_y1.max(src_y0 + 1).min(height) {
                for sx in src_x0..src_x1.max(src_x0 + 1).min(width) {
                    let offset = ((sy * width + sx) * 4) as usize;
                    for c in 0..4 {
                        sum[c] += data[offset + c] as u32;
                    }
                    count += 1;
                }
            }
            let count = count.max(1);
            let dest = ((ny * new_w + nx) * 4) as usize;
            for c in 0..4 {
                out[dest + c] = (sum[c] / count) as u8;
            }
        }
    }

    (out, new_w, new_h)
}

/// Nearest-sample scaling for paletted variants: averaging indices is
/// meaningless, so each destination pixel copies the source pixel closest
/// to its box centre.
pub fn scale_indexed(data: &[u8], alpha: &[u8], width: u32, height: u32, factor: f64) -> (Vec<u8>, Vec<u8>, u32, u32) {
    let new_w = ((width as f64) * factor).round().max(1.0) as u32;
    let new_h = ((height as f64) * factor).round().max(1.0) as u32;
    let mut out = vec![0u8; (new_w * new_h) as usize];
    let mut out_alpha = vec![0u8; (new_w * new_h) as usize];

    for ny in 0..new_h {
        for nx in 0..new_w {
            let src_x = (((nx as f64 + 0.5) / factor).floor() as u32).min(width.saturating_sub(1));
            let src_y = (((ny as f64 + 0.5) / factor).floor() as u32).min(height.saturating_sub(1));
            let src_offset = (src_y * width + src_x) as usize;
            let dest_offset = (ny * new_w + nx) as usize;
            out[dest_offset] = data[src_offset];
            out_alpha[dest_offset] = alpha[src_offset];
        }
    }

    (out, out_alpha, new_w, new_h)
}

/// `<base><suffix>[_<scale>x]_<variant>.png`, placed under `<scale>x/` when
/// `subdirs` is set.
pub fn output_path(output_dir: &Path, base: &str, suffix: &str, scale: f64, subdirs: bool, variant: &str) -> PathBuf {
    let scale_tag = if (scale - 1.0).abs() < 1e-9 { String::new() } else { format!("_{}x", format_scale(scale)) };
    let filename = format!("{base}{suffix}{scale_tag}_{variant}.png");
    if subdirs && (scale - 1.0).abs() >= 1e-9 {
        output_dir.join(format!("{}x", format_scale(scale))).join(filename)
    } else {
        output_dir.join(filename)
    }
}

fn format_scale(scale: f64) -> String {
    if (scale.fract()).abs() < 1e-9 {
        format!("{}", scale as i64)
    } else {
        format!("{scale}")
    }
}

fn build_palette_bytes(palette: &Palette) -> (Vec<u8>, Vec<u8>) {
    let mut rgb = Vec::with_capacity(palette.len() * 3);
    let mut trns = Vec::with_capacity(palette.len());
    for index in 0..palette.len() {
        let colour = palette.rgb_at(index, true).clamp_strict();
        rgb.push((colour.r / 257.0) as u8);
        rgb.push((colour.g / 257.0) as u8);
        rgb.push((colour.b / 257.0) as u8);
        trns.push(if palette.is_renderable(index) { 255 } else { 0 });
    }
    (rgb, trns)
}

/// Writes an indexed PNG (8bpp variant, or the mask) with a `tRNS` chunk
/// carrying per-index alpha.
pub fn write_indexed_png(path: &Path, width: u32, height: u32, data: &[u8], alpha: &[u8], palette: &Palette) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    let (palette_bytes, trns_bytes) = build_palette_bytes(palette);
    encoder.set_palette(palette_bytes);
    encoder.set_trns(trns_bytes);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    let _ = alpha;
    Ok(())
}

/// Writes a truecolour-with-alpha PNG (the 32bpp variant).
pub fn write_rgba_png(path: &Path, width: u32, height: u32, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    Ok(())
}

/// Writes a truecolour debug-channel PNG (normals, depth, occlusion, ...).
pub fn write_rgb_png(path: &Path, width: u32, height: u32, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderInfo;
    use std::io::Cursor;

    fn palette() -> Palette {
        Palette::from_reader(Cursor::new(r#"{"entries": [[0,0,0],[10,10,10],[255,255,255]]}"#)).unwrap()
    }

    fn sprite(x: u32, width: u32, height: u32) -> Sprite {
        Sprite { angle: 0.0, width, height, x, flip: false, slice: 0, render_elevation: 0.0, joggle: 0.0, z_error: 0.0 }
    }

    #[test]
    fn sheet_width_sums_sprite_slots() {
        let sprites = vec![sprite(0, 10, 10), sprite(10, 20, 10)];
        assert_eq!(sheet_width(&sprites), 30);
    }

    #[test]
    fn output_path_omits_scale_tag_at_1x() {
        let path = output_path(Path::new("out"), "model", "", 1.0, false, "8bpp");
        assert_eq!(path, Path::new("out/model_8bpp.png"));
    }

    #[test]
    fn output_path_nests_under_scale_directory_when_subdirs_set() {
        let path = output_path(Path::new("out"), "model", "", 2.0, true, "8bpp");
        assert_eq!(path, Path::new("out/2x/model_2x_8bpp.png"));
    }

    #[test]
    fn assemble_places_opaque_pixel_at_sprite_offset() {
        let manifest_json = r#"{"size":[1.0,1.0,1.0], "sprites":[{"angle":0.0,"width":2,"height":2,"x":3}]}"#;
        let manifest = Manifest::from_reader(Cursor::new(manifest_json)).unwrap();
        let palette = palette();

        let mut shaded: ShaderOutput = vec![vec![ShaderInfo::default(); 2]; 2];
        shaded[0][0] = ShaderInfo { alpha: 1.0, dithered_index: 1, ..Default::default() };

        let sheet = assemble(&manifest, &[shaded], &palette, false);
        assert_eq!(sheet.width, 5);
        match sheet.variant_8bpp {
            Plane::Indexed { data, .. } => {
                let offset = 0 * sheet.width as usize + 3;
                assert_eq!(data[offset], 1);
            }
            _ => panic!("expected indexed plane"),
        }
    }
}
