//! Shading, region analysis and dithering.
//!
//! The sample-collation and Floyd-Steinberg passes are grounded on
//! `shader.go`'s `shade`/`GetShaderOutput`/`getBestIndex` and
//! `shaders.go`'s per-channel helpers and `getLightingOffset`. Region
//! flood-fill, the second (flat-area) dither pass, fosterisation and range
//! expansion have no counterpart in this source drop; they are built
//! directly from their textual description, in the same explicit-stack,
//! small-free-function style as the rest of this module.

use std::collections::HashMap;

use crate::manifest::Manifest;
use crate::palette::{Palette, Rgb};
use crate::raycaster::{RenderInfo, RenderOutput, RenderSample};

/// Per-pixel shading result: accumulated colour, dithered index, region
/// membership and edge flags, plus debug-only channels.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShaderInfo {
    pub colour: Rgb,
    pub special_colour: Rgb,
    pub alpha: f64,
    pub specialness: f64,
    pub light_amount: f64,
    pub modal_index: u8,
    pub dithered_index: u8,
    pub region_id: usize,
    pub is_mask_colour: bool,
    pub is_animated: bool,
    pub is_bottom_edge: bool,
    pub is_left_edge: bool,

    pub normal: Rgb,
    pub averaged_normal: Rgb,
    pub depth: Rgb,
    pub occlusion: Rgb,
    pub shadowing: Rgb,
    pub lighting: Rgb,
}

/// `[x][y]` grid of shaded pixels.
pub type ShaderOutput = Vec<Vec<ShaderInfo>>;

fn normal_channel(v: crate::geometry::Vector3) -> Rgb {
    Rgb::new(v.x * 32766.0 + 32766.0, v.y * 32766.0 + 32766.0, v.z * 32766.0 + 32766.0)
}

fn depth_channel(depth: i32) -> Rgb {
    let v = depth as f64 * 400.0;
    Rgb::new(v, v, v)
}

fn occlusion_channel(occlusion: i32) -> Rgb {
    let v = occlusion as f64 * 6000.0;
    Rgb::new(v, v, v)
}

fn shadow_channel(shadowing: f64) -> Rgb {
    let v = 65535.0 - shadowing * 65535.0;
    Rgb::new(v, v, v)
}

fn lighting_channel(light_amount: f64) -> Rgb {
    let v = 32767.0 + light_amount * 32767.0;
    Rgb::new(v, v, v)
}

fn lighting_offset(sample: &RenderSample, depth_influence: f64) -> f64 {
    let mut offset = -0.3;
    offset += sample.light_amount * 0.6;
    offset += -((sample.depth - 120) as f64 / 40.0) * depth_influence;
    offset += -(sample.occlusion as f64 / 10.0) * 0.2;
    offset -= sample.shadowing * 0.2;
    offset / 1.5
}

fn sample_colour(sample: &RenderSample, palette: &Palette, manifest: &Manifest, resolve_special: bool, influence: f64) -> Rgb {
    let offset = lighting_offset(sample, manifest.depth_influence);
    palette.lit_rgb(sample.index as usize, offset, manifest.brightness, manifest.contrast, resolve_special, influence)
}

/// Collates one pixel's samples into a [`ShaderInfo`].
///
/// Deeper-than-nearest hits are downweighted (divided by `accuracy`) so the
/// resolved colour favours the frontmost surface; recovered voxels are
/// suppressed and detailed voxels boosted, both as influence multipliers,
/// before the weighted average is taken.
pub fn shade(info: &RenderInfo, palette: &Palette, manifest: &Manifest, soften: bool, debug: bool) -> ShaderInfo {
    let mut output = ShaderInfo::default();

    let min_depth = info.iter().filter(|s| s.collision && !s.is_folded).map(|s| s.depth).min();

    let mut total_influence = 0.0;
    let mut filled_influence = 0.0;
    let mut filled_count = 0usize;
    let mut values: HashMap<u8, f64> = HashMap::new();

    for sample in info {
        if sample.is_folded {
            // Folded into the previous sample by duplicate-hit coalescing;
            // its influence already landed there.
            continue;
        }

        let mut influence = sample.influence;
        total_influence += influence;

        if !sample.collision || !palette.is_renderable(sample.index as usize) {
            continue;
        }

        filled_count += 1;

        if let Some(min_depth) = min_depth {
            if sample.depth > min_depth {
                influence /= manifest.accuracy.max(1) as f64;
            }
        }
        if sample.is_recovered {
            influence *= (1.0 - manifest.recovered_voxel_suppression).max(0.0);
        }
        influence *= 1.0 + sample.detail * manifest.detail_boost;

        filled_influence += influence;

        output.colour = output.colour.add(sample_colour(sample, palette, manifest, true, influence));
        output.special_colour = output.special_colour.add(sample_colour(sample, palette, manifest, false, influence));
        output.light_amount += sample.light_amount * influence;

        if palette.is_special(sample.index as usize) {
            output.specialness += influence;
        }
        if sample.index != 0 {
            *values.entry(sample.index).or_insert(0.0) += influence;
        }

        if debug {
            output.normal = output.normal.add(normal_channel(sample.normal).multiply_by(influence));
            output.averaged_normal = output.averaged_normal.add(normal_channel(sample.averaged_normal).multiply_by(influence));
            output.depth = output.depth.add(depth_channel(sample.depth).multiply_by(influence));
            output.occlusion = output.occlusion.add(occlusion_channel(sample.occlusion).multiply_by(influence));
            output.shadowing = output.shadowing.add(shadow_channel(sample.shadowing).multiply_by(influence));
            output.lighting = output.lighting.add(lighting_channel(sample.light_amount).multiply_by(influence));
        }
    }

    let mut best = 0.0;
    for (&index, &influence) in &values {
        if influence > best {
            best = influence;
            output.modal_index = index;
        }
    }

    let sample_count = info.iter().filter(|s| !s.is_folded).count();
    if sample_count == 0 || (filled_count as f64 / sample_count as f64) < manifest.hard_edge_threshold {
        return ShaderInfo::default();
    }

    output.alpha = 1.0;
    let mut divisor = filled_influence;
    if soften {
        output.alpha = divisor / total_influence;
    }
    if manifest.fade_to_black {
        divisor = total_influence;
    }

    if divisor > 0.0 {
        output.colour = output.colour.multiply_by(1.0 / divisor).clamp_permissive();
        output.special_colour = output.special_colour.multiply_by(1.0 / divisor).clamp_permissive();
        output.specialness /= divisor;
        output.light_amount /= divisor;

        if debug {
            output.normal = output.normal.multiply_by(1.0 / divisor).clamp_permissive();
            output.averaged_normal = output.averaged_normal.multiply_by(1.0 / divisor).clamp_permissive();
            output.depth = output.depth.multiply_by(1.0 / divisor).clamp_permissive();
            output.occlusion = output.occlusion.multiply_by(1.0 / divisor).clamp_permissive();
            output.shadowing = output.shadowing.multiply_by(1.0 / divisor).clamp_permissive();
            output.lighting = output.lighting.multiply_by(1.0 / divisor).clamp_permissive();
        }
    }

    output
}

/// Shades every pixel of one sprite's raycast output.
pub fn shade_sprite(render_output: &RenderOutput, palette: &Palette, manifest: &Manifest, soften: bool, debug: bool) -> ShaderOutput {
    render_output.iter().map(|column| column.iter().map(|info| shade(info, palette, manifest, soften, debug)).collect()).collect()
}

/// A flood-filled group of pixels sharing a palette range within
/// `max_gap_in_region` of each other.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub range: Option<usize>,
    pub min_index: u8,
    pub max_index: u8,
    pub histogram: HashMap<u8, u32>,
    pub size: u32,
    pub size_in_range: u32,
}

/// Flood-fills 4-connected regions of same-range pixels and stamps each
/// pixel's `region_id` (1-based; `0` means transparent/unassigned).
///
/// Uses an explicit worklist rather than recursion so a large sprite can't
/// blow the stack.
pub fn identify_regions(output: &mut ShaderOutput, palette: &Palette) -> Vec<Region> {
    let width = output.len();
    if width == 0 {
        return Vec::new();
    }
    let height = output[0].len();

    let mut regions = Vec::new();
    let mut visited = vec![vec![false; height]; width];

    for x in 0..width {
        for y in 0..height {
            if visited[x][y] || output[x][y].alpha <= 0.0 {
                continue;
            }

            let range = palette.range_index_at(output[x][y].modal_index as usize);
            let max_gap = range.map(|id| palette.range_by_index(id).max_gap_in_region).unwrap_or(0);

            let region_id = regions.len() + 1;
            let mut region = Region { range, ..Region::default() };

            let mut stack = vec![(x, y)];
            visited[x][y] = true;

            while let Some((cx, cy)) = stack.pop() {
                output[cx][cy].region_id = region_id;
                region.size += 1;
                *region.histogram.entry(output[cx][cy].modal_index).or_insert(0) += 1;
                if region.size == 1 {
                    region.min_index = output[cx][cy].modal_index;
                    region.max_index = output[cx][cy].modal_index;
                } else {
                    region.min_index = region.min_index.min(output[cx][cy].modal_index);
                    region.max_index = region.max_index.max(output[cx][cy].modal_index);
                }
                if let Some(id) = range {
                    if palette.range_by_index(id).contains(output[cx][cy].modal_index as usize) {
                        region.size_in_range += 1;
                    }
                }

                let neighbours = [
                    (cx.checked_sub(1), Some(cy)),
                    (Some(cx + 1), Some(cy)),
                    (Some(cx), cy.checked_sub(1)),
                    (Some(cx), Some(cy + 1)),
                ];

                for (nx, ny) in neighbours {
                    let (Some(nx), Some(ny)) = (nx, ny) else { continue };
                    if nx >= width || ny >= height || visited[nx][ny] || output[nx][ny].alpha <= 0.0 {
                        continue;
                    }
                    let gap = (output[nx][ny].modal_index as i32 - output[cx][cy].modal_index as i32).abs();
                    if palette.range_index_at(output[nx][ny].modal_index as usize) != range || gap > max_gap {
                        continue;
                    }
                    visited[nx][ny] = true;
                    stack.push((nx, ny));
                }
            }

            regions.push(region);
        }
    }

    mark_edges(output, width, height);

    regions
}

fn mark_edges(output: &mut ShaderOutput, width: usize, height: usize) {
    for x in 0..width {
        for y in 0..height {
            let here = output[x][y].region_id;
            let left_differs = if x == 0 { true } else { output[x - 1][y].region_id != here };
            let bottom_differs = if y + 1 >= height { true } else { output[x][y + 1].region_id != here };
            output[x][y].is_left_edge = left_differs;
            output[x][y].is_bottom_edge = bottom_differs;
        }
    }
}

fn best_index(target: Rgb, palette: &[Rgb]) -> u8 {
    let mut best_index = 0u8;
    let mut best_sum = f64::MAX;
    for (index, &candidate) in palette.iter().enumerate() {
        if candidate.is_sentinel() {
            continue;
        }
        let sum = target.square_diff(candidate);
        if sum < best_sum {
            best_index = index as u8;
            best_sum = sum;
            if sum == 0.0 {
                break;
            }
        }
    }
    best_index
}

/// Floyd-Steinberg dither in column-major order: two length-`height+2`
/// error rows are swapped after each column, so error only ever propagates
/// forward in Y within a column and into the next column.
pub fn dither(output: &mut ShaderOutput, palette: &Palette) {
    let width = output.len();
    if width == 0 {
        return;
    }
    let height = output[0].len();

    let regular = palette.regular_palette();
    let primary = palette.primary_cc_palette();
    let secondary = palette.secondary_cc_palette();

    let mut err_curr = vec![Rgb::default(); height + 2];
    let mut err_next = vec![Rgb::default(); height + 2];

    for x in 0..width {
        for y in 0..height {
            let pixel = output[x][y];
            let range = palette.range_index_at(pixel.modal_index as usize).map(|id| palette.range_by_index(id));

            let prev_is_special = y > 0 && palette.is_special(output[x][y - 1].modal_index as usize);

            let (mut error, dithered, animated);
            if let Some(r) = range.filter(|r| r.animated_light) {
                animated = true;
                dithered = pixel.modal_index;
                error = palette.rgb_at(dithered as usize, false);
                let _ = r;
            } else if range.map(|r| r.primary_company_colour).unwrap_or(false) {
                animated = false;
                error = if prev_is_special { pixel.special_colour } else { pixel.special_colour.add(err_curr[y + 1]) };
                dithered = best_index(error, primary);
            } else if range.map(|r| r.secondary_company_colour).unwrap_or(false) {
                animated = false;
                error = if prev_is_special { pixel.special_colour } else { pixel.special_colour.add(err_curr[y + 1]) };
                dithered = best_index(error, secondary);
            } else {
                animated = false;
                error = if prev_is_special { pixel.colour } else { pixel.colour.add(err_curr[y + 1]) };
                dithered = best_index(error, regular);
            }

            output[x][y].is_animated = animated;
            output[x][y].dithered_index = dithered;
            output[x][y].is_mask_colour = palette.is_special(dithered as usize);

            if pixel.alpha > 0.0 {
                error = error.subtract(palette.rgb_at(dithered as usize, false)).clamp_permissive();
            } else {
                error = Rgb::default();
            }

            err_next[y] = err_next[y].add(error.multiply_by(3.0 / 16.0));
            err_next[y + 1] = err_next[y + 1].add(error.multiply_by(5.0 / 16.0));
            err_next[y + 2] = err_next[y + 2].add(error.multiply_by(1.0 / 16.0));
            err_curr[y + 2] = err_curr[y + 2].add(error.multiply_by(7.0 / 16.0));
            err_curr[y + 1] = Rgb::default();
        }

        std::mem::swap(&mut err_curr, &mut err_next);
        err_next.iter_mut().for_each(|e| *e = Rgb::default());
    }
}

/// For a pixel below the edge-alpha threshold, dithering forces index 0.
pub fn apply_edge_threshold(output: &mut ShaderOutput, edge_threshold: f64) {
    for column in output.iter_mut() {
        for pixel in column.iter_mut() {
            if pixel.alpha < edge_threshold {
                pixel.dithered_index = 0;
                pixel.is_mask_colour = false;
            }
        }
    }
}

fn percentile(mut values: Vec<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((values.len() as f64 - 1.0) * p).round() as usize;
    values[idx]
}

/// Extracts more apparent tonal depth from under-utilised ranges: within
/// each region, pixels on a checkerboard mask below the region's 20th
/// lighting percentile step one index darker, above the 80th step lighter.
pub fn dither_flat_areas(output: &mut ShaderOutput, regions: &[Region], palette: &Palette) {
    let width = output.len();
    if width == 0 {
        return;
    }
    let height = output[0].len();

    for (region_id, region) in regions.iter().enumerate() {
        let Some(range_id) = region.range else { continue };
        let range = palette.range_by_index(range_id);

        let mut lighting = Vec::new();
        for x in 0..width {
            for y in 0..height {
                if output[x][y].region_id == region_id + 1 {
                    lighting.push(output[x][y].light_amount);
                }
            }
        }
        if lighting.is_empty() {
            continue;
        }
        let p20 = percentile(lighting.clone(), 0.2);
        let p80 = percentile(lighting, 0.8);

        for x in 0..width {
            for y in 0..height {
                if output[x][y].region_id != region_id + 1 || (x + y) % 2 != 0 {
                    continue;
                }
                let pixel = &mut output[x][y];
                if pixel.light_amount < p20 && pixel.dithered_index > range.start as u8 {
                    pixel.dithered_index -= 1;
                } else if pixel.light_amount > p80 && (pixel.dithered_index as usize) < range.end.saturating_sub(1) {
                    pixel.dithered_index += 1;
                }
            }
        }
    }
}

/// Darkens the bottom and left edge of each region by one index, producing
/// a thin outline for in-game tile compositing.
pub fn fosterise(output: &mut ShaderOutput, palette: &Palette) {
    for column in output.iter_mut() {
        for pixel in column.iter_mut() {
            if !(pixel.is_bottom_edge || pixel.is_left_edge) {
                continue;
            }
            let Some(range_id) = palette.range_index_at(pixel.dithered_index as usize) else { continue };
            let range = palette.range_by_index(range_id);
            if pixel.dithered_index as usize > range.start {
                pixel.dithered_index -= 1;
            }
        }
    }
}

/// Widens `[min_index, max_index]` by one index per side (clamped to the
/// range bounds) for any region narrower than its range's expected spread.
pub fn expand_ranges(regions: &mut [Region], palette: &Palette) {
    for region in regions {
        let Some(range_id) = region.range else { continue };
        let range = palette.range_by_index(range_id);
        if (range.end - range.start) == 0 {
            continue;
        }
        if (region.max_index as i32 - region.min_index as i32) < range.expected_colour_range {
            region.min_index = region.min_index.saturating_sub(1).max(range.start as u8);
            region.max_index = (region.max_index + 1).min((range.end - 1) as u8);
        }
    }
}

/// Three-tier mask rule: company-colour/animated pixels carry their modal
/// index, ambiguous special-adjacent pixels carry their dithered index,
/// everything else is `0`.
pub fn mask_index(info: &ShaderInfo) -> u8 {
    if info.specialness > 0.75 || info.is_animated {
        info.modal_index
    } else if info.specialness > 0.25 && info.is_mask_colour {
        info.dithered_index
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn palette() -> Palette {
        Palette::from_reader(Cursor::new(
            r#"{"entries": [[0,0,0],[10,10,10],[20,20,20],[30,30,30]], "ranges": [{"start":1,"end":4,"expected_colour_range":1,"max_gap_in_region":1}]}"#,
        ))
        .unwrap()
    }

    fn manifest() -> Manifest {
        Manifest {
            lighting_angle: 0.0,
            lighting_elevation: 30.0,
            size: (1.0, 1.0, 1.0),
            render_elevation: 30.0,
            sprites: Vec::new(),
            depth_influence: 0.1,
            tiled_normals: false,
            tiling_mode: "wrap".to_string(),
            has_base: false,
            soften_edges: 0.0,
            accuracy: 1,
            sampler: "square".to_string(),
            overlap: 0.0,
            brightness: 0.0,
            contrast: 1.0,
            fade_to_black: false,
            alpha_edge_threshold: 0.5,
            pad_to_full_length: false,
            slice_threshold: 0,
            slice_length: 0,
            slice_overlap: 0,
            detail_boost: 0.0,
            recovered_voxel_suppression: 0.0,
            fosterise: false,
            suppress_edge_fosterisation: false,
            dither_flat_areas: false,
            shadow_threshold: 0.0,
            soft_shadow: false,
            joggle: 0.0,
            hard_edge_threshold: 0.1,
        }
    }

    fn hit_sample(index: u8) -> RenderSample {
        RenderSample { collision: true, index, influence: 1.0, depth: 10, ..RenderSample::default() }
    }

    fn miss_sample(influence: f64) -> RenderSample {
        RenderSample { influence, ..RenderSample::default() }
    }

    #[test]
    fn all_samples_missing_is_fully_transparent() {
        let info = vec![RenderSample::default(); 4];
        let shaded = shade(&info, &palette(), &manifest(), false, false);
        assert_eq!(shaded.alpha, 0.0);
    }

    #[test]
    fn uniform_hit_gives_opaque_pixel_with_that_modal_index() {
        let info = vec![hit_sample(2), hit_sample(2), hit_sample(2), hit_sample(2)];
        let shaded = shade(&info, &palette(), &manifest(), false, false);
        assert_eq!(shaded.modal_index, 2);
        assert_eq!(shaded.alpha, 1.0);
    }

    #[test]
    fn folded_duplicate_samples_are_skipped() {
        let info = vec![hit_sample(2), RenderSample { is_folded: true, ..RenderSample::default() }];
        let shaded = shade(&info, &palette(), &manifest(), false, false);
        assert_eq!(shaded.modal_index, 2);
    }

    #[test]
    fn misses_count_toward_the_hard_edge_threshold_and_soften_alpha() {
        let mut manifest = manifest();
        manifest.hard_edge_threshold = 0.5;
        // 1 hit out of 4 samples: below the 0.5 threshold, so the pixel is
        // discarded entirely regardless of soften_edges.
        let info = vec![hit_sample(2), miss_sample(1.0), miss_sample(1.0), miss_sample(1.0)];
        let shaded = shade(&info, &palette(), &manifest, true, false);
        assert_eq!(shaded.alpha, 0.0);

        // 1 hit out of 2 samples: at the threshold, so the pixel survives
        // and, under soften_edges, fades proportionally to the miss.
        let info = vec![hit_sample(2), miss_sample(1.0)];
        let shaded = shade(&info, &palette(), &manifest, true, false);
        assert!(shaded.alpha > 0.0 && shaded.alpha < 1.0, "expected a faded edge alpha, got {}", shaded.alpha);
    }

    #[test]
    fn a_folded_duplicate_does_not_inflate_the_hard_edge_ratio() {
        let mut manifest = manifest();
        manifest.hard_edge_threshold = 0.9;
        // Without fold-awareness this would look like 2/2 hits; the fold
        // carries no influence or collision of its own and must not count
        // toward sample_count.
        let info = vec![hit_sample(2), RenderSample { is_folded: true, ..RenderSample::default() }];
        let shaded = shade(&info, &palette(), &manifest, false, false);
        assert_eq!(shaded.alpha, 1.0);
    }

    #[test]
    fn mask_rule_tiers() {
        let mut info = ShaderInfo { specialness: 0.9, modal_index: 5, ..Default::default() };
        assert_eq!(mask_index(&info), 5);

        info.specialness = 0.3;
        info.is_mask_colour = true;
        info.dithered_index = 7;
        assert_eq!(mask_index(&info), 7);

        info.specialness = 0.1;
        assert_eq!(mask_index(&info), 0);
    }

    #[test]
    fn regions_join_only_within_max_gap() {
        let mut output: ShaderOutput = vec![
            vec![ShaderInfo { alpha: 1.0, modal_index: 1, ..Default::default() }, ShaderInfo { alpha: 1.0, modal_index: 3, ..Default::default() }],
        ];
        let regions = identify_regions(&mut output, &palette());
        // max_gap_in_region is 1, so index 1 and 3 (gap 2) must not join.
        assert_ne!(output[0][0].region_id, output[0][1].region_id);
        assert_eq!(regions.len(), 2);
    }
}
