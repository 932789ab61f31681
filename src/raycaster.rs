//! Per-sprite ray casting: viewport setup, primary DDA walk with surface
//! recovery, and secondary shadow rays.
//!
//! Grounded on `fp.go` (the DDA walk and its 9-voxel halo recovery) and
//! `raycaster.go` (`GetRaycastOutput`/`raycastSample`/`setResult`), with
//! `rayon` column parallelism standing in for the original's
//! goroutine-per-column `sync.WaitGroup`. The viewport/render-direction
//! setup (`getViewportPlane`/`getRenderDirection`/`getLightingDirection`)
//! isn't carried in this source drop; its exact formulas were reconstructed
//! from `setup_test.go`'s expected values, which the numbers below match.

use rayon::prelude::*;

use crate::geometry::{Plane, Point, Vector3};
use crate::manifest::{Manifest, Sprite};
use crate::preprocess::ProcessedVoxelObject;
use crate::sampler::Samples;

/// Outcome of a single DDA walk: where it landed, and how.
#[derive(Debug, Default, Copy, Clone)]
pub struct RayResult {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub has_geometry: bool,
    pub is_recovered: bool,
    pub depth: i32,
    pub approached_bounding_box: bool,
}

/// One sample's contribution to an output pixel.
#[derive(Debug, Default, Copy, Clone)]
pub struct RenderSample {
    pub collision: bool,
    pub index: u8,
    pub normal: Vector3,
    pub averaged_normal: Vector3,
    pub depth: i32,
    pub occlusion: i32,
    pub light_amount: f64,
    pub shadowing: f64,
    pub influence: f64,
    pub detail: f64,
    /// `true` when this sample was folded into the previous one by
    /// duplicate-hit coalescing; its influence already landed there and it
    /// otherwise carries no data of its own (distinct from a ray that simply
    /// missed geometry, which still carries its `influence`).
    pub is_folded: bool,
    pub is_recovered: bool,
}

/// Every sample's result for one output pixel, aligned with its sampler
/// list (folded duplicates stay in place with `is_folded=true`).
pub type RenderInfo = Vec<RenderSample>;

/// `[x][y]` grid of per-pixel sample results.
pub type RenderOutput = Vec<Vec<RenderInfo>>;

fn render_direction(angle_deg: f64, elevation_deg: f64) -> Vector3 {
    let (rad, elev) = (angle_deg.to_radians(), elevation_deg.to_radians());
    Vector3::new(-rad.cos(), rad.sin(), elev.sin()).normalise()
}

fn lighting_direction(angle_deg: f64, elevation_deg: f64, flip: bool) -> Vector3 {
    let (rad, elev) = (angle_deg.to_radians(), elevation_deg.to_radians());
    let mut v = Vector3::new(-rad.cos(), rad.sin(), elev.sin());
    if flip {
        v.y = -v.y;
    }
    Vector3::zero().subtract(v).normalise()
}

fn effective_elevation(manifest: &Manifest, sprite: &Sprite) -> f64 {
    if sprite.render_elevation != 0.0 {
        sprite.render_elevation
    } else {
        manifest.render_elevation
    }
}

/// Builds the world-space rectangle a sprite's rays are cast from.
///
/// The renormalised angle-only direction `(-cos θ, sin θ, 0)` pushes the
/// plane `size.x` voxels away from the model (padded to the manifest's full
/// X extent when `pad_to_full_length`); the in-plane axes are scaled
/// per-component by the model's own half-extents so the rectangle frames
/// the silhouette regardless of axis.
fn viewport_plane(angle_deg: f64, manifest: &Manifest, z_error: f64, size: Point) -> Plane {
    let rad = angle_deg.to_radians();
    let (x, y) = (-rad.cos(), rad.sin());

    let push_x = if manifest.pad_to_full_length { manifest.size.0 } else { size.x as f64 };
    let midpoint = Vector3::new(push_x / 2.0, size.y as f64 / 2.0, size.z as f64 / 2.0);

    let viewpoint =
        midpoint.add(Vector3::new(x, y, 0.0).multiply_by_constant(push_x)).add(Vector3::new(0.0, 0.0, z_error));

    let plane_normal = Vector3::unit_z().multiply_by_vector(midpoint);
    let render_normal = Vector3::new(y, -x, 0.0).multiply_by_vector(midpoint);

    Plane::new(
        viewpoint.subtract(render_normal).subtract(plane_normal),
        viewpoint.add(render_normal).subtract(plane_normal),
        viewpoint.add(render_normal).add(plane_normal),
        viewpoint.subtract(render_normal).add(plane_normal),
    )
}

fn is_inside_bounding_volume(loc: Vector3, limits: Vector3) -> bool {
    loc.x >= 0.0 && loc.y >= 0.0 && loc.z >= 0.0 && loc.x < limits.x && loc.y < limits.y && loc.z < limits.z
}

fn is_nearly_inside_bounding_volume(loc: Vector3, limits: Vector3) -> bool {
    loc.x >= -3.0
        && loc.y >= -3.0
        && loc.z >= -3.0
        && loc.x < limits.x + 3.0
        && loc.y < limits.y + 3.0
        && loc.z < limits.z + 3.0
}

fn can_terminate_ray(loc: Vector3, ray: Vector3, limits: Vector3) -> bool {
    (loc.x < 0.0 && ray.x <= 0.0)
        || (loc.y < 0.0 && ray.y <= 0.0)
        || (loc.z < 0.0 && ray.z <= 0.0)
        || (loc.x > limits.x && ray.x >= 0.0)
        || (loc.y > limits.y && ray.y >= 0.0)
        || (loc.z > limits.z && ray.z >= 0.0)
}

fn intersection_vector(ray_dim: f64, loc_dim: f64, limit_dim: f64, ray: Vector3) -> Vector3 {
    let mut dist = -1.0;
    if ray_dim > 0.1 {
        dist = -loc_dim;
    }
    if ray_dim < -0.1 {
        dist = limit_dim - loc_dim;
    }
    if dist > 0.0 {
        ray.multiply_by_constant(dist / ray_dim)
    } else {
        Vector3::zero()
    }
}

fn intersection_with_bounds(loc: Vector3, ray: Vector3, limits: Vector3) -> Vector3 {
    if can_terminate_ray(loc, ray, limits) {
        return loc;
    }
    let loc = loc.add(intersection_vector(ray.x, loc.x, limits.x, ray));
    loc.add(intersection_vector(ray.y, loc.y, limits.y, ray))
}

fn flip_y_index(object: &ProcessedVoxelObject, y: i32) -> i32 {
    (object.size().1 as i32 - 1) - y
}

/// Walks the ray forward until it either strikes non-empty geometry or can
/// be proven not to re-enter the bounding box. Every fourth step pays for
/// the (relatively expensive) termination check.
fn cast_ray_to_candidate(
    object: &ProcessedVoxelObject,
    loc: Vector3,
    ray: Vector3,
    limits: Vector3,
    flip_y: bool,
) -> (bool, Vector3, bool) {
    let loc0 = loc;
    let mut loc = loc;
    let mut approached_bb = false;
    let mut i = 0i32;
    let mut fi = 0.0f64;

    loop {
        if i % 4 == 0 && can_terminate_ray(loc, ray, limits) {
            break;
        }

        if is_inside_bounding_volume(loc, limits) {
            approached_bb = true;
            let (lx, ly, lz) = (loc.x as i32, loc.y as i32, loc.z as i32);
            let ly = if flip_y { flip_y_index(object, ly) } else { ly };

            if object.get(lx as usize, ly as usize, lz as usize).index != 0 {
                return (true, loc, approached_bb);
            }
        } else if !approached_bb && is_nearly_inside_bounding_volume(loc, limits) {
            approached_bb = true;
        }

        i += 1;
        fi += 1.0;
        loc = loc0.add(ray.multiply_by_constant(fi));
    }

    (false, Vector3::zero(), approached_bb)
}

/// Order the 9-voxel halo is inspected in: centre first, then the
/// face-adjacent four, then the diagonal four.
const HALO_CHECK_ORDER: [usize; 9] = [4, 1, 7, 3, 5, 0, 2, 6, 8];

/// Steps backward along the ray looking for a surface voxel when the DDA
/// walk lands inside the model instead of on its skin. Each retreat step
/// inspects a 3x3 halo whose plane is chosen from the ray's dominant axis,
/// cycling X -> Y -> Z if none of the three halos finds a surface voxel.
fn recover_non_surface_voxel(
    object: &ProcessedVoxelObject,
    loc: Vector3,
    ray: Vector3,
    limits: Vector3,
    flip_y: bool,
) -> (i32, i32, i32, bool) {
    let b_size_y = object.size().1 as i32 - 1;

    let voxel_at = |p: Point| -> (i32, i32, i32) {
        let ly = if flip_y { b_size_y - p.y } else { p.y };
        (p.x, ly, p.z)
    };

    let (lx0, ly0, lz0) = (loc.x as i32, loc.y as i32, loc.z as i32);
    let (lx, ly, lz) = voxel_at(Point::new(lx0, ly0, lz0));
    if is_inside_bounding_volume(loc, limits) && object.get(lx as usize, ly as usize, lz as usize).is_surface {
        return (lx, ly, lz, false);
    }

    let mut check = [Point::default(); 9];
    let (mut x, mut y, mut z) = (ray.x, ray.y, ray.z);
    let mut loc = loc;

    for _ in 0..10 {
        let (mut lx, mut ly, mut lz) = (loc.x as i32, loc.y as i32, loc.z as i32);

        for _ in 0..3 {
            if x.abs() > y.abs() && x.abs() > z.abs() {
                for k in 0..9 {
                    check[k] = Point::new(lx, ly - 1 + (k as i32 % 3), lz - 1 + (k as i32 / 3));
                }
                x = 0.0;
            } else if y.abs() > x.abs() && y.abs() > z.abs() {
                for k in 0..9 {
                    check[k] = Point::new(lx - 1 + (k as i32 % 3), ly, lz - 1 + (k as i32 / 3));
                }
                y = 0.0;
            } else if z.abs() > x.abs() && z.abs() > y.abs() {
                for k in 0..9 {
                    check[k] = Point::new(lx - 1 + (k as i32 % 3), ly - 1 + (k as i32 / 3), lz);
                }
                z = 0.0;
            }

            for &idx in &HALO_CHECK_ORDER {
                let point = check[idx];
                let point_f = point.to_vector3();
                lx = point.x;
                ly = point.y;
                lz = point.z;

                if is_inside_bounding_volume(point_f, limits) {
                    let (vx, vy, vz) = voxel_at(point);
                    if object.get(vx as usize, vy as usize, vz as usize).is_surface {
                        return (vx, vy, vz, true);
                    }
                }
            }

            if x == 0.0 && y == 0.0 && z == 0.0 {
                x = ray.x;
                y = ray.y;
                z = ray.z;
            }
        }

        loc = loc.subtract(ray.normalise());
    }

    let (lx, ly, lz) = voxel_at(Point::new(lx0, ly0, lz0));
    (lx, ly, lz, true)
}

fn cast_fp_ray(
    object: &ProcessedVoxelObject,
    loc0: Vector3,
    loc: Vector3,
    ray: Vector3,
    limits: Vector3,
    flip_y: bool,
) -> RayResult {
    let (collision, hit_loc, approached_bb) = cast_ray_to_candidate(object, loc, ray, limits, flip_y);
    if collision {
        let (x, y, z, is_recovered) = recover_non_surface_voxel(object, hit_loc, ray, limits, flip_y);
        RayResult {
            x,
            y,
            z,
            has_geometry: true,
            is_recovered,
            depth: loc0.subtract(hit_loc).length() as i32,
            approached_bounding_box: approached_bb,
        }
    } else {
        RayResult { approached_bounding_box: approached_bb, ..RayResult::default() }
    }
}

fn shadow_fraction(manifest: &Manifest, light_amount: f64, shadow_length: i32) -> f64 {
    let mut shadowing = if shadow_length > 0 && shadow_length < 10 {
        1.0
    } else if shadow_length > 0 && shadow_length < 80 {
        (70.0 - (shadow_length as f64 - 10.0)) / 80.0
    } else {
        0.0
    };

    if manifest.soft_shadow {
        let scale = ((light_amount - manifest.shadow_threshold) / (1.0 - manifest.shadow_threshold)).clamp(0.0, 1.0);
        shadowing *= scale;
    }

    shadowing
}

#[allow(clippy::too_many_arguments)]
fn raycast_sample(
    viewport: &Plane,
    uv: (f64, f64),
    influence: f64,
    ray: Vector3,
    limits: Vector3,
    object: &ProcessedVoxelObject,
    manifest: &Manifest,
    sprite: &Sprite,
    lighting: Vector3,
    min_x: i32,
    max_x: i32,
) -> (RenderSample, Option<(i32, i32, i32)>) {
    let mut loc0 = viewport.bilerp_within_plane(uv.0, uv.1);
    loc0.z += sprite.joggle + manifest.joggle;

    let loc = intersection_with_bounds(loc0, ray, limits);
    let ray_result = cast_fp_ray(object, loc0, loc, ray, limits, sprite.flip);

    if !ray_result.has_geometry || ray_result.x < min_x || ray_result.x > max_x {
        return (RenderSample { influence, ..RenderSample::default() }, None);
    }

    let element = object.get(ray_result.x as usize, ray_result.y as usize, ray_result.z as usize);

    let hit = Vector3::new(ray_result.x as f64, ray_result.y as f64, ray_result.z as f64);
    let shadow_vec = Vector3::zero().subtract(lighting).normalise();
    let shadow_loc = hit.add(shadow_vec);
    let shadow_result = cast_fp_ray(object, shadow_loc, shadow_loc, shadow_vec, limits, sprite.flip);

    let light_amount = element.averaged_normal.dot(lighting);

    let sample = RenderSample {
        collision: true,
        index: element.index,
        normal: element.normal,
        averaged_normal: element.averaged_normal,
        depth: ray_result.depth,
        occlusion: element.occlusion,
        light_amount,
        shadowing: shadow_fraction(manifest, light_amount, shadow_result.depth),
        influence,
        detail: element.detail,
        is_folded: false,
        is_recovered: ray_result.is_recovered,
    };

    (sample, Some((ray_result.x, ray_result.y, ray_result.z)))
}

fn slice_bounds(object: &ProcessedVoxelObject, manifest: &Manifest, sprite: &Sprite) -> (i32, i32) {
    let size_x = object.size().0 as i32;
    if manifest.slice_length <= 0 || manifest.slice_threshold <= 0 || manifest.slice_threshold >= size_x {
        return (0, size_x);
    }

    let midpoint = (size_x / 2) - (manifest.slice_length / 2);
    let mut min_x = midpoint - (manifest.slice_length * sprite.slice);
    let mut max_x = min_x + manifest.slice_length;

    min_x -= manifest.slice_overlap;
    max_x += manifest.slice_overlap;

    if min_x < 0 {
        min_x = 0;
    }
    if max_x > 255 {
        max_x = 255;
    }

    (min_x, max_x)
}

/// Casts every sample in `samples` against `object`, producing one
/// `RenderInfo` per output pixel. Columns run concurrently; each owns a
/// disjoint slice of the result so no locking is needed.
pub fn cast(object: &ProcessedVoxelObject, manifest: &Manifest, sprite: &Sprite, samples: &Samples) -> RenderOutput {
    let (sx, sy, sz) = object.size();
    let limits = Vector3::new(sx as f64, sy as f64, sz as f64);
    let size_point = Point::new(sx as i32, sy as i32, sz as i32);

    let viewport = viewport_plane(sprite.angle, manifest, sprite.z_error, size_point);
    let ray = Vector3::zero().subtract(render_direction(sprite.angle, effective_elevation(manifest, sprite)));
    let lighting =
        lighting_direction(sprite.angle + manifest.lighting_angle, manifest.lighting_elevation, sprite.flip);

    let (min_x, max_x) = slice_bounds(object, manifest, sprite);

    (0..samples.width())
        .into_par_iter()
        .map(|x| {
            (0..samples.height())
                .map(|y| {
                    let sample_list = samples.at(x, y);
                    let mut out: RenderInfo = Vec::with_capacity(sample_list.len());
                    let mut anchor: Option<(usize, (i32, i32, i32))> = None;

                    for s in sample_list {
                        let (candidate, voxel) = raycast_sample(
                            &viewport,
                            (s.uv.x, s.uv.y),
                            s.influence,
                            ray,
                            limits,
                            object,
                            manifest,
                            sprite,
                            lighting,
                            min_x,
                            max_x,
                        );

                        match (voxel, anchor) {
                            (Some(v), Some((anchor_idx, anchor_voxel))) if v == anchor_voxel => {
                                out[anchor_idx].influence += candidate.influence;
                                out.push(RenderSample { is_folded: true, ..RenderSample::default() });
                            }
                            (Some(v), _) => {
                                anchor = Some((out.len(), v));
                                out.push(candidate);
                            }
                            (None, _) => {
                                anchor = None;
                                out.push(candidate);
                            }
                        }
                    }

                    out
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Palette;
    use crate::preprocess::TilingMode;
    use crate::sampler;
    use crate::voxel::VoxelGrid;
    use std::io::Cursor;

    fn plain_palette() -> Palette {
        Palette::from_reader(Cursor::new(r#"{"entries": [[0,0,0],[10,10,10]]}"#)).unwrap()
    }

    fn solid_cube_object(n: usize) -> ProcessedVoxelObject {
        let palette = plain_palette();
        let mut grid = VoxelGrid::new(n, n, n);
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    grid.set(x, y, z, 1);
                }
            }
        }
        ProcessedVoxelObject::build(&grid, &palette, false, TilingMode::Wrap, false)
    }

    fn base_manifest(size: (f64, f64, f64)) -> Manifest {
        Manifest {
            lighting_angle: 0.0,
            lighting_elevation: 30.0,
            size,
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
            hard_edge_threshold: 0.0,
        }
    }

    fn base_sprite(angle: f64) -> Sprite {
        Sprite {
            angle,
            width: 20,
            height: 20,
            x: 0,
            flip: false,
            slice: 0,
            render_elevation: 0.0,
            joggle: 0.0,
            z_error: 0.0,
        }
    }

    #[test]
    fn straight_ray_into_a_solid_cube_hits_geometry() {
        let n = 8;
        let object = solid_cube_object(n);
        let manifest = base_manifest((n as f64, n as f64, n as f64));
        let sprite = base_sprite(0.0);

        let samples = sampler::square(4, 4, 1, 0.0, 1.0);
        let output = cast(&object, &manifest, &sprite, &samples);

        let hits = output.iter().flatten().flatten().filter(|s| s.collision).count();
        assert!(hits > 0, "expected at least one ray to strike the solid cube");
    }

    #[test]
    fn empty_grid_produces_no_collisions() {
        let palette = plain_palette();
        let grid = VoxelGrid::new(4, 4, 4);
        let object = ProcessedVoxelObject::build(&grid, &palette, false, TilingMode::Wrap, false);
        let manifest = base_manifest((4.0, 4.0, 4.0));
        let sprite = base_sprite(0.0);

        let samples = sampler::square(2, 2, 1, 0.0, 1.0);
        let output = cast(&object, &manifest, &sprite, &samples);

        assert!(output.iter().flatten().flatten().all(|s| !s.collision));
    }

    #[test]
    fn shadow_length_mapping_matches_the_threshold_bands() {
        let manifest = base_manifest((1.0, 1.0, 1.0));
        assert_eq!(shadow_fraction(&manifest, 1.0, 0), 0.0);
        assert_eq!(shadow_fraction(&manifest, 1.0, 5), 1.0);
        assert!((shadow_fraction(&manifest, 1.0, 20) - (70.0 - 10.0) / 80.0).abs() < 1e-9);
        assert_eq!(shadow_fraction(&manifest, 1.0, 200), 0.0);
    }

    #[test]
    fn render_direction_matches_known_angles() {
        let d = render_direction(0.0, 30.0);
        assert!((d.x - -0.894427190999916).abs() < 1e-9);
        assert!((d.y - 0.0).abs() < 1e-9);
        assert!((d.z - 0.447213595499958).abs() < 1e-9);

        let d90 = render_direction(90.0, 30.0);
        assert!((d90.y - 0.894427190999916).abs() < 1e-9);
    }

    #[test]
    fn viewport_plane_matches_known_angles() {
        let manifest = base_manifest((126.0, 40.0, 40.0));
        let size = Point::new(126, 40, 40);

        let plane = viewport_plane(0.0, &manifest, 0.0, size);
        assert!(plane.a.equals(Vector3::new(-63.0, 0.0, 0.0)));
        assert!(plane.b.equals(Vector3::new(-63.0, 40.0, 0.0)));
        assert!(plane.c.equals(Vector3::new(-63.0, 40.0, 40.0)));
        assert!(plane.d.equals(Vector3::new(-63.0, 0.0, 40.0)));

        let plane90 = viewport_plane(90.0, &manifest, 0.0, size);
        assert!(plane90.a.equals(Vector3::new(0.0, 146.0, 0.0)));
        assert!(plane90.c.equals(Vector3::new(126.0, 146.0, 40.0)));
    }
}
