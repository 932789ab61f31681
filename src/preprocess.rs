//! Two-pass parallel voxel preprocessor.
//!
//! Produces, for every voxel, a surface flag, a local normal, an averaged
//! normal, an ambient-occlusion scalar and a "detail" scalar. Grounded on
//! `processedvoxelobject.go`'s two parallel passes and its memoised
//! spherical-offset tables, using `rayon::par_chunks_mut` over X columns
//! in place of a goroutine-per-column `WaitGroup`.
//!
//! Pass two is split internally into a sequential process-colour removal
//! step followed by a parallel read-from-snapshot step; the original reads
//! and writes the same array from every column concurrently, which races
//! on cells right at a column boundary. Splitting keeps the result
//! deterministic without changing what either step computes.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use rayon::prelude::*;

use crate::geometry::Vector3;
use crate::palette::Palette;
use crate::voxel::VoxelGrid;

const NORMAL_RADIUS: i32 = 3;
const NORMAL_AVERAGE_DISTANCE: i32 = 1;
const OCCLUSION_RADIUS: i32 = 4;
const BORDER: i32 = 8;

/// How the bordered lookup treats space outside the grid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TilingMode {
    Wrap,
    Repeat,
    Reflect,
    Reflect101,
}

impl TilingMode {
    pub fn parse(name: &str) -> Self {
        match name {
            "repeat" => TilingMode::Repeat,
            "reflect" => TilingMode::Reflect,
            "reflect101" => TilingMode::Reflect101,
            _ => TilingMode::Wrap,
        }
    }
}

/// Per-voxel outputs of the preprocessor.
#[derive(Debug, Default, Copy, Clone)]
pub struct ProcessedElement {
    pub index: u8,
    pub is_surface: bool,
    pub normal: Vector3,
    pub averaged_normal: Vector3,
    pub occlusion: i32,
    pub detail: f64,
}

#[inline]
fn offset(size: (usize, usize, usize), x: usize, y: usize, z: usize) -> usize {
    let (_, sy, sz) = size;
    (x * sy + y) * sz + z
}

fn reflect(a: i64, n: i64) -> i64 {
    let b = (a.rem_euclid(n * 2) + n * 2) % (n * 2);
    if b < n {
        b
    } else {
        n * 2 - 1 - b
    }
}

fn reflect101(a: i64, n: i64) -> i64 {
    let period = n * 2 - 2;
    let b = (a.rem_euclid(period) + period) % period;
    if b < n {
        b
    } else {
        period - b
    }
}

/// Bordered 0/1 occupancy grid (1 = empty) so the normal kernel never needs
/// a bounds check: `BORDER` voxels of padding on every side.
struct BorderLookup {
    size: (usize, usize, usize),
    data: Vec<u8>,
}

impl BorderLookup {
    fn build(grid: &VoxelGrid, tiled: bool, mode: TilingMode, has_base: bool) -> Self {
        let (sx, sy, sz) = grid.size();
        let (sxi, syi, szi) = (sx as i64, sy as i64, sz as i64);
        let (px, py, pz) = (sx + (BORDER as usize) * 2, sy + (BORDER as usize) * 2, sz + (BORDER as usize) * 2);
        let mut data = vec![1u8; px * py * pz];

        for x in 0..px as i64 {
            for y in 0..py as i64 {
                for z in 0..pz as i64 {
                    let gx = x - BORDER as i64;
                    let gy = y - BORDER as i64;
                    let gz = z - BORDER as i64;

                    let empty = if tiled {
                        let (ix, iy, iz) = match mode {
                            TilingMode::Repeat => (gx.clamp(0, sxi - 1), gy.clamp(0, syi - 1), gz.clamp(0, szi - 1)),
                            TilingMode::Reflect => (reflect(gx, sxi), reflect(gy, syi), reflect(gz, szi)),
                            TilingMode::Reflect101 => (reflect101(gx, sxi), reflect101(gy, syi), reflect101(gz, szi)),
                            TilingMode::Wrap => (gx.rem_euclid(sxi), gy.rem_euclid(syi), gz.rem_euclid(szi)),
                        };
                        grid.get(ix as usize, iy as usize, iz as usize) == 0
                    } else if grid.in_bounds(gx, gy, gz) {
                        grid.get(gx as usize, gy as usize, gz as usize) == 0
                    } else {
                        true
                    };

                    let mut value: u8 = if empty { 1 } else { 0 };
                    if has_base && z < BORDER as i64 {
                        value = 0;
                    }
                    let o = (x as usize * py + y as usize) * pz + z as usize;
                    data[o] = value;
                }
            }
        }

        BorderLookup { size: (px, py, pz), data }
    }

    #[inline]
    fn get(&self, x: i64, y: i64, z: i64) -> i64 {
        let (_, py, pz) = self.size;
        let o = (x as usize * py + y as usize) * pz + z as usize;
        self.data[o] as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct StartValue {
    min: i32,
    max: i32,
}

struct RadiusStartValues {
    j: Vec<StartValue>,
    k: Vec<Vec<StartValue>>,
}

fn radius_cache() -> &'static RwLock<HashMap<i32, Arc<RadiusStartValues>>> {
    static CACHE: OnceLock<RwLock<HashMap<i32, Arc<RadiusStartValues>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Precomputes the `(Δj,Δk)` span covered by each `Δi` slice of the ball of
/// the given radius, caching by radius. Eliminates a branch misprediction
/// in the per-voxel normal kernel.
fn radius_start_values(radius: i32) -> Arc<RadiusStartValues> {
    if let Some(v) = radius_cache().read().unwrap().get(&radius) {
        return Arc::clone(v);
    }

    let width = (radius * 2 + 1) as usize;
    let mut j = vec![StartValue { min: radius, max: -radius }; width];
    let mut k = vec![vec![StartValue { min: radius, max: -radius }; width]; width];

    for i in -radius..=radius {
        let mut j_min = radius;
        let mut j_max = -radius;
        for jj in -radius..=radius {
            if i * i + jj * jj <= radius * radius {
                j_min = j_min.min(jj);
                j_max = j_max.max(jj);
            }

            let mut k_min = radius;
            let mut k_max = -radius;
            for kk in -radius..=radius {
                if i * i + jj * jj + kk * kk <= radius * radius {
                    k_min = k_min.min(kk);
                    k_max = k_max.max(kk);
                }
            }
            k[(i + radius) as usize][(jj + radius) as usize] = StartValue { min: k_min, max: k_max };
        }
        j[(i + radius) as usize] = StartValue { min: j_min, max: j_max };
    }

    let values = Arc::new(RadiusStartValues { j, k });
    radius_cache().write().unwrap().insert(radius, Arc::clone(&values));
    values
}

fn normal_radius(palette: &Palette, index: u8) -> i32 {
    (NORMAL_RADIUS + palette.smoothness(index as usize) * 2).max(1)
}

fn normal_average_distance(palette: &Palette, index: u8) -> i32 {
    (NORMAL_AVERAGE_DISTANCE + palette.smoothness(index as usize)).max(0)
}

fn is_invisible(palette: &Palette, index: u8) -> bool {
    index == 0 || palette.is_process_colour(index as usize)
}

fn is_surface(grid: &VoxelGrid, palette: &Palette, size: (usize, usize, usize), x: usize, y: usize, z: usize) -> bool {
    if is_invisible(palette, grid.get(x, y, z)) {
        return false;
    }
    if x == 0 || y == 0 || z == 0 || x == size.0 - 1 || y == size.1 - 1 || z == size.2 - 1 {
        return true;
    }
    is_invisible(palette, grid.get(x + 1, y, z))
        || is_invisible(palette, grid.get(x - 1, y, z))
        || is_invisible(palette, grid.get(x, y + 1, z))
        || is_invisible(palette, grid.get(x, y - 1, z))
        || is_invisible(palette, grid.get(x, y, z + 1))
        || is_invisible(palette, grid.get(x, y, z - 1))
}

fn calculate_normal(
    lookup: &BorderLookup,
    palette: &Palette,
    x: usize,
    y: usize,
    z: usize,
    index: u8,
) -> Vector3 {
    let radius = normal_radius(palette, index);
    let values = radius_start_values(radius);

    let bx = x as i64 + BORDER as i64;
    let by = y as i64 + BORDER as i64;
    let bz = z as i64 + BORDER as i64;

    let (mut ti, mut tj, mut tk) = (0i64, 0i64, 0i64);
    for i in -radius..=radius {
        let jr = values.j[(i + radius) as usize];
        for jj in jr.min..=jr.max {
            let kr = values.k[(i + radius) as usize][(jj + radius) as usize];
            for kk in kr.min..=kr.max {
                let v = lookup.get(bx + i as i64, by + jj as i64, bz + kk as i64);
                ti -= i as i64 * v;
                tj -= jj as i64 * v;
                tk -= kk as i64 * v;
            }
        }
    }

    let normal = Vector3::new(ti as f64, tj as f64, tk as f64);
    if normal.length() > 0.01 {
        normal.normalise()
    } else {
        normal
    }
}

fn safe_distance(
    size: (usize, usize, usize),
    x: i32,
    y: i32,
    z: i32,
    radius: i32,
) -> (i32, i32, i32, i32, i32, i32) {
    let (sx, sy, sz) = (size.0 as i32, size.1 as i32, size.2 as i32);

    let mut min_i = -radius;
    let mut max_i = radius;
    if x + min_i < 0 {
        min_i -= x + min_i;
    }
    if x + max_i >= sx - 1 {
        max_i -= (x + max_i) - (sx - 1);
    }

    let mut min_j = -radius;
    let mut max_j = radius;
    if y + min_j < 0 {
        min_j -= y + min_j;
    }
    if y + max_j >= sy - 1 {
        max_j -= (y + max_j) - (sy - 1);
    }

    let mut min_k = -radius;
    let mut max_k = radius;
    if z + min_k < 0 {
        min_k -= z + min_k;
    }
    if z + max_k >= sz - 1 {
        max_k -= (z + max_k) - (sz - 1);
    }

    (min_i, max_i, min_j, max_j, min_k, max_k)
}

/// Averages the normals of same-smoothness surface neighbours whose normal
/// does not point against this voxel's own, preserving crease edges.
fn average_normal(
    elements: &[ProcessedElement],
    size: (usize, usize, usize),
    palette: &Palette,
    x: usize,
    y: usize,
    z: usize,
) -> Vector3 {
    let this = elements[offset(size, x, y, z)];
    if !this.is_surface {
        return Vector3::zero();
    }

    let smoothness = palette.smoothness(this.index as usize);
    let distance = normal_average_distance(palette, this.index);
    let (min_i, max_i, min_j, max_j, min_k, max_k) = safe_distance(size, x as i32, y as i32, z as i32, distance);

    let mut sum = Vector3::zero();
    for i in min_i..=max_i {
        for j in min_j..=max_j {
            for k in min_k..=max_k {
                let nx = (x as i32 + i) as usize;
                let ny = (y as i32 + j) as usize;
                let nz = (z as i32 + k) as usize;
                let neighbour = elements[offset(size, nx, ny, nz)];
                if neighbour.index == 0 {
                    continue;
                }
                if palette.smoothness(neighbour.index as usize) != smoothness {
                    continue;
                }
                if this.normal.dot(neighbour.normal) >= 0.0 {
                    sum = sum.add(neighbour.normal);
                }
            }
        }
    }

    if sum.length() < 0.01 {
        this.normal
    } else {
        sum.normalise()
    }
}

/// Counts surface voxels within radius 4 of a point stepped back along the
/// averaged normal, restricted to the outside half-space of the own normal.
fn occlusion(elements: &[ProcessedElement], size: (usize, usize, usize), x: usize, y: usize, z: usize) -> i32 {
    let this = elements[offset(size, x, y, z)];
    if !this.is_surface {
        return 0;
    }

    let normal = this.averaged_normal;
    let base = Vector3::new(x as f64, y as f64, z as f64).subtract(normal.multiply_by_constant(2.0));
    let (q, w, e) = (base.x as i32, base.y as i32, base.z as i32);

    let distance = OCCLUSION_RADIUS;
    let distance_f = distance as f64;
    let (min_i, max_i, min_j, max_j, min_k, max_k) = safe_distance(size, q, w, e, distance);

    let mut count = 0;
    for i in min_i..=max_i {
        for j in min_j..=max_j {
            for k in min_k..=max_k {
                let vec = Vector3::new(i as f64, j as f64, k as f64);
                if vec.length() >= distance_f || vec.dot(normal) >= 0.0 {
                    continue;
                }
                let (nx, ny, nz) = (q + i, w + j, e + k);
                if nx < 0 || ny < 0 || nz < 0 {
                    continue;
                }
                let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
                if nx >= size.0 || ny >= size.1 || nz >= size.2 {
                    continue;
                }
                if elements[offset(size, nx, ny, nz)].is_surface {
                    count += 1;
                    if count >= 10 {
                        return 10;
                    }
                }
            }
        }
    }
    count
}

/// Fraction of non-self surface neighbours within a 2-voxel cube that are
/// "different" from the centre voxel.
fn detail(
    elements: &[ProcessedElement],
    size: (usize, usize, usize),
    palette: &Palette,
    x: usize,
    y: usize,
    z: usize,
) -> f64 {
    let this = elements[offset(size, x, y, z)];
    if !this.is_surface {
        return 0.0;
    }

    let this_index = this.index as i32;
    let this_range = palette.range_index_at(this.index as usize);
    let (min_i, max_i, min_j, max_j, min_k, max_k) = safe_distance(size, x as i32, y as i32, z as i32, 2);

    let mut total = 0.0;
    let mut diff = 0.0;
    for i in min_i..=max_i {
        for j in min_j..=max_j {
            for k in min_k..=max_k {
                if i == 0 && j == 0 && k == 0 {
                    continue;
                }
                let nx = (x as i32 + i) as usize;
                let ny = (y as i32 + j) as usize;
                let nz = (z as i32 + k) as usize;
                let neighbour = elements[offset(size, nx, ny, nz)];
                if !neighbour.is_surface {
                    continue;
                }
                total += 1.0;

                let elem_index = neighbour.index as i32;
                let elem_range = palette.range_index_at(neighbour.index as usize);
                let same_range_but_shaded = elem_range == this_range
                    && this_range
                        .map(|id| palette.range_by_index(id).is_company_colour())
                        .unwrap_or(false)
                    && elem_index != this_index;

                if (elem_index - this_index).abs() > 2 || elem_range != this_range || same_range_but_shaded {
                    diff += 1.0;
                }
            }
        }
    }

    if total == 0.0 {
        0.0
    } else {
        diff / total
    }
}

/// The preprocessed grid: immutable for the duration of a render job, and
/// shared read-only across sprites and raycast columns.
#[derive(Debug, Clone)]
pub struct ProcessedVoxelObject {
    size: (usize, usize, usize),
    elements: Vec<ProcessedElement>,
}

impl ProcessedVoxelObject {
    pub fn build(grid: &VoxelGrid, palette: &Palette, tiled_normals: bool, tiling_mode: TilingMode, has_base: bool) -> Self {
        let size = grid.size();
        let (sy, sz) = (size.1, size.2);
        let mut elements = vec![ProcessedElement::default(); size.0 * sy * sz];

        for x in 0..size.0 {
            for y in 0..sy {
                for z in 0..sz {
                    elements[offset(size, x, y, z)].index = grid.get(x, y, z);
                }
            }
        }

        let lookup = BorderLookup::build(grid, tiled_normals, tiling_mode, has_base);

        elements.par_chunks_mut(sy * sz).enumerate().for_each(|(x, column)| {
            for y in 0..sy {
                for z in 0..sz {
                    let i = y * sz + z;
                    let index = column[i].index;
                    let surface = is_surface(grid, palette, size, x, y, z);
                    column[i].is_surface = surface;
                    column[i].normal = if surface { calculate_normal(&lookup, palette, x, y, z, index) } else { Vector3::zero() };
                }
            }
        });

        for element in elements.iter_mut() {
            if element.index != 0 && palette.is_process_colour(element.index as usize) {
                element.index = 0;
            }
        }

        let snapshot = elements.clone();
        elements.par_chunks_mut(sy * sz).enumerate().for_each(|(x, column)| {
            for y in 0..sy {
                for z in 0..sz {
                    let i = y * sz + z;
                    column[i].averaged_normal = average_normal(&snapshot, size, palette, x, y, z);
                    column[i].occlusion = occlusion(&snapshot, size, x, y, z);
                    column[i].detail = detail(&snapshot, size, palette, x, y, z);
                }
            }
        });

        ProcessedVoxelObject { size, elements }
    }

    pub fn size(&self) -> (usize, usize, usize) {
        self.size
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> ProcessedElement {
        self.elements[offset(self.size, x, y, z)]
    }

    pub fn safe_get(&self, x: i64, y: i64, z: i64) -> ProcessedElement {
        let (sx, sy, sz) = self.size;
        if x < 0 || y < 0 || z < 0 || x as usize >= sx || y as usize >= sy || z as usize >= sz {
            return ProcessedElement::default();
        }
        self.get(x as usize, y as usize, z as usize)
    }

    pub fn is_invalid(&self) -> bool {
        self.size.0 == 0 || self.size.1 == 0 || self.size.2 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_palette(json: &str) -> Palette {
        Palette::from_reader(Cursor::new(json)).unwrap()
    }

    fn plain_palette() -> Palette {
        test_palette(r#"{"entries": [[0,0,0],[10,10,10],[20,20,20]]}"#)
    }

    #[test]
    fn empty_voxel_is_never_surface() {
        let grid = VoxelGrid::new(2, 2, 2);
        let palette = plain_palette();
        let processed = ProcessedVoxelObject::build(&grid, &palette, false, TilingMode::Wrap, false);
        let elem = processed.get(0, 0, 0);
        assert!(!elem.is_surface);
        assert_eq!(elem.normal, Vector3::zero());
        assert_eq!(elem.averaged_normal, Vector3::zero());
    }

    #[test]
    fn face_normal_points_away_from_solid_mass() {
        let palette = plain_palette();
        let mut grid = VoxelGrid::new(3, 3, 3);
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    grid.set(x, y, z, 1);
                }
            }
        }
        let processed = ProcessedVoxelObject::build(&grid, &palette, false, TilingMode::Wrap, false);
        let elem = processed.get(1, 1, 0);
        assert!(elem.is_surface);
        assert!(elem.normal.z < -0.5, "expected outward -z normal, got {:?}", elem.normal);
        assert!(elem.normal.x.abs() < 1e-9);
        assert!(elem.normal.y.abs() < 1e-9);
    }

    #[test]
    fn process_colour_voxels_are_dropped_in_second_pass() {
        let palette = test_palette(
            r#"{"entries": [[0,0,0],[10,10,10]], "ranges": [{"start":1,"end":2,"is_process_colour":true}]}"#,
        );
        let mut grid = VoxelGrid::new(2, 2, 2);
        grid.set(0, 0, 0, 1);
        let processed = ProcessedVoxelObject::build(&grid, &palette, false, TilingMode::Wrap, false);
        assert_eq!(processed.get(0, 0, 0).index, 0);
    }

    #[test]
    fn wrap_tiling_matches_modular_lookup() {
        let palette = plain_palette();
        let mut grid = VoxelGrid::new(4, 4, 4);
        grid.set(0, 0, 0, 1);
        let lookup = BorderLookup::build(&grid, true, TilingMode::Wrap, false);
        for (dx, dy, dz) in [(0i64, 0i64, 0i64), (4, 0, 0), (-4, 8, 4)] {
            let got = lookup.get(BORDER as i64 + dx, BORDER as i64 + dy, BORDER as i64 + dz);
            assert_eq!(got, 0, "expected solid at wrapped offset ({dx},{dy},{dz})");
        }
    }
}
