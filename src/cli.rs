//! Command-line surface: batch-renders a directory (or a single file) of
//! `.vox` models against one shared palette and manifest.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use crate::error::RenderError;
use crate::manifest::Manifest;
use crate::palette::Palette;
use crate::{spritesheet, Result};

/// Renders MagicaVoxel `.vox` models into multi-angle spritesheets.
#[derive(Parser, Debug)]
#[command(name = "voxrender", about = "Renders MagicaVoxel models into isometric spritesheets")]
pub struct CliArgs {
    /// Input `.vox` file or a directory of them.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Render manifest JSON.
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Palette JSON.
    #[arg(short, long)]
    pub palette: PathBuf,

    /// Comma-separated list of output scales, e.g. "1,2,4".
    #[arg(long, default_value = "1", value_delimiter = ',')]
    pub scale: Vec<f64>,

    /// Nest each scale's output under a `<scale>x/` subdirectory.
    #[arg(long)]
    pub subdirs: bool,

    /// Suffix inserted before the scale/variant tag in output filenames.
    #[arg(long, default_value = "")]
    pub suffix: String,

    /// Emit only the 8bpp indexed variant.
    #[arg(long = "8bpp")]
    pub only_8bpp: bool,

    /// Use the input file's name (without its directory) as the output base name.
    #[arg(long)]
    pub strip_directory: bool,

    /// Print per-file progress.
    #[arg(long)]
    pub progress: bool,

    /// Force `sampler=square`, `accuracy=1`, `overlap=0` for a quick preview render.
    #[arg(long)]
    pub fast: bool,

    /// Emit debug channel images (normals, depth, occlusion, shadow, lighting).
    #[arg(long)]
    pub debug: bool,

    /// Log per-file render timing.
    #[arg(long)]
    pub time: bool,
}

fn discover_inputs(input: &Path) -> std::io::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("vox") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Derives the output base name from an input path: with `strip_directory`,
/// the filename alone (no extension, no directory); otherwise the input
/// path as given with only its extension removed, so directory components
/// carry through into the output path.
fn base_name(path: &Path, strip_directory: bool) -> String {
    if strip_directory {
        path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "output".to_string())
    } else {
        path.with_extension("").to_string_lossy().into_owned()
    }
}

/// True when every variant this run would produce for `base` at `scale`
/// already exists and is newer than `input`.
fn is_up_to_date(input: &Path, output_dir: &Path, base: &str, suffix: &str, scale: f64, subdirs: bool, only_8bpp: bool) -> bool {
    let Ok(input_meta) = std::fs::metadata(input) else { return false };
    let Ok(input_time) = input_meta.modified() else { return false };

    let mut variants = vec!["8bpp"];
    if !only_8bpp {
        variants.push("32bpp");
        variants.push("mask");
    }

    for variant in variants {
        let path = spritesheet::output_path(output_dir, base, suffix, scale, subdirs, variant);
        let Ok(meta) = std::fs::metadata(&path) else { return false };
        let Ok(output_time) = meta.modified() else { return false };
        if output_time < input_time {
            return false;
        }
    }
    true
}

fn apply_fast(mut manifest: Manifest) -> Manifest {
    manifest.sampler = "square".to_string();
    manifest.accuracy = 1;
    manifest.overlap = 0.0;
    manifest
}

fn write_sheet(sheet: &spritesheet::Sheet, palette: &Palette, output_dir: &Path, base: &str, suffix: &str, scale: f64, subdirs: bool, only_8bpp: bool) -> Result<()> {
    let (rgba, rw, rh) = spritesheet::scale_rgba(
        match &sheet.variant_32bpp {
            spritesheet::Plane::Rgba(d) => d,
            _ => unreachable!("32bpp variant is always Plane::Rgba"),
        },
        sheet.width,
        sheet.height,
        scale,
    );

    let path_8bpp = spritesheet::output_path(output_dir, base, suffix, scale, subdirs, "8bpp");
    if let spritesheet::Plane::Indexed { data, alpha } = &sheet.variant_8bpp {
        let (scaled, scaled_alpha, sw, sh) = spritesheet::scale_indexed(data, alpha, sheet.width, sheet.height, scale);
        let _ = (sw, sh);
        spritesheet::write_indexed_png(&path_8bpp, rw, rh, &scaled, &scaled_alpha, palette)?;
    }

    if only_8bpp {
        return Ok(());
    }

    let path_32bpp = spritesheet::output_path(output_dir, base, suffix, scale, subdirs, "32bpp");
    spritesheet::write_rgba_png(&path_32bpp, rw, rh, &rgba)?;

    let path_mask = spritesheet::output_path(output_dir, base, suffix, scale, subdirs, "mask");
    if let spritesheet::Plane::Indexed { data, alpha } = &sheet.mask {
        let (scaled, scaled_alpha, sw, sh) = spritesheet::scale_indexed(data, alpha, sheet.width, sheet.height, scale);
        let _ = (sw, sh);
        spritesheet::write_indexed_png(&path_mask, rw, rh, &scaled, &scaled_alpha, palette)?;
    }

    for (name, plane) in &sheet.debug {
        if let spritesheet::Plane::Rgb(data) = plane {
            let (scaled, sw, sh) = scale_rgb(data, sheet.width, sheet.height, scale);
            let path = spritesheet::output_path(output_dir, base, suffix, scale, subdirs, *name);
            spritesheet::write_rgb_png(&path, sw, sh, &scaled)?;
        }
    }

    Ok(())
}

fn scale_rgb(data: &[u8], width: u32, height: u32, factor: f64) -> (Vec<u8>, u32, u32) {
    // Debug channels have no alpha; pad to RGBA, reuse the box filter, then
    // drop the alpha channel back out.
    let mut rgba = Vec::with_capacity(data.len() / 3 * 4);
    for px in data.chunks_exact(3) {
        rgba.extend_from_slice(px);
        rgba.push(255);
    }
    let (scaled, w, h) = spritesheet::scale_rgba(&rgba, width, height, factor);
    let rgb: Vec<u8> = scaled.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
    (rgb, w, h)
}

fn render_one(input: &Path, output_dir: &Path, manifest: &Manifest, palette: &Palette, args: &CliArgs) -> Result<()> {
    let grid = crate::load_vox(input)?;
    let base = base_name(input, args.strip_directory);

    let sheet = crate::profile::timed("render", args.time, || crate::render(&grid, palette, manifest, args.debug));

    for &scale in &args.scale {
        if is_up_to_date(input, output_dir, &base, &args.suffix, scale, args.subdirs, args.only_8bpp) {
            log::info!("{}: up to date at {}x, skipping", base, scale);
            continue;
        }
        write_sheet(&sheet, palette, output_dir, &base, &args.suffix, scale, args.subdirs, args.only_8bpp)?;
    }

    Ok(())
}

/// Runs the CLI end-to-end: loads the shared palette and manifest once,
/// then renders every discovered `.vox` file, continuing past per-file
/// errors and returning a non-zero exit code if any occurred.
pub fn run(args: CliArgs) -> ExitCode {
    let palette = match std::fs::File::open(&args.palette).map_err(RenderError::from).and_then(|f| Palette::from_reader(f)) {
        Ok(p) => p,
        Err(err) => {
            log::error!("failed to load palette {}: {err}", args.palette.display());
            return ExitCode::FAILURE;
        }
    };

    let manifest = match std::fs::File::open(&args.manifest).map_err(RenderError::from).and_then(Manifest::from_reader) {
        Ok(m) => m,
        Err(err) => {
            log::error!("failed to load manifest {}: {err}", args.manifest.display());
            return ExitCode::FAILURE;
        }
    };
    let manifest = if args.fast { apply_fast(manifest) } else { manifest };

    let inputs = match discover_inputs(&args.input) {
        Ok(files) => files,
        Err(err) => {
            log::error!("failed to read input {}: {err}", args.input.display());
            return ExitCode::FAILURE;
        }
    };
    if inputs.is_empty() {
        log::warn!("no .vox files found under {}", args.input.display());
        return ExitCode::SUCCESS;
    }

    if let Err(err) = std::fs::create_dir_all(&args.output) {
        log::error!("failed to create output directory {}: {err}", args.output.display());
        return ExitCode::FAILURE;
    }

    let mut any_failure = false;
    for (index, input) in inputs.iter().enumerate() {
        if args.progress {
            println!("[{}/{}] {}", index + 1, inputs.len(), input.display());
        }
        if let Err(err) = render_one(input, &args.output, &manifest, &palette, &args) {
            log::error!("{}: {err}", input.display());
            any_failure = true;
        }
    }

    if any_failure {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_directory_drops_the_input_directory() {
        assert_eq!(base_name(Path::new("models/subdir/goat.vox"), true), "goat");
    }

    #[test]
    fn without_strip_directory_the_input_directory_carries_through() {
        assert_eq!(base_name(Path::new("models/subdir/goat.vox"), false), "models/subdir/goat");
    }

    #[test]
    fn without_strip_directory_a_bare_filename_is_unaffected() {
        assert_eq!(base_name(Path::new("goat.vox"), false), "goat");
    }
}
