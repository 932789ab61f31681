//! MagicaVoxel `.vox` chunk parser.
//!
//! Parses just enough of the format to get a dense index grid out: the
//! `VOX ` magic, then a stream of 4-byte-id/LE-u32-size chunks. Only `SIZE`
//! and `XYZI` are understood; everything else is skipped by its declared
//! size, matching `reader.go`'s `skipUnhandledChunk`.

use std::io::Read;
use std::path::Path;

use crate::error::{RenderError, Result};
use crate::voxel::VoxelGrid;

const MAGIC: &[u8; 4] = b"VOX ";
// id(4) + content size(4) + children size(4). Children size is unused: like
// the reference parser, nested chunks are simply the next flat entries in
// the stream, since nothing here needs to recurse into chunk groups.
const HEADER_LEN: usize = 12;

fn input_error(path: &Path, reason: impl Into<String>) -> RenderError {
    RenderError::InputFormat { path: path.to_path_buf(), reason: reason.into() }
}

struct ChunkHeader {
    id: [u8; 4],
    content_size: u32,
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn chunk_header(bytes: &[u8], path: &Path) -> Result<ChunkHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(input_error(path, "truncated chunk header"));
    }
    let id = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let content_size = read_u32_le(&bytes[4..8]);
    Ok(ChunkHeader { id, content_size })
}

/// Parses a complete `.vox` document into a dense voxel grid.
///
/// `path` is used only to attribute parse errors; it need not exist on
/// disk (callers may read from an in-memory buffer in tests).
pub fn parse(mut reader: impl Read, path: &Path) -> Result<VoxelGrid> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_bytes(&buf, path)
}

fn parse_bytes(buf: &[u8], path: &Path) -> Result<VoxelGrid> {
    if buf.len() < 8 || &buf[0..4] != MAGIC {
        return Err(input_error(path, "missing 'VOX ' magic"));
    }
    // Bytes 4..8 are the format version; not needed to read the geometry.
    let mut cursor = 8;

    let mut size: Option<(usize, usize, usize)> = None;
    let mut grid: Option<VoxelGrid> = None;

    // Chunks (including the MAIN wrapper and its nested children, e.g.
    // nTRN/nGRP/LAYR groups) are walked as one flat sequence; only SIZE and
    // XYZI carry geometry, everything else is skipped by its declared size.
    while cursor + HEADER_LEN <= buf.len() {
        let header = chunk_header(&buf[cursor..], path)?;
        cursor += HEADER_LEN;
        let content_start = cursor;
        let content_end = content_start
            .checked_add(header.content_size as usize)
            .ok_or_else(|| input_error(path, "chunk size overflow"))?;
        if content_end > buf.len() {
            return Err(input_error(path, "chunk runs past end of file"));
        }
        let content = &buf[content_start..content_end];

        match &header.id {
            b"SIZE" => {
                // Only one SIZE chunk is expected; if a model carries more
                // than one, the last value wins.
                let (sx, sy, sz) = parse_size(content, path)?;
                size = Some((sx, sy, sz));
                grid = Some(VoxelGrid::new(sx, sy, sz));
            }
            b"XYZI" => {
                let (sx, sy, sz) = size.ok_or_else(|| input_error(path, "XYZI before SIZE"))?;
                let target = grid.get_or_insert_with(|| VoxelGrid::new(sx, sy, sz));
                apply_xyzi(target, content, path)?;
            }
            _ => {
                // Skip unhandled chunks (PACK, RGBA, MATL, nTRN, ...) by size.
            }
        }

        cursor = content_end;
    }

    grid.ok_or_else(|| input_error(path, "missing SIZE chunk"))
}

fn parse_size(content: &[u8], path: &Path) -> Result<(usize, usize, usize)> {
    if content.len() < 12 {
        return Err(input_error(path, "SIZE chunk shorter than 12 bytes"));
    }
    let x = read_u32_le(&content[0..4]) as usize;
    let y = read_u32_le(&content[4..8]) as usize;
    let z = read_u32_le(&content[8..12]) as usize;
    if x == 0 || y == 0 || z == 0 {
        return Err(input_error(path, "SIZE chunk has a zero dimension"));
    }
    Ok((x, y, z))
}

fn apply_xyzi(grid: &mut VoxelGrid, content: &[u8], path: &Path) -> Result<()> {
    if content.len() < 4 {
        return Err(input_error(path, "XYZI chunk shorter than 4 bytes"));
    }
    let count = read_u32_le(&content[0..4]) as usize;
    let expected = 4 + count * 4;
    if content.len() < expected {
        return Err(input_error(path, "XYZI chunk shorter than its record count implies"));
    }
    let (sx, sy, sz) = grid.size();
    for i in 0..count {
        let base = 4 + i * 4;
        let x = content[base] as usize;
        let y = content[base + 1] as usize;
        let z = content[base + 2] as usize;
        let colour = content[base + 3];
        if colour == 0 {
            continue;
        }
        if x >= sx || y >= sy || z >= sz {
            return Err(input_error(path, "XYZI record outside SIZE bounds"));
        }
        // MagicaVoxel reserves two implicit palette entries; colour-2 is
        // the usable index.
        grid.set(x, y, z, colour - 2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn build_vox(size: (u32, u32, u32), voxels: &[(u8, u8, u8, u8)]) -> Vec<u8> {
        let mut main_children = Vec::new();

        main_children.extend_from_slice(b"SIZE");
        main_children.extend_from_slice(&12u32.to_le_bytes());
        main_children.extend_from_slice(&0u32.to_le_bytes());
        main_children.extend_from_slice(&size.0.to_le_bytes());
        main_children.extend_from_slice(&size.1.to_le_bytes());
        main_children.extend_from_slice(&size.2.to_le_bytes());

        main_children.extend_from_slice(b"XYZI");
        let xyzi_size = 4 + voxels.len() as u32 * 4;
        main_children.extend_from_slice(&xyzi_size.to_le_bytes());
        main_children.extend_from_slice(&0u32.to_le_bytes());
        main_children.extend_from_slice(&(voxels.len() as u32).to_le_bytes());
        for &(x, y, z, c) in voxels {
            main_children.extend_from_slice(&[x, y, z, c]);
        }

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&150u32.to_le_bytes());
        out.extend_from_slice(b"MAIN");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(main_children.len() as u32).to_le_bytes());
        out.extend_from_slice(&main_children);
        out
    }

    #[test]
    fn parses_a_single_voxel() {
        let bytes = build_vox((2, 2, 2), &[(1, 0, 1, 3)]);
        let grid = parse_bytes(&bytes, &PathBuf::from("test.vox")).unwrap();
        assert_eq!(grid.size(), (2, 2, 2));
        assert_eq!(grid.get(1, 0, 1), 1);
        assert_eq!(grid.get(0, 0, 0), 0);
    }

    #[test]
    fn colour_zero_stays_empty() {
        let bytes = build_vox((1, 1, 1), &[(0, 0, 0, 0)]);
        let grid = parse_bytes(&bytes, &PathBuf::from("test.vox")).unwrap();
        assert_eq!(grid.get(0, 0, 0), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_vox((1, 1, 1), &[]);
        bytes[0] = b'X';
        let err = parse_bytes(&bytes, &PathBuf::from("test.vox")).unwrap_err();
        assert!(matches!(err, RenderError::InputFormat { .. }));
    }

    #[test]
    fn rejects_zero_dimension() {
        let bytes = build_vox((0, 1, 1), &[]);
        let err = parse_bytes(&bytes, &PathBuf::from("test.vox")).unwrap_err();
        assert!(matches!(err, RenderError::InputFormat { .. }));
    }
}
