//! Binary layout of a multi-grid population.
//!
//! Layout (little-endian):
//!   00  : u32          grid_num
//!   04  : [u8; n]      level per cell
//!   ..  : [u8; pad]    zero padding so the id section starts 4-aligned
//!   ..  : [u32; n]     global id per cell
//!
//! Buffers shorter than the 4-byte header decode to an empty population.

use crate::error::GridError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

/// Levels and global ids, positionally aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiGridInfo {
    pub levels: Vec<u8>,
    pub global_ids: Vec<u32>,
}

/// Byte offset of the id section for `n` cells.
#[inline]
pub fn aligned_offset(n: usize) -> usize {
    let rem = match n % 4 {
        0 => 4,
        r => r,
    };
    4 + n + (4 - rem) % 4
}

/// Total encoded size for `n` cells.
#[inline]
pub fn encoded_len(n: usize) -> usize {
    aligned_offset(n) + n * 4
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated multi-grid buffer"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

fn decode_ids(raw: &[u8]) -> Vec<u32> {
    #[cfg(target_endian = "little")]
    {
        // Callers may hand us any byte slice (network bodies, sub-slices), so
        // alignment is not guaranteed; fall through to the portable loop.
        if let Ok(ids) = bytemuck::try_cast_slice::<u8, u32>(raw) {
            return ids.to_vec();
        }
    }

    raw.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl MultiGridInfo {
    pub fn new(levels: Vec<u8>, global_ids: Vec<u32>) -> Result<Self, GridError> {
        if levels.len() != global_ids.len() {
            return Err(GridError::LengthMismatch {
                levels: levels.len(),
                global_ids: global_ids.len(),
            });
        }
        Ok(Self { levels, global_ids })
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            levels: Vec::with_capacity(n),
            global_ids: Vec::with_capacity(n),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn push(&mut self, level: u8, global_id: u32) {
        self.levels.push(level);
        self.global_ids.push(global_id);
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (u8, u32)> + '_ {
        self.levels.iter().copied().zip(self.global_ids.iter().copied())
    }

    /// Decodes a population. See the module docs for the layout.
    pub fn from_buffer(mut p: &[u8]) -> io::Result<Self> {
        if p.len() < 4 {
            return Ok(Self::default());
        }

        let n = le_u32(&mut p)? as usize;
        let pad = aligned_offset(n) - 4 - n;

        let levels = take(&mut p, n)?.to_vec();
        take(&mut p, pad)?;

        let id_bytes = n.checked_mul(4).ok_or_else(|| bad("grid count overflow"))?;
        let raw = take(&mut p, id_bytes)?;
        if !p.is_empty() {
            return Err(bad("trailing bytes after global ids"));
        }

        Ok(Self {
            levels,
            global_ids: decode_ids(raw),
        })
    }

    /// Writes the encoded population to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.levels.len() != self.global_ids.len() {
            return Err(bad("levels length != global ids length"));
        }
        let n = u32::try_from(self.len()).map_err(|_| bad("too many cells"))?;

        write_u32(w, n)?;
        w.write_all(&self.levels)?;

        let pad = aligned_offset(self.len()) - 4 - self.len();
        w.write_all(&[0u8; 3][..pad])?;

        for &id in &self.global_ids {
            write_u32(w, id)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(encoded_len(self.len()));
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Prefers mmap for large population dumps.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<MultiGridInfo> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    MultiGridInfo::from_buffer(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<MultiGridInfo> {
    let bytes = std::fs::read(path)?;
    MultiGridInfo::from_buffer(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, info: &MultiGridInfo) -> io::Result<()> {
    let mut file = io::BufWriter::new(File::create(path)?);
    info.write_to(&mut file)?;
    file.flush()
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
