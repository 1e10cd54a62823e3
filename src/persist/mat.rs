//! Minimal MAT-File Level 5 codec for exchanging arrays with MATLAB.
//!
//! Covers what a measurement workflow needs: named arrays of real
//! doubles. The writer always emits plain little-endian elements; the
//! reader additionally understands zlib-compressed elements and the
//! packed small-element tags that MATLAB and scipy like to produce, and
//! widens integer-stored values back to doubles.

use std::fs;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use log::debug;

use super::with_extension_suffix;
use crate::paths;

// --- MAT-file constants ---

/// Total header size: 116 bytes of text, 8 reserved, version, endian tag.
const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;
const MAT_VERSION: u16 = 0x0100;

// Data element types.
const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

/// Array class for real double matrices, the only class handled here.
const MX_DOUBLE_CLASS: u32 = 6;
/// Complex flag bit within the array-flags word.
const FLAG_COMPLEX: u32 = 0x0800;

/// MATLAB caps variable names at 63 characters.
const MAX_NAME_LEN: usize = 63;

/// One MATLAB variable, squeezed of singleton dimensions.
///
/// A `1x1` array loads as `Scalar`, a `1xN` or `Nx1` array as `Vector`,
/// anything with two non-singleton dimensions as a row-major `Matrix`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatVar {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix {
        rows: usize,
        cols: usize,
        /// Row-major values, `rows * cols` of them.
        data: Vec<f64>,
    },
}

impl MatVar {
    /// Dimensions as written to disk. Vectors save as row vectors.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            MatVar::Scalar(_) => (1, 1),
            MatVar::Vector(vals) => (1, vals.len()),
            MatVar::Matrix { rows, cols, .. } => (*rows, *cols),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MatVar::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            MatVar::Vector(vals) => Some(vals),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<(usize, usize, &[f64])> {
        match self {
            MatVar::Matrix { rows, cols, data } => Some((*rows, *cols, data)),
            _ => None,
        }
    }

    /// Short label for humans, used by the inspector.
    pub fn kind(&self) -> &'static str {
        match self {
            MatVar::Scalar(_) => "scalar",
            MatVar::Vector(_) => "vector",
            MatVar::Matrix { .. } => "matrix",
        }
    }
}

/// Named variables bound for (or read from) a `.mat` file, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatFile {
    vars: Vec<(String, MatVar)>,
}

impl MatFile {
    pub fn new() -> Self {
        MatFile::default()
    }

    /// Adds a variable, replacing any existing one with the same name.
    pub fn insert<S: Into<String>>(&mut self, name: S, var: MatVar) {
        let name = name.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = var,
            None => self.vars.push((name, var)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MatVar> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MatVar)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn pad8(len: usize) -> usize {
    (8 - len % 8) % 8
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let well_formed = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !well_formed || name.len() > MAX_NAME_LEN {
        bail!("'{}' is not a valid MATLAB variable name", name);
    }
    Ok(())
}

// --- Writing ---

/// Saves the variables to a `.mat` file MATLAB and scipy can open.
/// The `.mat` suffix is added to the filename if not already present.
pub fn save_mat<P: AsRef<Path>>(filename: P, vars: &MatFile) -> Result<()> {
    for (name, _) in vars.iter() {
        validate_name(name)?;
    }
    let mat_name = with_extension_suffix(filename.as_ref(), "mat");
    let path = paths::resolve_data_file(&mat_name)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to open file for writing: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let bytes = to_mat_bytes(vars)?;
    writer
        .write_all(&bytes)
        .with_context(|| format!("Failed to write MAT file {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

fn to_mat_bytes(vars: &MatFile) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_header(&mut out)?;
    for (name, var) in vars.iter() {
        let payload = matrix_payload(name, var)?;
        out.write_u32::<LittleEndian>(MI_MATRIX)?;
        out.write_u32::<LittleEndian>(payload.len() as u32)?;
        out.write_all(&payload)?;
    }
    Ok(out)
}

fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    let text = format!(
        "MATLAB 5.0 MAT-file, created by benchtop {}",
        env!("CARGO_PKG_VERSION")
    );
    let mut header = [b' '; HEADER_TEXT_LEN];
    let n = text.len().min(HEADER_TEXT_LEN);
    header[..n].copy_from_slice(&text.as_bytes()[..n]);
    writer.write_all(&header)?;
    // Subsystem data offset, unused.
    writer.write_all(&[0u8; 8])?;
    writer.write_u16::<LittleEndian>(MAT_VERSION)?;
    // Reads back as "MI" on a big-endian machine, flagging the swap.
    writer.write_all(b"IM")?;
    Ok(())
}

/// Serializes one variable as the body of a miMATRIX element:
/// array flags, dimensions, name, then values in column-major order.
fn matrix_payload(name: &str, var: &MatVar) -> Result<Vec<u8>> {
    let (rows, cols) = var.dims();
    if let MatVar::Matrix { rows, cols, data } = var {
        if data.len() != rows * cols {
            bail!(
                "variable '{}' claims {}x{} but holds {} values",
                name,
                rows,
                cols,
                data.len()
            );
        }
    }

    let mut buf = Vec::new();
    // Array flags.
    buf.write_u32::<LittleEndian>(MI_UINT32)?;
    buf.write_u32::<LittleEndian>(8)?;
    buf.write_u32::<LittleEndian>(MX_DOUBLE_CLASS)?;
    buf.write_u32::<LittleEndian>(0)?;
    // Dimensions.
    buf.write_u32::<LittleEndian>(MI_INT32)?;
    buf.write_u32::<LittleEndian>(8)?;
    buf.write_i32::<LittleEndian>(rows as i32)?;
    buf.write_i32::<LittleEndian>(cols as i32)?;
    // Name, zero-padded to an 8-byte boundary.
    buf.write_u32::<LittleEndian>(MI_INT8)?;
    buf.write_u32::<LittleEndian>(name.len() as u32)?;
    buf.write_all(name.as_bytes())?;
    for _ in 0..pad8(name.len()) {
        buf.write_u8(0)?;
    }
    // Values. MATLAB stores arrays column by column.
    buf.write_u32::<LittleEndian>(MI_DOUBLE)?;
    buf.write_u32::<LittleEndian>((8 * rows * cols) as u32)?;
    match var {
        MatVar::Scalar(v) => buf.write_f64::<LittleEndian>(*v)?,
        MatVar::Vector(vals) => {
            for v in vals {
                buf.write_f64::<LittleEndian>(*v)?;
            }
        }
        MatVar::Matrix { rows, cols, data } => {
            for c in 0..*cols {
                for r in 0..*rows {
                    buf.write_f64::<LittleEndian>(data[r * cols + c])?;
                }
            }
        }
    }
    Ok(buf)
}

// --- Reading ---

/// Loads all double-precision variables from a `.mat` file. The `.mat`
/// suffix is added to the filename if not already present.
pub fn load_mat<P: AsRef<Path>>(filename: P) -> Result<MatFile> {
    let mat_name = with_extension_suffix(filename.as_ref(), "mat");
    let path = paths::resolve_existing_file(&mat_name)?;
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to open file for reading: {}", path.display()))?;
    read_mat_bytes(&bytes).with_context(|| format!("Failed to read MAT file {}", path.display()))
}

fn read_mat_bytes(bytes: &[u8]) -> Result<MatFile> {
    if bytes.len() < HEADER_LEN {
        bail!("file is too short to hold a MAT-file header");
    }
    match &bytes[126..128] {
        b"IM" => {}
        b"MI" => bail!("big-endian MAT files are not supported"),
        _ => bail!("not a MAT-file (bad endian indicator)"),
    }

    let mut cur = Cursor::new(&bytes[HEADER_LEN..]);
    let mut out = MatFile::new();
    while let Some((ty, data)) = read_element(&mut cur)? {
        match ty {
            MI_MATRIX => {
                let (name, var) = parse_matrix(&data)?;
                out.insert(name, var);
            }
            MI_COMPRESSED => {
                let mut decoder = ZlibDecoder::new(&data[..]);
                let mut inner = Vec::new();
                decoder
                    .read_to_end(&mut inner)
                    .context("Failed to decompress MAT element")?;
                let mut inner_cur = Cursor::new(inner.as_slice());
                while let Some((inner_ty, inner_data)) = read_element(&mut inner_cur)? {
                    if inner_ty == MI_MATRIX {
                        let (name, var) = parse_matrix(&inner_data)?;
                        out.insert(name, var);
                    } else {
                        debug!("Skipping compressed MAT element of type {}", inner_ty);
                    }
                }
            }
            other => {
                debug!("Skipping MAT element of type {}", other);
            }
        }
    }
    debug!("Read {} variables from MAT file", out.len());
    Ok(out)
}

/// Reads one tagged data element, handling the packed small-element
/// form (type and byte count share the first word, data fills the
/// second). Returns `None` at clean end of input.
fn read_element(cur: &mut Cursor<&[u8]>) -> Result<Option<(u32, Vec<u8>)>> {
    let remaining = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    if remaining < 8 {
        return Ok(None);
    }
    let word = cur.read_u32::<LittleEndian>()?;
    let (ty, nbytes, small) = if word >> 16 != 0 {
        ((word & 0xFFFF), (word >> 16) as usize, true)
    } else {
        let nbytes = cur.read_u32::<LittleEndian>()? as usize;
        (word, nbytes, false)
    };
    let mut data = vec![0u8; nbytes];
    cur.read_exact(&mut data)
        .with_context(|| format!("MAT element of type {} is truncated", ty))?;
    let pad = if small {
        4usize.saturating_sub(nbytes)
    } else if ty == MI_COMPRESSED {
        // Compressed elements are written back to back, unpadded.
        0
    } else {
        pad8(nbytes)
    };
    let len = cur.get_ref().len() as u64;
    cur.set_position((cur.position() + pad as u64).min(len));
    Ok(Some((ty, data)))
}

fn next_subelement(cur: &mut Cursor<&[u8]>, what: &str) -> Result<(u32, Vec<u8>)> {
    match read_element(cur)? {
        Some(el) => Ok(el),
        None => bail!("matrix element ended before its {}", what),
    }
}

fn parse_matrix(data: &[u8]) -> Result<(String, MatVar)> {
    let mut cur = Cursor::new(data);

    let (ty, flags) = next_subelement(&mut cur, "array flags")?;
    if ty != MI_UINT32 || flags.len() < 8 {
        bail!("malformed array flags in matrix element");
    }
    let flags_word = LittleEndian::read_u32(&flags[..4]);
    let class = flags_word & 0xFF;
    if class != MX_DOUBLE_CLASS {
        bail!(
            "unsupported MATLAB array class {} (only real double arrays are readable)",
            class
        );
    }
    if flags_word & FLAG_COMPLEX != 0 {
        bail!("complex arrays are not supported");
    }

    let (ty, dim_bytes) = next_subelement(&mut cur, "dimensions")?;
    if ty != MI_INT32 {
        bail!("malformed dimensions in matrix element");
    }
    let mut dims = Vec::with_capacity(dim_bytes.len() / 4);
    for chunk in dim_bytes.chunks_exact(4) {
        let d = LittleEndian::read_i32(chunk);
        if d < 0 {
            bail!("negative dimension {} in matrix element", d);
        }
        dims.push(d as usize);
    }

    let (ty, name_bytes) = next_subelement(&mut cur, "name")?;
    if ty != MI_INT8 {
        bail!("malformed name in matrix element");
    }
    let name = String::from_utf8_lossy(&name_bytes)
        .trim_end_matches('\0')
        .to_string();

    let (ty, value_bytes) = next_subelement(&mut cur, "values")?;
    let values = decode_numeric(ty, &value_bytes)
        .with_context(|| format!("while reading variable '{}'", name))?;

    let total: usize = dims.iter().product();
    if values.len() != total {
        bail!(
            "variable '{}' has {} values but dimensions {:?}",
            name,
            values.len(),
            dims
        );
    }
    let var = squeeze(&dims, values)?;
    Ok((name, var))
}

/// Widens any numeric storage type to f64. MATLAB stores double arrays
/// as narrower integers when the values happen to fit.
fn decode_numeric(ty: u32, bytes: &[u8]) -> Result<Vec<f64>> {
    let mut cur = Cursor::new(bytes);
    let mut out = Vec::new();
    match ty {
        MI_DOUBLE => {
            for _ in 0..bytes.len() / 8 {
                out.push(cur.read_f64::<LittleEndian>()?);
            }
        }
        MI_SINGLE => {
            for _ in 0..bytes.len() / 4 {
                out.push(cur.read_f32::<LittleEndian>()? as f64);
            }
        }
        MI_INT8 => {
            for _ in 0..bytes.len() {
                out.push(cur.read_i8()? as f64);
            }
        }
        MI_UINT8 => {
            for _ in 0..bytes.len() {
                out.push(cur.read_u8()? as f64);
            }
        }
        MI_INT16 => {
            for _ in 0..bytes.len() / 2 {
                out.push(cur.read_i16::<LittleEndian>()? as f64);
            }
        }
        MI_UINT16 => {
            for _ in 0..bytes.len() / 2 {
                out.push(cur.read_u16::<LittleEndian>()? as f64);
            }
        }
        MI_INT32 => {
            for _ in 0..bytes.len() / 4 {
                out.push(cur.read_i32::<LittleEndian>()? as f64);
            }
        }
        MI_UINT32 => {
            for _ in 0..bytes.len() / 4 {
                out.push(cur.read_u32::<LittleEndian>()? as f64);
            }
        }
        MI_INT64 => {
            for _ in 0..bytes.len() / 8 {
                out.push(cur.read_i64::<LittleEndian>()? as f64);
            }
        }
        MI_UINT64 => {
            for _ in 0..bytes.len() / 8 {
                out.push(cur.read_u64::<LittleEndian>()? as f64);
            }
        }
        other => bail!("unsupported numeric storage type {}", other),
    }
    Ok(out)
}

/// Drops singleton dimensions and rearranges column-major storage into
/// the row-major layout `MatVar` uses.
fn squeeze(dims: &[usize], values: Vec<f64>) -> Result<MatVar> {
    let shape: Vec<usize> = dims.iter().copied().filter(|&d| d != 1).collect();
    match shape.len() {
        // All dimensions were 1: a lone value.
        0 => Ok(MatVar::Scalar(values[0])),
        1 => Ok(MatVar::Vector(values)),
        2 => {
            let (rows, cols) = (shape[0], shape[1]);
            let mut data = vec![0.0; rows * cols];
            for c in 0..cols {
                for r in 0..rows {
                    data[r * cols + c] = values[c * rows + r];
                }
            }
            Ok(MatVar::Matrix { rows, cols, data })
        }
        n => bail!("{}-dimensional arrays are not supported", n),
    }
}
