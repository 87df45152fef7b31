//! MAT v5 arrays as channel-first tensors.
//!
//! MATLAB stores arrays column-major: element `(h, w, b)` of an
//! `H x W x B` array sits at flat index `h + H * (w + W * b)`. Reading turns
//! that into a row-major `[B, H, W]` tensor; writing does the reverse.

use crate::error::{IoError, IoResult};
use matfile::{MatFile, NumericData};
use spectraclean_core::Tensor;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Read the numeric array `field` from a MAT file as `[bands, H, W]`.
///
/// A 2-D array is one band. Integer and single-precision classes are widened
/// to f64; imaginary parts are dropped.
pub fn read_mat_array(path: &Path, field: &str) -> IoResult<Tensor<f64>> {
    let file = File::open(path).map_err(|e| IoError::io(path, e))?;
    let mat = MatFile::parse(BufReader::new(file)).map_err(|e| IoError::MatParse {
        path: path.to_path_buf(),
        message: format!("{:?}", e),
    })?;
    let array = mat.find_by_name(field).ok_or_else(|| IoError::MissingField {
        path: path.to_path_buf(),
        field: field.to_string(),
    })?;

    let values = numeric_to_f64(array.data());
    let (h, w, b) = match array.size().as_slice() {
        &[h, w] => (h, w, 1),
        &[h, w, b] => (h, w, b),
        other => {
            return Err(IoError::Unsupported {
                path: path.to_path_buf(),
                message: format!("expected a 2-D or 3-D array, `{}` has size {:?}", field, other),
            })
        }
    };
    if values.len() != h * w * b {
        return Err(IoError::Unsupported {
            path: path.to_path_buf(),
            message: format!(
                "`{}` holds {} values for size {:?}",
                field,
                values.len(),
                array.size()
            ),
        });
    }

    Ok(column_major_to_chw(&values, h, w, b)?)
}

fn numeric_to_f64(data: &NumericData) -> Vec<f64> {
    fn widen<T: Copy + Into<f64>>(v: &[T]) -> Vec<f64> {
        v.iter().map(|&x| x.into()).collect()
    }
    match data {
        NumericData::Int8 { real, .. } => widen(real),
        NumericData::UInt8 { real, .. } => widen(real),
        NumericData::Int16 { real, .. } => widen(real),
        NumericData::UInt16 { real, .. } => widen(real),
        NumericData::Int32 { real, .. } => widen(real),
        NumericData::UInt32 { real, .. } => widen(real),
        NumericData::Int64 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        NumericData::UInt64 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        NumericData::Single { real, .. } => widen(real),
        NumericData::Double { real, .. } => real.clone(),
    }
}

/// Column-major `H x W x B` values to a row-major `[B, H, W]` tensor.
pub fn column_major_to_chw(values: &[f64], h: usize, w: usize, b: usize) -> IoResult<Tensor<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for band in 0..b {
        for y in 0..h {
            for x in 0..w {
                out.push(values[y + h * (x + w * band)]);
            }
        }
    }
    Ok(Tensor::new(out, vec![b, h, w])?)
}

/// Row-major `[B, H, W]` tensor to column-major `H x W x B` values.
pub fn chw_to_column_major(tensor: &Tensor<f64>) -> IoResult<(Vec<f64>, [usize; 3])> {
    let (b, h, w) = tensor.shape().chw()?;
    let data = tensor.data();
    let mut out = vec![0.0; data.len()];
    for band in 0..b {
        for y in 0..h {
            for x in 0..w {
                out[y + h * (x + w * band)] = data[(band * h + y) * w + x];
            }
        }
    }
    Ok((out, [h, w, b]))
}

// ─── Writer ─────────────────────────────────────────────────────────────────

const MI_INT8: u32 = 1;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MX_DOUBLE_CLASS: u32 = 6;

fn padded(len: usize) -> usize {
    len.div_ceil(8) * 8
}

fn push_element(buf: &mut Vec<u8>, data_type: u32, payload: &[u8]) {
    buf.extend_from_slice(&data_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.resize(buf.len() + padded(payload.len()) - payload.len(), 0);
}

/// Write `tensor` as a double array named `name` in an uncompressed MAT v5 file.
///
/// `[B, H, W]` tensors are stored as `H x W x B` (`H x W` when `B == 1`);
/// 2-D `[H, W]` tensors are stored as-is.
pub fn write_mat_array(path: &Path, name: &str, tensor: &Tensor<f64>) -> IoResult<()> {
    let cube = match tensor.ndim() {
        2 => tensor.unsqueeze(0)?,
        _ => tensor.clone(),
    };
    let (values, [h, w, b]) = chw_to_column_major(&cube)?;
    let dims: Vec<usize> = if b == 1 { vec![h, w] } else { vec![h, w, b] };

    let mut body = Vec::new();
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&MX_DOUBLE_CLASS.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut body, MI_UINT32, &flags);

    let dim_bytes: Vec<u8> = dims.iter().flat_map(|&d| (d as i32).to_le_bytes()).collect();
    push_element(&mut body, MI_INT32, &dim_bytes);
    push_element(&mut body, MI_INT8, name.as_bytes());

    let real: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    push_element(&mut body, MI_DOUBLE, &real);

    let mut header = format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created by: spectraclean",
        std::env::consts::OS
    )
    .into_bytes();
    header.resize(116, b' ');
    header.extend_from_slice(&[0u8; 8]); // subsystem data offset
    header.extend_from_slice(&0x0100u16.to_le_bytes());
    header.extend_from_slice(b"IM");

    let file = File::create(path).map_err(|e| IoError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let write = |out: &mut BufWriter<File>, bytes: &[u8]| {
        out.write_all(bytes).map_err(|e| IoError::io(path, e))
    };
    write(&mut out, &header)?;
    write(&mut out, &MI_MATRIX.to_le_bytes())?;
    write(&mut out, &(body.len() as u32).to_le_bytes())?;
    write(&mut out, &body)?;
    out.flush().map_err(|e| IoError::io(path, e))?;
    Ok(())
}
