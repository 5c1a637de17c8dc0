//! Minimal writers for NumPy `.npy` arrays and `.npz` archives, enough to
//! hand the target matrix to scipy (`scipy.sparse.load_npz`) and the index
//! arrays to `numpy.load`.

use std::fs::File;
use std::io::{Seek, Write};

use camino::Utf8Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::HarvestError;

const MAGIC: &[u8] = b"\x93NUMPY\x01\x00";
const ALIGN: usize = 64;

/// The array kinds the matrix artifacts need.
#[derive(Debug, Clone, Copy)]
pub enum NpyArray<'a> {
    /// Little-endian `int64` with an explicit shape.
    Int64 { shape: &'a [usize], data: &'a [i64] },
    /// One-dimensional fixed-width UTF-32 strings (`<U{n}`).
    Unicode(&'a [String]),
    /// Zero-dimensional byte string (`|S{n}`).
    Bytes(&'a [u8]),
}

pub fn write_npy<W: Write>(writer: &mut W, array: NpyArray<'_>) -> std::io::Result<()> {
    match array {
        NpyArray::Int64 { shape, data } => {
            writer.write_all(&header("<i8", shape))?;
            for value in data {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        NpyArray::Unicode(values) => {
            let width = values
                .iter()
                .map(|value| value.chars().count())
                .max()
                .unwrap_or(0)
                .max(1);
            writer.write_all(&header(&format!("<U{width}"), &[values.len()]))?;
            for value in values {
                let mut written = 0;
                for ch in value.chars() {
                    writer.write_all(&(ch as u32).to_le_bytes())?;
                    written += 1;
                }
                for _ in written..width {
                    writer.write_all(&0u32.to_le_bytes())?;
                }
            }
        }
        NpyArray::Bytes(bytes) => {
            let width = bytes.len().max(1);
            writer.write_all(&header(&format!("|S{width}"), &[]))?;
            writer.write_all(bytes)?;
            if bytes.is_empty() {
                writer.write_all(&[0])?;
            }
        }
    }
    Ok(())
}

pub fn save_npy(path: &Utf8Path, array: NpyArray<'_>) -> Result<(), HarvestError> {
    let mut buffer = Vec::new();
    write_npy(&mut buffer, array).map_err(|err| HarvestError::Encode(format!("{path}: {err}")))?;
    let mut file = File::create(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("create {path}: {err}")))?;
    file.write_all(&buffer)
        .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))
}

/// Writes named arrays as a deflate-compressed `.npz` archive.
pub fn save_npz(path: &Utf8Path, arrays: &[(&str, NpyArray<'_>)]) -> Result<(), HarvestError> {
    let file = File::create(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("create {path}: {err}")))?;
    write_npz(file, arrays)
        .map(|_| ())
        .map_err(|err| HarvestError::Encode(format!("{path}: {err}")))
}

pub fn write_npz<W: Write + Seek>(
    writer: W,
    arrays: &[(&str, NpyArray<'_>)],
) -> Result<W, zip::result::ZipError> {
    let mut zip = ZipWriter::new(writer);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, array) in arrays {
        zip.start_file(format!("{name}.npy"), options)?;
        write_npy(&mut zip, *array)?;
    }
    zip.finish()
}

fn header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let shape = match shape {
        [] => "()".to_string(),
        [only] => format!("({only},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    let unpadded = MAGIC.len() + 2 + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 2 + dict.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned() {
        for shape in [&[][..], &[3][..], &[2, 2][..]] {
            let bytes = header("<i8", shape);
            assert_eq!(bytes.len() % ALIGN, 0);
            assert_eq!(*bytes.last().unwrap(), b'\n');
        }
        let text = String::from_utf8_lossy(&header("<i8", &[2, 3])).into_owned();
        assert!(text.contains("'shape': (2, 3), }"));
    }

    #[test]
    fn unicode_values_are_padded() {
        let values = vec!["ab".to_string(), "ü".to_string()];
        let mut buffer = Vec::new();
        write_npy(&mut buffer, NpyArray::Unicode(&values)).unwrap();
        let header_len = header("<U2", &[2]).len();
        assert_eq!(buffer.len(), header_len + 2 * 2 * 4);
        assert_eq!(&buffer[header_len + 12..header_len + 16], &[0, 0, 0, 0]);
        assert_eq!(&buffer[header_len + 8..header_len + 12], &0xfcu32.to_le_bytes());
    }
}
