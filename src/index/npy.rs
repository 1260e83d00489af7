//! NPY encoding for the embedding matrix.
//!
//! Only what the pipeline writes is supported: little-endian `f32`, C order,
//! two-dimensional shape. Files written here load with `numpy.load`.

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
/// Header block is padded so the data starts on this boundary
const NPY_ALIGN: usize = 64;

/// Encode a `rows x dimension` matrix.
pub fn encode(rows: &[Vec<f32>], dimension: usize) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        dimension
    );
    // magic (6) + version (2) + header length (2) + header + '\n'
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut buffer = Vec::with_capacity(unpadded + padding + rows.len() * dimension * 4);
    buffer.extend_from_slice(NPY_MAGIC);
    buffer.extend_from_slice(&[1, 0]);
    buffer.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buffer.extend_from_slice(header.as_bytes());
    for row in rows {
        for &val in row {
            buffer.extend_from_slice(&val.to_le_bytes());
        }
    }
    buffer
}

/// Decode a matrix written by [`encode`] (or by numpy with the same dtype).
pub fn decode(bytes: &[u8]) -> Result<(Vec<Vec<f32>>, usize), String> {
    if bytes.len() < 10 || &bytes[..NPY_MAGIC.len()] != NPY_MAGIC {
        return Err("not an NPY file".to_string());
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated NPY header".to_string());
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(format!("unsupported NPY version {}", v)),
    };

    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err("truncated NPY header".to_string());
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| "NPY header is not valid text".to_string())?;

    if !header.contains("'descr': '<f4'") {
        return Err("expected little-endian float32 data".to_string());
    }
    if !header.contains("'fortran_order': False") {
        return Err("Fortran-ordered arrays are not supported".to_string());
    }
    let (rows, dimension) = parse_shape(header)?;

    let data = &bytes[data_start..];
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "NPY shape overflows".to_string())?;
    if data.len() != expected {
        return Err(format!(
            "shape ({}, {}) needs {} data bytes, found {}",
            rows,
            dimension,
            expected,
            data.len()
        ));
    }

    let matrix = if dimension == 0 {
        vec![Vec::new(); rows]
    } else {
        data.chunks_exact(dimension * 4)
            .map(|row| {
                row.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            })
            .collect()
    };

    Ok((matrix, dimension))
}

fn parse_shape(header: &str) -> Result<(usize, usize), String> {
    let start = header.find("'shape':").ok_or_else(|| "NPY header has no shape".to_string())?;
    let rest = &header[start..];
    let open = rest.find('(').ok_or_else(|| "malformed NPY shape".to_string())?;
    let close = rest.find(')').ok_or_else(|| "malformed NPY shape".to_string())?;
    if close < open {
        return Err("malformed NPY shape".to_string());
    }

    let dims: Vec<usize> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| format!("bad NPY dimension '{}'", s)))
        .collect::<Result<_, _>>()?;

    match dims.as_slice() {
        [rows, dimension] => Ok((*rows, *dimension)),
        _ => Err(format!("expected a 2-d matrix, found shape {:?}", dims)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_aligned() {
        let bytes = encode(&[vec![1.0, 2.0]], 2);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 8);
    }

    #[test]
    fn test_decode_matches_encode() {
        let rows = vec![vec![0.5, -1.25, 3.0], vec![7.0, 0.0, f32::MIN_POSITIVE]];
        let (decoded, dimension) = decode(&encode(&rows, 3)).unwrap();
        assert_eq!(dimension, 3);
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_empty_matrix() {
        let (decoded, dimension) = decode(&encode(&[], 384)).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(dimension, 384);
    }

    #[test]
    fn test_rejects_wrong_dtype_and_truncation() {
        let mut bytes = encode(&[vec![1.0]], 1);
        let pos = bytes.windows(3).position(|w| w == b"<f4").unwrap();
        let mut wrong_dtype = bytes.clone();
        wrong_dtype[pos + 2] = b'8';
        assert!(decode(&wrong_dtype).is_err());

        bytes.pop();
        assert!(decode(&bytes).is_err());
        assert!(decode(b"not numpy").is_err());
    }
}
