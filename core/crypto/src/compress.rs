//! zlib compression via flate2.

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{Read, Write};

use sealdoc_common::{Error, Result};

/// Compress `data` as a single zlib stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)
        .map_err(|e| Error::Crypto(format!("Compression failed: {}", e)))?;
    enc.finish()
        .map_err(|e| Error::Crypto(format!("Compression failed: {}", e)))
}

/// Decompress a zlib stream.
///
/// # Errors
/// - `Format` naming the compressed structure if the stream is corrupt
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut dec = ZlibDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)
        .map_err(|e| Error::format("zlib stream", e))?;
    Ok(out)
}

/// Compress only if the result saves at least 2% of the input size.
///
/// Returns `None` when compression does not pay for itself.
pub fn compress_if_worthwhile(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let compressed = compress(data)?;
    if compressed.len() * 50 <= data.len() * 49 {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}
