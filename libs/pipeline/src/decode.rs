//! Payload decoding for the three content encodings.

use std::io::Read;

use ingest_api::IngestError;

use crate::topic::Encoding;
use crate::value::Value;

/// Upper bound for a decompressed `gjson` payload.
pub const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

/// Decode raw payload bytes into a generic value.
pub fn decode(payload: &[u8], encoding: Encoding) -> Result<Value, IngestError> {
    match encoding {
        Encoding::Plain => decode_json(payload, encoding),
        Encoding::Compressed => {
            let raw = gunzip(payload)?;
            decode_json(&raw, encoding)
        }
        Encoding::Binary => ciborium::de::from_reader(payload)
            .map_err(|e| IngestError::decode(encoding.as_str(), format!("cbor: {e:?}"))),
    }
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, IngestError> {
    gunzip_limited(data, MAX_DECOMPRESSED_BYTES)
}

/// Inflate at most `limit` bytes; anything larger is an error, not a
/// truncated payload.
fn gunzip_limited(data: &[u8], limit: u64) -> Result<Vec<u8>, IngestError> {
    let mut decoder = flate2::read::GzDecoder::new(data).take(limit.saturating_add(1));
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| IngestError::decode("gjson", format!("gzip decompress: {e}")))?;
    if decompressed.len() as u64 > limit {
        return Err(IngestError::decode(
            "gjson",
            format!("decompressed payload exceeds {limit} bytes"),
        ));
    }
    Ok(decompressed)
}

fn decode_json(data: &[u8], encoding: Encoding) -> Result<Value, IngestError> {
    match serde_json::from_slice(data) {
        Ok(value) => Ok(value),
        Err(strict) => match replace_non_finite(data) {
            Some(cleaned) => serde_json::from_slice(&cleaned)
                .map_err(|e| IngestError::decode(encoding.as_str(), format!("json: {e}"))),
            None => Err(IngestError::decode(encoding.as_str(), format!("json: {strict}"))),
        },
    }
}

/// Rewrite bare `NaN`, `Infinity` and `-Infinity` tokens to `null`.
///
/// Such tokens are not JSON but are what many publishers emit for missing
/// samples. String literals are left untouched. `None` if nothing was
/// replaced.
fn replace_non_finite(data: &[u8]) -> Option<Vec<u8>> {
    const TOKENS: [&[u8]; 3] = [b"-Infinity", b"Infinity", b"NaN"];

    let mut out = Vec::with_capacity(data.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut replaced = false;
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            out.push(b);
            i += 1;
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|t| data[i..].starts_with(t)) {
            out.extend_from_slice(b"null");
            i += token.len();
            replaced = true;
            continue;
        }
        out.push(b);
        i += 1;
    }

    replaced.then_some(out)
}
