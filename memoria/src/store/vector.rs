//! Conversion between `Vec<f32>` and the JSON-array text libsql's `vector32()`
//! and `vector_extract()` functions exchange (spec §2 "Vector Codec").

use memoria_core::{MemoryError, Result};

/// Encodes a dense vector as the JSON-array text `vector32(?)` expects, e.g.
/// `"[1.0,2.0,3.0]"`. Never interpolated into SQL — always bound as a
/// parameter (spec §9).
#[must_use]
pub fn encode(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 8 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

/// Decodes the JSON-array text returned by `vector_extract(embedding)` back
/// into a dense vector.
pub fn decode(text: &str) -> Result<Vec<f32>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            MemoryError::Backend(anyhow::anyhow!("malformed vector literal: {trimmed}"))
        })?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let v = vec![1.0_f32, -2.5, 0.0, 3.75];
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn empty_vector_round_trips() {
        assert_eq!(decode(&encode(&[])).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode("not a vector").is_err());
    }
}
