//! Stable hashing for datums (group buckets, dedup keys).

use blake3::Hasher;

use crate::datum::Datum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256(h.finalize().into())
}

/// Hash a datum by structure. Equal datums (per `Datum::cmp`) hash equal:
/// object keys are visited in sorted order and numbers by their bit pattern
/// with `-0.0` folded into `0.0`.
pub fn hash_datum(d: &Datum) -> Hash256 {
    let mut h = Hasher::new();
    feed(&mut h, d);
    Hash256(h.finalize().into())
}

fn feed(h: &mut Hasher, d: &Datum) {
    match d {
        Datum::Null => {
            h.update(b"n");
        }
        Datum::Bool(b) => {
            h.update(if *b { b"t" } else { b"f" });
        }
        Datum::Num(n) => {
            let n = if *n == 0.0 { 0.0 } else { *n };
            h.update(b"#");
            h.update(&n.to_bits().to_le_bytes());
        }
        Datum::Str(s) => {
            h.update(b"s");
            h.update(&(s.len() as u64).to_le_bytes());
            h.update(s.as_bytes());
        }
        Datum::Array(items) => {
            h.update(b"[");
            h.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                feed(h, item);
            }
        }
        Datum::Object(map) => {
            h.update(b"{");
            h.update(&(map.len() as u64).to_le_bytes());
            for (k, v) in map {
                h.update(&(k.len() as u64).to_le_bytes());
                h.update(k.as_bytes());
                feed(h, v);
            }
        }
    }
}
