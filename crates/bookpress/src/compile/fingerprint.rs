use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::geometry::BookSize;
use crate::secrets::hex_encode;

/// Content fingerprint of a compile request.
///
/// Hashes the family, the ordered page ids, the book size and the bucket the
/// request time falls into. Page ids are length-prefixed so `["ab", "c"]`
/// and `["a", "bc"]` differ.
pub fn fingerprint(
    family_id: &str,
    page_ids: &[String],
    book_size: BookSize,
    requested_at: DateTime<Utc>,
    bucket_secs: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(family_id.as_bytes());
    hasher.update(b"|");
    for id in page_ids {
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(book_size.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(time_bucket(requested_at, bucket_secs).to_be_bytes());
    hex_encode(&hasher.finalize())
}

pub fn time_bucket(at: DateTime<Utc>, bucket_secs: u64) -> i64 {
    at.timestamp().div_euclid(bucket_secs.max(1) as i64)
}
