//! Node id generation
//!
//! Ids are opaque strings. Dialogue, chunk and summary ids are derived
//! deterministically from the caller's `ref_id` so that re-ingesting the
//! same dialogue upserts instead of duplicating (MERGE-on-id semantics).

use uuid::Uuid;

/// Random id for nodes with no natural key
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// FNV-1a over the input, used for stable content-derived id suffixes
fn fnv1a(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn dialogue_id(end_user_id: &str, ref_id: &str) -> String {
    format!("dlg-{:016x}", fnv1a(&format!("{end_user_id}:{ref_id}")))
}

pub fn chunk_id(dialogue_id: &str, sequence_index: usize) -> String {
    format!("{dialogue_id}-chk-{sequence_index}")
}

pub fn statement_id(chunk_id: &str, statement_text: &str) -> String {
    format!("stmt-{:016x}", fnv1a(&format!("{chunk_id}:{statement_text}")))
}

pub fn summary_id(chunk_id: &str) -> String {
    format!("sum-{chunk_id}")
}
