//! Bit-exact wire (de)serialization (spec.md §4.1). All integers
//! little-endian; `F` is `f32`, transmitted as 4 raw little-endian bytes.
//!
//! This is deliberately not `serde`/`postcard` generic serialization: the
//! wire format here is a fixed, externally-specified byte layout (verified
//! byte-for-byte by the `S1` scenario in spec.md §8), so we read and write
//! it by hand with `bytes::{Buf, BufMut}` the way `psyche-network` reaches
//! for `bytes` on its wire-buffer paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::data::{FeatureValue, SparseMinibatch, SparseSample, MAX_DECLARED_COUNT};
use crate::error::ProtocolError;
use crate::gradient::{LrGradient, MfGradient};
use crate::opcode::{MF_MAGIC_END, MF_MAGIC_START};

fn read_i32(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof {
            needed: 4,
            available: buf.remaining(),
        });
    }
    Ok(buf.get_i32_le())
}

fn read_u32(buf: &mut impl Buf) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof {
            needed: 4,
            available: buf.remaining(),
        });
    }
    Ok(buf.get_u32_le())
}

fn read_f32(buf: &mut impl Buf) -> Result<f32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::UnexpectedEof {
            needed: 4,
            available: buf.remaining(),
        });
    }
    Ok(buf.get_f32_le())
}

/// Reads a declared element count and checks it against spec.md's
/// non-negative + reference-cap rule. Returns the count as `usize`.
fn read_count(buf: &mut impl Buf) -> Result<usize, ProtocolError> {
    let raw = read_i32(buf)?;
    if raw < 0 {
        return Err(ProtocolError::NegativeCount(raw));
    }
    if raw as i64 > MAX_DECLARED_COUNT {
        return Err(ProtocolError::CountTooLarge {
            got: raw as i64,
            cap: MAX_DECLARED_COUNT,
        });
    }
    Ok(raw as usize)
}

fn check_scratch_cap(size: usize, cap: usize) -> Result<(), ProtocolError> {
    if size > cap {
        return Err(ProtocolError::PayloadTooLarge { size, cap });
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Minibatch blob (object-store payload)
// ---------------------------------------------------------------------

/// One decoded sample plus its optional label, as they sit inside a blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobSample {
    pub label: Option<f32>,
    pub sample: SparseSample,
}

/// Encodes a flat run of samples as one minibatch blob
/// (`total_size | num_samples | sample*`). `labeled` controls whether each
/// sample carries a leading label float.
pub fn encode_minibatch_blob(samples: &[BlobSample], labeled: bool) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i32_le(samples.len() as i32);
    for s in samples {
        if labeled {
            body.put_f32_le(s.label.unwrap_or(0.0));
        }
        body.put_i32_le(s.sample.features.len() as i32);
        for fv in &s.sample.features {
            body.put_i32_le(fv.index as i32);
            body.put_f32_le(fv.value);
        }
    }
    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_i32_le(body.len() as i32);
    out.extend_from_slice(&body);
    out.to_vec()
}

/// Decodes a minibatch blob. `labeled` must match the blob class the caller
/// knows it fetched (spec.md §4.1: labeled-ness is not a per-sample wire
/// flag).
pub fn decode_minibatch_blob(bytes: &[u8], labeled: bool) -> Result<Vec<BlobSample>, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let total_size = read_i32(&mut buf)?;
    if total_size < 0 {
        return Err(ProtocolError::NegativeCount(total_size));
    }
    if total_size as usize > buf.remaining() {
        return Err(ProtocolError::UnexpectedEof {
            needed: total_size as usize,
            available: buf.remaining(),
        });
    }
    let num_samples = read_count(&mut buf)?;
    let mut out = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        let label = if labeled {
            Some(read_f32(&mut buf)?)
        } else {
            None
        };
        let num_values = read_count(&mut buf)?;
        let mut features = Vec::with_capacity(num_values);
        for _ in 0..num_values {
            let index = read_i32(&mut buf)? as u32;
            let value = read_f32(&mut buf)?;
            features.push(FeatureValue { index, value });
        }
        out.push(BlobSample {
            label,
            sample: SparseSample { features },
        });
    }
    Ok(out)
}

/// Groups a flat decode of a blob into `num_minibatches` minibatches of
/// `minibatch_size` samples each, as the streaming iterator does
/// (spec.md §4.3). Labels are pulled into the minibatch's parallel label
/// vector when `labeled` samples are present.
pub fn split_into_minibatches(
    decoded: Vec<BlobSample>,
    num_minibatches: usize,
    minibatch_size: usize,
) -> Vec<SparseMinibatch> {
    let mut out = Vec::with_capacity(num_minibatches);
    let mut iter = decoded.into_iter();
    for _ in 0..num_minibatches {
        let mut samples = Vec::with_capacity(minibatch_size);
        let mut labels = Vec::with_capacity(minibatch_size);
        let mut any_label = false;
        for _ in 0..minibatch_size {
            match iter.next() {
                Some(bs) => {
                    if bs.label.is_some() {
                        any_label = true;
                    }
                    labels.push(bs.label.unwrap_or(0.0));
                    samples.push(bs.sample);
                }
                None => break,
            }
        }
        out.push(SparseMinibatch {
            samples,
            labels: if any_label { Some(labels) } else { None },
        });
    }
    out
}

// ---------------------------------------------------------------------
// Sparse LR gradient
// ---------------------------------------------------------------------

/// `version:i32 | num:i32 | (index:i32, delta:F) * num`
pub fn encode_lr_gradient(g: &LrGradient) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(8 + g.deltas.len() * 8);
    out.put_i32_le(g.version as i32);
    out.put_i32_le(g.deltas.len() as i32);
    for (index, delta) in &g.deltas {
        out.put_i32_le(*index as i32);
        out.put_f32_le(*delta);
    }
    out.to_vec()
}

pub fn decode_lr_gradient(bytes: &[u8]) -> Result<LrGradient, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let version = read_i32(&mut buf)? as u32;
    let num = read_count(&mut buf)?;
    let mut deltas = Vec::with_capacity(num);
    for _ in 0..num {
        let index = read_i32(&mut buf)? as u32;
        let delta = read_f32(&mut buf)?;
        deltas.push((index, delta));
    }
    Ok(LrGradient { version, deltas })
}

// ---------------------------------------------------------------------
// Pull-sparse-LR-model request/response
// ---------------------------------------------------------------------

/// `num_indices:i32 | index * num_indices`
pub fn encode_sparse_lr_request(indices: &[u32]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(4 + indices.len() * 4);
    out.put_i32_le(indices.len() as i32);
    for idx in indices {
        out.put_i32_le(*idx as i32);
    }
    out.to_vec()
}

pub fn decode_sparse_lr_request(bytes: &[u8]) -> Result<Vec<u32>, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let num = read_count(&mut buf)?;
    let mut indices = Vec::with_capacity(num);
    for _ in 0..num {
        indices.push(read_i32(&mut buf)? as u32);
    }
    Ok(indices)
}

/// `F * num_indices`, in request order, no indices echoed back.
pub fn encode_sparse_lr_response(weights: &[f32]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(weights.len() * 4);
    for w in weights {
        out.put_f32_le(*w);
    }
    out.to_vec()
}

pub fn decode_sparse_lr_response(bytes: &[u8], num_indices: usize) -> Result<Vec<f32>, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let mut out = Vec::with_capacity(num_indices);
    for _ in 0..num_indices {
        out.push(read_f32(&mut buf)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Full LR model
// ---------------------------------------------------------------------

/// `num_weights:i32 | F * num_weights` (spec.md §9 open question: the
/// length-prefixed form is the portable contract this spec picks).
pub fn encode_full_lr_model(weights: &[f32]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(4 + weights.len() * 4);
    out.put_i32_le(weights.len() as i32);
    for w in weights {
        out.put_f32_le(*w);
    }
    out.to_vec()
}

pub fn decode_full_lr_model(bytes: &[u8]) -> Result<Vec<f32>, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let num = read_count(&mut buf)?;
    let mut out = Vec::with_capacity(num);
    for _ in 0..num {
        out.push(read_f32(&mut buf)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Sparse MF "get model" request/response
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MfSparseRequest {
    pub base_user_id: u32,
    pub minibatch_size: u32,
    pub item_ids: Vec<u32>,
}

/// `k_items:i32 | base_user_id:i32 | minibatch_size:i32 | MAGIC:i32 | item_id * k_items`
pub fn encode_mf_sparse_request(req: &MfSparseRequest) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(16 + req.item_ids.len() * 4);
    out.put_i32_le(req.item_ids.len() as i32);
    out.put_i32_le(req.base_user_id as i32);
    out.put_i32_le(req.minibatch_size as i32);
    out.put_i32_le(MF_MAGIC_START as i32);
    for id in &req.item_ids {
        out.put_i32_le(*id as i32);
    }
    out.to_vec()
}

pub fn decode_mf_sparse_request(bytes: &[u8]) -> Result<MfSparseRequest, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let k_items = read_count(&mut buf)?;
    let base_user_id = read_i32(&mut buf)? as u32;
    let minibatch_size = read_i32(&mut buf)? as u32;
    let magic = read_u32(&mut buf)?;
    if magic != MF_MAGIC_START {
        return Err(ProtocolError::MagicMismatch {
            expected: MF_MAGIC_START,
            got: magic,
        });
    }
    let mut item_ids = Vec::with_capacity(k_items);
    for _ in 0..k_items {
        item_ids.push(read_i32(&mut buf)? as u32);
    }
    Ok(MfSparseRequest {
        base_user_id,
        minibatch_size,
        item_ids,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MfEntry {
    pub id: u32,
    pub bias: f32,
    pub factors: Vec<f32>,
}

/// `[user_id, user_bias, factor*K] * minibatch_size` then
/// `[item_id, item_bias, factor*K] * k_items`.
pub fn encode_mf_sparse_response(users: &[MfEntry], items: &[MfEntry]) -> Vec<u8> {
    let k = users.first().or(items.first()).map(|e| e.factors.len()).unwrap_or(0);
    let mut out = BytesMut::with_capacity((users.len() + items.len()) * (8 + k * 4));
    for e in users.iter().chain(items.iter()) {
        out.put_i32_le(e.id as i32);
        out.put_f32_le(e.bias);
        for f in &e.factors {
            out.put_f32_le(*f);
        }
    }
    out.to_vec()
}

pub fn decode_mf_sparse_response(
    bytes: &[u8],
    num_users: usize,
    num_items: usize,
    k: usize,
) -> Result<(Vec<MfEntry>, Vec<MfEntry>), ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let read_entries = |buf: &mut Bytes, n: usize| -> Result<Vec<MfEntry>, ProtocolError> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let id = read_i32(buf)? as u32;
            let bias = read_f32(buf)?;
            let mut factors = Vec::with_capacity(k);
            for _ in 0..k {
                factors.push(read_f32(buf)?);
            }
            out.push(MfEntry { id, bias, factors });
        }
        Ok(out)
    };
    let users = read_entries(&mut buf, num_users)?;
    let items = read_entries(&mut buf, num_items)?;
    Ok((users, items))
}

// ---------------------------------------------------------------------
// Sparse MF gradient
// ---------------------------------------------------------------------

/// `MAGIC | num_users:i32 | num_items:i32 | (user_id,bias_delta)*num_users |
/// (item_id,bias_delta)*num_items | (user_id,F*K)*num_users |
/// (item_id,F*K)*num_items | MAGIC_END`
pub fn encode_mf_gradient(g: &MfGradient) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_i32_le(MF_MAGIC_START as i32);
    out.put_i32_le(g.user_bias_deltas.len() as i32);
    out.put_i32_le(g.item_bias_deltas.len() as i32);
    for (id, delta) in &g.user_bias_deltas {
        out.put_i32_le(*id as i32);
        out.put_f32_le(*delta);
    }
    for (id, delta) in &g.item_bias_deltas {
        out.put_i32_le(*id as i32);
        out.put_f32_le(*delta);
    }
    for (id, factors) in &g.user_factor_deltas {
        out.put_i32_le(*id as i32);
        for f in factors {
            out.put_f32_le(*f);
        }
    }
    for (id, factors) in &g.item_factor_deltas {
        out.put_i32_le(*id as i32);
        for f in factors {
            out.put_f32_le(*f);
        }
    }
    out.put_i32_le(MF_MAGIC_END as i32);
    out.to_vec()
}

pub fn decode_mf_gradient(bytes: &[u8], k: usize) -> Result<MfGradient, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let magic = read_u32(&mut buf)?;
    if magic != MF_MAGIC_START {
        return Err(ProtocolError::MagicMismatch {
            expected: MF_MAGIC_START,
            got: magic,
        });
    }
    let num_users = read_count(&mut buf)?;
    let num_items = read_count(&mut buf)?;

    let mut user_bias_deltas = Vec::with_capacity(num_users);
    for _ in 0..num_users {
        let id = read_i32(&mut buf)? as u32;
        let delta = read_f32(&mut buf)?;
        user_bias_deltas.push((id, delta));
    }
    let mut item_bias_deltas = Vec::with_capacity(num_items);
    for _ in 0..num_items {
        let id = read_i32(&mut buf)? as u32;
        let delta = read_f32(&mut buf)?;
        item_bias_deltas.push((id, delta));
    }
    let mut user_factor_deltas = Vec::with_capacity(num_users);
    for (id, _) in &user_bias_deltas {
        let mut factors = Vec::with_capacity(k);
        for _ in 0..k {
            factors.push(read_f32(&mut buf)?);
        }
        user_factor_deltas.push((*id, factors));
    }
    let mut item_factor_deltas = Vec::with_capacity(num_items);
    for (id, _) in &item_bias_deltas {
        let mut factors = Vec::with_capacity(k);
        for _ in 0..k {
            factors.push(read_f32(&mut buf)?);
        }
        item_factor_deltas.push((*id, factors));
    }

    let end_magic = read_u32(&mut buf)?;
    if end_magic != MF_MAGIC_END {
        return Err(ProtocolError::MagicMismatch {
            expected: MF_MAGIC_END,
            got: end_magic,
        });
    }

    Ok(MfGradient {
        user_bias_deltas,
        item_bias_deltas,
        user_factor_deltas,
        item_factor_deltas,
    })
}

// ---------------------------------------------------------------------
// Full MF model
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MfFullModel {
    pub global_bias: f32,
    pub user_bias: Vec<f32>,
    pub item_bias: Vec<f32>,
    /// Row-major, `nusers * k` entries.
    pub user_factors: Vec<f32>,
    /// Row-major, `nitems * k` entries.
    pub item_factors: Vec<f32>,
    pub k: usize,
}

/// `nusers:i32 | nitems:i32 | k:i32 | global_bias:F | user_bias[nusers] |
/// item_bias[nitems] | user_factors[nusers*k] | item_factors[nitems*k]`.
/// Self-describing, mirroring the length-prefixed convention §4.1 picks for
/// the full LR model (spec.md §9 open question on the MF response shape is
/// silent; this follows the same precedent).
pub fn encode_full_mf_model(m: &MfFullModel) -> Vec<u8> {
    let nusers = m.user_bias.len();
    let nitems = m.item_bias.len();
    let mut out = BytesMut::with_capacity(16 + (nusers + nitems) * 4 + (m.user_factors.len() + m.item_factors.len()) * 4);
    out.put_i32_le(nusers as i32);
    out.put_i32_le(nitems as i32);
    out.put_i32_le(m.k as i32);
    out.put_f32_le(m.global_bias);
    for v in &m.user_bias {
        out.put_f32_le(*v);
    }
    for v in &m.item_bias {
        out.put_f32_le(*v);
    }
    for v in &m.user_factors {
        out.put_f32_le(*v);
    }
    for v in &m.item_factors {
        out.put_f32_le(*v);
    }
    out.to_vec()
}

pub fn decode_full_mf_model(bytes: &[u8]) -> Result<MfFullModel, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let nusers = read_count(&mut buf)?;
    let nitems = read_count(&mut buf)?;
    let k = read_count(&mut buf)?;
    let global_bias = read_f32(&mut buf)?;
    let mut user_bias = Vec::with_capacity(nusers);
    for _ in 0..nusers {
        user_bias.push(read_f32(&mut buf)?);
    }
    let mut item_bias = Vec::with_capacity(nitems);
    for _ in 0..nitems {
        item_bias.push(read_f32(&mut buf)?);
    }
    let mut user_factors = Vec::with_capacity(nusers * k);
    for _ in 0..nusers * k {
        user_factors.push(read_f32(&mut buf)?);
    }
    let mut item_factors = Vec::with_capacity(nitems * k);
    for _ in 0..nitems * k {
        item_factors.push(read_f32(&mut buf)?);
    }
    Ok(MfFullModel {
        global_bias,
        user_bias,
        item_bias,
        user_factors,
        item_factors,
        k,
    })
}

// ---------------------------------------------------------------------
// Key-value side store (SET_VALUE / GET_VALUE payloads)
// ---------------------------------------------------------------------

use crate::kv_store::{Key, KEY_SIZE};

/// `SET_VALUE` request body: `key[KEY_SIZE] | value_size:i32 | value`.
pub fn encode_kv_set_request(key: &Key, value: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(KEY_SIZE + 4 + value.len());
    out.extend_from_slice(key);
    out.put_i32_le(value.len() as i32);
    out.extend_from_slice(value);
    out.to_vec()
}

pub fn decode_kv_set_request(bytes: &[u8]) -> Result<(Key, Vec<u8>), ProtocolError> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if buf.remaining() < KEY_SIZE {
        return Err(ProtocolError::UnexpectedEof {
            needed: KEY_SIZE,
            available: buf.remaining(),
        });
    }
    let mut key: Key = [0u8; KEY_SIZE];
    buf.copy_to_slice(&mut key);
    let size = read_count(&mut buf)?;
    if buf.remaining() < size {
        return Err(ProtocolError::UnexpectedEof {
            needed: size,
            available: buf.remaining(),
        });
    }
    let mut value = vec![0u8; size];
    buf.copy_to_slice(&mut value);
    Ok((key, value))
}

/// `GET_VALUE` request body: the raw `key[KEY_SIZE]`, nothing else.
pub fn decode_kv_get_request(bytes: &[u8]) -> Result<Key, ProtocolError> {
    if bytes.len() != KEY_SIZE {
        return Err(ProtocolError::UnexpectedEof {
            needed: KEY_SIZE,
            available: bytes.len(),
        });
    }
    let mut key: Key = [0u8; KEY_SIZE];
    key.copy_from_slice(bytes);
    Ok(key)
}

/// `GET_VALUE` response: a single `0x00` byte for a missing key (spec.md §4.5,
/// Testable Property 5, scenario S3), or `size:u32 | value` when present.
/// Matches `PSSparseServerTask.cpp`'s `sizeof(char)` not-found marker.
pub fn encode_kv_get_response(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        None => vec![0x00],
        Some(bytes) => {
            let mut out = BytesMut::with_capacity(4 + bytes.len());
            out.put_i32_le(bytes.len() as i32);
            out.extend_from_slice(bytes);
            out.to_vec()
        }
    }
}

pub fn decode_kv_get_response(bytes: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
    if bytes.len() == 1 && bytes[0] == 0x00 {
        return Ok(None);
    }
    let mut buf = Bytes::copy_from_slice(bytes);
    let size = read_count(&mut buf)?;
    if buf.remaining() < size {
        return Err(ProtocolError::UnexpectedEof {
            needed: size,
            available: buf.remaining(),
        });
    }
    let mut value = vec![0u8; size];
    buf.copy_to_slice(&mut value);
    Ok(Some(value))
}

// ---------------------------------------------------------------------
// PS request front-matter
// ---------------------------------------------------------------------

/// `operation:u32` and, for variable-payload opcodes, `payload_size:u32`
/// (spec.md §4.1).
pub fn encode_front_matter(opcode: u32, payload_size: Option<u32>) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(8);
    out.put_u32_le(opcode);
    if let Some(size) = payload_size {
        out.put_u32_le(size);
    }
    out.to_vec()
}

pub fn check_payload_size(size: u32, cap: usize) -> Result<(), ProtocolError> {
    check_scratch_cap(size as usize, cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// spec.md §8 scenario S1.
    #[test]
    fn s1_lr_gradient_byte_exact() {
        let g = LrGradient {
            version: 42,
            deltas: vec![(3, 0.5), (7, -0.25)],
        };
        let bytes = encode_lr_gradient(&g);
        let expected: Vec<u8> = vec![
            0x2A, 0x00, 0x00, 0x00, // version = 42
            0x02, 0x00, 0x00, 0x00, // num = 2
            0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3F, // (3, 0.5)
            0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0xBE, // (7, -0.25)
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn lr_gradient_round_trips() {
        let g = LrGradient {
            version: 7,
            deltas: vec![(1, 1.5), (9999, -3.25), (0, 0.0)],
        };
        let decoded = decode_lr_gradient(&encode_lr_gradient(&g)).unwrap();
        assert_eq!(decoded, g);
    }

    #[test]
    fn mf_gradient_round_trips_with_magic_bookends() {
        let g = MfGradient {
            user_bias_deltas: vec![(1, 0.1), (2, 0.2)],
            item_bias_deltas: vec![(10, -0.1)],
            user_factor_deltas: vec![(1, vec![0.1, 0.2]), (2, vec![0.3, 0.4])],
            item_factor_deltas: vec![(10, vec![0.5, 0.6])],
        };
        let bytes = encode_mf_gradient(&g);
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            MF_MAGIC_START
        );
        assert_eq!(
            u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap()),
            MF_MAGIC_END
        );
        let decoded = decode_mf_gradient(&bytes, 2).unwrap();
        assert_eq!(decoded, g);
    }

    #[test]
    fn mf_gradient_rejects_bad_start_magic() {
        let mut bytes = encode_mf_gradient(&MfGradient::default());
        bytes[0] = 0;
        assert!(matches!(
            decode_mf_gradient(&bytes, 0),
            Err(ProtocolError::MagicMismatch { .. })
        ));
    }

    #[test]
    fn negative_count_is_rejected() {
        let bytes = (-1i32).to_le_bytes().to_vec();
        assert_eq!(
            decode_sparse_lr_request(&bytes),
            Err(ProtocolError::NegativeCount(-1))
        );
    }

    #[test]
    fn count_above_cap_is_rejected() {
        let bytes = ((MAX_DECLARED_COUNT + 1) as i32).to_le_bytes().to_vec();
        assert!(matches!(
            decode_sparse_lr_request(&bytes),
            Err(ProtocolError::CountTooLarge { .. })
        ));
    }

    #[test]
    fn sparse_lr_request_response_round_trip() {
        let indices = vec![5u32, 6, 7];
        let req_bytes = encode_sparse_lr_request(&indices);
        assert_eq!(decode_sparse_lr_request(&req_bytes).unwrap(), indices);

        let weights = vec![0.1f32, 0.2, 0.3];
        let resp_bytes = encode_sparse_lr_response(&weights);
        assert_eq!(
            decode_sparse_lr_response(&resp_bytes, weights.len()).unwrap(),
            weights
        );
    }

    #[test]
    fn minibatch_blob_round_trips_labeled() {
        let samples = vec![
            BlobSample {
                label: Some(1.0),
                sample: SparseSample {
                    features: vec![FeatureValue { index: 1, value: 0.5 }],
                },
            },
            BlobSample {
                label: Some(0.0),
                sample: SparseSample {
                    features: vec![
                        FeatureValue { index: 2, value: 1.5 },
                        FeatureValue { index: 3, value: -1.5 },
                    ],
                },
            },
        ];
        let blob = encode_minibatch_blob(&samples, true);
        let decoded = decode_minibatch_blob(&blob, true).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn kv_set_request_round_trips() {
        let key = crate::kv_store::pack_key("answer");
        let bytes = encode_kv_set_request(&key, &[0x2A]);
        let (decoded_key, value) = decode_kv_set_request(&bytes).unwrap();
        assert_eq!(decoded_key, key);
        assert_eq!(value, vec![0x2A]);
    }

    /// spec.md §8 scenario S3.
    #[test]
    fn s3_kv_get_response_present_and_missing() {
        assert_eq!(encode_kv_get_response(Some(&[0x2A])), vec![0x01, 0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(decode_kv_get_response(&encode_kv_get_response(Some(&[0x2A]))).unwrap(), Some(vec![0x2A]));

        let missing = encode_kv_get_response(None);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0], 0x00);
        assert_eq!(decode_kv_get_response(&missing).unwrap(), None);
    }

    #[test]
    fn mf_full_model_round_trips() {
        let m = MfFullModel {
            global_bias: 3.5,
            user_bias: vec![0.1, 0.2],
            item_bias: vec![0.3],
            user_factors: vec![1.0, 2.0, 3.0, 4.0],
            item_factors: vec![5.0, 6.0],
            k: 2,
        };
        let bytes = encode_full_mf_model(&m);
        assert_eq!(decode_full_mf_model(&bytes).unwrap(), m);
    }

    #[test]
    fn split_into_minibatches_groups_by_size() {
        let samples: Vec<BlobSample> = (0..4)
            .map(|i| BlobSample {
                label: Some(i as f32),
                sample: SparseSample {
                    features: vec![FeatureValue { index: i, value: 1.0 }],
                },
            })
            .collect();
        let mbs = split_into_minibatches(samples, 2, 2);
        assert_eq!(mbs.len(), 2);
        assert_eq!(mbs[0].len(), 2);
        assert_eq!(mbs[1].len(), 2);
        assert_eq!(mbs[0].labels.as_ref().unwrap(), &vec![0.0, 1.0]);
        assert_eq!(mbs[1].labels.as_ref().unwrap(), &vec![2.0, 3.0]);
    }
}
