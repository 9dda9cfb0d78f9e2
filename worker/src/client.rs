//! Blocking TCP client for the parameter server's wire protocol
//! (spec.md §6). Framing mirrors the length-prefixed
//! read_exact/write_all pattern common to hand-rolled binary protocols
//! (see `other_examples`'s `distributed-protocol.rs`), but blocking rather
//! than async: the worker's compute thread talks to exactly one PS
//! connection at a time, so there is nothing to gain from an async
//! runtime here (spec.md §5 mandates OS threads for the core throughout).

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use bytes::Buf;

use ps_core::codec::{self, MfFullModel, MfSparseRequest};
use ps_core::{kv_store::Key, LrGradient, MfGradient, Opcode, ProtocolError};

use crate::errors::WorkerError;

/// Bound on any single response body this client will read into memory.
/// Mirrors the PS's own 120 MiB scratch-buffer cap (spec.md §5).
const MAX_RESPONSE_BYTES: usize = 120 * 1024 * 1024;

pub struct PsClient {
    stream: TcpStream,
}

impl PsClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, WorkerError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    fn write_front_matter(&mut self, opcode: Opcode, payload_size: Option<u32>) -> Result<(), WorkerError> {
        let bytes = codec::encode_front_matter(opcode as u32, payload_size);
        self.stream.write_all(&bytes)?;
        Ok(())
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<(), WorkerError> {
        self.stream.write_all(payload)?;
        Ok(())
    }

    fn read_exact_checked(&mut self, len: usize) -> Result<Vec<u8>, WorkerError> {
        if len > MAX_RESPONSE_BYTES {
            return Err(WorkerError::Protocol(ProtocolError::PayloadTooLarge {
                size: len,
                cap: MAX_RESPONSE_BYTES,
            }));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u32_prefix(&mut self) -> Result<u32, WorkerError> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// `GET_LR_SPARSE_MODEL`: returns weights in request order. Applies
    /// Nesterov's read look-ahead server-side; the worker never sees raw
    /// weights vs. look-ahead weights differently.
    pub fn get_sparse_lr_slice(&mut self, indices: &[u32]) -> Result<Vec<f32>, WorkerError> {
        let payload = codec::encode_sparse_lr_request(indices);
        self.write_front_matter(Opcode::GetLrSparseModel, Some(payload.len() as u32))?;
        self.write_payload(&payload)?;
        let resp = self.read_exact_checked(indices.len() * 4)?;
        Ok(codec::decode_sparse_lr_response(&resp, indices.len())?)
    }

    /// `SEND_LR_GRADIENT`: fire-and-forget, no response (spec.md §4.5).
    pub fn send_lr_gradient(&mut self, gradient: &LrGradient) -> Result<(), WorkerError> {
        let payload = codec::encode_lr_gradient(gradient);
        self.write_front_matter(Opcode::SendLrGradient, Some(payload.len() as u32))?;
        self.write_payload(&payload)?;
        Ok(())
    }

    /// `GET_LR_FULL_MODEL`: self-describing, length-prefixed.
    pub fn get_full_lr_model(&mut self) -> Result<Vec<f32>, WorkerError> {
        self.write_front_matter(Opcode::GetLrFullModel, None)?;
        let num = self.read_u32_prefix()? as usize;
        let mut resp = self.read_exact_checked(num * 4)?.as_slice();
        let mut weights = Vec::with_capacity(num);
        for _ in 0..num {
            weights.push(resp.get_f32_le());
        }
        Ok(weights)
    }

    /// `GET_MF_SPARSE_MODEL`.
    pub fn get_sparse_mf_slice(&mut self, req: &MfSparseRequest, k: usize) -> Result<(Vec<codec::MfEntry>, Vec<codec::MfEntry>), WorkerError> {
        let payload = codec::encode_mf_sparse_request(req);
        self.write_front_matter(Opcode::GetMfSparseModel, Some(payload.len() as u32))?;
        self.write_payload(&payload)?;
        let entry_bytes = 8 + k * 4;
        let total = (req.minibatch_size as usize + req.item_ids.len()) * entry_bytes;
        let resp = self.read_exact_checked(total)?;
        Ok(codec::decode_mf_sparse_response(
            &resp,
            req.minibatch_size as usize,
            req.item_ids.len(),
            k,
        )?)
    }

    /// `SEND_MF_GRADIENT`: fire-and-forget.
    pub fn send_mf_gradient(&mut self, gradient: &MfGradient) -> Result<(), WorkerError> {
        let payload = codec::encode_mf_gradient(gradient);
        self.write_front_matter(Opcode::SendMfGradient, Some(payload.len() as u32))?;
        self.write_payload(&payload)?;
        Ok(())
    }

    /// `GET_MF_FULL_MODEL`.
    pub fn get_full_mf_model(&mut self) -> Result<MfFullModel, WorkerError> {
        self.write_front_matter(Opcode::GetMfFullModel, None)?;
        let nusers = self.read_u32_prefix()? as usize;
        let nitems = self.read_u32_prefix()? as usize;
        let k = self.read_u32_prefix()? as usize;
        let rest_len = 4 + (nusers + nitems) * 4 + (nusers + nitems) * k * 4;
        let mut rest = self.read_exact_checked(rest_len)?.as_slice();
        let global_bias = rest.get_f32_le();
        let read_n = |buf: &mut &[u8], n: usize| -> Vec<f32> { (0..n).map(|_| buf.get_f32_le()).collect() };
        let user_bias = read_n(&mut rest, nusers);
        let item_bias = read_n(&mut rest, nitems);
        let user_factors = read_n(&mut rest, nusers * k);
        let item_factors = read_n(&mut rest, nitems * k);
        Ok(MfFullModel {
            global_bias,
            user_bias,
            item_bias,
            user_factors,
            item_factors,
            k,
        })
    }

    /// `REGISTER_TASK`: payload is `(task_id, remaining_seconds)`, fixed
    /// size, no `payload_size` front-matter field. Returns `0`/`1` per
    /// spec.md §4.5.
    pub fn register_task(&mut self, task_id: u32, remaining_seconds: i32) -> Result<u8, WorkerError> {
        self.write_front_matter(Opcode::RegisterTask, None)?;
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&task_id.to_le_bytes());
        payload.extend_from_slice(&remaining_seconds.to_le_bytes());
        self.write_payload(&payload)?;
        let resp = self.read_exact_checked(1)?;
        Ok(resp[0])
    }

    /// `DEREGISTER_TASK`: returns `0`/`1`/`2` per spec.md §4.5/§4.6.
    pub fn deregister_task(&mut self, task_id: u32) -> Result<u8, WorkerError> {
        self.write_front_matter(Opcode::DeregisterTask, None)?;
        self.write_payload(&task_id.to_le_bytes())?;
        let resp = self.read_exact_checked(1)?;
        Ok(resp[0])
    }

    /// `SET_VALUE`: fire-and-forget KV write.
    pub fn set_value(&mut self, key: &Key, value: &[u8]) -> Result<(), WorkerError> {
        let payload = codec::encode_kv_set_request(key, value);
        self.write_front_matter(Opcode::SetValue, Some(payload.len() as u32))?;
        self.write_payload(&payload)?;
        Ok(())
    }

    /// `GET_VALUE`. The response is a single `0x00` byte if the key is
    /// missing, or a `size:u32 | value` pair if present (spec.md §4.5,
    /// matching `PSSparseServerTask.cpp`'s single-byte not-found marker).
    /// The first byte disambiguates: read it alone first, and only read the
    /// remaining three size bytes (plus the value) if it wasn't the whole
    /// not-found response.
    pub fn get_value(&mut self, key: &Key) -> Result<Option<Vec<u8>>, WorkerError> {
        self.write_front_matter(Opcode::GetValue, Some(key.len() as u32))?;
        self.write_payload(key)?;
        let mut size_bytes = [0u8; 4];
        self.stream.read_exact(&mut size_bytes[..1])?;
        if size_bytes[0] == 0x00 {
            return Ok(None);
        }
        self.stream.read_exact(&mut size_bytes[1..])?;
        let size = u32::from_le_bytes(size_bytes) as usize;
        let value = self.read_exact_checked(size)?;
        Ok(Some(value))
    }
}
