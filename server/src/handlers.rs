//! Per-opcode handler contracts (spec.md §4.5). Each handler reads its
//! framed request (if any) off the connection into the worker thread's
//! private scratch buffer, takes `model_lock` only for the part of the call
//! that actually touches the model, and writes its response (if any).

use std::sync::atomic::Ordering;

use mio::net::TcpStream;

use ps_core::codec;
use ps_core::data::{SCRATCH_BUFFER_BYTES, SPARSE_RESPONSE_CAP_BYTES};
use ps_core::task_registry::{DeregisterOutcome, RegisterOutcome};
use ps_core::{Opcode, ProtocolError};

use crate::app_state::{expect_lr, expect_lr_mut, expect_mf, expect_mf_mut, read_mf_sparse, snapshot_mf_full, AppState};
use crate::errors::ConnError;
use crate::io_util::{read_exact_blocking, read_i32_blocking, read_u32_blocking, write_all_blocking};

fn read_payload(stream: &mut TcpStream, scratch: &mut Vec<u8>) -> Result<(), ConnError> {
    let size = read_u32_blocking(stream)?;
    codec::check_payload_size(size, SCRATCH_BUFFER_BYTES)?;
    scratch.clear();
    scratch.resize(size as usize, 0);
    read_exact_blocking(stream, scratch)?;
    Ok(())
}

/// Reads the opcode and dispatches. Returns `Ok(())` on a handled request
/// (including fire-and-forget opcodes with no response) and `Err` on any
/// per-connection-fatal failure (spec.md §7): the caller drops the socket.
pub fn handle_request(stream: &mut TcpStream, scratch: &mut Vec<u8>, state: &AppState) -> Result<(), ConnError> {
    let op_raw = read_u32_blocking(stream)?;
    let opcode = Opcode::from_u32(op_raw)?;
    if opcode.is_reserved() {
        return Err(ProtocolError::ReservedOpcode(op_raw).into());
    }

    match opcode {
        Opcode::SendLrGradient => {
            read_payload(stream, scratch)?;
            let gradient = codec::decode_lr_gradient(scratch)?;
            let mut model = state.model.lock();
            expect_lr_mut(&mut model)?.apply_sparse(&gradient)?;
            state.num_updates.fetch_add(1, Ordering::Relaxed);
        }

        Opcode::SendMfGradient => {
            read_payload(stream, scratch)?;
            let mut model = state.model.lock();
            let mf = expect_mf_mut(&mut model)?;
            let gradient = codec::decode_mf_gradient(scratch, mf.k())?;
            mf.apply_sparse(&gradient)?;
            state.num_updates.fetch_add(1, Ordering::Relaxed);
        }

        Opcode::GetLrFullModel => {
            let weights = {
                let model = state.model.lock();
                expect_lr(&model)?.snapshot()
            };
            write_all_blocking(stream, &codec::encode_full_lr_model(&weights))?;
        }

        Opcode::GetMfFullModel => {
            let full = {
                let model = state.model.lock();
                snapshot_mf_full(expect_mf(&model)?)
            };
            write_all_blocking(stream, &codec::encode_full_mf_model(&full))?;
        }

        Opcode::GetLrSparseModel => {
            read_payload(stream, scratch)?;
            let indices = codec::decode_sparse_lr_request(scratch)?;
            let weights = {
                let model = state.model.lock();
                expect_lr(&model)?.read_slice(&indices)?
            };
            let resp = codec::encode_sparse_lr_response(&weights);
            codec::check_payload_size(resp.len() as u32, SPARSE_RESPONSE_CAP_BYTES)?;
            write_all_blocking(stream, &resp)?;
        }

        Opcode::GetMfSparseModel => {
            read_payload(stream, scratch)?;
            let req = codec::decode_mf_sparse_request(scratch)?;
            let (users, items) = {
                let model = state.model.lock();
                read_mf_sparse(expect_mf(&model)?, &req)?
            };
            let resp = codec::encode_mf_sparse_response(&users, &items);
            codec::check_payload_size(resp.len() as u32, SPARSE_RESPONSE_CAP_BYTES)?;
            write_all_blocking(stream, &resp)?;
        }

        Opcode::SetTaskStatus => {
            let task_id = read_u32_blocking(stream)?;
            let status = read_u32_blocking(stream)?;
            state.task_status.lock().set(task_id, status);
        }

        Opcode::GetTaskStatus => {
            let task_id = read_u32_blocking(stream)?;
            let status = state.task_status.lock().get(task_id);
            write_all_blocking(stream, &status.to_le_bytes())?;
        }

        // Reference wire width is `uint32_t` (PSSparseServerTask.cpp), not
        // the `AtomicU64` counter's own width.
        Opcode::GetNumConns => {
            let n = state.num_conns.load(Ordering::Relaxed) as u32;
            write_all_blocking(stream, &n.to_le_bytes())?;
        }

        Opcode::GetNumUpdates => {
            let n = state.num_updates.load(Ordering::Relaxed) as u32;
            write_all_blocking(stream, &n.to_le_bytes())?;
        }

        Opcode::RegisterTask => {
            let task_id = read_u32_blocking(stream)?;
            let remaining_seconds = read_i32_blocking(stream)?;
            let outcome = state.task_registry.lock().register(task_id, remaining_seconds);
            let byte = match outcome {
                RegisterOutcome::Registered => 0u8,
                RegisterOutcome::AlreadyRegistered => 1u8,
            };
            write_all_blocking(stream, &[byte])?;
        }

        Opcode::DeregisterTask => {
            let task_id = read_u32_blocking(stream)?;
            let outcome = state.task_registry.lock().deregister(task_id);
            let byte = match outcome {
                DeregisterOutcome::Deregistered => 0u8,
                DeregisterOutcome::NotRegistered => 1u8,
                DeregisterOutcome::Unknown => 2u8,
            };
            write_all_blocking(stream, &[byte])?;
        }

        Opcode::SetValue => {
            read_payload(stream, scratch)?;
            let (key, value) = codec::decode_kv_set_request(scratch)?;
            state.kv_store.lock().set(key, value);
        }

        Opcode::GetValue => {
            read_payload(stream, scratch)?;
            let key = codec::decode_kv_get_request(scratch)?;
            let resp = {
                let store = state.kv_store.lock();
                codec::encode_kv_get_response(store.get(&key))
            };
            write_all_blocking(stream, &resp)?;
        }

        Opcode::KillSignal => {
            state.request_shutdown();
        }

        Opcode::GetLastTimeError | Opcode::GetAllTimeError => unreachable!("reserved opcodes are rejected above"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    use ps_core::codec::MfFullModel;
    use ps_core::{OptimizerParams, OptimizerRule};

    use crate::config::{LrModelConfig, ModelKind, ServerConfig};

    fn test_state() -> AppState {
        let config = ServerConfig {
            ps_port: 0,
            n_poll: 1,
            n_work: 1,
            max_connections: 3,
            model_kind: ModelKind::Lr,
            lr: Some(LrModelConfig { model_bits: 4 }),
            mf: None,
            optimizer_rule: OptimizerRule::Sgd,
            optimizer_params: OptimizerParams {
                learning_rate: 0.1,
                ..Default::default()
            },
            checkpoint: None,
        };
        AppState::new(&config, OptimizerRule::Sgd, config.optimizer_params)
    }

    /// spec.md §8 scenario S2, exercised through the real handler dispatch
    /// rather than `TaskRegistry` directly.
    #[test]
    fn s2_register_deregister_over_a_socket_pair() {
        let state = test_state();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_thread = thread::spawn(move || {
            let mut client = std::net::TcpStream::connect(addr).unwrap();
            use std::io::{Read, Write};

            let send_register = |client: &mut std::net::TcpStream, id: u32, remaining: i32| -> u8 {
                client.write_all(&(Opcode::RegisterTask as u32).to_le_bytes()).unwrap();
                client.write_all(&id.to_le_bytes()).unwrap();
                client.write_all(&remaining.to_le_bytes()).unwrap();
                let mut resp = [0u8; 1];
                client.read_exact(&mut resp).unwrap();
                resp[0]
            };
            let send_deregister = |client: &mut std::net::TcpStream, id: u32| -> u8 {
                client.write_all(&(Opcode::DeregisterTask as u32).to_le_bytes()).unwrap();
                client.write_all(&id.to_le_bytes()).unwrap();
                let mut resp = [0u8; 1];
                client.read_exact(&mut resp).unwrap();
                resp[0]
            };

            assert_eq!(send_register(&mut client, 17, 100), 0);
            assert_eq!(send_register(&mut client, 17, 100), 1);
            assert_eq!(send_deregister(&mut client, 17), 1);
            assert_eq!(send_deregister(&mut client, 99), 2);
        });

        let (raw, _) = listener.accept().unwrap();
        raw.set_nonblocking(true).unwrap();
        let mut stream = TcpStream::from_std(raw);
        let mut scratch = Vec::new();
        for _ in 0..4 {
            handle_request(&mut stream, &mut scratch, &state).expect("handler should not error on well-formed requests");
        }
        client_thread.join().unwrap();
    }

    #[test]
    fn get_lr_full_model_against_an_mf_server_is_dyncast_error() {
        let config = ServerConfig {
            ps_port: 0,
            n_poll: 1,
            n_work: 1,
            max_connections: 3,
            model_kind: ModelKind::Mf,
            lr: None,
            mf: Some(crate::config::MfModelConfig {
                nusers: 2,
                nitems: 2,
                k: 2,
                global_mean_rating: 3.0,
                user_bias_reg: 0.0,
                item_bias_reg: 0.0,
                user_factor_reg: 0.0,
                item_factor_reg: 0.0,
            }),
            optimizer_rule: OptimizerRule::Sgd,
            optimizer_params: OptimizerParams::default(),
            checkpoint: None,
        };
        let state = AppState::new(&config, OptimizerRule::Sgd, OptimizerParams::default());
        let model = state.model.lock();
        assert!(expect_lr(&model).is_err());

        // just exercises the full-model snapshot path compiles end to end.
        let _ = MfFullModel {
            global_bias: 0.0,
            user_bias: vec![],
            item_bias: vec![],
            user_factors: vec![],
            item_factors: vec![],
            k: 0,
        };
    }
}
