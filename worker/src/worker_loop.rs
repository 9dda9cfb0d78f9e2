//! The pull-slice/compute/push-gradient loop (C6, spec.md §4.4).

use ps_core::codec::MfSparseRequest;
use ps_data_provider::SparseStreamingIterator;
use tracing::warn;

use crate::client::PsClient;
use crate::errors::WorkerError;
use crate::gradient_compute::{sparse_grad_lr, sparse_grad_mf, LrGradientConfig, MfGradientConfig};
use crate::local_model::{LocalLrModel, LocalMfModel};

pub struct LrWorkerLoop {
    client: PsClient,
    ps_addr: String,
    iterator: SparseStreamingIterator,
    config: LrGradientConfig,
    version_counter: u32,
}

impl LrWorkerLoop {
    pub fn new(ps_addr: String, iterator: SparseStreamingIterator, config: LrGradientConfig) -> Result<Self, WorkerError> {
        let client = PsClient::connect(&ps_addr)?;
        Ok(Self {
            client,
            ps_addr,
            iterator,
            config,
            version_counter: 0,
        })
    }

    /// One `mb -> indices -> slice -> local_model -> gradient -> push`
    /// step. A `NumericError` aborts just this minibatch (spec.md §7); any
    /// other error is returned to the caller.
    pub fn step(&mut self) -> Result<(), WorkerError> {
        let mb = self.iterator.next()?;
        let indices = mb.touched_indices();
        let slice = self.client.get_sparse_lr_slice(&indices)?;
        let local = LocalLrModel::from_slice(&indices, &slice);

        match sparse_grad_lr(&local, &mb, self.version_counter, self.config) {
            Ok(g) => {
                self.version_counter = self.version_counter.wrapping_add(1);
                self.client.send_lr_gradient(&g)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "numeric error computing LR gradient, dropping minibatch");
                Ok(())
            }
        }
    }

    /// Runs `step()` forever. On a connection-fatal error the worker
    /// reconnects and retries from a fresh slice read, per spec.md §4.4;
    /// any other error (iterator poisoned, pass limit reached) is
    /// propagated and stops the loop.
    pub fn run_forever(mut self) -> Result<(), WorkerError> {
        loop {
            if let Err(e) = self.step() {
                if e.is_connection_fatal() {
                    warn!(error = %e, "lost connection to parameter server, reconnecting");
                    self.client = PsClient::connect(&self.ps_addr)?;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

pub struct MfWorkerLoop {
    client: PsClient,
    ps_addr: String,
    iterator: SparseStreamingIterator,
    config: MfGradientConfig,
    k: usize,
    next_base_user_id: u32,
    nusers: u32,
    global_bias: f32,
}

impl MfWorkerLoop {
    pub fn new(
        ps_addr: String,
        iterator: SparseStreamingIterator,
        config: MfGradientConfig,
        k: usize,
        nusers: u32,
        global_bias: f32,
    ) -> Result<Self, WorkerError> {
        let client = PsClient::connect(&ps_addr)?;
        Ok(Self {
            client,
            ps_addr,
            iterator,
            config,
            k,
            next_base_user_id: 0,
            nusers,
            global_bias,
        })
    }

    pub fn step(&mut self) -> Result<(), WorkerError> {
        let mb = self.iterator.next()?;
        let base_user_id = self.next_base_user_id;
        self.next_base_user_id = (base_user_id + mb.len() as u32) % self.nusers.max(1);

        let item_ids = mb.touched_indices();
        let req = MfSparseRequest {
            base_user_id,
            minibatch_size: mb.len() as u32,
            item_ids,
        };
        let (users, items) = self.client.get_sparse_mf_slice(&req, self.k)?;
        // global_bias is not carried by the sparse-slice response (only
        // the full-model response has it); the worker treats it as part
        // of its static run configuration, not something it re-derives
        // every minibatch.
        let mut local = LocalMfModel::new(base_user_id, self.global_bias, &users, &items);

        match sparse_grad_mf(&mut local, &mb, self.config) {
            Ok(g) => {
                self.client.send_mf_gradient(&g)?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "numeric error computing MF gradient, dropping minibatch");
                Ok(())
            }
        }
    }

    pub fn run_forever(mut self) -> Result<(), WorkerError> {
        loop {
            if let Err(e) = self.step() {
                if e.is_connection_fatal() {
                    warn!(error = %e, "lost connection to parameter server, reconnecting");
                    self.client = PsClient::connect(&self.ps_addr)?;
                    continue;
                }
                return Err(e);
            }
        }
    }
}
