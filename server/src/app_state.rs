//! Shared server state (spec.md §5): the model behind `model_lock`, the task
//! registry behind its own `register_lock`, the KV side store, and the live
//! atomic counters the watchdog and `GET_NUM_*` opcodes read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use ps_core::codec::{MfEntry, MfFullModel, MfSparseRequest};
use ps_core::{
    DynCastError, KvStore, OptimizerParams, OptimizerRule, ProtocolError, SparseLrModel,
    SparseMfModel, TaskRegistry,
};

use crate::config::{MfModelConfig, ModelKind, ServerConfig};

/// One server process serves exactly one model variant (spec.md §4.5
/// dispatches `SEND_LR_GRADIENT`/`SEND_MF_GRADIENT` against "the" model, not
/// a per-connection choice).
pub enum Model {
    Lr(SparseLrModel),
    Mf(SparseMfModel),
}

impl Model {
    pub fn new(config: &ServerConfig, rule: OptimizerRule, params: OptimizerParams) -> Self {
        match config.model_kind {
            ModelKind::Lr => {
                let lr = config.lr.as_ref().expect("LR config present when model_kind=Lr");
                Model::Lr(SparseLrModel::new(lr.model_bits, rule, params))
            }
            ModelKind::Mf => {
                let mf = config.mf.as_ref().expect("MF config present when model_kind=Mf");
                let mut model = SparseMfModel::new(
                    mf.nusers,
                    mf.nitems,
                    mf.k,
                    mf.global_mean_rating,
                    mf_factor_rng(mf),
                    rule,
                    params,
                );
                model.user_bias_reg = mf.user_bias_reg;
                model.item_bias_reg = mf.item_bias_reg;
                model.user_factor_reg = mf.user_factor_reg;
                model.item_factor_reg = mf.item_factor_reg;
                Model::Mf(model)
            }
        }
    }

}

/// Factors seeded `N(0, 1/k)`-ish via a cheap LCG (spec.md §4.2 only asks for
/// *some* small random init, not a specific distribution or RNG family).
fn mf_factor_rng(mf: &MfModelConfig) -> impl FnMut() -> f32 {
    let scale = 1.0 / (mf.k.max(1) as f32).sqrt();
    let mut state: u64 = 0x9E3779B97F4A7C15;
    move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bits = (state >> 40) as u32;
        let unit = (bits as f32 / u32::MAX as f32) * 2.0 - 1.0;
        unit * scale
    }
}

#[derive(Default)]
pub struct TaskStatusMap {
    map: HashMap<u32, u32>,
}

impl TaskStatusMap {
    pub fn set(&mut self, task_id: u32, status: u32) {
        self.map.insert(task_id, status);
    }

    pub fn get(&self, task_id: u32) -> u32 {
        self.map.get(&task_id).copied().unwrap_or(0)
    }
}

pub struct AppState {
    pub model: Mutex<Model>,
    pub task_registry: Mutex<TaskRegistry>,
    pub task_status: Mutex<TaskStatusMap>,
    pub kv_store: Mutex<KvStore>,
    pub num_conns: AtomicU64,
    pub num_updates: AtomicU64,
    pub shutdown: AtomicBool,
}

impl AppState {
    pub fn new(config: &ServerConfig, rule: OptimizerRule, params: OptimizerParams) -> Self {
        Self {
            model: Mutex::new(Model::new(config, rule, params)),
            task_registry: Mutex::new(TaskRegistry::new()),
            task_status: Mutex::new(TaskStatusMap::default()),
            kv_store: Mutex::new(KvStore::new()),
            num_conns: AtomicU64::new(0),
            num_updates: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// `GET_LR_SPARSE_MODEL`/`GET_LR_FULL_MODEL` against an `Mf` model (or vice
/// versa) is a `DynCastError`, not a panic (spec.md §7).
pub fn expect_lr(model: &Model) -> Result<&SparseLrModel, DynCastError> {
    match model {
        Model::Lr(m) => Ok(m),
        Model::Mf(_) => Err(DynCastError::ExpectedLr),
    }
}

pub fn expect_mf(model: &Model) -> Result<&SparseMfModel, DynCastError> {
    match model {
        Model::Mf(m) => Ok(m),
        Model::Lr(_) => Err(DynCastError::ExpectedMf),
    }
}

pub fn expect_lr_mut(model: &mut Model) -> Result<&mut SparseLrModel, DynCastError> {
    match model {
        Model::Lr(m) => Ok(m),
        Model::Mf(_) => Err(DynCastError::ExpectedLr),
    }
}

pub fn expect_mf_mut(model: &mut Model) -> Result<&mut SparseMfModel, DynCastError> {
    match model {
        Model::Mf(m) => Ok(m),
        Model::Lr(_) => Err(DynCastError::ExpectedMf),
    }
}

pub fn read_mf_sparse(model: &SparseMfModel, req: &MfSparseRequest) -> Result<(Vec<MfEntry>, Vec<MfEntry>), ProtocolError> {
    let users = model
        .read_users(req.base_user_id, req.minibatch_size as usize)?
        .into_iter()
        .enumerate()
        .map(|(off, (bias, factors))| MfEntry {
            id: req.base_user_id + off as u32,
            bias,
            factors,
        })
        .collect();
    let items = model
        .read_items(&req.item_ids)?
        .into_iter()
        .zip(req.item_ids.iter())
        .map(|((bias, factors), &id)| MfEntry { id, bias, factors })
        .collect();
    Ok((users, items))
}

pub fn snapshot_mf_full(model: &SparseMfModel) -> MfFullModel {
    let nusers = model.nusers();
    let nitems = model.nitems();
    let k = model.k();
    let users = model.read_users(0, nusers).expect("full snapshot reads exactly the model's own id range");
    let items = model
        .read_items(&(0..nitems as u32).collect::<Vec<_>>())
        .expect("full snapshot reads exactly the model's own id range");
    MfFullModel {
        global_bias: model.global_bias,
        user_bias: users.iter().map(|(b, _)| *b).collect(),
        item_bias: items.iter().map(|(b, _)| *b).collect(),
        user_factors: users.iter().flat_map(|(_, f)| f.clone()).collect(),
        item_factors: items.iter().flat_map(|(_, f)| f.clone()).collect(),
        k,
    }
}
