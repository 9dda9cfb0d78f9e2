//! `ServerConfig`: the opaque, already-parsed config tuple spec.md §6
//! describes. Parsing an actual config file format is explicitly out of
//! scope (spec.md §1); `bin/server.rs` fills this struct in from `clap`
//! flags.

use ps_core::{OptimizerParams, OptimizerRule};

pub const DEFAULT_TIMEOUT_THRESHOLD_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Lr,
    Mf,
}

#[derive(Debug, Clone)]
pub struct LrModelConfig {
    pub model_bits: u32,
}

#[derive(Debug, Clone)]
pub struct MfModelConfig {
    pub nusers: usize,
    pub nitems: usize,
    pub k: usize,
    pub global_mean_rating: f32,
    pub user_bias_reg: f32,
    pub item_bias_reg: f32,
    pub user_factor_reg: f32,
    pub item_factor_reg: f32,
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub frequency_secs: u64,
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ps_port: u16,
    pub n_poll: usize,
    pub n_work: usize,
    /// `2 * expected_workers + 1` (spec.md §4.5).
    pub max_connections: usize,
    pub model_kind: ModelKind,
    pub lr: Option<LrModelConfig>,
    pub mf: Option<MfModelConfig>,
    pub optimizer_rule: OptimizerRule,
    pub optimizer_params: OptimizerParams,
    pub checkpoint: Option<CheckpointConfig>,
}

impl ServerConfig {
    pub fn max_connections_for(expected_workers: usize) -> usize {
        2 * expected_workers + 1
    }
}
