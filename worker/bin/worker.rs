//! Thin CLI launcher for the worker loop. Config-file parsing, dataset
//! ingestion, and the evaluator loop are explicitly out of scope
//! (spec.md §1); this binary only turns command-line flags into the
//! opaque config tuple spec.md §6 describes and starts one loop.

use std::ops::Range;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;

use ps_data_provider::{AccessPattern, IteratorConfig, LocalFsObjectStore, SparseStreamingIterator};
use ps_worker::{LrGradientConfig, LrWorkerLoop, MfGradientConfig, MfWorkerLoop};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskKind {
    Lr,
    Mf,
}

/// Mirrors spec.md §6's worker config tuple: `(ps_host, ps_port, bucket,
/// [train_lo,train_hi), minibatch_size, s3_size, model_bits, opt_method,
/// learning_rate, momentum_beta, epsilon, grad_threshold, task_id)`.
#[derive(Debug, Parser)]
#[command(name = "ps-worker", about = "Sparse parameter-server worker")]
struct WorkerArgs {
    #[arg(long)]
    ps_host: String,
    #[arg(long)]
    ps_port: u16,

    /// Local filesystem root standing in for the object store (spec.md
    /// §1 excludes the real AWS-SDK adapter from the core).
    #[arg(long)]
    object_store_root: std::path::PathBuf,
    #[arg(long)]
    bucket: String,

    #[arg(long)]
    train_lo: u64,
    #[arg(long)]
    train_hi: u64,
    /// `M`: minibatches decoded per blob.
    #[arg(long, default_value_t = 1)]
    s3_size: usize,
    #[arg(long)]
    minibatch_size: usize,
    #[arg(long, value_enum, default_value_t = TaskKind::Lr)]
    task: TaskKind,

    #[arg(long, default_value_t = 0.1)]
    learning_rate: f32,
    #[arg(long, default_value_t = 0.0)]
    epsilon: f32,
    #[arg(long)]
    grad_threshold: Option<f32>,

    /// MF only.
    #[arg(long, default_value_t = 10)]
    k: usize,
    #[arg(long, default_value_t = 0)]
    nusers: u32,
    #[arg(long, default_value_t = 0.0)]
    global_bias: f32,
    #[arg(long, default_value_t = 0.01)]
    mf_reg: f32,

    #[arg(long, default_value_t = 0)]
    task_id: u32,
    #[arg(long, default_value_t = 0)]
    worker_id: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = WorkerArgs::parse();
    let ps_addr = format!("{}:{}", args.ps_host, args.ps_port);
    info!(ps_addr, task = ?args.task, "starting worker");

    let object_store = Arc::new(LocalFsObjectStore::new(&args.object_store_root));
    let iter_config = IteratorConfig {
        bucket: args.bucket.clone(),
        range: Range { start: args.train_lo, end: args.train_hi },
        minibatches_per_blob: args.s3_size,
        minibatch_size: args.minibatch_size,
        labeled: matches!(args.task, TaskKind::Lr),
        access: AccessPattern::Sequential,
        pass_limit: None,
        read_ahead: ps_data_provider::iterator::DEFAULT_READ_AHEAD,
        ring_capacity: ps_data_provider::iterator::DEFAULT_RING_CAPACITY,
        worker_id: args.worker_id,
    };
    let iterator = SparseStreamingIterator::spawn(iter_config, object_store);

    match args.task {
        TaskKind::Lr => {
            let config = LrGradientConfig { epsilon: args.epsilon, grad_threshold: args.grad_threshold };
            let worker = LrWorkerLoop::new(ps_addr, iterator, config)?;
            worker.run_forever()?;
        }
        TaskKind::Mf => {
            let config = MfGradientConfig {
                learning_rate: args.learning_rate,
                user_bias_reg: args.mf_reg,
                item_bias_reg: args.mf_reg,
                user_factor_reg: args.mf_reg,
                item_factor_reg: args.mf_reg,
            };
            let worker = MfWorkerLoop::new(ps_addr, iterator, config, args.k, args.nusers, args.global_bias)?;
            worker.run_forever()?;
        }
    }

    Ok(())
}
