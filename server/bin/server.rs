//! Thin CLI launcher for the parameter server. Config-file parsing is
//! explicitly out of scope (spec.md §1); this binary only turns
//! command-line flags into `ServerConfig` and runs `ParameterServer`.

use clap::{Parser, ValueEnum};

use ps_core::{OptimizerParams, OptimizerRule};
use ps_server::config::{CheckpointConfig, LrModelConfig, MfModelConfig, ModelKind};
use ps_server::{ParameterServer, ServerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskKind {
    Lr,
    Mf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OptRule {
    Sgd,
    Momentum,
    Nesterov,
    Adagrad,
}

impl From<OptRule> for OptimizerRule {
    fn from(r: OptRule) -> Self {
        match r {
            OptRule::Sgd => OptimizerRule::Sgd,
            OptRule::Momentum => OptimizerRule::Momentum,
            OptRule::Nesterov => OptimizerRule::Nesterov,
            OptRule::Adagrad => OptimizerRule::AdaGrad,
        }
    }
}

/// Mirrors spec.md §6's server-relevant slice of the opaque config tuple:
/// `ps_port`, thread counts, `model_bits`/MF dims, the optimizer choice and
/// its hyperparameters, and checkpoint destination.
#[derive(Debug, Parser)]
#[command(name = "ps-server", about = "Sparse parameter server")]
struct ServerArgs {
    #[arg(long, default_value_t = 1337)]
    ps_port: u16,
    #[arg(long, default_value_t = 1)]
    n_poll: usize,
    #[arg(long, default_value_t = 4)]
    n_work: usize,
    /// Used only to derive the `2 * expected_workers + 1` connections cap.
    #[arg(long, default_value_t = 8)]
    expected_workers: usize,

    #[arg(long, value_enum, default_value_t = TaskKind::Lr)]
    task: TaskKind,
    #[arg(long, default_value_t = 19)]
    model_bits: u32,

    #[arg(long, default_value_t = 0)]
    nusers: usize,
    #[arg(long, default_value_t = 0)]
    nitems: usize,
    #[arg(long, default_value_t = 10)]
    k: usize,
    #[arg(long, default_value_t = 0.0)]
    global_mean_rating: f32,
    #[arg(long, default_value_t = 0.01)]
    mf_reg: f32,

    #[arg(long, value_enum, default_value_t = OptRule::Sgd)]
    opt_method: OptRule,
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f32,
    #[arg(long, default_value_t = 0.9)]
    momentum_beta: f32,
    #[arg(long, default_value_t = 1e-8)]
    epsilon: f32,

    #[arg(long, default_value_t = 0)]
    checkpoint_frequency_secs: u64,
    #[arg(long)]
    checkpoint_path: Option<std::path::PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ServerArgs::parse();

    let checkpoint = match (args.checkpoint_frequency_secs, args.checkpoint_path) {
        (0, _) | (_, None) => None,
        (frequency_secs, Some(path)) => Some(CheckpointConfig { frequency_secs, path }),
    };

    let config = ServerConfig {
        ps_port: args.ps_port,
        n_poll: args.n_poll.max(1),
        n_work: args.n_work.max(1),
        max_connections: ServerConfig::max_connections_for(args.expected_workers),
        model_kind: match args.task {
            TaskKind::Lr => ModelKind::Lr,
            TaskKind::Mf => ModelKind::Mf,
        },
        lr: matches!(args.task, TaskKind::Lr).then_some(LrModelConfig { model_bits: args.model_bits }),
        mf: matches!(args.task, TaskKind::Mf).then_some(MfModelConfig {
            nusers: args.nusers,
            nitems: args.nitems,
            k: args.k,
            global_mean_rating: args.global_mean_rating,
            user_bias_reg: args.mf_reg,
            item_bias_reg: args.mf_reg,
            user_factor_reg: args.mf_reg,
            item_factor_reg: args.mf_reg,
        }),
        optimizer_rule: args.opt_method.into(),
        optimizer_params: OptimizerParams {
            learning_rate: args.learning_rate,
            momentum_beta: args.momentum_beta,
            epsilon: args.epsilon,
        },
        checkpoint,
    };

    let server = ParameterServer::start(config)?;
    server.join();
    Ok(())
}
