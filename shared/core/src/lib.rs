//! Wire codec, sparse model + optimizer algebra, and the task/kv side
//! stores shared by the parameter server and the worker (spec.md §4.1,
//! §4.2, §4.6, C8).

pub mod codec;
pub mod data;
pub mod error;
pub mod gradient;
pub mod kv_store;
pub mod model;
pub mod opcode;
pub mod optimizer;
pub mod task_registry;

pub use data::{FeatureValue, SparseMinibatch, SparseSample};
pub use error::{DynCastError, ModelError, NumericError, ProtocolError, TaskRegistryError};
pub use gradient::{LrGradient, MfGradient};
pub use model::{SparseLrModel, SparseMfModel};
pub use opcode::Opcode;
pub use optimizer::{OptimizerParams, OptimizerRule, OptimizerState};
