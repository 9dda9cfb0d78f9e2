//! Optional checkpoint thread (spec.md §4.5): periodically serializes the
//! full model to a local file. Kept on direct `std::fs` rather than
//! `ps_data_provider::ObjectStore` — checkpointing writes to one fixed
//! local destination, not a bucket/key-addressed store, so pulling in the
//! object-store abstraction here would be a dependency with no use for most
//! of its surface.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use ps_core::codec;

use crate::app_state::{expect_lr, expect_mf, snapshot_mf_full, AppState, Model};
use crate::config::CheckpointConfig;

pub fn run(config: CheckpointConfig, state: Arc<AppState>) {
    let tick = Duration::from_secs(config.frequency_secs.max(1));
    loop {
        if state.is_shutting_down() {
            return;
        }
        std::thread::sleep(tick);
        if let Err(e) = write_checkpoint(&config, &state) {
            error!(error = %e, path = %config.path.display(), "checkpoint write failed, will retry next tick");
        } else {
            info!(path = %config.path.display(), "checkpoint written");
        }
    }
}

fn write_checkpoint(config: &CheckpointConfig, state: &AppState) -> std::io::Result<()> {
    let bytes = {
        let model = state.model.lock();
        match &*model {
            Model::Lr(_) => codec::encode_full_lr_model(&expect_lr(&model).expect("Lr variant").snapshot()),
            Model::Mf(_) => codec::encode_full_mf_model(&snapshot_mf_full(expect_mf(&model).expect("Mf variant"))),
        }
    };
    let tmp_path = config.path.with_extension("tmp");
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, &config.path)
}
