mod record;

pub use record::{
    list_checkpoints, restore, write_json, CheckpointRecord, CheckpointWriter, CHECKPOINT_PREFIX,
};
