mod augment;
mod batcher;
mod dataset;

pub use augment::{image_to_chw, label_to_plane, Augmentation};
pub use batcher::{build_loader, worker_count, XrayBatch, XrayBatcher};
pub use dataset::{read_data_list, SampleEntry, XrayDataset, XrayItem};
