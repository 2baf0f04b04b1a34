use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use std::sync::Arc;
use tracing::info;

use super::dataset::XrayItem;
use crate::config::{InputSize, TrainingConfig};

/// Images `[N, 3, H, W]`, labels `[N, 1, H, W]` and the sample identifiers.
#[derive(Clone, Debug)]
pub struct XrayBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 4>,
    pub names: Vec<String>,
}

/// Stacks [`XrayItem`]s of a fixed crop size into an [`XrayBatch`].
#[derive(Clone, Debug)]
pub struct XrayBatcher {
    crop: InputSize,
}

impl XrayBatcher {
    pub fn new(crop: InputSize) -> Self {
        Self { crop }
    }
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for XrayBatcher {
    fn batch(&self, items: Vec<XrayItem>, device: &B::Device) -> XrayBatch<B> {
        let batch_size = items.len();
        let InputSize { height, width } = self.crop;

        let mut images = Vec::with_capacity(batch_size * 3 * height * width);
        let mut labels = Vec::with_capacity(batch_size * height * width);
        let mut names = Vec::with_capacity(batch_size);
        for item in items {
            images.extend(item.image);
            labels.extend(item.label);
            names.push(item.name);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images, [batch_size, 3, height, width]),
            device,
        );
        let labels = Tensor::<B, 4>::from_floats(
            TensorData::new(labels, [batch_size, 1, height, width]),
            device,
        );

        XrayBatch {
            images,
            labels,
            names,
        }
    }
}

/// Largest worker count up to `requested` that divides `num_steps`.
///
/// Each worker batches its own contiguous slice of the dataset, so the slices
/// must hold whole batches or the trainer sees short ones.
pub fn worker_count(num_steps: usize, requested: usize) -> usize {
    (1..=requested)
        .rev()
        .find(|workers| num_steps % workers == 0)
        .unwrap_or(0)
}

/// Shuffling loader over `dataset`, preparing batches on up to `num_workers` threads.
pub fn build_loader<B, D>(
    dataset: D,
    config: &TrainingConfig,
    device: B::Device,
) -> Arc<dyn DataLoader<B, XrayBatch<B>>>
where
    B: Backend,
    D: Dataset<XrayItem> + 'static,
{
    let mut builder = DataLoaderBuilder::<B, XrayItem, XrayBatch<B>>::new(XrayBatcher::new(
        config.input_size,
    ))
    .batch_size(config.batch_size)
    .shuffle(config.random_seed)
    .set_device(device);

    let workers = worker_count(config.num_steps, config.num_workers);
    if workers != config.num_workers {
        info!(
            "Using {} of {} requested workers so every worker yields full batches",
            workers, config.num_workers
        );
    }
    if workers > 0 {
        builder = builder.num_workers(workers);
    }

    builder.build(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn item(name: &str, value: f32, crop: InputSize) -> XrayItem {
        XrayItem {
            image: vec![value; 3 * crop.pixels()],
            label: vec![value / 10.0; crop.pixels()],
            name: name.to_string(),
        }
    }

    #[test]
    fn batch_has_expected_shapes() {
        let crop = InputSize::new(4, 6);
        let device = Default::default();
        let batch: XrayBatch<TestBackend> = XrayBatcher::new(crop).batch(
            vec![item("a", 1.0, crop), item("b", 2.0, crop)],
            &device,
        );

        assert_eq!(batch.images.dims(), [2, 3, 4, 6]);
        assert_eq!(batch.labels.dims(), [2, 1, 4, 6]);
        assert_eq!(batch.names, vec!["a".to_string(), "b".to_string()]);

        let second_label = batch.labels.slice([1..2, 0..1, 0..4, 0..6]);
        let values = second_label.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn loader_yields_every_sample_once() {
        let crop = InputSize::new(2, 2);
        let items: Vec<XrayItem> = (0..6).map(|i| item(&i.to_string(), i as f32, crop)).collect();
        let config = TrainingConfig {
            input_size: crop,
            batch_size: 2,
            num_workers: 0,
            ..TrainingConfig::default()
        };

        let loader = build_loader::<TestBackend, _>(InMemDataset::new(items), &config, Default::default());
        let mut names: Vec<String> = loader.iter().flat_map(|batch| batch.names).collect();
        assert_eq!(names.len(), 6);
        names.sort();
        assert_eq!(names, vec!["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn workers_split_steps_evenly() {
        assert_eq!(worker_count(10_000, 16), 16);
        assert_eq!(worker_count(3, 2), 1);
        assert_eq!(worker_count(12, 5), 4);
        assert_eq!(worker_count(7, 0), 0);
    }

    #[test]
    fn worker_slices_hold_whole_batches() {
        let crop = InputSize::new(2, 2);
        let config = TrainingConfig {
            input_size: crop,
            batch_size: 2,
            num_steps: 3,
            num_workers: 2,
            ..TrainingConfig::default()
        };
        let items: Vec<XrayItem> = (0..config.max_iters())
            .map(|i| item(&i.to_string(), i as f32, crop))
            .collect();

        let loader = build_loader::<TestBackend, _>(InMemDataset::new(items), &config, Default::default());
        let sizes: Vec<usize> = loader.iter().map(|batch| batch.names.len()).collect();
        assert_eq!(sizes, vec![2, 2, 2]);
    }
}
