use crate::candle_model_error::{check_dims, check_label, ModelError, ModelResult};

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub struct MinibatchData {
    /// images (b x c x h x w)
    pub images: Tensor,
    /// one-hot labels (b x l)
    pub labels: Tensor,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn num_samples(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;

    /// (channels, height, width) of every image
    fn image_dims(&self) -> (usize, usize, usize);

    fn num_classes(&self) -> usize;
}

/// One-hot encode class labels
///
/// * `labels` - class index per sample
/// * `n_classes` - number of classes
///
/// Returns an `n x n_classes` f32 tensor with exactly one 1 per row.
pub fn one_hot(labels: &[usize], n_classes: usize, device: &Device) -> ModelResult<Tensor> {
    let mut y = vec![0_f32; labels.len() * n_classes];
    for (i, &label) in labels.iter().enumerate() {
        let label = check_label(label as i64, n_classes)?;
        y[i * n_classes + label] = 1.0;
    }
    Ok(Tensor::from_vec(y, (labels.len(), n_classes), device)?)
}

///
/// A simple data loader for in-memory labeled images. The first
/// axis of the image tensor indexes samples; each sample comes with
/// one class label.
///
pub struct LabeledImageData {
    images: Tensor,
    labels: Tensor,
    n_classes: usize,

    shuffled_images: Option<Vec<Tensor>>,
    shuffled_labels: Option<Vec<Tensor>>,

    minibatches: Minibatches,
}

impl LabeledImageData {
    ///
    /// Create a data loader with `images` (n x c x h x w) in [0, 1]
    /// and integer `labels` in [0, n_classes)
    ///
    /// * `seed` - seed for minibatch shuffling
    ///
    pub fn new(
        images: Tensor,
        labels: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let dims = images.dims().to_vec();

        if dims.len() != 4 {
            return Err(ModelError::ShapeMismatch {
                what: "rank of images (n x c x h x w)",
                expected: vec![4],
                actual: vec![dims.len()],
            }
            .into());
        }

        let nsamples = dims[0];
        let labels = one_hot(labels, n_classes, images.device())?;
        check_dims("one-hot labels", &labels, &[nsamples, n_classes])?;

        Ok(LabeledImageData {
            images,
            labels,
            n_classes,
            shuffled_images: None,
            shuffled_labels: None,
            minibatches: Minibatches::new(nsamples, seed),
        })
    }
}

impl DataLoader for LabeledImageData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        match (
            take_shuffled(batch_idx, target_device, self.shuffled_images.as_ref())?,
            take_shuffled(batch_idx, target_device, self.shuffled_labels.as_ref())?,
        ) {
            (Some(images), Some(labels)) => Ok(MinibatchData { images, labels }),
            _ => Err(anyhow::anyhow!("need to shuffle data")),
        }
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        /////////////////////
        // shuffle indexes //
        /////////////////////

        self.minibatches.shuffle_minibatch(batch_size)?;

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let mut shuffled_images = Vec::with_capacity(self.num_minibatch());
        let mut shuffled_labels = Vec::with_capacity(self.num_minibatch());

        for samples in self.minibatches.chunks.iter() {
            let index: Vec<u32> = samples.iter().map(|&i| i as u32).collect();
            let index = Tensor::from_vec(index, samples.len(), self.images.device())?;
            shuffled_images.push(self.images.index_select(&index, 0)?);
            shuffled_labels.push(self.labels.index_select(&index, 0)?);
        }

        self.shuffled_images = Some(shuffled_images);
        self.shuffled_labels = Some(shuffled_labels);
        Ok(())
    }

    fn image_dims(&self) -> (usize, usize, usize) {
        let dims = self.images.dims();
        (dims[1], dims[2], dims[3])
    }

    fn num_classes(&self) -> usize {
        self.n_classes
    }
}

fn take_shuffled(
    batch_idx: usize,
    target_device: &Device,
    data_vec: Option<&Vec<Tensor>>,
) -> anyhow::Result<Option<Tensor>> {
    if let Some(data_vec) = data_vec {
        if data_vec.len() <= batch_idx {
            Err(anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                data_vec.len()
            ))
        } else {
            Ok(Some(data_vec[batch_idx].to_device(target_device)?))
        }
    } else {
        // if the data vector doesn't exist
        Ok(None)
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    rng: StdRng,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(nsamples: usize, seed: u64) -> Self {
        Self {
            samples: (0..nsamples).collect(),
            rng: StdRng::seed_from_u64(seed),
            chunks: vec![],
        }
    }

    /// Permute samples and cut them into chunks of `batch_size`; the
    /// last chunk may be smaller
    pub fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("minibatch size must be positive"));
        }
        self.samples.shuffle(&mut self.rng);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn toy_data(n: usize, seed: u64) -> LabeledImageData {
        let dev = Device::Cpu;
        let values: Vec<f32> = (0..n * 4).map(|i| (i / 4) as f32).collect();
        let images = Tensor::from_vec(values, (n, 1, 2, 2), &dev).unwrap();
        let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
        LabeledImageData::new(images, &labels, 3, seed).unwrap()
    }

    #[test]
    fn one_hot_sets_one_entry_per_row() {
        let dev = Device::Cpu;
        let y = one_hot(&[2, 0, 9], 10, &dev).unwrap().to_vec2::<f32>().unwrap();
        for (row, &label) in y.iter().zip([2usize, 0, 9].iter()) {
            assert_eq!(row.iter().sum::<f32>(), 1.0);
            assert_eq!(row[label], 1.0);
        }
    }

    #[test]
    fn one_hot_rejects_out_of_range() {
        let dev = Device::Cpu;
        assert!(matches!(
            one_hot(&[1, 10], 10, &dev),
            Err(ModelError::InvalidLabel { label: 10, .. })
        ));
    }

    #[test]
    fn minibatches_partition_every_sample() {
        let mut data = toy_data(10, 1);
        data.shuffle_minibatch(4).unwrap();
        assert_eq!(data.num_minibatch(), 3);
        assert_eq!(data.num_samples(), 10);

        let mut seen = vec![];
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &Device::Cpu).unwrap();
            let (nb, _, _, _) = mb.images.dims4().unwrap();
            assert_eq!(mb.labels.dims(), &[nb, 3]);

            // each image is filled with its own index
            let first = mb.images.flatten_from(1).unwrap().to_vec2::<f32>().unwrap();
            let labels = mb.labels.to_vec2::<f32>().unwrap();
            for (img, y) in first.iter().zip(labels.iter()) {
                let i = img[0] as usize;
                assert_eq!(y[i % 3], 1.0);
                seen.push(i);
            }
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shuffling_is_seeded() {
        let mut a = toy_data(20, 5);
        let mut b = toy_data(20, 5);
        a.shuffle_minibatch(7).unwrap();
        b.shuffle_minibatch(7).unwrap();
        assert_eq!(a.minibatches.chunks, b.minibatches.chunks);
    }

    #[test]
    fn reports_image_dims_and_classes() {
        let data = toy_data(5, 0);
        assert_eq!(data.image_dims(), (1, 2, 2));
        assert_eq!(data.num_classes(), 3);
    }

    #[test]
    fn minibatch_before_shuffle_fails() {
        let data = toy_data(4, 0);
        assert!(data.minibatch_data(0, &Device::Cpu).is_err());
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let dev = Device::Cpu;
        let images = Tensor::zeros((3, 1, 2, 2), DType::F32, &dev).unwrap();
        let err = LabeledImageData::new(images, &[0, 1], 3, 0).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::ShapeMismatch { what: "one-hot labels", actual, .. })
                if actual == &[2, 3]
        ));

        let flat = Tensor::zeros((2, 4), DType::F32, &dev).unwrap();
        assert!(LabeledImageData::new(flat, &[0, 1], 3, 0).is_err());
    }
}
