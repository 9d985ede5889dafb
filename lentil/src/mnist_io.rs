use crate::lentil_common::*;

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

pub const IDX_IMAGE_MAGIC: u32 = 2051;
pub const IDX_LABEL_MAGIC: u32 = 2049;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Images scaled to [0, 1] (n x 1 x rows x cols) with their digits
pub struct MnistSplit {
    pub images: Tensor,
    pub labels: Vec<usize>,
}

impl MnistSplit {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Read the whole file; `.gz` files are decompressed on the fly
pub fn read_idx_bytes(path: &Path) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;

    let mut bytes = vec![];
    match path.extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            BufReader::new(GzDecoder::new(file)).read_to_end(&mut bytes)?;
        }
        _ => {
            BufReader::new(file).read_to_end(&mut bytes)?;
        }
    }
    Ok(bytes)
}

fn read_be_u32(data: &[u8], offset: &mut usize) -> anyhow::Result<u32> {
    let end = *offset + 4;
    let word: [u8; 4] = data
        .get(*offset..end)
        .and_then(|b| b.try_into().ok())
        .ok_or(anyhow::anyhow!("IDX header is truncated"))?;
    *offset = end;
    Ok(u32::from_be_bytes(word))
}

fn check_magic(data: &[u8], offset: &mut usize, expected: u32) -> anyhow::Result<()> {
    let magic = read_be_u32(data, offset)?;
    if magic != expected {
        return Err(anyhow::anyhow!(
            "unexpected IDX magic number {} (expected {})",
            magic,
            expected
        ));
    }
    Ok(())
}

/// Parse an IDX3 image block into `(n, rows, cols, pixels / 255)`
///
/// * `max_samples` - keep at most this many images
pub fn parse_idx_images(
    data: &[u8],
    max_samples: Option<usize>,
) -> anyhow::Result<(usize, usize, usize, Vec<f32>)> {
    let mut offset = 0;
    check_magic(data, &mut offset, IDX_IMAGE_MAGIC)?;
    let total = read_be_u32(data, &mut offset)? as usize;
    let rows = read_be_u32(data, &mut offset)? as usize;
    let cols = read_be_u32(data, &mut offset)? as usize;

    let n = max_samples.map_or(total, |m| m.min(total));
    let end = n
        .checked_mul(rows)
        .and_then(|v| v.checked_mul(cols))
        .and_then(|nbytes| nbytes.checked_add(offset))
        .ok_or(anyhow::anyhow!("IDX header sizes overflow"))?;

    let src = data
        .get(offset..end)
        .ok_or(anyhow::anyhow!("IDX image data is truncated"))?;

    let pixels = src.iter().map(|&px| px as f32 / 255.0).collect();
    Ok((n, rows, cols, pixels))
}

/// Parse an IDX1 label block
pub fn parse_idx_labels(data: &[u8], max_samples: Option<usize>) -> anyhow::Result<Vec<usize>> {
    let mut offset = 0;
    check_magic(data, &mut offset, IDX_LABEL_MAGIC)?;
    let total = read_be_u32(data, &mut offset)? as usize;
    let n = max_samples.map_or(total, |m| m.min(total));

    let end = offset
        .checked_add(n)
        .ok_or(anyhow::anyhow!("IDX header sizes overflow"))?;

    let src = data
        .get(offset..end)
        .ok_or(anyhow::anyhow!("IDX label data is truncated"))?;

    Ok(src.iter().map(|&y| y as usize).collect())
}

/// Read one pair of image and label files
pub fn read_mnist_split(
    image_file: &Path,
    label_file: &Path,
    max_samples: Option<usize>,
    device: &Device,
) -> anyhow::Result<MnistSplit> {
    let (n, rows, cols, pixels) = parse_idx_images(&read_idx_bytes(image_file)?, max_samples)?;
    let labels = parse_idx_labels(&read_idx_bytes(label_file)?, max_samples)?;

    if labels.len() != n {
        return Err(anyhow::anyhow!(
            "{} images in {} vs. {} labels in {}",
            n,
            image_file.display(),
            labels.len(),
            label_file.display()
        ));
    }

    if let Some(&bad) = labels.iter().find(|&&y| y >= NUM_DIGITS) {
        return Err(anyhow::anyhow!(
            "label {} in {} is not a digit",
            bad,
            label_file.display()
        ));
    }

    let images = Tensor::from_vec(pixels, (n, 1, rows, cols), device)?;
    Ok(MnistSplit { images, labels })
}

/// Locate `stem` or `stem.gz` under `data_dir`
pub fn find_idx_file(data_dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    let plain = data_dir.join(stem);
    if plain.exists() {
        return Ok(plain);
    }
    let gz = data_dir.join(format!("{}.gz", stem));
    if gz.exists() {
        return Ok(gz);
    }
    Err(anyhow::anyhow!(
        "neither {} nor {} exists",
        plain.display(),
        gz.display()
    ))
}

/// Read the MNIST training and test splits from the standard file
/// names in `data_dir`
pub fn read_mnist(
    data_dir: &Path,
    max_samples: Option<usize>,
    device: &Device,
) -> anyhow::Result<(MnistSplit, MnistSplit)> {
    let train = read_mnist_split(
        &find_idx_file(data_dir, TRAIN_IMAGES)?,
        &find_idx_file(data_dir, TRAIN_LABELS)?,
        max_samples,
        device,
    )?;
    info!("Read {} training images", train.len());

    let test = read_mnist_split(
        &find_idx_file(data_dir, TEST_IMAGES)?,
        &find_idx_file(data_dir, TEST_LABELS)?,
        max_samples,
        device,
    )?;
    info!("Read {} test images", test.len());

    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn idx_images(n: usize, side: usize) -> Vec<u8> {
        let mut bytes = vec![];
        for word in [IDX_IMAGE_MAGIC, n as u32, side as u32, side as u32] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend((0..n * side * side).map(|i| (i % 256) as u8));
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = vec![];
        for word in [IDX_LABEL_MAGIC, labels.len() as u32] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn images_are_scaled_to_unit_interval() {
        let (n, rows, cols, pixels) = parse_idx_images(&idx_images(2, 16), None).unwrap();
        assert_eq!((n, rows, cols), (2, 16, 16));
        assert_eq!(pixels.len(), 512);
        assert_eq!(pixels[0], 0.0);
        assert_eq!(pixels[255], 1.0);
        assert!(pixels.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn max_samples_truncates() {
        let (n, _, _, pixels) = parse_idx_images(&idx_images(5, 4), Some(3)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(pixels.len(), 48);
        let labels = parse_idx_labels(&idx_labels(&[1, 2, 3, 4]), Some(2)).unwrap();
        assert_eq!(labels, vec![1, 2]);
    }

    #[test]
    fn wrong_magic_and_truncation_are_errors() {
        assert!(parse_idx_images(&idx_labels(&[1, 2]), None).is_err());
        assert!(parse_idx_labels(&idx_images(1, 4), None).is_err());

        let mut short = idx_images(3, 4);
        short.truncate(30);
        assert!(parse_idx_images(&short, None).is_err());
        assert!(parse_idx_images(&[0, 0], None).is_err());
    }

    #[test]
    fn oversized_header_is_an_error() {
        let mut images = vec![];
        for word in [IDX_IMAGE_MAGIC, u32::MAX, u32::MAX, u32::MAX] {
            images.extend_from_slice(&word.to_be_bytes());
        }
        let err = parse_idx_images(&images, None).unwrap_err();
        assert!(err.to_string().contains("overflow"));

        let mut labels = vec![];
        for word in [IDX_LABEL_MAGIC, u32::MAX] {
            labels.extend_from_slice(&word.to_be_bytes());
        }
        assert!(parse_idx_labels(&labels, None).is_err());
    }

    #[test]
    fn reads_plain_and_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join(TRAIN_IMAGES), idx_images(3, 4)).unwrap();
        let mut gz = GzEncoder::new(
            File::create(dir.path().join(format!("{}.gz", TRAIN_LABELS))).unwrap(),
            flate2::Compression::default(),
        );
        gz.write_all(&idx_labels(&[7, 0, 9])).unwrap();
        gz.finish().unwrap();

        let split = read_mnist_split(
            &find_idx_file(dir.path(), TRAIN_IMAGES).unwrap(),
            &find_idx_file(dir.path(), TRAIN_LABELS).unwrap(),
            None,
            &Device::Cpu,
        )
        .unwrap();

        assert_eq!(split.len(), 3);
        assert_eq!(split.labels, vec![7, 0, 9]);
        assert_eq!(split.images.dims(), &[3, 1, 4, 4]);
        assert!(find_idx_file(dir.path(), TEST_IMAGES).is_err());
    }

    #[test]
    fn non_digit_labels_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let labels = dir.path().join("labels");
        std::fs::write(&images, idx_images(2, 4)).unwrap();
        std::fs::write(&labels, idx_labels(&[3, 12])).unwrap();
        assert!(read_mnist_split(&images, &labels, None, &Device::Cpu).is_err());
    }
}
