use crate::generator::{DigitImage, LatentSample};

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const SHADES: &[u8] = b" .:-=+*#%@";

/// Buffered output file, gzipped or plain
pub enum GridWriter {
    Plain(BufWriter<File>),
    Gz(BufWriter<GzEncoder<File>>),
}

impl Write for GridWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            GridWriter::Plain(w) => w.write(buf),
            GridWriter::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            GridWriter::Plain(w) => w.flush(),
            GridWriter::Gz(w) => w.flush(),
        }
    }
}

impl GridWriter {
    /// Flush everything and, for `.gz`, write the gzip trailer
    pub fn finish(self) -> anyhow::Result<()> {
        match self {
            GridWriter::Plain(mut w) => w.flush()?,
            GridWriter::Gz(w) => {
                let encoder = w.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

/// Open a buffered writer; a `.gz` file gets compressed
pub fn open_buf_writer(path: &Path) -> anyhow::Result<GridWriter> {
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", path.display(), e))?;

    match path.extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(GridWriter::Gz(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        )))),
        _ => Ok(GridWriter::Plain(BufWriter::new(file))),
    }
}

/// Write the first channel as a `side x side` tab-separated grid
pub fn write_grid_tsv(image: &DigitImage, path: &Path) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(path)?;
    for row in image.rows() {
        let line: Vec<String> = row.iter().map(|p| format!("{:.6}", p)).collect();
        writeln!(buf, "{}", line.join("\t"))?;
    }
    buf.finish()
}

/// One line per sample: label, latent coordinates, then all pixels
pub fn write_samples_tsv(
    samples: &[LatentSample],
    digit_label: i64,
    path: &Path,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(path)?;

    if let Some(first) = samples.first() {
        let mut header = vec!["label".to_string()];
        header.extend((0..first.latent.len()).map(|k| format!("z{}", k)));
        header.extend((0..first.image.pixels().len()).map(|j| format!("p{}", j)));
        writeln!(buf, "{}", header.join("\t"))?;
    }

    for s in samples {
        let mut line = vec![digit_label.to_string()];
        line.extend(s.latent.iter().map(|z| format!("{:.6}", z)));
        line.extend(s.image.pixels().iter().map(|p| format!("{:.6}", p)));
        writeln!(buf, "{}", line.join("\t"))?;
    }
    buf.finish()
}

/// Render the first channel with one character per pixel, darker
/// characters for higher probabilities
pub fn ascii_preview(image: &DigitImage) -> String {
    let top = (SHADES.len() - 1) as f32;
    image
        .rows()
        .map(|row| {
            row.iter()
                .map(|&p| {
                    let k = (p.clamp(0.0, 1.0) * top).round() as usize;
                    SHADES[k] as char
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
