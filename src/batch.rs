//! Batch driver: decode input files, run the cascade, write crops, move originals

use anyhow::{Context, Result};
use image::ImageReader;
use std::path::{Path, PathBuf};

use crate::error::VocError;
use crate::pipeline::Pipeline;

/// Outcome of a batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub crops_written: usize,
    /// Inputs that failed, with the reason
    pub failed: Vec<(PathBuf, String)>,
    /// Set when the run stopped early on cancellation
    pub cancelled: bool,
}

/// List the images to process: the file itself, or the files of a directory sorted by name
pub fn list_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input)
        .with_context(|| format!("cannot list {}", input.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Name of the `index`-th crop of `original` (e.g. "street.jpg.0.png")
pub fn crop_filename(original: &Path, index: usize) -> String {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{}.{}.png", name, index)
}

/// Run every input through `pipeline`, writing results into `output_dir`
///
/// A failing input is logged and skipped; it stays where it was
pub fn process_batch(pipeline: &Pipeline, inputs: &[PathBuf], output_dir: &Path) -> Result<BatchReport> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;

    let cancel = pipeline.cancel_token();
    let mut report = BatchReport {
        total: inputs.len(),
        ..Default::default()
    };

    for path in inputs {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match process_file(pipeline, path, output_dir) {
            Ok(written) => {
                log::info!("{}: {} crops", path.display(), written);
                report.processed += 1;
                report.crops_written += written;
            }
            Err(e) if is_cancelled(&e) => {
                log::warn!("{}: cancelled", path.display());
                report.cancelled = true;
                break;
            }
            Err(e) => {
                log::error!("{}: {:#}", path.display(), e);
                report.failed.push((path.clone(), format!("{:#}", e)));
            }
        }
    }

    Ok(report)
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<VocError>(), Some(VocError::Cancelled))
}

/// Returns the number of crops written
fn process_file(pipeline: &Pipeline, path: &Path, output_dir: &Path) -> Result<usize> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;

    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let crops = pipeline.run_labeled(img, &label)?;

    for (idx, crop) in crops.iter().enumerate() {
        let out = output_dir.join(crop_filename(path, idx));
        crop.save(&out)
            .with_context(|| format!("Failed to save crop {}", out.display()))?;
    }

    relocate(path, output_dir)?;
    Ok(crops.len())
}

/// Move a processed original into `output_dir`
fn relocate(path: &Path, output_dir: &Path) -> Result<()> {
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let target = output_dir.join(name);
    if std::fs::rename(path, &target).is_err() {
        // rename fails across filesystems
        std::fs::copy(path, &target)
            .with_context(|| format!("cannot move {} to {}", path.display(), target.display()))?;
        std::fs::remove_file(path)?;
    }
    Ok(())
}
