//! SpectraClean command line.
//!
//! ```text
//! spectraclean train --config train.json --epochs 20
//! spectraclean denoise --checkpoint best_model.json --image scene.mat --output scene.png
//! spectraclean evaluate --checkpoint best_model.json --images IMAGES --masks MASKS
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use spectraclean::cluster::{segment_image, DEFAULT_MAX_ITER};
use spectraclean::data::{normalize_by_max, HsiDataset};
use spectraclean::io::{load_checkpoint, read_mat_array, render_comparison, write_mat_array};
use spectraclean::nn::Task;
use spectraclean::train::{evaluate, reconstruct, train, TrainConfig};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "spectraclean",
    about = "Denoise and segment hyperspectral images",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on paired IMAGES/ and MASKS/ directories
    Train {
        /// JSON training config; omitted fields use defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        images: Option<PathBuf>,

        #[arg(long)]
        masks: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        lr: Option<f64>,

        /// Where to write the best checkpoint
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Denoise one image, cluster it and write a comparison PNG
    Denoise {
        #[arg(long)]
        checkpoint: PathBuf,

        /// MAT file holding the image cube
        #[arg(long)]
        image: PathBuf,

        /// Array name inside the MAT file (defaults to the file stem)
        #[arg(long)]
        field: Option<String>,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of k-means clusters
        #[arg(long, default_value_t = 5)]
        clusters: usize,

        /// k-means seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Bands shown as red, green and blue, e.g. `30,20,10`
        #[arg(long, value_delimiter = ',', num_args = 3)]
        bands: Option<Vec<usize>>,

        /// Also write the denoised cube and label map as .mat files here
        #[arg(long)]
        export_mat: Option<PathBuf>,
    },

    /// Report reconstruction MSE and PSNR of a checkpoint over a dataset
    Evaluate {
        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(long)]
        images: PathBuf,

        #[arg(long)]
        masks: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Train {
            config,
            images,
            masks,
            epochs,
            batch_size,
            lr,
            checkpoint,
        } => {
            let mut cfg = match &config {
                Some(path) => TrainConfig::from_json_file(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => TrainConfig::default(),
            };
            if let Some(v) = images {
                cfg.images_dir = v;
            }
            if let Some(v) = masks {
                cfg.masks_dir = v;
            }
            if let Some(v) = epochs {
                cfg.num_epochs = v;
            }
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = lr {
                cfg.learning_rate = v;
            }
            if let Some(v) = checkpoint {
                cfg.checkpoint_path = v;
            }
            cfg.validate()?;
            run_train(&cfg)
        }
        Command::Denoise {
            checkpoint,
            image,
            field,
            output,
            clusters,
            seed,
            bands,
            export_mat,
        } => {
            let bands = match bands.as_deref() {
                None => None,
                Some(&[r, g, b]) => Some([r, g, b]),
                Some(other) => bail!("--bands takes three band indices, got {:?}", other),
            };
            run_denoise(DenoiseArgs {
                checkpoint: &checkpoint,
                image: &image,
                field: field.as_deref(),
                output: &output,
                clusters,
                seed,
                bands,
                export_mat: export_mat.as_deref(),
            })
        }
        Command::Evaluate {
            checkpoint,
            images,
            masks,
        } => run_evaluate(&checkpoint, &images, &masks),
    }
}

fn run_train(config: &TrainConfig) -> Result<()> {
    let report = train(config).context("training failed")?;
    match report.best_epoch {
        Some(epoch) => info!(
            "best validation loss {:.6} at epoch {} ({} epochs run, {:?}); checkpoint at {}",
            report.best_val_loss,
            epoch,
            report.epochs.len(),
            report.stop_reason,
            report.checkpoint_path.display()
        ),
        None => info!("validation never improved; no checkpoint written"),
    }
    Ok(())
}

struct DenoiseArgs<'a> {
    checkpoint: &'a Path,
    image: &'a Path,
    field: Option<&'a str>,
    output: &'a Path,
    clusters: usize,
    seed: u64,
    bands: Option<[usize; 3]>,
    export_mat: Option<&'a Path>,
}

fn run_denoise(args: DenoiseArgs<'_>) -> Result<()> {
    let ckpt = load_checkpoint(args.checkpoint)
        .with_context(|| format!("loading checkpoint {}", args.checkpoint.display()))?;
    if ckpt.spec.task != Task::Denoise {
        bail!("{} holds a segmentation model, not a denoiser", args.checkpoint.display());
    }
    let model = ckpt.build_model()?;

    let id = args
        .image
        .file_stem()
        .and_then(|s| s.to_str())
        .context("image path has no file name")?
        .to_string();
    let field = args.field.unwrap_or(&id);
    let raw = read_mat_array(args.image, field)?;
    let image = normalize_by_max(&raw, &id)?;
    info!("loaded {} with shape {}", args.image.display(), image.shape());

    let denoised = reconstruct(model.as_ref(), &image)?;
    let labels = segment_image(&denoised, args.clusters, args.seed, DEFAULT_MAX_ITER)?;
    render_comparison(&image, &denoised, &labels, args.bands, args.output)?;

    if let Some(dir) = args.export_mat {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        write_mat_array(&dir.join(format!("{}_denoised.mat", id)), "denoised", &denoised)?;
        write_mat_array(&dir.join(format!("{}_labels.mat", id)), "labels", &labels)?;
        info!("exported denoised cube and labels to {}", dir.display());
    }
    Ok(())
}

fn run_evaluate(checkpoint: &Path, images: &Path, masks: &Path) -> Result<()> {
    let ckpt = load_checkpoint(checkpoint)
        .with_context(|| format!("loading checkpoint {}", checkpoint.display()))?;
    let model = ckpt.build_model()?;
    let dataset = HsiDataset::scan(images, masks)?;
    let eval = evaluate(model.as_ref(), &dataset)?;
    println!(
        "{} samples ({} skipped): mean MSE {:.6}, mean PSNR {:.2} dB",
        eval.samples, eval.skipped, eval.mean_mse, eval.mean_psnr
    );
    Ok(())
}
