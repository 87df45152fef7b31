use spectraclean_core::Tensor;
use spectraclean_data::DataError;
use spectraclean_io::{load_checkpoint, write_mat_array};
use spectraclean_train::{train, StopReason, TrainConfig, TrainError};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Write `IMAGES/<id>.mat` and `MASKS/<id>_mask.mat` for each id.
fn write_pairs(root: &Path, ids: &[&str]) {
    let images = root.join("IMAGES");
    let masks = root.join("MASKS");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&masks).unwrap();
    for (i, id) in ids.iter().enumerate() {
        // Raw sensor counts, normalized by the loader.
        let cube = Tensor::uniform(vec![3, 4, 4], 0.0, 4000.0, Some(i as u64));
        write_mat_array(&images.join(format!("{}.mat", id)), id, &cube).unwrap();
        let mask = Tensor::new((0..16).map(|p| (p % 2) as f64).collect(), vec![4, 4]).unwrap();
        write_mat_array(&masks.join(format!("{}_mask.mat", id)), "image", &mask).unwrap();
    }
}

fn config(root: &Path) -> TrainConfig {
    let out = root.join("out");
    fs::create_dir_all(&out).unwrap();
    TrainConfig {
        images_dir: root.join("IMAGES"),
        masks_dir: root.join("MASKS"),
        hidden_channels: vec![3],
        num_epochs: 1,
        checkpoint_path: out.join("best_model.json"),
        ..Default::default()
    }
}

#[test]
fn test_one_epoch_writes_one_checkpoint() {
    let dir = tempdir().unwrap();
    write_pairs(dir.path(), &["scene_a", "scene_b"]);
    let config = config(dir.path());

    let report = train(&config).unwrap();
    assert_eq!(report.epochs.len(), 1);
    assert_eq!(report.stop_reason, StopReason::MaxEpochs);
    let epoch = &report.epochs[0];
    assert!(epoch.train_loss.is_finite());
    assert!(epoch.val_loss.is_finite());
    assert_eq!(epoch.skipped_batches, 0);

    let written: Vec<_> = fs::read_dir(dir.path().join("out")).unwrap().collect();
    assert_eq!(written.len(), 1);

    let ckpt = load_checkpoint(&config.checkpoint_path).unwrap();
    assert_eq!(ckpt.epoch, 1);
    assert_eq!(ckpt.spec.in_channels, 3);
    assert_eq!(ckpt.val_loss, epoch.val_loss);
}

#[test]
fn test_unpaired_mask_fails_before_training() {
    let dir = tempdir().unwrap();
    write_pairs(dir.path(), &["scene_a", "scene_b"]);
    fs::rename(
        dir.path().join("MASKS/scene_b_mask.mat"),
        dir.path().join("MASKS/scene_c_mask.mat"),
    )
    .unwrap();
    let config = config(dir.path());

    let err = train(&config).unwrap_err();
    assert!(matches!(err, TrainError::Data(DataError::Pairing(_))));
    assert!(!config.checkpoint_path.exists());
}

#[test]
fn test_all_zero_image_is_skipped() {
    let dir = tempdir().unwrap();
    write_pairs(dir.path(), &["a", "b", "c"]);
    write_mat_array(&dir.path().join("IMAGES/b.mat"), "b", &Tensor::zeros(vec![3, 4, 4])).unwrap();
    let config = TrainConfig {
        val_fraction: 0.0,
        ..config(dir.path())
    };

    let report = train(&config).unwrap();
    // Skipped once while training and once while validating.
    assert_eq!(report.epochs[0].skipped_batches, 2);
    assert!(report.epochs[0].val_loss.is_finite());
}
