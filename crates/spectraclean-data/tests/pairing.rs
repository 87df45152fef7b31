use approx::assert_relative_eq;
use spectraclean_core::Tensor;
use spectraclean_data::{split_indices, DataError, DataLoader, Dataset, HsiDataset};
use spectraclean_io::write_mat_array;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn cube(seed: u64) -> Tensor<f64> {
    Tensor::uniform(vec![4, 2, 3], 10.0, 500.0, Some(seed))
}

fn write_image(dir: &Path, id: &str, seed: u64) {
    write_mat_array(&dir.join(format!("{}.mat", id)), id, &cube(seed)).unwrap();
}

fn write_mask(dir: &Path, file: &str) {
    write_mat_array(&dir.join(file), "image", &Tensor::ones(vec![2, 3])).unwrap();
}

fn dirs(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let images = root.join("IMAGES");
    let masks = root.join("MASKS");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&masks).unwrap();
    (images, masks)
}

#[test]
fn test_pairs_by_id_and_normalizes() {
    let root = tempdir().unwrap();
    let (images, masks) = dirs(root.path());
    write_image(&images, "beta", 1);
    write_image(&images, "alpha", 2);
    // Suffix is optional and the extension is matched case-insensitively.
    write_mask(&masks, "alpha_mask.MAT");
    write_mask(&masks, "beta.mat");

    let dataset = HsiDataset::scan(&images, &masks).unwrap();
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.ids(), vec!["alpha", "beta"]);

    let sample = dataset.get(0).unwrap();
    assert_eq!(sample.id, "alpha");
    assert_eq!(sample.image.shape_vec(), vec![4, 2, 3]);
    assert_eq!(sample.mask.shape_vec(), vec![1, 2, 3]);
    assert_relative_eq!(sample.image.max_all().unwrap(), 1.0);
    assert!(sample.image.min_all().unwrap() >= 0.0);

    let expected = cube(2);
    let max = expected.max_all().unwrap();
    assert_relative_eq!(
        sample.image.get(&[3, 1, 2]).unwrap(),
        expected.get(&[3, 1, 2]).unwrap() / max,
        epsilon = 1e-12
    );
}

#[test]
fn test_unmatched_ids_fail_at_scan() {
    let root = tempdir().unwrap();
    let (images, masks) = dirs(root.path());
    write_image(&images, "a", 1);
    write_image(&images, "b", 2);
    write_mask(&masks, "a_mask.mat");
    write_mask(&masks, "c_mask.mat");

    match HsiDataset::scan(&images, &masks) {
        Err(DataError::Pairing(msg)) => {
            assert!(msg.contains("\"b\""));
            assert!(msg.contains("\"c\""));
        }
        other => panic!("expected a pairing error, got {:?}", other.map(|d| d.len())),
    }
}

#[test]
fn test_empty_directory() {
    let root = tempdir().unwrap();
    let (images, masks) = dirs(root.path());
    write_mask(&masks, "a_mask.mat");
    assert!(matches!(
        HsiDataset::scan(&images, &masks),
        Err(DataError::EmptyDirectory(_))
    ));
}

#[test]
fn test_zero_image_reports_error_not_nan() {
    let root = tempdir().unwrap();
    let (images, masks) = dirs(root.path());
    write_mat_array(&images.join("dark.mat"), "dark", &Tensor::zeros(vec![2, 2, 3])).unwrap();
    write_mask(&masks, "dark_mask.mat");

    let dataset = HsiDataset::scan(&images, &masks).unwrap();
    assert!(matches!(
        dataset.get(0),
        Err(DataError::NonPositiveMaximum { .. })
    ));
}

#[test]
fn test_loader_over_split() {
    let root = tempdir().unwrap();
    let (images, masks) = dirs(root.path());
    for (i, id) in ["s0", "s1", "s2", "s3", "s4"].iter().enumerate() {
        write_image(&images, id, i as u64);
        write_mask(&masks, &format!("{}_mask.mat", id));
    }
    let dataset = HsiDataset::scan(&images, &masks).unwrap();
    let (train, val) = split_indices(dataset.len(), 0.2, 42);
    assert_eq!((train.len(), val.len()), (4, 1));

    let batches: Vec<_> = DataLoader::new(&dataset, train, 3, true, 7)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].images.shape_vec(), vec![3, 4, 2, 3]);
    assert_eq!(batches[1].masks.shape_vec(), vec![1, 1, 2, 3]);
}
