use crate::error::DataError;
use log::debug;
use spectraclean_core::Tensor;
use spectraclean_io::read_mat_array;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One image/mask pair, both channel-first `[bands, H, W]`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub image: Tensor<f64>,
    pub mask: Tensor<f64>,
}

/// Trait for datasets.
pub trait Dataset {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get(&self, idx: usize) -> Result<Sample, DataError>;
}

/// A dataset over samples already held in memory.
pub struct InMemoryDataset {
    pub samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        InMemoryDataset { samples }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, idx: usize) -> Result<Sample, DataError> {
        self.samples.get(idx).cloned().ok_or_else(|| {
            DataError::Tensor(spectraclean_core::TensorError::IndexOutOfBounds {
                index: idx,
                axis: 0,
                size: self.samples.len(),
            })
        })
    }
}

// ─── Directory-backed dataset ───────────────────────────────────────────────

/// Location of one image and its mask on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePaths {
    pub id: String,
    pub image: PathBuf,
    pub mask: PathBuf,
}

/// Hyperspectral images in one directory paired with masks in another.
///
/// `IMAGES/<id>.mat` holds an array named `<id>`; `MASKS/<id>_mask.mat` (or
/// `MASKS/<id>.mat`) holds an array named `image`. Files are opened only when
/// a sample is requested.
pub struct HsiDataset {
    pairs: Vec<SamplePaths>,
}

impl HsiDataset {
    /// Field holding the mask array inside every mask file.
    pub const MASK_FIELD: &'static str = "image";
    pub const MASK_SUFFIX: &'static str = "_mask";

    /// List both directories and pair files by id.
    pub fn scan(images_dir: &Path, masks_dir: &Path) -> Result<Self, DataError> {
        let images = list_mat_files(images_dir)?;
        let masks = list_mat_files(masks_dir)?;
        let pairs = pair_by_id(&images, &masks)?;
        debug!(
            "paired {} images in {} with masks in {}",
            pairs.len(),
            images_dir.display(),
            masks_dir.display()
        );
        Ok(HsiDataset { pairs })
    }

    pub fn pairs(&self) -> &[SamplePaths] {
        &self.pairs
    }

    pub fn ids(&self) -> Vec<&str> {
        self.pairs.iter().map(|p| p.id.as_str()).collect()
    }
}

impl Dataset for HsiDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, idx: usize) -> Result<Sample, DataError> {
        let paths = self.pairs.get(idx).ok_or_else(|| {
            DataError::Tensor(spectraclean_core::TensorError::IndexOutOfBounds {
                index: idx,
                axis: 0,
                size: self.pairs.len(),
            })
        })?;
        let id = paths.id.clone();

        let raw = read_mat_array(&paths.image, &paths.id).map_err(|source| DataError::Load {
            id: id.clone(),
            source,
        })?;
        let image = normalize_by_max(&raw, &id)?;
        let mask = read_mat_array(&paths.mask, Self::MASK_FIELD).map_err(|source| DataError::Load {
            id: id.clone(),
            source,
        })?;

        if image.shape_vec()[1..] != mask.shape_vec()[1..] {
            return Err(DataError::MaskShape {
                id,
                image: image.shape_vec(),
                mask: mask.shape_vec(),
            });
        }
        Ok(Sample { id, image, mask })
    }
}

/// `.mat` files (extension matched case-insensitively) sorted by file name.
pub fn list_mat_files(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.is_dir() {
        return Err(DataError::NotADirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| DataError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| DataError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let is_mat = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mat"));
        if is_mat && path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(DataError::EmptyDirectory(dir.to_path_buf()));
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Identifier a mask file contributes: its stem without a trailing `_mask`.
pub fn mask_id(path: &Path) -> String {
    let stem = file_stem(path);
    match stem.strip_suffix(HsiDataset::MASK_SUFFIX) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => stem,
    }
}

fn index_by_id<F>(
    paths: &[PathBuf],
    id_of: F,
    kind: &str,
    problems: &mut Vec<String>,
) -> BTreeMap<String, PathBuf>
where
    F: Fn(&Path) -> String,
{
    let mut by_id = BTreeMap::new();
    for path in paths {
        let id = id_of(path);
        if let Some(previous) = by_id.insert(id.clone(), path.clone()) {
            problems.push(format!(
                "duplicate {} id `{}` ({} and {})",
                kind,
                id,
                previous.display(),
                path.display()
            ));
        }
    }
    by_id
}

/// Pair images with masks by shared id. Order follows the image listing.
pub fn pair_by_id(images: &[PathBuf], masks: &[PathBuf]) -> Result<Vec<SamplePaths>, DataError> {
    let mut problems = Vec::new();
    if images.len() != masks.len() {
        problems.push(format!("{} images but {} masks", images.len(), masks.len()));
    }
    let image_ids = index_by_id(images, |p| file_stem(p), "image", &mut problems);
    let mask_ids = index_by_id(masks, mask_id, "mask", &mut problems);

    let unmatched_images: Vec<&str> = image_ids
        .keys()
        .filter(|id| !mask_ids.contains_key(*id))
        .map(String::as_str)
        .collect();
    if !unmatched_images.is_empty() {
        problems.push(format!("no mask for {:?}", unmatched_images));
    }
    let unmatched_masks: Vec<&str> = mask_ids
        .keys()
        .filter(|id| !image_ids.contains_key(*id))
        .map(String::as_str)
        .collect();
    if !unmatched_masks.is_empty() {
        problems.push(format!("no image for masks {:?}", unmatched_masks));
    }

    if !problems.is_empty() {
        return Err(DataError::Pairing(problems.join("; ")));
    }

    Ok(images
        .iter()
        .map(|image| {
            let id = file_stem(image);
            let mask = mask_ids[&id].clone();
            SamplePaths {
                id,
                image: image.clone(),
                mask,
            }
        })
        .collect())
}

/// Scale an image into [0, 1] by its own maximum.
pub fn normalize_by_max(image: &Tensor<f64>, id: &str) -> Result<Tensor<f64>, DataError> {
    let max = image.max_all()?;
    if !(max.is_finite() && max > 0.0) || image.has_nan() {
        return Err(DataError::NonPositiveMaximum {
            id: id.to_string(),
            max,
        });
    }
    Ok(image.div_scalar(max))
}

/// Per-pixel class ids `[H, W]` from a `[bands, H, W]` mask.
///
/// One band: the rounded value. Several bands: the index of the largest band.
pub fn mask_to_labels(
    mask: &Tensor<f64>,
    num_classes: usize,
    id: &str,
) -> Result<Tensor<f64>, DataError> {
    let (bands, h, w) = mask.shape().chw()?;
    let labels = if bands == 1 {
        mask.round().reshape(vec![h, w])?
    } else {
        mask.argmax_axis(0)?
    };
    if let Some(&bad) = labels
        .data()
        .iter()
        .find(|&&l| !(l >= 0.0 && l < num_classes as f64))
    {
        return Err(DataError::Label {
            id: id.to_string(),
            label: bad,
            num_classes,
        });
    }
    Ok(labels)
}
