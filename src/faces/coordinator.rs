//! Turns untagged face embeddings from the whole index into tags.
//!
//! Only faces without a tag take part, so a run never moves a face that was
//! already tagged. Oversized clusters are re-clustered in isolation at half
//! the distance threshold, clusters spanning too few photos are dropped, and
//! the rest become numeric tags.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use super::clustering::{euclidean_distance, Clusterer};
use crate::config::ClusteringConfig;
use crate::db::{BoundingBox, ClusterDescription, PhotoIndex};
use crate::error::ClusterInputError;

#[derive(Debug, Clone, Copy)]
pub struct ClusterSettings {
    pub distance_threshold: f32,
    /// Minimum number of distinct photos a cluster must span.
    pub occurrence_threshold: usize,
    pub reduce_dimensions: bool,
    /// Clusters larger than this share of all samples are split.
    pub oversize_fraction: f32,
}

impl From<&ClusteringConfig> for ClusterSettings {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            distance_threshold: config.distance_threshold,
            occurrence_threshold: config.occurrence_threshold,
            reduce_dimensions: config.use_dimensionality_reduction,
            oversize_fraction: config.oversize_fraction,
        }
    }
}

/// One untagged face eligible for clustering.
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: String,
    /// Position of the face in the photo's face list.
    pub face: usize,
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// Result of a clustering pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusteringReport {
    /// Untagged faces with embeddings that were clustered
    pub samples: usize,
    /// Clusters after oversize splitting
    pub clusters_found: usize,
    /// Oversized clusters that were re-clustered
    pub clusters_split: usize,
    /// Clusters dropped for spanning too few photos
    pub clusters_discarded: usize,
    /// Tags created, in id order
    pub tags_created: Vec<i64>,
    /// Faces that received a tag
    pub faces_tagged: usize,
}

/// Every untagged face with an embedding, skipping photos whose source file
/// is gone.
pub fn collect_samples(index: &PhotoIndex) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for photo in index.photos()? {
        if !Path::new(&photo.path).exists() {
            debug!("Skipping faces of missing file {}", photo.path);
            continue;
        }
        for (position, face) in photo.faces.iter().enumerate() {
            if face.tag_id.is_some() {
                continue;
            }
            if let Some(embedding) = &face.embedding {
                samples.push(Sample {
                    path: photo.path.clone(),
                    face: position,
                    bbox: face.bbox,
                    embedding: embedding.clone(),
                });
            }
        }
    }
    Ok(samples)
}

/// All embeddings must share the first one's dimension.
pub fn validate_embeddings(embeddings: &[Vec<f32>]) -> Result<(), ClusterInputError> {
    let Some(expected) = embeddings.first().map(Vec::len) else {
        return Ok(());
    };
    match embeddings.iter().position(|e| e.len() != expected) {
        Some(index) => Err(ClusterInputError::DimensionMismatch {
            expected,
            found: embeddings[index].len(),
            index,
        }),
        None => Ok(()),
    }
}

fn check_labels(embeddings: usize, labels: usize) -> Result<(), ClusterInputError> {
    if embeddings != labels {
        return Err(ClusterInputError::LengthMismatch { embeddings, labels });
    }
    Ok(())
}

/// Cluster, then split every cluster whose size exceeds the oversize share.
///
/// Sub-clusters get labels past the largest first-pass label so they can
/// never collide with an untouched cluster. Returns the labels and the number
/// of clusters that were split.
pub fn assign_labels(
    clusterer: &dyn Clusterer,
    embeddings: &[Vec<f32>],
    settings: &ClusterSettings,
) -> Result<(Vec<i64>, usize)> {
    validate_embeddings(embeddings)?;
    let mut labels = clusterer.cluster(
        embeddings,
        settings.distance_threshold,
        settings.reduce_dimensions,
    )?;
    check_labels(embeddings.len(), labels.len())?;

    let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (position, label) in labels.iter().enumerate() {
        members.entry(*label).or_default().push(position);
    }

    let limit = settings.oversize_fraction * embeddings.len() as f32;
    let mut next_label = labels.iter().max().map_or(0, |max| max + 1);
    let mut split = 0;

    for (label, positions) in members {
        if positions.len() < 2 || positions.len() as f32 <= limit {
            continue;
        }
        let subset: Vec<Vec<f32>> = positions.iter().map(|&p| embeddings[p].clone()).collect();
        let sub_labels = clusterer.cluster(
            &subset,
            settings.distance_threshold / 2.0,
            settings.reduce_dimensions,
        )?;
        check_labels(subset.len(), sub_labels.len())?;

        let mut fresh: BTreeMap<i64, i64> = BTreeMap::new();
        for (&position, sub_label) in positions.iter().zip(sub_labels) {
            labels[position] = *fresh.entry(sub_label).or_insert_with(|| {
                next_label += 1;
                next_label - 1
            });
        }
        debug!(
            "Split cluster {} of {} faces into {} sub-clusters",
            label,
            positions.len(),
            fresh.len()
        );
        split += 1;
    }

    Ok((labels, split))
}

fn describe(members: &[&Sample]) -> ClusterDescription {
    let dimension = members.first().map_or(0, |s| s.embedding.len());
    let mut centroid = vec![0.0f32; dimension];
    for sample in members {
        for (c, v) in centroid.iter_mut().zip(&sample.embedding) {
            *c += v;
        }
    }
    let count = members.len();
    if count > 0 {
        for c in centroid.iter_mut() {
            *c /= count as f32;
        }
    }

    let distances: Vec<f32> = members
        .iter()
        .map(|s| euclidean_distance(&s.embedding, &centroid))
        .collect();
    let mean_dist = if count > 0 {
        distances.iter().sum::<f32>() / count as f32
    } else {
        0.0
    };
    let max_dist = distances.iter().copied().fold(0.0, f32::max);

    ClusterDescription {
        centroid,
        mean_dist,
        max_dist,
        count,
    }
}

/// Run a full clustering pass over the index and write the surviving
/// clusters back as tags.
pub fn cluster_index(
    index: &PhotoIndex,
    clusterer: &dyn Clusterer,
    settings: &ClusterSettings,
) -> Result<ClusteringReport> {
    let samples = collect_samples(index)?;
    let mut report = ClusteringReport {
        samples: samples.len(),
        ..Default::default()
    };
    if samples.is_empty() {
        debug!("No untagged faces to cluster");
        return Ok(report);
    }

    let embeddings: Vec<Vec<f32>> = samples.iter().map(|s| s.embedding.clone()).collect();
    let (labels, split) = assign_labels(clusterer, &embeddings, settings)?;
    report.clusters_split = split;

    let mut clusters: BTreeMap<i64, Vec<&Sample>> = BTreeMap::new();
    for (sample, label) in samples.iter().zip(&labels) {
        clusters.entry(*label).or_default().push(sample);
    }
    report.clusters_found = clusters.len();

    // Cluster labels are local to this run; shift them past existing tags
    let mut next_tag = index.tags()?.iter().map(|t| t.id).max().unwrap_or(0) + 1;

    for members in clusters.values() {
        let photos: BTreeSet<&str> = members.iter().map(|s| s.path.as_str()).collect();
        if photos.len() < settings.occurrence_threshold {
            report.clusters_discarded += 1;
            continue;
        }

        let tag_id = next_tag;
        next_tag += 1;
        index.ensure_tag(tag_id)?;
        index.set_tag_description(tag_id, describe(members))?;
        report.tags_created.push(tag_id);

        for sample in members {
            if index.tag_face(&sample.path, sample.face, tag_id)? {
                report.faces_tagged += 1;
            }
        }
    }

    info!(
        "Clustered {} faces: {} clusters, {} split, {} discarded, {} new tags",
        report.samples,
        report.clusters_found,
        report.clusters_split,
        report.clusters_discarded,
        report.tags_created.len()
    );
    Ok(report)
}
