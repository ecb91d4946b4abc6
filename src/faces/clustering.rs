use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

/// Agglomerative clustering routine.
///
/// Returns one cluster label per embedding, in input order. Labels only need
/// to be equal within a cluster and distinct across clusters.
pub trait Clusterer: Send + Sync {
    fn cluster(
        &self,
        embeddings: &[Vec<f32>],
        distance_threshold: f32,
        reduce_dimensions: bool,
    ) -> Result<Vec<i64>>;
}

/// Single-linkage clustering: two embeddings share a cluster when a chain of
/// pairs closer than the threshold connects them.
pub struct SingleLinkage;

impl Clusterer for SingleLinkage {
    fn cluster(
        &self,
        embeddings: &[Vec<f32>],
        distance_threshold: f32,
        reduce_dimensions: bool,
    ) -> Result<Vec<i64>> {
        if reduce_dimensions {
            debug!("Built-in clusterer works on raw embeddings; dimensionality reduction skipped");
        }

        let n = embeddings.len();
        let edges: Vec<(usize, usize)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                ((i + 1)..n)
                    .filter(move |&j| euclidean_distance(&embeddings[i], &embeddings[j]) < distance_threshold)
                    .map(move |j| (i, j))
            })
            .collect();

        let mut sets = DisjointSets::new(n);
        for (a, b) in edges {
            sets.union(a, b);
        }

        // Number clusters by first appearance
        let mut root_labels: Vec<Option<i64>> = vec![None; n];
        let mut next = 0;
        let labels = (0..n)
            .map(|i| {
                let root = sets.find(i);
                *root_labels[root].get_or_insert_with(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        Ok(labels)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}
