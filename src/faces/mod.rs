pub mod clustering;
pub mod coordinator;
pub mod embedder;

pub use clustering::{Clusterer, SingleLinkage};
pub use coordinator::{cluster_index, ClusterSettings, ClusteringReport};
pub use embedder::{DetectedFace, Embedder, NoFaces};
