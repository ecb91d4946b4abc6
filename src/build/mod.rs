//! Build orchestration.
//!
//! A build moves through `Initialized -> Enumerating -> Enumerated ->
//! [Clustering] -> Generating -> Generated`. Only the orchestrator thread
//! touches the index; media work runs on the task pool and writes files only.

pub mod faces_page;
pub mod media;
pub mod render;
pub mod site;
pub mod timeline;

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::PhotoIndex;
use crate::error::BuildError;
use crate::faces::{cluster_index, ClusterSettings, Clusterer, ClusteringReport, Embedder, NoFaces, SingleLinkage};
use crate::scanner::{ExifExtractor, Folder, KindCounts, MetadataExtractor, ScanOptions, Visit, Walker};
use crate::tasks::{JobState, TaskPool};

use media::MediaSettings;
use render::{PageTally, PageWriter};
pub use site::{PlainHtml, SiteRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Initialized,
    Enumerating,
    Enumerated,
    Clustering,
    Generating,
    Generated,
}

impl BuildState {
    fn can_move_to(self, next: BuildState) -> bool {
        use BuildState::*;
        matches!(
            (self, next),
            (Initialized, Enumerating)
                | (Enumerating, Enumerated)
                | (Enumerated, Clustering)
                | (Enumerated, Generating)
                | (Clustering, Generating)
                | (Generating, Generated)
        )
    }
}

/// Messages for a progress observer.
#[derive(Debug, Clone)]
pub enum BuildProgress {
    StateChanged(BuildState),
    Visited { path: PathBuf, changed: bool },
    Clustered(ClusteringReport),
    JobFailed { label: String, error: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub enumerate: Duration,
    pub cluster: Duration,
    pub generate: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub total: KindCounts,
    pub changed: KindCounts,
    pub generated: KindCounts,
    pub skipped: usize,
    pub jobs_failed: usize,
    /// Destination folders or pages that could not be written.
    pub write_failures: usize,
    pub clustering: Option<ClusteringReport>,
    pub timings: StageTimings,
}

pub struct Builder<'a> {
    source: PathBuf,
    dest: PathBuf,
    options: ScanOptions,
    clustering_enabled: bool,
    cluster_settings: ClusterSettings,
    media: MediaSettings,
    workers: usize,
    index: &'a PhotoIndex,
    extractor: Box<dyn MetadataExtractor>,
    embedder: Box<dyn Embedder>,
    clusterer: Box<dyn Clusterer>,
    renderer: Box<dyn SiteRenderer>,
    progress: Option<Sender<BuildProgress>>,
    state: BuildState,
    tree: Option<Folder>,
    stats: BuildStats,
}

impl<'a> Builder<'a> {
    pub fn new(config: &Config, index: &'a PhotoIndex) -> Self {
        Self {
            source: config.source_dir.clone(),
            dest: config.dest_dir.clone(),
            options: ScanOptions {
                skip_videos: config.build.skip_videos,
                skip_docs: config.build.skip_docs,
                html_only: config.build.html_only,
                display_size: config.media.display_size,
            },
            clustering_enabled: config.clustering.enabled,
            cluster_settings: ClusterSettings::from(&config.clustering),
            media: MediaSettings::from(&config.media),
            workers: config.workers(),
            index,
            extractor: Box::new(ExifExtractor),
            embedder: Box::new(NoFaces),
            clusterer: Box::new(SingleLinkage),
            renderer: Box::new(PlainHtml),
            progress: None,
            state: BuildState::Initialized,
            tree: None,
            stats: BuildStats::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_clusterer(mut self, clusterer: Box<dyn Clusterer>) -> Self {
        self.clusterer = clusterer;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn SiteRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_progress(mut self, progress: Sender<BuildProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// The catalog tree from the last enumeration.
    pub fn tree(&self) -> Option<&Folder> {
        self.tree.as_ref()
    }

    fn report(&self, message: BuildProgress) {
        if let Some(tx) = &self.progress {
            // The observer may have gone away; the build does not depend on it
            let _ = tx.send(message);
        }
    }

    fn transition(&mut self, next: BuildState) -> Result<(), BuildError> {
        if !self.state.can_move_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Build state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.report(BuildProgress::StateChanged(next));
        Ok(())
    }

    /// Walk the source tree, refreshing index records and settling which
    /// nodes need regeneration.
    pub fn enumerate(&mut self) -> Result<()> {
        self.transition(BuildState::Enumerating)?;
        let started = Instant::now();

        let walker = Walker::new(
            &self.source,
            &self.dest,
            self.options,
            self.index,
            self.extractor.as_ref(),
            self.embedder.as_ref(),
        );
        let progress = self.progress.clone();
        let result = walker.scan_with(&mut |visit| {
            let Some(tx) = &progress else {
                return;
            };
            let (path, changed) = match visit {
                Visit::File(file) => (file.path.clone(), file.changed),
                Visit::Folder(folder) => (folder.path.clone(), folder.changed),
            };
            let _ = tx.send(BuildProgress::Visited { path, changed });
        })?;

        self.stats.total = result.stats.total;
        self.stats.changed = result.stats.changed;
        self.stats.skipped = result.stats.skipped;
        self.stats.timings.enumerate = started.elapsed();
        self.tree = Some(result.root);

        info!(
            "Enumerated {} items, {} changed, {} skipped",
            self.stats.total.total(),
            self.stats.changed.total(),
            self.stats.skipped
        );
        self.transition(BuildState::Enumerated)?;
        Ok(())
    }

    /// True when a changed photo carries a face with an embedding but no tag.
    pub fn needs_clustering(&self) -> Result<bool> {
        let Some(tree) = &self.tree else {
            return Ok(false);
        };
        for file in tree.all_files().into_iter().filter(|f| f.changed && !f.html_only) {
            let Some(photo) = self.index.get_photo(&file.key())? else {
                continue;
            };
            if photo
                .faces
                .iter()
                .any(|f| f.tag_id.is_none() && f.embedding.is_some())
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Cluster untagged faces across the whole index. Photos that gain a tag
    /// have their pages marked for regeneration.
    pub fn cluster(&mut self) -> Result<ClusteringReport> {
        self.transition(BuildState::Clustering)?;
        let started = Instant::now();

        let report = cluster_index(self.index, self.clusterer.as_ref(), &self.cluster_settings)?;

        let mut tagged = BTreeSet::new();
        for tag_id in &report.tags_created {
            if let Some(tag) = self.index.get_tag(*tag_id)? {
                tagged.extend(tag.photos);
            }
        }
        if let Some(tree) = self.tree.as_mut() {
            mark_pages_stale(tree, &tagged);
        }

        self.stats.timings.cluster = started.elapsed();
        self.stats.clustering = Some(report.clone());
        self.report(BuildProgress::Clustered(report.clone()));
        Ok(report)
    }

    /// Produce media for changed files, then every page that depends on them.
    pub fn generate(&mut self) -> Result<()> {
        self.transition(BuildState::Generating)?;
        let started = Instant::now();
        let Some(tree) = self.tree.take() else {
            return Err(BuildError::InvalidTransition {
                from: BuildState::Initialized,
                to: BuildState::Generating,
            }
            .into());
        };

        let mut pool = TaskPool::new(self.workers);
        let mut failed = 0;
        let submitted = render::dispatch_jobs(&tree, &mut pool, &self.media, &mut failed)?;
        debug!("Submitted {} media jobs", submitted);
        for outcome in pool.wait_all() {
            if let JobState::Failed(error) = &outcome.state {
                warn!("Job failed: {}: {}", outcome.label, error);
                self.stats.jobs_failed += 1;
                self.report(BuildProgress::JobFailed {
                    label: outcome.label.clone(),
                    error: error.clone(),
                });
            }
        }

        if let Err(e) = render::install_resources(&self.dest, self.renderer.as_ref()) {
            warn!("Failed to install resources in {:?}: {}", self.dest, e);
            failed += 1;
        }
        let writer = PageWriter {
            index: self.index,
            renderer: self.renderer.as_ref(),
        };
        let mut tally = PageTally::default();
        writer.render_folder(&tree, &mut tally);
        self.stats.generated = tally.generated;
        failed += tally.failed;

        let renderer = self.renderer.as_ref();
        if let Err(e) = faces_page::write_faces_section(self.index, &self.source, &self.dest, renderer) {
            warn!("Failed to write the faces section: {}", e);
            failed += 1;
        }
        if let Err(e) = timeline::write_calendar(self.index, &self.source, &self.dest, renderer) {
            warn!("Failed to write the calendar: {}", e);
            failed += 1;
        }
        self.stats.write_failures = failed;

        for problem in self.index.audit_back_references()? {
            warn!("Index inconsistency: {}", problem);
        }

        self.tree = Some(tree);
        self.stats.timings.generate = started.elapsed();
        info!(
            "Generated {} pages, {} failed jobs, {} write failures",
            self.stats.generated.total(),
            self.stats.jobs_failed,
            self.stats.write_failures
        );
        self.transition(BuildState::Generated)?;
        Ok(())
    }

    /// Run every stage, clustering only when enabled and needed.
    pub fn run(&mut self) -> Result<BuildStats> {
        self.enumerate()?;
        if self.clustering_enabled && self.needs_clustering()? {
            self.cluster()?;
        } else {
            debug!("Clustering skipped");
        }
        self.generate()?;
        Ok(self.stats.clone())
    }
}

/// Mark unchanged files whose photos are in `paths` as needing only their
/// page. Returns true when anything below `folder` is changed.
fn mark_pages_stale(folder: &mut Folder, paths: &BTreeSet<String>) -> bool {
    let mut any = false;
    for file in &mut folder.files {
        if !file.changed && paths.contains(&file.key()) {
            file.changed = true;
            file.html_only = true;
        }
        any |= file.changed;
    }
    for sub in &mut folder.subfolders {
        any |= mark_pages_stale(sub, paths);
    }
    folder.changed |= any;
    folder.changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BoundingBox;
    use crate::faces::DetectedFace;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use tempfile::{tempdir, TempDir};

    struct SameFace;

    impl Embedder for SameFace {
        fn embed(&self, _path: &Path) -> Result<Vec<DetectedFace>> {
            Ok(vec![DetectedFace {
                bbox: BoundingBox::new(1.0, 1.0, 3.0, 3.0),
                embedding: vec![0.2, 0.4],
            }])
        }
    }

    fn png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_fn(12, 8, |x, y| image::Rgb([x as u8 * 20, y as u8 * 30, 90]))
            .save(path)
            .unwrap();
    }

    fn setup() -> (TempDir, Config) {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        png(&src.join("a.png"));
        png(&src.join("b.png"));
        png(&src.join("trip/c.png"));
        png(&src.join("trip/day1/d.png"));

        let mut config = Config::default();
        config.source_dir = src;
        config.dest_dir = dir.path().join("out");
        config.build.workers = Some(2);
        config.media.thumbnail_size = 4;
        config.media.display_size = 6;
        config.clustering.occurrence_threshold = 2;
        (dir, config)
    }

    #[test]
    fn test_second_build_is_idle() {
        let (_dir, config) = setup();
        let index = PhotoIndex::open_in_memory().unwrap();

        let stats = Builder::new(&config, &index).run().unwrap();
        assert_eq!(stats.total.images, 4);
        assert_eq!(stats.total.folders, 3);
        assert_eq!(stats.changed, stats.total);
        assert_eq!(stats.generated, stats.total);
        assert_eq!(stats.jobs_failed, 0);

        let out = &config.dest_dir;
        assert!(out.join("index.html").exists());
        assert!(out.join("shuffle.html").exists());
        assert!(out.join("calendar.html").exists());
        assert!(out.join("res/style.css").exists());
        assert!(out.join("thumb/a.png").exists());
        assert_eq!(image::image_dimensions(out.join("thumb/a.png")).unwrap(), (4, 4));
        assert!(out.join("trip/day1/d.png.html").exists());

        let mut builder = Builder::new(&config, &index);
        let again = builder.run().unwrap();
        assert_eq!(again.total, stats.total);
        assert_eq!(again.changed, KindCounts::default());
        assert_eq!(again.generated, KindCounts::default());
        assert!(again.clustering.is_none());
        assert_eq!(builder.state(), BuildState::Generated);
    }

    #[test]
    fn test_removed_page_is_regenerated_alone() {
        let (_dir, config) = setup();
        let index = PhotoIndex::open_in_memory().unwrap();
        Builder::new(&config, &index).run().unwrap();

        fs::remove_file(config.dest_dir.join("trip/c.png.html")).unwrap();
        let stats = Builder::new(&config, &index).run().unwrap();
        assert_eq!(stats.changed.images, 1);
        // trip and the root above it
        assert_eq!(stats.changed.folders, 2);
        assert_eq!(stats.generated.images, 1);
        assert!(config.dest_dir.join("trip/c.png.html").exists());
    }

    #[test]
    fn test_unwritable_folder_page_does_not_stop_the_build() {
        let (_dir, mut config) = setup();
        png(&config.source_dir.join("zoo/e.png"));
        config.clustering.enabled = false;
        // A directory squatting on the page path makes the write fail
        fs::create_dir_all(config.dest_dir.join("trip/index.html")).unwrap();

        let index = PhotoIndex::open_in_memory().unwrap();
        let mut builder = Builder::new(&config, &index);
        let stats = builder.run().unwrap();

        assert_eq!(builder.state(), BuildState::Generated);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.generated.folders, stats.total.folders - 1);
        assert_eq!(stats.generated.images, 5);

        let out = &config.dest_dir;
        assert!(out.join("trip/c.png.html").exists());
        assert!(out.join("trip/day1/index.html").exists());
        assert!(out.join("zoo/index.html").exists());
        assert!(out.join("zoo/e.png.html").exists());
        assert!(out.join("calendar.html").exists());
        assert!(out.join("faces/index.html").exists());
    }

    #[test]
    fn test_clustering_tags_faces() {
        let (_dir, config) = setup();
        let index = PhotoIndex::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel();

        let mut builder = Builder::new(&config, &index)
            .with_embedder(Box::new(SameFace))
            .with_progress(tx);
        builder.enumerate().unwrap();
        assert!(builder.needs_clustering().unwrap());

        let report = builder.cluster().unwrap();
        assert_eq!(report.samples, 4);
        assert_eq!(report.tags_created, vec![1]);
        assert_eq!(report.faces_tagged, 4);
        builder.generate().unwrap();

        let faces = config.dest_dir.join("faces");
        assert!(faces.join("1.html").exists());
        assert!(faces.join("index.html").exists());
        assert!(faces.join("names.js").exists());
        assert_eq!(index.get_tag(1).unwrap().unwrap().photos.len(), 4);

        let states: Vec<BuildState> = rx
            .try_iter()
            .filter_map(|m| match m {
                BuildProgress::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                BuildState::Enumerating,
                BuildState::Enumerated,
                BuildState::Clustering,
                BuildState::Generating,
                BuildState::Generated,
            ]
        );

        // Everything is tagged now, so a rerun has nothing to cluster
        let again = Builder::new(&config, &index)
            .with_embedder(Box::new(SameFace))
            .run()
            .unwrap();
        assert!(again.clustering.is_none());
    }

    #[test]
    fn test_generate_before_enumerate_is_rejected() {
        let (_dir, config) = setup();
        let index = PhotoIndex::open_in_memory().unwrap();
        let mut builder = Builder::new(&config, &index);

        let err = builder.generate().unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::InvalidTransition { from, to }) => {
                assert_eq!(*from, BuildState::Initialized);
                assert_eq!(*to, BuildState::Generating);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(builder.state(), BuildState::Initialized);
        assert!(!config.dest_dir.join("index.html").exists());
    }

    #[test]
    fn test_mark_pages_stale_propagates() {
        let mut root = Folder::new("/s".into(), "/o".into(), String::new(), "s".to_string());
        let mut trip = Folder::new("/s/trip".into(), "/o/trip".into(), "trip/".to_string(), "trip".to_string());
        trip.files.push(crate::scanner::FileEntry::new(
            "/s/trip/a.jpg".into(),
            "/o/trip".into(),
            "trip/".to_string(),
            crate::scanner::MediaKind::Image,
            "a.jpg".to_string(),
        ));
        root.subfolders.push(trip);

        let paths: BTreeSet<String> = ["/s/trip/a.jpg".to_string()].into_iter().collect();
        assert!(mark_pages_stale(&mut root, &paths));
        let file = &root.subfolders[0].files[0];
        assert!(file.changed && file.html_only);
        assert!(root.subfolders[0].changed);
    }
}
