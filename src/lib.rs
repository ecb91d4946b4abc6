//! Incremental static photo album generator.
//!
//! A source tree of images, videos and documents is mirrored into a static
//! site. Unchanged items are skipped on later runs, faces found at scan time
//! are clustered into tags, and tag and calendar pages are rebuilt from the
//! persistent index on every run.

pub mod build;
pub mod config;
pub mod db;
pub mod error;
pub mod faces;
pub mod logging;
pub mod scanner;
pub mod tasks;
