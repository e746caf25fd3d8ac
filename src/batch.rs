//! Batch matching: fan the candidate images out over a worker pool, compare
//! every detected face against the reference set, and place positive matches
//! in the destination folder.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::Config;
use crate::reference::ReferenceSet;
use crate::sink::{self, Action};
use findpics_vision::Pipeline;

/// Per-image result from one worker.
#[derive(Debug)]
pub struct ImageOutcome {
    /// Faces detected in the image.
    pub faces: usize,
    pub matched: bool,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub analyzed: usize,
    pub matched: usize,
    pub no_face: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub dest_dir: Option<PathBuf>,
}

/// Run the batch over `stack`, returning the aggregated summary.
///
/// Each rayon worker loads its own inference pipeline. Per-image failures
/// (undecodable files, inference errors) are logged and counted but never
/// abort the batch.
pub fn run_batch(
    cfg: &Config,
    references: &ReferenceSet,
    stack: &[PathBuf],
    output_root: &Path,
    action: Action,
) -> Result<BatchSummary> {
    info!("{} images will be analyzed.", stack.len());

    let dest_dir = match action {
        Action::DryRun => None,
        _ => Some(sink::session_dir(output_root)?),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.jobs)
        .build()
        .context("building worker pool")?;

    let bar = ProgressBar::new(stack.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, {eta})",
        )?
        .progress_chars("#>-"),
    );

    let match_count = AtomicUsize::new(0);
    let start = Instant::now();

    let outcomes: Vec<Result<ImageOutcome>> = pool.install(|| {
        stack
            .par_iter()
            .progress_with(bar.clone())
            .map_init(
                || Pipeline::load(&cfg.models_dir, cfg.score_threshold, cfg.nms_threshold),
                |pipeline, path| match pipeline {
                    Ok(pipeline) => analyze_image(
                        pipeline,
                        path,
                        references,
                        cfg,
                        dest_dir.as_deref(),
                        action,
                        &match_count,
                    ),
                    Err(e) => Err(anyhow::anyhow!(
                        "worker has no pipeline (skipping {}): {e:#}",
                        path.display()
                    )),
                },
            )
            .collect()
    });

    bar.finish_and_clear();
    let elapsed = start.elapsed();
    let summary = summarize(
        outcomes,
        match_count.into_inner(),
        elapsed,
        dest_dir,
    );

    info!("Finished within {:.2} seconds.", elapsed.as_secs_f64());
    if summary.matched > 0 {
        info!(
            "Person of interest is recognised in {} image(s).",
            summary.matched
        );
    } else {
        info!("Person of interest was not recognised in any image.");
    }
    Ok(summary)
}

/// Decode, downsize, encode and match one candidate image.
fn analyze_image(
    pipeline: &mut Pipeline,
    path: &Path,
    references: &ReferenceSet,
    cfg: &Config,
    dest_dir: Option<&Path>,
    action: Action,
    match_count: &AtomicUsize,
) -> Result<ImageOutcome> {
    let img = image::open(path).with_context(|| format!("opening {}", path.display()))?;
    let img = bounded(img, cfg.max_dimension);
    let embeddings = pipeline
        .embeddings(&img)
        .with_context(|| format!("analyzing {}", path.display()))?;

    // First match wins; remaining faces are not compared.
    let matched = embeddings
        .iter()
        .any(|probe| references.is_match(probe, cfg.threshold));

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    match (embeddings.len(), matched) {
        (0, _) => debug!("{name}\tno face detected"),
        (n, false) => debug!("{name}\t{n} face(s) detected"),
        (n, true) => debug!("{name}\t{n} face(s) detected ** POSITIVE MATCH **"),
    }

    if matched {
        match_count.fetch_add(1, Ordering::Relaxed);
        if let Some(dir) = dest_dir {
            if let Some(dest) = sink::place(path, dir, action)? {
                debug!("{name}\tplaced at {}", dest.display());
            }
        }
    }

    Ok(ImageOutcome {
        faces: embeddings.len(),
        matched,
    })
}

/// Downsize to fit within `max_dim` on the long side; smaller images pass
/// through untouched.
fn bounded(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if max_dim == 0 || (w <= max_dim && h <= max_dim) {
        return img;
    }
    img.resize(max_dim, max_dim, image::imageops::FilterType::Triangle)
}

fn summarize(
    outcomes: Vec<Result<ImageOutcome>>,
    matched: usize,
    elapsed: Duration,
    dest_dir: Option<PathBuf>,
) -> BatchSummary {
    let mut summary = BatchSummary {
        analyzed: 0,
        matched,
        no_face: 0,
        failed: 0,
        elapsed,
        dest_dir,
    };
    for outcome in outcomes {
        match outcome {
            Ok(o) => {
                summary.analyzed += 1;
                if o.faces == 0 {
                    summary.no_face += 1;
                }
            }
            Err(e) => {
                summary.failed += 1;
                warn!("{e:#}");
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_downsizes_only_large_images() {
        let small = DynamicImage::new_rgb8(800, 600);
        assert_eq!(bounded(small, 1600).dimensions(), (800, 600));

        let large = DynamicImage::new_rgb8(4000, 3000);
        let shrunk = bounded(large, 1600);
        assert_eq!(shrunk.dimensions(), (1600, 1200));

        let unbounded = DynamicImage::new_rgb8(4000, 3000);
        assert_eq!(bounded(unbounded, 0).dimensions(), (4000, 3000));
    }

    #[test]
    fn summarize_counts_outcomes() {
        let ok = |faces, matched| Ok(ImageOutcome { faces, matched });
        let outcomes = vec![
            ok(1, true),
            ok(0, false),
            ok(2, false),
            Err(anyhow::anyhow!("boom")),
        ];

        let summary = summarize(outcomes, 1, Duration::from_secs(1), None);
        assert_eq!(summary.analyzed, 3);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.no_face, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn match_counter_is_exact_under_parallelism() {
        // Every third image matches; workers bump the shared counter
        // concurrently and the total must agree with the outcomes.
        let count = AtomicUsize::new(0);
        let outcomes: Vec<Result<ImageOutcome>> = (0..200usize)
            .into_par_iter()
            .map(|i| {
                let matched = i % 3 == 0;
                if matched {
                    count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ImageOutcome { faces: 1, matched })
            })
            .collect();

        let matched = count.into_inner();
        let seen = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(o) if o.matched))
            .count();
        assert_eq!(matched, seen);
        assert_eq!(matched, 67);

        let summary = summarize(outcomes, matched, Duration::from_secs(1), None);
        assert_eq!(summary.analyzed, 200);
        assert_eq!(summary.matched, 67);
        assert_eq!(summary.failed, 0);
    }
}
