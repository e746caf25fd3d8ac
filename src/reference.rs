//! Reference encoding: learn the face of the person of interest from the
//! sample photos.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use findpics_vision::{Embedding, Pipeline};
use log::info;

/// Embeddings accumulated from the sample photos.
#[derive(Debug, Default)]
pub struct ReferenceSet {
    embeddings: Vec<Embedding>,
}

impl ReferenceSet {
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn push(&mut self, embedding: Embedding) {
        self.embeddings.push(embedding);
    }

    /// Highest similarity between the probe and any reference embedding.
    pub fn best_score(&self, probe: &Embedding) -> Option<f32> {
        self.embeddings
            .iter()
            .map(|r| r.similarity(probe))
            .fold(None, |acc, s| match acc {
                Some(best) if best > s => Some(best),
                _ => Some(s),
            })
    }

    pub fn is_match(&self, probe: &Embedding, threshold: f32) -> bool {
        matches!(self.best_score(probe), Some(score) if score >= threshold)
    }
}

/// Encode every sample image into the reference set.
///
/// A sample must show exactly one face: zero faces teach nothing and more
/// than one makes the reference ambiguous, so both are hard errors naming
/// the offending file.
pub fn encode_references(pipeline: &mut Pipeline, samples: &[PathBuf]) -> Result<ReferenceSet> {
    info!(
        "Learning the face of the person of interest from {} sample image(s).",
        samples.len()
    );

    let mut set = ReferenceSet::default();
    for path in samples {
        let img = image::open(path)
            .with_context(|| format!("opening sample image {}", path.display()))?;
        let embeddings = pipeline
            .embeddings(&img)
            .with_context(|| format!("encoding sample image {}", path.display()))?;
        set.push(sole_embedding(embeddings, path)?);
    }
    Ok(set)
}

/// Exactly one face per sample: zero faces teach nothing and more than one
/// makes the reference ambiguous.
fn sole_embedding(mut embeddings: Vec<Embedding>, path: &Path) -> Result<Embedding> {
    match embeddings.len() {
        1 => Ok(embeddings.remove(0)),
        0 => anyhow::bail!("no face detected in sample image {}", path.display()),
        n => anyhow::bail!(
            "sample image {} contains {n} faces; it must show exactly one",
            path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values }
    }

    #[test]
    fn best_score_picks_the_closest_reference() {
        let mut set = ReferenceSet::default();
        set.push(emb(vec![0.0, 1.0]));
        set.push(emb(vec![1.0, 0.0]));

        let probe = emb(vec![1.0, 0.0]);
        assert!((set.best_score(&probe).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_set_never_matches() {
        let set = ReferenceSet::default();
        assert!(set.is_empty());
        assert_eq!(set.best_score(&emb(vec![1.0, 0.0])), None);
        assert!(!set.is_match(&emb(vec![1.0, 0.0]), 0.0));
    }

    #[test]
    fn sample_with_one_face_is_accepted() {
        let embedding =
            sole_embedding(vec![emb(vec![1.0, 0.0])], Path::new("ok.jpg")).unwrap();
        assert_eq!(embedding.values, vec![1.0, 0.0]);
    }

    #[test]
    fn sample_with_no_face_is_rejected() {
        let err = sole_embedding(vec![], Path::new("blank.jpg")).unwrap_err();
        assert!(err.to_string().contains("no face detected"));
        assert!(err.to_string().contains("blank.jpg"));
    }

    #[test]
    fn sample_with_several_faces_is_rejected() {
        let faces = vec![emb(vec![1.0, 0.0]), emb(vec![0.0, 1.0]), emb(vec![1.0, 1.0])];
        let err = sole_embedding(faces, Path::new("group.jpg")).unwrap_err();
        assert!(err.to_string().contains("3 faces"));
        assert!(err.to_string().contains("group.jpg"));
    }

    #[test]
    fn is_match_respects_the_threshold() {
        let mut set = ReferenceSet::default();
        // ~45 degrees from the probe: similarity ~0.707.
        set.push(emb(vec![std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2]));
        let probe = emb(vec![1.0, 0.0]);

        assert!(set.is_match(&probe, 0.6));
        assert!(!set.is_match(&probe, 0.8));
    }
}
