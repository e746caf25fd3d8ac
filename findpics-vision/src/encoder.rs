//! SFace face embedding.
//!
//! A detected face is aligned to the 112x112 ArcFace layout using its eye
//! landmarks, then run through SFace to produce an L2-normalized 128-float
//! embedding. Cosine similarity between two such embeddings is a plain dot
//! product.

use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, Rgb, RgbImage};
use ort::{session::Session, value::Value};

use crate::{detector::Detection, model};

const CROP_SIZE: u32 = 112;
/// Eye positions in the 112x112 ArcFace reference layout.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// L2-normalized face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity, clamped to [-1, 1].
    ///
    /// Both vectors are unit length, so the dot product is the cosine.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot.clamp(-1.0, 1.0)
    }
}

pub struct Encoder {
    session: Session,
}

impl Encoder {
    pub fn load(models_dir: &Path) -> Result<Self> {
        Ok(Self {
            session: model::recognizer_session(models_dir)?,
        })
    }

    /// Align the detected face and encode it.
    pub fn encode(&mut self, img: &DynamicImage, face: &Detection) -> Result<Embedding> {
        let crop = align_face(&img.to_rgb8(), face);
        let input = Value::from_array(model::bgr_chw(&crop))?;

        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        // Expecting [1, 128]; fall back to the flat length for odd exports.
        let dim = if shape.len() == 2 {
            shape[1] as usize
        } else {
            data.len()
        };
        if dim == 0 || data.len() < dim {
            anyhow::bail!("recognizer produced an empty embedding");
        }

        Ok(Embedding {
            values: l2_normalize(&data[..dim]),
        })
    }
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Warp the face to the 112x112 reference layout.
///
/// Builds a similarity transform (rotate + scale + translate) that maps the
/// detected eye pair onto the reference eye positions, then inverse-samples
/// the source with bilinear interpolation. Pixels mapping outside the source
/// stay black.
pub fn align_face(img: &RgbImage, face: &Detection) -> RgbImage {
    let left_eye = (face.landmarks[0], face.landmarks[1]);
    let right_eye = (face.landmarks[2], face.landmarks[3]);

    let dx = right_eye.0 - left_eye.0;
    let dy = right_eye.1 - left_eye.1;
    let angle = dy.atan2(dx);

    let ref_dx = REF_RIGHT_EYE.0 - REF_LEFT_EYE.0;
    let ref_dy = REF_RIGHT_EYE.1 - REF_LEFT_EYE.1;
    let ref_dist = (ref_dx * ref_dx + ref_dy * ref_dy).sqrt();
    let eye_dist = (dx * dx + dy * dy).sqrt().max(f32::EPSILON);
    let scale = ref_dist / eye_dist;

    let eye_center = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
    );

    // Forward transform: out = R(angle) * scale * in + t,
    // with t chosen so eye_center lands on ref_center.
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (-b * eye_center.0 + a * eye_center.1);

    let det = a * a + b * b;
    let mut out = RgbImage::new(CROP_SIZE, CROP_SIZE);
    for y in 0..CROP_SIZE {
        for x in 0..CROP_SIZE {
            // Inverse transform back into source coordinates.
            let ox = x as f32 - tx;
            let oy = y as f32 - ty;
            let sx = (a * ox - b * oy) / det;
            let sy = (b * ox + a * oy) / det;
            if let Some(px) = sample_bilinear(img, sx, sy) {
                out.put_pixel(x, y, px);
            }
        }
    }
    out
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let w00 = (1.0 - fx) * (1.0 - fy);
    let w10 = fx * (1.0 - fy);
    let w01 = (1.0 - fx) * fy;
    let w11 = fx * fy;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        // Round rather than truncate so a uniform source stays exact.
        out[c] = (p00[c] as f32 * w00
            + p10[c] as f32 * w10
            + p01[c] as f32 * w01
            + p11[c] as f32 * w11)
            .round() as u8;
    }
    Some(Rgb(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_of_identical_embeddings_is_one() {
        let e = Embedding {
            values: vec![0.6, 0.8, 0.0],
        };
        assert!((e.similarity(&e) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_of_orthogonal_embeddings_is_zero() {
        let a = Embedding {
            values: vec![1.0, 0.0],
        };
        let b = Embedding {
            values: vec![0.0, 1.0],
        };
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_clamped() {
        // Not unit length on purpose.
        let a = Embedding {
            values: vec![2.0, 0.0],
        };
        assert_eq!(a.similarity(&a), 1.0);
    }

    #[test]
    fn l2_normalize_produces_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        // Zero vector passes through untouched.
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn bilinear_on_uniform_source_is_exact() {
        let mut img = RgbImage::new(4, 4);
        for px in img.pixels_mut() {
            *px = Rgb([128, 128, 128]);
        }
        // Fractional coordinates give weights that sum to just under 1.0
        // in f32; the interpolated value must still round back to 128.
        let px = sample_bilinear(&img, 1.3, 2.7).unwrap();
        assert_eq!(px, Rgb([128, 128, 128]));

        let edge = sample_bilinear(&img, 3.9, 3.9).unwrap();
        assert_eq!(edge[0], 128);
    }

    #[test]
    fn align_face_outputs_reference_crop_size() {
        let mut img = RgbImage::new(200, 200);
        for px in img.pixels_mut() {
            *px = Rgb([128, 128, 128]);
        }
        let face = Detection {
            bbox: [60.0, 60.0, 80.0, 80.0],
            score: 0.9,
            // Horizontal eye pair; nose and mouth unused by alignment.
            landmarks: [80.0, 90.0, 120.0, 90.0, 100.0, 110.0, 85.0, 130.0, 115.0, 130.0],
        };
        let crop = align_face(&img, &face);
        assert_eq!(crop.dimensions(), (CROP_SIZE, CROP_SIZE));
        // The eye midpoint samples from inside the gray source.
        let center = crop.get_pixel(56, 52);
        assert_eq!(center[0], 128);
    }
}
