//! YuNet face detection.
//!
//! YuNet is an anchor-free detector: for each stride (8, 16, 32) it predicts,
//! per grid cell, a classification score, an objectness score, bbox deltas and
//! five landmark points. Decoding maps grid cells straight to pixel
//! coordinates on the letterboxed input canvas; NMS then prunes overlaps and
//! the survivors are mapped back to source-image coordinates.

use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, GenericImageView};
use ort::{session::Session, value::Value};

use crate::model;

const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];
/// Output tensor order: cls x3, obj x3, bbox x3, kps x3 (stride 8, 16, 32 each).
const OUTPUT_COUNT: usize = 12;

/// One detected face, in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    /// x, y, w, h
    pub bbox: [f32; 4],
    pub score: f32,
    /// Five points: left eye, right eye, nose, left mouth corner, right mouth
    /// corner, as x1,y1,...,x5,y5.
    pub landmarks: [f32; 10],
}

/// Letterbox placement of the source image on the 640x640 canvas.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_source(&self, det: Detection) -> Detection {
        let mut landmarks = [0.0f32; 10];
        for k in 0..5 {
            landmarks[k * 2] = (det.landmarks[k * 2] - self.pad_x) / self.scale;
            landmarks[k * 2 + 1] = (det.landmarks[k * 2 + 1] - self.pad_y) / self.scale;
        }
        Detection {
            bbox: [
                (det.bbox[0] - self.pad_x) / self.scale,
                (det.bbox[1] - self.pad_y) / self.scale,
                det.bbox[2] / self.scale,
                det.bbox[3] / self.scale,
            ],
            score: det.score,
            landmarks,
        }
    }
}

pub struct Detector {
    session: Session,
}

impl Detector {
    pub fn load(models_dir: &Path) -> Result<Self> {
        Ok(Self {
            session: model::detector_session(models_dir)?,
        })
    }

    /// Detect faces, returning boxes and landmarks in source coordinates.
    pub fn detect(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let (canvas, letterbox) = letterbox(img);
        let input = Value::from_array(model::bgr_chw(&canvas))?;
        let outputs = self.session.run(ort::inputs![input])?;

        let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(OUTPUT_COUNT);
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            raw.push((shape.iter().copied().collect(), data.to_vec()));
        }
        if raw.len() != OUTPUT_COUNT {
            anyhow::bail!(
                "detector produced {} outputs, expected {OUTPUT_COUNT}",
                raw.len()
            );
        }

        let mut detections = Vec::new();
        for (idx, &stride) in STRIDES.iter().enumerate() {
            let grid = INPUT_SIZE as usize / stride;
            let cells = grid * grid;

            let cls = stride_output(&raw, idx, cells, 1).context("cls output")?;
            let obj = stride_output(&raw, idx + 3, cells, 1).context("obj output")?;
            let boxes = stride_output(&raw, idx + 6, cells, 4).context("bbox output")?;
            let kps = stride_output(&raw, idx + 9, cells, 10).context("kps output")?;

            let scores: Vec<f32> = cls
                .iter()
                .zip(obj.iter())
                .map(|(c, o)| sigmoid(c * o))
                .collect();

            decode_stride(&scores, boxes, kps, stride, score_threshold, &mut detections);
        }

        let kept = nms(&detections, nms_threshold);
        Ok(kept.into_iter().map(|d| letterbox.to_source(d)).collect())
    }
}

/// Scale the image to fit a 640x640 canvas, centered, aspect ratio preserved.
fn letterbox(img: &DynamicImage) -> (image::RgbImage, Letterbox) {
    let (width, height) = img.dimensions();
    let scale = INPUT_SIZE as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);

    let resized = img
        .resize_exact(new_width, new_height, imageops::FilterType::Triangle)
        .to_rgb8();

    let pad_x = (INPUT_SIZE - new_width) / 2;
    let pad_y = (INPUT_SIZE - new_height) / 2;
    let mut canvas = image::RgbImage::new(INPUT_SIZE, INPUT_SIZE);
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Validate shape [1, cells, channels] and return the data slice.
fn stride_output(
    raw: &[(Vec<i64>, Vec<f32>)],
    idx: usize,
    cells: usize,
    channels: i64,
) -> Result<&[f32]> {
    let (shape, data) = &raw[idx];
    if *shape != [1, cells as i64, channels] {
        anyhow::bail!(
            "output {idx} has shape {shape:?}, expected [1, {cells}, {channels}]"
        );
    }
    Ok(data)
}

/// Anchor-free grid decode for one stride, in canvas pixel coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    score_threshold: f32,
    out: &mut Vec<Detection>,
) {
    let grid = INPUT_SIZE as usize / stride;
    let stride = stride as f32;

    for row in 0..grid {
        for col in 0..grid {
            let cell = row * grid + col;
            let score = scores[cell];
            if score < score_threshold {
                continue;
            }

            let cx = (col as f32 + boxes[cell * 4]) * stride;
            let cy = (row as f32 + boxes[cell * 4 + 1]) * stride;
            let w = boxes[cell * 4 + 2] * stride;
            let h = boxes[cell * 4 + 3] * stride;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col as f32 + kps[cell * 10 + k * 2]) * stride;
                landmarks[k * 2 + 1] = (row as f32 + kps[cell * 10 + k * 2 + 1]) * stride;
            }

            out.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Greedy non-maximum suppression by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .score
            .partial_cmp(&detections[a].score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for &i in &order {
        let candidate = &detections[i];
        if keep.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            keep.push(candidate.clone());
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}
