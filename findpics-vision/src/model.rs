use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

/// YuNet face detector, from the OpenCV model zoo.
pub const DETECTOR_FILE: &str = "face_detection_yunet_2023mar.onnx";
/// SFace face recognizer, from the OpenCV model zoo.
pub const RECOGNIZER_FILE: &str = "face_recognition_sface_2021dec.onnx";

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort::Error::<()>::from)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn detector_session(models_dir: &Path) -> Result<Session> {
    load_session(&models_dir.join(DETECTOR_FILE))
}

pub fn recognizer_session(models_dir: &Path) -> Result<Session> {
    load_session(&models_dir.join(RECOGNIZER_FILE))
}

fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!(
            "model file not found: {} (download it from the OpenCV model zoo)",
            path.display()
        );
    }
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("loading model {}", path.display()))
}

/// Lay out an RGB image as a [1, 3, H, W] tensor in BGR channel order.
///
/// Both YuNet and SFace take planar BGR input with values in [0, 255].
pub(crate) fn bgr_chw(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let pixel_count = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];

    let (b_plane, rest) = data.split_at_mut(pixel_count);
    let (g_plane, r_plane) = rest.split_at_mut(pixel_count);

    for (i, px) in img.pixels().enumerate() {
        r_plane[i] = px[0] as f32;
        g_plane[i] = px[1] as f32;
        b_plane[i] = px[2] as f32;
    }

    // Length matches the shape by construction.
    Array4::from_shape_vec((1, 3, height as usize, width as usize), data)
        .unwrap_or_else(|_| Array4::zeros((1, 3, height as usize, width as usize)))
}
