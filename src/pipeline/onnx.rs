//! ONNX face encoder: SCRFD detection followed by ArcFace embedding.
//!
//! Models are fetched into `models_dir` on first start unless
//! `ATTEND_FACE_AUTO_DOWNLOAD=0`. `HF_TOKEN` is sent when set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::pipeline::face::{Descriptor, FaceEncoder};

const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL_URL: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";
const SCRFD_FILE: &str = "scrfd_500m_bnkps.onnx";
const ARCFACE_FILE: &str = "w600k_r50.onnx";

const DETECT_SIZE: u32 = 640;
const EMBED_SIZE: u32 = 112;
const STRIDES: [u32; 3] = [8, 16, 32];
const MIN_FACE_PX: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

pub struct OnnxFaceEncoder {
    models_dir: PathBuf,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
    detector: Option<Mutex<Session>>,
    embedder: Option<Mutex<Session>>,
}

impl OnnxFaceEncoder {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.4,
            detector: None,
            embedder: None,
        }
    }

    pub fn with_thresholds(mut self, confidence: f32, nms_iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_iou_threshold = nms_iou;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.detector.is_some() && self.embedder.is_some()
    }

    /// Download missing models (if allowed) and load both sessions. Unlike
    /// a background indexer, capture cannot run without them, so a load
    /// failure is returned.
    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", self.models_dir))?;

        let auto_dl = std::env::var("ATTEND_FACE_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        if auto_dl {
            if let Err(e) = self.download_models().await {
                warn!("Face model auto-download failed: {:#}", e);
            }
        } else {
            info!("Face model auto-download disabled");
        }
        self.load_models()
    }

    async fn download_models(&self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);
        let client = http_client()?;

        if !scrfd_path.exists() {
            info!("Downloading SCRFD face detection model...");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
                warn!("Hugging Face download failed: {}. Trying GitHub...", e);
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
            }
        }
        if !arcface_path.exists() {
            info!("Downloading ArcFace recognition model...");
            download_file(&client, ARCFACE_MODEL_URL, &arcface_path).await?;
        }
        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);
        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!("Face models missing; expected {:?} and {:?}", scrfd_path, arcface_path);
        }
        let detector = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let embedder = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;
        self.detector = Some(Mutex::new(detector));
        self.embedder = Some(Mutex::new(embedder));
        info!(detector = ?scrfd_path, embedder = ?arcface_path, "face models loaded");
        Ok(())
    }

    pub fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let mut session = self.detector.as_ref().context("Detection model not loaded")?.lock();
        let (data, scale) = preprocess_scrfd(image);
        let input_name = session.inputs[0].name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        let shape = [1i64, 3, DETECT_SIZE as i64, DETECT_SIZE as i64];
        let input = Value::from_array((shape.to_vec(), data)).context("Failed to create SCRFD input tensor")?;
        let outputs = session.run(ort::inputs![input_name => input]).context("SCRFD inference failed")?;

        let (img_w, img_h) = (image.width() as f32, image.height() as f32);
        let mut raw = Vec::new();
        for (k, stride) in STRIDES.iter().enumerate() {
            // Named outputs first; exported models without names keep the
            // score_8/16/32, bbox_8/16/32 order.
            let score_name = format!("score_{}", stride);
            let bbox_name = format!("bbox_{}", stride);
            let score_val = outputs
                .get(score_name.as_str())
                .or_else(|| output_names.get(k).and_then(|n| outputs.get(n.as_str())));
            let bbox_val = outputs
                .get(bbox_name.as_str())
                .or_else(|| output_names.get(k + 3).and_then(|n| outputs.get(n.as_str())));
            let (Some(sv), Some(bv)) = (score_val, bbox_val) else {
                debug!(stride, "SCRFD output missing for stride");
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) = (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>()) else {
                continue;
            };
            decode_stride(
                scores,
                boxes,
                *stride,
                Decode { scale, img_w, img_h, threshold: self.confidence_threshold },
                &mut raw,
            );
        }

        let keep = nms(&raw, self.nms_iou_threshold);
        let faces: Vec<FaceBox> = keep.into_iter().map(|i| raw[i]).collect();
        debug!(candidates = raw.len(), faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }

    pub fn embed_face(&self, face_crop: &DynamicImage) -> Result<Option<Descriptor>> {
        let mut session = self.embedder.as_ref().context("Recognition model not loaded")?.lock();
        let data = preprocess_arcface(face_crop);
        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs.first().map(|o| o.name.clone());

        let shape = [1i64, 3, EMBED_SIZE as i64, EMBED_SIZE as i64];
        let input = Value::from_array((shape.to_vec(), data)).context("Failed to create ArcFace input tensor")?;
        let outputs = session.run(ort::inputs![input_name => input]).context("ArcFace inference failed")?;
        let Some(val) = output_name.as_deref().and_then(|n| outputs.get(n)) else {
            warn!("ArcFace model produced no output");
            return Ok(None);
        };
        let (_, slice) = val.try_extract_tensor::<f32>().context("Failed to extract ArcFace embedding")?;
        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            warn!("ArcFace embedding has zero norm");
            return Ok(None);
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(Some(v))
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<Descriptor>> {
        let mut out = Vec::new();
        for face in self.detect_faces(image)? {
            let x = face.x1.floor() as u32;
            let y = face.y1.floor() as u32;
            let w = (face.x2 - face.x1).ceil() as u32;
            let h = (face.y2 - face.y1).ceil() as u32;
            let crop = image.crop_imm(x, y, w.max(1), h.max(1));
            if let Some(d) = self.embed_face(&crop)? {
                out.push(d);
            }
        }
        Ok(out)
    }
}

fn http_client() -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read response body")?;
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes)", bytes.len());
    }
    // Write to a sibling first so a half-written model is never loaded.
    let partial = path.with_extension("onnx.part");
    std::fs::write(&partial, &bytes).with_context(|| format!("Failed to write {:?}", partial))?;
    std::fs::rename(&partial, path).with_context(|| format!("Failed to move model into {:?}", path))?;
    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

/// Letterbox to 640x640 (top-left aligned), BGR planes, (v - 127.5) / 128.
fn preprocess_scrfd(image: &DynamicImage) -> (Vec<f32>, f32) {
    let (ow, oh) = (image.width() as f32, image.height() as f32);
    let scale = DETECT_SIZE as f32 / ow.max(oh);
    let nw = ((ow * scale) as u32).max(1);
    let nh = ((oh * scale) as u32).max(1);
    let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
    let mut padded = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
    image::imageops::overlay(&mut padded, &resized, 0, 0);
    let rgb = padded.to_rgb8();

    let n = (DETECT_SIZE * DETECT_SIZE) as usize;
    let mut data = Vec::with_capacity(3 * n);
    for c in [2usize, 1, 0] {
        for p in rgb.pixels() {
            data.push((p[c] as f32 - 127.5) / 128.0);
        }
    }
    (data, scale)
}

fn preprocess_arcface(face_crop: &DynamicImage) -> Vec<f32> {
    let rgb = face_crop
        .resize_exact(EMBED_SIZE, EMBED_SIZE, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let mut data = Vec::with_capacity((3 * EMBED_SIZE * EMBED_SIZE) as usize);
    for c in 0..3usize {
        for p in rgb.pixels() {
            data.push((p[c] as f32 - 127.5) / 128.0);
        }
    }
    data
}

#[derive(Debug, Clone, Copy)]
struct Decode {
    scale: f32,
    img_w: f32,
    img_h: f32,
    threshold: f32,
}

/// Turn one stride's anchor scores and (l, t, r, b) distances into boxes in
/// original image coordinates.
fn decode_stride(scores: &[f32], boxes: &[f32], stride: u32, d: Decode, out: &mut Vec<FaceBox>) {
    let side = (DETECT_SIZE / stride) as usize;
    let grid = side * side;
    if grid == 0 || scores.len() % grid != 0 || boxes.len() < scores.len() * 4 {
        warn!(stride, scores = scores.len(), boxes = boxes.len(), "SCRFD output shape does not match grid");
        return;
    }
    let anchors = scores.len() / grid;
    let s = stride as f32;
    for i in 0..grid {
        let cy = (i / side) as f32 * s;
        let cx = (i % side) as f32 * s;
        for a in 0..anchors {
            let idx = i * anchors + a;
            let conf = scores[idx];
            if conf < d.threshold {
                continue;
            }
            let b = idx * 4;
            let x1 = ((cx - boxes[b] * s) / d.scale).clamp(0.0, d.img_w);
            let y1 = ((cy - boxes[b + 1] * s) / d.scale).clamp(0.0, d.img_h);
            let x2 = ((cx + boxes[b + 2] * s) / d.scale).clamp(0.0, d.img_w);
            let y2 = ((cy + boxes[b + 3] * s) / d.scale).clamp(0.0, d.img_h);
            if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
                continue;
            }
            out.push(FaceBox { x1, y1, x2, y2, confidence: conf });
        }
    }
}

fn nms(boxes: &[FaceBox], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for (i, &ia) in order.iter().enumerate() {
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in order.iter().skip(i + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
