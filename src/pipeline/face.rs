use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::AttendanceError;

pub type Descriptor = Vec<f32>;

/// Default cosine-distance tolerance for a match.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

const REFERENCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Turns an image into zero or more face descriptors, one per detected face.
pub trait FaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<Descriptor>>;
}

/// Which enrolled identities a frame is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    Teachers,
    Students,
}

/// Names recognized in a frame. An empty set is a recognition miss, not an
/// error.
pub trait FaceMatcher {
    fn identify(&self, frame: &DynamicImage, cohort: Cohort) -> Result<HashSet<String>>;
}

/// Brute-force descriptor index. A name can own several descriptors (one per
/// face found in its reference image).
#[derive(Debug, Clone, Default)]
pub struct KnownFaces {
    names: Vec<String>,
    descriptors: Vec<Descriptor>,
}

impl KnownFaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, descriptor: Descriptor) {
        self.names.push(name.into());
        self.descriptors.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Every name with at least one descriptor within `tolerance` of at least
    /// one detected face. Several faces may vote for the same name; it is
    /// reported once.
    pub fn match_names(&self, detected: &[Descriptor], tolerance: f32) -> HashSet<String> {
        let mut out = HashSet::new();
        for face in detected {
            for (name, known) in self.names.iter().zip(&self.descriptors) {
                if out.contains(name) {
                    continue;
                }
                if cosine_distance(face, known) <= tolerance {
                    out.insert(name.clone());
                }
            }
        }
        out
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot_product / (norm_a * norm_b))
}

/// Result of encoding a reference directory.
#[derive(Debug, Default)]
pub struct Enrollment {
    pub known: KnownFaces,
    /// Images that were unreadable or contained no face.
    pub skipped: Vec<PathBuf>,
}

/// Encode every `.jpg`/`.jpeg`/`.png` directly inside `dir`. The identity is
/// the file stem. Images without a usable face are skipped with a warning.
pub fn encode_known<E: FaceEncoder + ?Sized>(dir: &Path, encoder: &E) -> Result<Enrollment> {
    if !dir.is_dir() {
        anyhow::bail!("Reference image directory {:?} does not exist", dir);
    }
    let mut enrollment = Enrollment::default();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !REFERENCE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let image = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping unreadable reference image {:?}: {}", path, e);
                enrollment.skipped.push(path.to_path_buf());
                continue;
            }
        };
        let descriptors = match encoder.encode(&image) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to encode reference image {:?}: {}", path, e);
                enrollment.skipped.push(path.to_path_buf());
                continue;
            }
        };
        if descriptors.is_empty() {
            warn!("{}", AttendanceError::ConfigurationGap(path.to_path_buf()));
            enrollment.skipped.push(path.to_path_buf());
            continue;
        }
        debug!(identity = name, faces = descriptors.len(), "reference image encoded");
        for d in descriptors {
            enrollment.known.add(name, d);
        }
    }
    info!(
        dir = ?dir,
        identities = enrollment.known.names().len(),
        descriptors = enrollment.known.len(),
        skipped = enrollment.skipped.len(),
        "reference faces loaded"
    );
    Ok(enrollment)
}

/// Matches live frames against the enrolled teacher and student faces.
pub struct Recognizer<E> {
    encoder: E,
    teachers: KnownFaces,
    students: KnownFaces,
    tolerance: f32,
}

impl<E: FaceEncoder> Recognizer<E> {
    pub fn new(encoder: E, teachers: KnownFaces, students: KnownFaces, tolerance: f32) -> Self {
        Self { encoder, teachers, students, tolerance }
    }

    /// Encode both reference directories with `encoder`.
    pub fn enroll(encoder: E, teacher_dir: &Path, student_dir: &Path, tolerance: f32) -> Result<Self> {
        let teachers = encode_known(teacher_dir, &encoder)?.known;
        let students = encode_known(student_dir, &encoder)?.known;
        if teachers.is_empty() {
            warn!("No teacher faces enrolled from {:?}; no session can open", teacher_dir);
        }
        Ok(Self::new(encoder, teachers, students, tolerance))
    }

    pub fn known(&self, cohort: Cohort) -> &KnownFaces {
        match cohort {
            Cohort::Teachers => &self.teachers,
            Cohort::Students => &self.students,
        }
    }
}

impl<E: FaceEncoder> FaceMatcher for Recognizer<E> {
    fn identify(&self, frame: &DynamicImage, cohort: Cohort) -> Result<HashSet<String>> {
        let detected = self.encoder.encode(frame)?;
        if detected.is_empty() {
            return Ok(HashSet::new());
        }
        Ok(self.known(cohort).match_names(&detected, self.tolerance))
    }
}
