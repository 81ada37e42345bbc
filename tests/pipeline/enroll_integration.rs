use std::collections::HashSet;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rollcall_backend_sqlite::pipeline::face::{encode_known, Cohort, Descriptor, FaceEncoder, FaceMatcher, Recognizer};
use tempfile::TempDir;

/// One descriptor per non-black pixel in the top row, so a test image can
/// carry zero, one or several "faces".
struct PixelEncoder;

impl FaceEncoder for PixelEncoder {
    fn encode(&self, image: &DynamicImage) -> anyhow::Result<Vec<Descriptor>> {
        let rgb = image.to_rgb8();
        Ok((0..rgb.width())
            .map(|x| rgb.get_pixel(x, 0))
            .filter(|p| p.0 != [0, 0, 0])
            .map(|p| p.0.iter().map(|c| *c as f32).collect())
            .collect())
    }
}

fn write_png(path: &Path, pixels: &[[u8; 3]]) {
    let mut img = RgbImage::new(pixels.len() as u32, 1);
    for (x, p) in pixels.iter().enumerate() {
        img.put_pixel(x as u32, 0, Rgb(*p));
    }
    img.save_with_format(path, ImageFormat::Png).unwrap();
}

fn frame(pixels: &[[u8; 3]]) -> DynamicImage {
    let mut img = RgbImage::new(pixels.len() as u32, 1);
    for (x, p) in pixels.iter().enumerate() {
        img.put_pixel(x as u32, 0, Rgb(*p));
    }
    DynamicImage::ImageRgb8(img)
}

#[test]
fn test_encode_known_reads_reference_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    write_png(&dir.join("alice.png"), &[[200, 10, 10]]);
    // Two faces in one picture: both descriptors belong to bob.
    write_png(&dir.join("bob.PNG"), &[[10, 200, 10], [10, 10, 200]]);
    write_png(&dir.join("carol.png"), &[[0, 0, 0]]);
    std::fs::write(dir.join("broken.jpg"), b"not really a jpeg").unwrap();
    std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();
    std::fs::create_dir(dir.join("nested")).unwrap();
    write_png(&dir.join("nested").join("dave.png"), &[[1, 2, 3]]);

    let enrollment = encode_known(dir, &PixelEncoder).unwrap();
    let names: Vec<&str> = enrollment.known.names().into_iter().collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(enrollment.known.len(), 3);

    let skipped: Vec<String> = enrollment
        .skipped
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(skipped, vec!["broken.jpg", "carol.png"]);
}

#[test]
fn test_missing_reference_directory_is_an_error() {
    let tmp = TempDir::new().unwrap();
    assert!(encode_known(&tmp.path().join("nope"), &PixelEncoder).is_err());
}

#[test]
fn test_recognizer_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let teachers = tmp.path().join("teacher_image");
    let students = tmp.path().join("student_image");
    std::fs::create_dir_all(&teachers).unwrap();
    std::fs::create_dir_all(&students).unwrap();
    write_png(&teachers.join("teacher01.png"), &[[250, 250, 0]]);
    write_png(&students.join("alice.png"), &[[200, 10, 10]]);
    write_png(&students.join("bob.png"), &[[10, 200, 10], [10, 10, 200]]);

    let recognizer = Recognizer::enroll(PixelEncoder, &teachers, &students, 0.01).unwrap();
    assert!(recognizer.known(Cohort::Teachers).contains("teacher01"));

    // bob's second descriptor alone is enough.
    let seen = recognizer.identify(&frame(&[[10, 10, 200], [201, 9, 11]]), Cohort::Students).unwrap();
    assert_eq!(seen, HashSet::from(["alice".to_string(), "bob".to_string()]));

    // Student faces never count as teachers.
    let seen = recognizer.identify(&frame(&[[200, 10, 10]]), Cohort::Teachers).unwrap();
    assert!(seen.is_empty());

    let seen = recognizer.identify(&frame(&[[0, 0, 0]]), Cohort::Students).unwrap();
    assert!(seen.is_empty());
}
