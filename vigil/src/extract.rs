// vigil/src/extract.rs
//
// Motion-based frame extraction. A video is decoded to RGB24 by an ffmpeg
// child process; every `interval × fps`-th source frame is sampled, and a
// sample is emitted only when its motion score — mean grayscale absolute
// difference against the previous *sample*, both downscaled to 320×240 —
// reaches the configured threshold. Emitted frames carry the original
// resolution, JPEG-compressed.
//
// The sequence is lazy: nothing is decoded past what the consumer pulls,
// and the ffmpeg child is killed when the extractor is dropped.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::OutputVideoFrame;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{Frame, FrameIdentity};

pub const FALLBACK_FPS: f64 = 30.0;
pub const JPEG_QUALITY: u8 = 80;

// Motion comparison resolution. Small enough that scoring is cheap at any
// source resolution.
const MOTION_W: u32 = 320;
const MOTION_H: u32 = 240;

pub struct FrameExtractor {
    child: FfmpegChild,
    frames: Box<dyn Iterator<Item = OutputVideoFrame> + Send>,
    identity: FrameIdentity,
    stride: u64,
    threshold: f64,
    /// Source frame counter — frame ids are source indices, so they are
    /// strictly increasing in capture order.
    index: u64,
    /// Downscaled grayscale of the previous sample (not the previous
    /// emission) — the comparison baseline.
    prev: Option<GrayImage>,
}

impl FrameExtractor {
    /// Open a video source. Fails with `SourceUnavailable` when the file is
    /// missing or the decoder cannot be spawned; a source that opens but
    /// yields no frames produces an empty sequence instead.
    pub fn open(
        path: &Path,
        interval_secs: f64,
        threshold: f64,
        identity: FrameIdentity,
    ) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::SourceUnavailable(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let fps = probe_fps(path).unwrap_or(FALLBACK_FPS);
        let stride = sample_stride(interval_secs, fps);
        info!(
            "Extractor opened {} (fps={:.2}, stride={}, threshold={})",
            path.display(),
            fps,
            stride,
            threshold
        );

        let mut cmd = FfmpegCommand::new();
        cmd.input(path.to_string_lossy().as_ref()).rawvideo();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::SourceUnavailable(format!("failed to spawn ffmpeg: {e}")))?;
        let events = child
            .iter()
            .map_err(|e| Error::SourceUnavailable(format!("failed to read ffmpeg output: {e}")))?;

        Ok(Self {
            child,
            frames: Box::new(events.filter_frames()),
            identity,
            stride,
            threshold,
            index: 0,
            prev: None,
        })
    }

    fn emit(&self, img: RgbImage, frame_id: u64, motion_score: f64) -> Result<Frame> {
        let mut jpeg = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&img)
            .map_err(|e| Error::FrameDecode(format!("jpeg encode: {e}")))?;
        Ok(Frame {
            frame_id,
            motion_score,
            payload: Bytes::from(jpeg.into_inner()),
            camera_id: self.identity.camera_id.clone(),
            zone_id: self.identity.zone_id.clone(),
            location: self.identity.location.clone(),
            captured_at: Utc::now(),
        })
    }
}

impl Iterator for FrameExtractor {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.frames.next()?;
            let frame_id = self.index;
            self.index += 1;
            if frame_id % self.stride != 0 {
                continue;
            }

            let img = match rgb_image(raw) {
                Ok(img) => img,
                Err(e) => return Some(Err(e)),
            };
            let gray = downscaled_gray(&img);
            let score = match self.prev.take() {
                // First sample is baseline only, never emitted.
                None => {
                    self.prev = Some(gray);
                    continue;
                }
                Some(prev) => {
                    let score = motion_score(&prev, &gray);
                    self.prev = Some(gray);
                    score
                }
            };
            if score < self.threshold {
                debug!("frame {} below threshold ({:.2})", frame_id, score);
                continue;
            }
            return Some(self.emit(img, frame_id, score));
        }
    }
}

impl Drop for FrameExtractor {
    fn drop(&mut self) {
        // Release the decoder deterministically even when the sequence is
        // abandoned mid-stream.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Source frames to skip between samples: `interval × fps`, at least 1.
pub fn sample_stride(interval_secs: f64, fps: f64) -> u64 {
    (interval_secs * fps).round().max(1.0) as u64
}

/// Probe the source frame rate via ffprobe. `None` on any failure — the
/// caller falls back to 30 fps.
pub fn probe_fps(path: &Path) -> Option<f64> {
    let probe = ffprobe::ffprobe(path).ok()?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))?;
    let fps = parse_frame_rate(&stream.avg_frame_rate)
        .or_else(|| parse_frame_rate(&stream.r_frame_rate))?;
    (fps > 0.0).then_some(fps)
}

/// Parse an ffprobe frame-rate string ("30000/1001" or "29.97").
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        return (den != 0.0).then(|| num / den);
    }
    raw.trim().parse().ok()
}

/// Mean absolute difference over two equally-sized grayscale images.
pub fn motion_score(prev: &GrayImage, cur: &GrayImage) -> f64 {
    let a = prev.as_raw();
    let b = cur.as_raw();
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| x.abs_diff(*y) as u64)
        .sum();
    total as f64 / a.len() as f64
}

fn rgb_image(raw: OutputVideoFrame) -> Result<RgbImage> {
    let (w, h) = (raw.width, raw.height);
    RgbImage::from_raw(w, h, raw.data)
        .ok_or_else(|| Error::FrameDecode(format!("rgb24 buffer mismatch for {}x{}", w, h)))
}

fn downscaled_gray(img: &RgbImage) -> GrayImage {
    let small = imageops::resize(img, MOTION_W, MOTION_H, FilterType::Triangle);
    imageops::grayscale(&small)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_follows_interval_and_fps() {
        assert_eq!(sample_stride(5.0, 30.0), 150);
        assert_eq!(sample_stride(5.0, FALLBACK_FPS), 150);
        assert_eq!(sample_stride(1.0, 29.97), 30);
        // Degenerate rates never produce a zero stride.
        assert_eq!(sample_stride(0.0, 30.0), 1);
    }

    #[test]
    fn frame_rate_strings_parse() {
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        assert_eq!(parse_frame_rate("29.97"), Some(29.97));
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn identical_frames_score_zero() {
        let a = GrayImage::from_pixel(8, 8, image::Luma([100]));
        let b = GrayImage::from_pixel(8, 8, image::Luma([100]));
        assert_eq!(motion_score(&a, &b), 0.0);
    }

    #[test]
    fn uniform_shift_scores_its_magnitude() {
        let a = GrayImage::from_pixel(8, 8, image::Luma([100]));
        let b = GrayImage::from_pixel(8, 8, image::Luma([130]));
        assert_eq!(motion_score(&a, &b), 30.0);
        // Symmetric in argument order.
        assert_eq!(motion_score(&b, &a), 30.0);
    }

    #[test]
    fn missing_source_is_unavailable() {
        let identity = FrameIdentity {
            camera_id: "cam-1".into(),
            zone_id: "z-1".into(),
            location: "east gate".into(),
        };
        let err =
            FrameExtractor::open(Path::new("/nonexistent/clip.mp4"), 5.0, 20.0, identity)
                .err()
                .expect("must fail");
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }
}
