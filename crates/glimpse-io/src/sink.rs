//! Display sinks: structured log lines, or annotated frames on disk.

use glimpse_core::source::DisplaySink;
use glimpse_core::{AnnotatedRegion, Frame, Region};
use image::{GrayImage, Luma};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outline intensity for recognised faces and captured samples.
const KNOWN_SHADE: u8 = 255;
/// Outline intensity for faces judged unknown.
const UNKNOWN_SHADE: u8 = 0;
const OUTLINE_WIDTH: u32 = 2;

const DETECTION_LOG: &str = "detections.jsonl";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Logs every detection through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink {
    frames: u64,
}

impl DisplaySink for LogSink {
    fn present(&mut self, _frame: &Frame, detections: &[AnnotatedRegion]) {
        for d in detections {
            tracing::info!(
                frame = self.frames,
                x = d.region.x,
                y = d.region.y,
                width = d.region.width,
                height = d.region.height,
                identity = %d.identity,
                distance = d.distance,
                "detection"
            );
        }
        self.frames += 1;
    }

    fn capture_progress(&mut self, _frame: &Frame, regions: &[Region], collected: usize, target: usize) {
        tracing::info!(stored = regions.len(), collected, target, "capture progress");
        self.frames += 1;
    }
}

#[derive(Serialize)]
struct DetectionRecord<'a> {
    frame: u64,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    identity: Option<&'a str>,
    distance: f64,
}

/// Writes each frame with outlined regions as `frame_NNNNNN.png` and appends
/// recognition results to `detections.jsonl` in the output directory.
///
/// Write failures are logged and do not stop the pipeline.
pub struct AnnotatingSink {
    dir: PathBuf,
    log: BufWriter<File>,
    frames: u64,
}

impl AnnotatingSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;
        let log_path = dir.join(DETECTION_LOG);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| SinkError::Io {
                path: log_path,
                source,
            })?;
        Ok(Self {
            dir,
            log: BufWriter::new(log),
            frames: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_frame<'r>(&self, frame: &Frame, outlines: impl IntoIterator<Item = (&'r Region, u8)>) {
        let Some(mut image) = frame.to_image() else {
            return;
        };
        for (region, shade) in outlines {
            draw_outline(&mut image, region, shade);
        }
        let path = self.dir.join(format!("frame_{:06}.png", self.frames));
        if let Err(e) = image.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write annotated frame");
        }
    }

    fn append_records(&mut self, detections: &[AnnotatedRegion]) -> std::io::Result<()> {
        for d in detections {
            let record = DetectionRecord {
                frame: self.frames,
                x: d.region.x,
                y: d.region.y,
                width: d.region.width,
                height: d.region.height,
                identity: d.identity.name(),
                distance: d.distance,
            };
            serde_json::to_writer(&mut self.log, &record)?;
            self.log.write_all(b"\n")?;
        }
        self.log.flush()
    }
}

impl DisplaySink for AnnotatingSink {
    fn present(&mut self, frame: &Frame, detections: &[AnnotatedRegion]) {
        self.write_frame(
            frame,
            detections.iter().map(|d| {
                let shade = if d.identity.is_known() { KNOWN_SHADE } else { UNKNOWN_SHADE };
                (&d.region, shade)
            }),
        );
        if let Err(e) = self.append_records(detections) {
            tracing::warn!(error = %e, "failed to append detection log");
        }
        self.frames += 1;
    }

    fn capture_progress(&mut self, frame: &Frame, regions: &[Region], _collected: usize, _target: usize) {
        self.write_frame(frame, regions.iter().map(|r| (r, KNOWN_SHADE)));
        self.frames += 1;
    }
}

/// Draw an `OUTLINE_WIDTH`-pixel rectangle border, clipped to the image.
pub fn draw_outline(image: &mut GrayImage, region: &Region, shade: u8) {
    let (w, h) = image.dimensions();
    if region.x >= w || region.y >= h || region.is_empty() {
        return;
    }
    let right = region.right().min(w);
    let bottom = region.bottom().min(h);
    let border = OUTLINE_WIDTH.min(region.width).min(region.height);

    for y in region.y..bottom {
        for x in region.x..right {
            let on_edge = x < region.x + border
                || x + border >= right
                || y < region.y + border
                || y + border >= bottom;
            if on_edge {
                image.put_pixel(x, y, Luma([shade]));
            }
        }
    }
}
