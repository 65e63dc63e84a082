//! Character lookup on screenshots through tesseract box output.
//!
//! Tesseract reports one box per recognised character, with the origin in
//! the bottom-left corner of the image. Device input uses a top-left
//! origin, so [`parse_boxes`] flips every y coordinate against the display
//! height before the boxes are used for taps.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::adb::{AdbError, DeviceChannel};
use crate::config::AndromateConfig;
use crate::device::Device;
use crate::element::Point;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("malformed box line '{line}': {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("tesseract is not installed or not on PATH")]
    NotInstalled,

    #[error("tesseract failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Device(#[from] AdbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One recognised character, in device coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrElement {
    pub ch: String,
    pub bottom_left: Point,
    pub top_right: Point,
}

impl OcrElement {
    pub fn center(&self) -> Point {
        Point::new(
            self.bottom_left.x + (self.top_right.x - self.bottom_left.x) / 2,
            self.top_right.y + (self.bottom_left.y - self.top_right.y) / 2,
        )
    }

    /// Flips both corners against a display of the given height.
    pub fn flip_y(self, display_height: i32) -> Self {
        Self {
            ch: self.ch,
            bottom_left: Point::new(self.bottom_left.x, display_height - self.bottom_left.y),
            top_right: Point::new(self.top_right.x, display_height - self.top_right.y),
        }
    }
}

fn parse_line(line: &str) -> Result<OcrElement, OcrError> {
    let malformed = |reason: &str| OcrError::MalformedLine {
        line: line.to_string(),
        reason: reason.to_string(),
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(malformed("expected a character and four coordinates"));
    }
    let mut coords = [0i32; 4];
    for (slot, field) in coords.iter_mut().zip(&fields[1..5]) {
        *slot = field
            .parse()
            .map_err(|_| malformed(&format!("'{}' is not an integer", field)))?;
    }
    Ok(OcrElement {
        ch: fields[0].to_string(),
        bottom_left: Point::new(coords[0], coords[1]),
        top_right: Point::new(coords[2], coords[3]),
    })
}

/// Parses tesseract box output into elements with flipped y coordinates.
///
/// Each non-empty line is `c x1 y1 x2 y2 [page]`.
pub fn parse_boxes(raw: &str, display_height: i32) -> Result<Vec<OcrElement>, OcrError> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(line).map(|element| element.flip_y(display_height)))
        .collect()
}

/// First element recognised as `ch`.
pub fn find_character<'a>(elements: &'a [OcrElement], ch: &str) -> Option<&'a OcrElement> {
    elements.iter().find(|element| element.ch == ch)
}

/// Tap point for the first occurrence of `ch`.
pub fn tap_point_for_char(elements: &[OcrElement], ch: &str) -> Option<Point> {
    find_character(elements, ch).map(OcrElement::center)
}

/// Wrapper around the `tesseract` executable.
pub struct Tesseract {
    path: PathBuf,
}

impl Tesseract {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &AndromateConfig) -> Self {
        Self::new(&config.tesseract_path)
    }

    pub fn is_installed(&self) -> bool {
        Command::new(&self.path)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Raw box output for an image file.
    pub fn image_to_boxes(&self, image: &Path) -> Result<String, OcrError> {
        debug!(image = %image.display(), "running tesseract");
        let output = Command::new(&self.path)
            .arg(image)
            .args(["stdout", "batch.nochop", "makebox"])
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::NotInstalled,
                _ => OcrError::Io(e),
            })?;
        if !output.status.success() {
            return Err(OcrError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Recognises the characters of a screenshot of `device`, in device
/// coordinates.
pub fn process_image<C: DeviceChannel>(
    tesseract: &Tesseract,
    device: &Device<C>,
    image: &Path,
) -> Result<Vec<OcrElement>, OcrError> {
    let raw = tesseract.image_to_boxes(image)?;
    let height = device.display_height()?;
    parse_boxes(&raw, height)
}
