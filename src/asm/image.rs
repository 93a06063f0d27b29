//! Program image format.
//!
//! An image is a flat sequence of big-endian 16-bit words:
//! - word 0: load address (origin)
//! - words 1..: program contents, placed sequentially from the origin

use std::path::Path;
use thiserror::Error;

/// A program image ready to be loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Load address of the first word.
    pub origin: u16,
    /// Words to place at `origin`, `origin + 1`, ...
    pub words: Vec<u16>,
}

impl Image {
    /// Create an image.
    pub fn new(origin: u16, words: Vec<u16>) -> Self {
        Self { origin, words }
    }

    /// Parse an image from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() % 2 != 0 {
            return Err(ImageError::OddLength(bytes.len()));
        }

        let mut words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

        let origin = words.next().ok_or(ImageError::MissingOrigin)?;
        Ok(Self {
            origin,
            words: words.collect(),
        })
    }

    /// Serialize to raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        std::iter::once(self.origin)
            .chain(self.words.iter().copied())
            .flat_map(u16::to_be_bytes)
            .collect()
    }

    /// Number of program words (not counting the origin).
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if the image has no program words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate `(address, word)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words
            .iter()
            .enumerate()
            .map(move |(i, &w)| (self.origin.wrapping_add(i as u16), w))
    }
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let bytes = std::fs::read(path.as_ref())?;
    Image::from_bytes(&bytes)
}

/// Save an image file to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &Image) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), image.to_bytes())?;
    Ok(())
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image is empty: missing load address")]
    MissingOrigin,

    #[error("image length {0} is not a whole number of 16-bit words")]
    OddLength(usize),
}
