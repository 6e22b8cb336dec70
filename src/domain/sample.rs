// ============================================================
// Layer 3 — Sample Domain Types
// ============================================================
// A captioning dataset row goes through two shapes:
//
//   RawSample      → image (decoded or URL) + caption text
//   EncodedSample  → pixel values + token ids + attention mask
//
// An EncodedSample is only ever built from a row whose image
// loaded successfully. Rows that fail are never represented as
// "empty" encoded samples; the preparer returns None instead.
//
// Reference: Rust Book §6 (Enums), §5 (Structs)

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// The image value of one dataset row.
#[derive(Debug, Clone)]
pub enum RawImage {
    /// Already decoded, in memory. Encoding it never touches the network.
    Decoded(DynamicImage),

    /// A remote image that must be fetched over HTTP.
    Url(String),
}

/// One row of the source dataset, restricted to the two columns we use.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub image: RawImage,
    pub text:  String,
}

impl RawSample {
    pub fn new(image: RawImage, text: impl Into<String>) -> Self {
        Self { image, text: text.into() }
    }
}

/// One fully encoded sample: a single image and its tokenised caption.
///
/// `pixel_values` is stored flat in channel-first order; `pixel_shape`
/// is `[channels, height, width]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedSample {
    pub pixel_values:   Vec<f32>,
    pub pixel_shape:    [usize; 3],
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl EncodedSample {
    /// Number of text tokens (before batch padding).
    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }

    /// True when the sample carries usable token ids and a pixel
    /// buffer consistent with its declared shape.
    pub fn is_well_formed(&self) -> bool {
        let [c, h, w] = self.pixel_shape;
        !self.input_ids.is_empty()
            && self.attention_mask.len() == self.input_ids.len()
            && self.pixel_values.len() == c * h * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ids: Vec<u32>) -> EncodedSample {
        let mask = vec![1; ids.len()];
        EncodedSample {
            pixel_values:   vec![0.0; 3 * 2 * 2],
            pixel_shape:    [3, 2, 2],
            input_ids:      ids,
            attention_mask: mask,
        }
    }

    #[test]
    fn test_well_formed_sample() {
        assert!(sample(vec![101, 7, 102]).is_well_formed());
    }

    #[test]
    fn test_empty_ids_are_malformed() {
        assert!(!sample(vec![]).is_well_formed());
    }

    #[test]
    fn test_pixel_shape_mismatch_is_malformed() {
        let mut s = sample(vec![1, 2]);
        s.pixel_values.pop();
        assert!(!s.is_well_formed());
    }
}
