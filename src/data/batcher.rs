// ============================================================
// Layer 4 — Caption Batcher (padding + label masking collator)
// ============================================================
// Implements Burn's Batcher trait to turn Vec<EncodedSample>
// into tensors for one optimisation step.
//
// Captions have different lengths, so padding happens here:
//
//   lengths [3, 5, 2]  →  every row padded to width 5
//
//   input_ids       7  8  9  P  P        P = pad token id
//   attention_mask  1  1  1  0  0
//   labels          7  8  9 -100 -100    pad positions ignored by the loss
//
// Steps:
//   1. Validate every sample (token ids present, mask length,
//      pixel shape). Any malformed sample aborts the batch with
//      the count and indices of the offenders.
//   2. Stack pixel buffers → [batch, 3, H, W]
//   3. Right-pad ids and masks to the longest caption
//   4. labels = padded ids with pad positions set to -100
//
// The host-side work lives in `collate`, which tests call
// directly; `Batcher::batch` only moves the result onto the device.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::{error::PipelineError, sample::EncodedSample};

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i32 = -100;

/// Host-side padded batch, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    pub batch_size:     usize,
    pub seq_len:        usize,
    /// [channels, height, width] shared by every image in the batch
    pub pixel_shape:    [usize; 3],
    pub pixel_values:   Vec<f32>,
    pub input_ids:      Vec<i32>,
    pub attention_mask: Vec<i32>,
    pub labels:         Vec<i32>,
}

/// Pad, stack and mask `items`.
pub fn collate(items: &[EncodedSample], pad_token_id: u32) -> Result<PaddedBatch, PipelineError> {
    let batch_size = items.len();
    if batch_size == 0 {
        return Err(PipelineError::MalformedBatch { count: 0, total: 0, indices: vec![] });
    }

    // ── Step 1: integrity check ──────────────────────────────────────────────
    let pixel_shape = items[0].pixel_shape;
    let malformed: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_well_formed() || s.pixel_shape != pixel_shape)
        .map(|(i, _)| i)
        .collect();

    if !malformed.is_empty() {
        for &i in &malformed {
            tracing::error!(
                "Malformed feature {}: {} input_ids, {} mask entries, pixel shape {:?}",
                i,
                items[i].input_ids.len(),
                items[i].attention_mask.len(),
                items[i].pixel_shape,
            );
        }
        return Err(PipelineError::MalformedBatch {
            count:   malformed.len(),
            total:   batch_size,
            indices: malformed,
        });
    }

    // ── Step 2: stack pixels ─────────────────────────────────────────────────
    let pixel_values: Vec<f32> = items
        .iter()
        .flat_map(|s| s.pixel_values.iter().copied())
        .collect();

    // ── Step 3: right-pad to the longest caption ─────────────────────────────
    let seq_len = items.iter().map(EncodedSample::seq_len).max().unwrap_or(0);

    let mut input_ids      = vec![pad_token_id as i32; batch_size * seq_len];
    let mut attention_mask = vec![0i32; batch_size * seq_len];
    let mut labels         = vec![IGNORE_INDEX; batch_size * seq_len];

    for (i, s) in items.iter().enumerate() {
        let row = i * seq_len;
        for (j, (&id, &m)) in s.input_ids.iter().zip(&s.attention_mask).enumerate() {
            input_ids[row + j]      = id as i32;
            attention_mask[row + j] = m as i32;
            // ── Step 4: labels copy real positions only ──────────────────────
            labels[row + j]         = id as i32;
        }
    }

    Ok(PaddedBatch {
        batch_size,
        seq_len,
        pixel_shape,
        pixel_values,
        input_ids,
        attention_mask,
        labels,
    })
}

// ─── CaptionBatch ─────────────────────────────────────────────────────────────
/// A batch on device. All tensors have batch_size as their first dimension.
#[derive(Debug, Clone)]
pub struct CaptionBatch<B: Backend> {
    /// [batch, 3, H, W]
    pub pixel_values:   Tensor<B, 4>,
    /// [batch, seq_len]
    pub input_ids:      Tensor<B, 2, Int>,
    /// [batch, seq_len], 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
    /// [batch, seq_len], -100 at padding
    pub labels:         Tensor<B, 2, Int>,
}

impl<B: Backend> CaptionBatch<B> {
    pub fn from_padded(batch: &PaddedBatch, device: &B::Device) -> Self {
        let [c, h, w] = batch.pixel_shape;
        let shape2 = [batch.batch_size, batch.seq_len];

        let pixel_values = Tensor::<B, 1>::from_floats(batch.pixel_values.as_slice(), device)
            .reshape([batch.batch_size, c, h, w]);
        let input_ids = Tensor::<B, 1, Int>::from_ints(batch.input_ids.as_slice(), device)
            .reshape(shape2);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(batch.attention_mask.as_slice(), device)
            .reshape(shape2);
        let labels = Tensor::<B, 1, Int>::from_ints(batch.labels.as_slice(), device)
            .reshape(shape2);

        Self { pixel_values, input_ids, attention_mask, labels }
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }
}

// ─── CaptionBatcher ───────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct CaptionBatcher<B: Backend> {
    pub device:       B::Device,
    pub pad_token_id: u32,
}

impl<B: Backend> CaptionBatcher<B> {
    pub fn new(device: B::Device, pad_token_id: u32) -> Self {
        Self { device, pad_token_id }
    }
}

// The loader cannot propagate errors, so the batch result is the item type;
// the training loop applies `?` to each batch and aborts on the first failure.
impl<B: Backend> Batcher<EncodedSample, Result<CaptionBatch<B>, PipelineError>> for CaptionBatcher<B> {
    fn batch(&self, items: Vec<EncodedSample>) -> Result<CaptionBatch<B>, PipelineError> {
        let padded = collate(&items, self.pad_token_id)?;
        Ok(CaptionBatch::from_padded(&padded, &self.device))
    }
}
