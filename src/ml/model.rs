// ============================================================
// Layer 5 — Caption Model Building Blocks
// ============================================================
// Shared by both architectures:
//
//   CaptionModel     — forward to logits, vocabulary resize, loss
//   caption_loss     — next-token cross entropy, labels of -100 ignored
//   EncoderBlock     — post-norm self-attention + GELU feed-forward
//   PatchEmbedding   — strided Conv2d over the image plus learned positions
//
// Resized embedding and lm_head rows keep their trained values; new
// rows are drawn from N(0, 0.02).

use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear,
    },
    prelude::*,
    tensor::{activation::log_softmax, Distribution},
};

use crate::data::batcher::{CaptionBatch, IGNORE_INDEX};
use crate::domain::error::PipelineError;

/// What the trainer needs from a captioning model, whichever loader built it.
pub trait CaptionModel<B: Backend>: Module<B> + Sized {
    /// pixel_values [batch, 3, H, W], input_ids / attention_mask [batch, seq]
    /// → logits [batch, seq, vocab]
    fn forward(
        &self,
        pixel_values:   Tensor<B, 4>,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3>;

    fn vocab_size(&self) -> usize;

    /// Grow or shrink the token embedding and output projection.
    /// Existing rows are kept; new rows are drawn from N(0, 0.02).
    fn resize_token_embeddings(self, new_num_tokens: usize) -> Result<Self, PipelineError>;

    fn forward_loss(&self, batch: &CaptionBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward(
            batch.pixel_values.clone(),
            batch.input_ids.clone(),
            batch.attention_mask.clone(),
        );
        caption_loss(logits, batch.labels.clone())
    }
}

/// Next-token cross entropy. Position `t` predicts label `t + 1`;
/// labels equal to -100 are excluded from the mean.
pub fn caption_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch, seq, vocab] = logits.dims();
    if seq < 2 {
        return Tensor::zeros([1], &logits.device());
    }

    let logits  = logits.slice([0..batch, 0..seq - 1, 0..vocab]);
    let targets = labels.slice([0..batch, 1..seq]);

    let keep = targets.clone().equal_elem(IGNORE_INDEX).bool_not().float();
    // -100 is not a valid index; those positions are zeroed by `keep` anyway.
    let index = targets.clamp_min(0).unsqueeze_dim::<3>(2);

    let picked = log_softmax(logits, 2).gather(2, index).squeeze::<2>(2);
    let n_tokens = keep.clone().sum().clamp_min(1.0);

    (picked * keep).sum().neg() / n_tokens
}

// ─── Transformer block ────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    pub d_model:   usize,
    pub num_heads: usize,
    pub d_ff:      usize,
    #[config(default = 0.1)]
    pub dropout:   f64,
}

impl EncoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = burn::nn::LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = burn::nn::LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `mask_pad` [batch, seq] and `mask_attn` [batch, seq, seq]: true = masked.
    pub fn forward(
        &self,
        x:         Tensor<B, 3>,
        mask_pad:  Option<Tensor<B, 2, Bool>>,
        mask_attn: Option<Tensor<B, 3, Bool>>,
    ) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(x.clone());
        if let Some(mask) = mask_pad {
            input = input.mask_pad(mask);
        }
        if let Some(mask) = mask_attn {
            input = input.mask_attn(mask);
        }

        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

// ─── Patch embedding ──────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct PatchEmbeddingConfig {
    pub num_channels: usize,
    pub patch_size:   usize,
    pub image_size:   usize,
    pub hidden_size:  usize,
}

impl PatchEmbeddingConfig {
    pub fn num_patches(&self) -> usize {
        let per_side = self.image_size / self.patch_size;
        per_side * per_side
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchEmbedding<B> {
        let p = self.patch_size;
        let proj = Conv2dConfig::new([self.num_channels, self.hidden_size], [p, p])
            .with_stride([p, p])
            .init(device);
        let position = EmbeddingConfig::new(self.num_patches(), self.hidden_size).init(device);
        PatchEmbedding { proj, position }
    }
}

/// Non-overlapping patches → [batch, num_patches, hidden] with learned positions.
#[derive(Module, Debug)]
pub struct PatchEmbedding<B: Backend> {
    pub proj:     Conv2d<B>,
    pub position: Embedding<B>,
}

impl<B: Backend> PatchEmbedding<B> {
    pub fn forward(&self, pixel_values: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.proj.forward(pixel_values); // [batch, hidden, gh, gw]
        let [batch, hidden, gh, gw] = x.dims();
        let n = gh * gw;
        let x = x.reshape([batch, hidden, n]).swap_dims(1, 2);

        let positions = Tensor::<B, 1, Int>::arange(0..n as i64, &x.device())
            .unsqueeze::<2>()
            .expand([batch, n]);
        x + self.position.forward(positions)
    }
}

/// Token positions 0..seq for every row of the batch.
pub fn position_ids<B: Backend>(batch: usize, seq: usize, device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::<B, 1, Int>::arange(0..seq as i64, device)
        .unsqueeze::<2>()
        .expand([batch, seq])
}

// ─── Vocabulary resizing ──────────────────────────────────────────────────────
fn check_new_size(new_num_tokens: usize) -> Result<(), PipelineError> {
    if new_num_tokens == 0 {
        return Err(PipelineError::VocabResize(
            "new vocabulary size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Embedding weight [vocab, d] resized along the vocabulary axis.
pub fn resize_embedding<B: Backend>(
    embedding:      Embedding<B>,
    new_num_tokens: usize,
) -> Result<Embedding<B>, PipelineError> {
    check_new_size(new_num_tokens)?;
    let weight = embedding.weight.val();
    let [old, d] = weight.dims();

    let weight = if new_num_tokens <= old {
        weight.slice([0..new_num_tokens, 0..d])
    } else {
        let extra = Tensor::<B, 2>::random(
            [new_num_tokens - old, d],
            Distribution::Normal(0.0, 0.02),
            &weight.device(),
        );
        Tensor::cat(vec![weight, extra], 0)
    };

    Ok(Embedding { weight: Param::from_tensor(weight) })
}

/// Output projection weight [d, vocab] (and bias [vocab]) resized along
/// the vocabulary axis.
pub fn resize_lm_head<B: Backend>(
    head:           Linear<B>,
    new_num_tokens: usize,
) -> Result<Linear<B>, PipelineError> {
    check_new_size(new_num_tokens)?;
    let weight = head.weight.val();
    let [d, old] = weight.dims();
    let device = weight.device();

    let weight = if new_num_tokens <= old {
        weight.slice([0..d, 0..new_num_tokens])
    } else {
        let extra = Tensor::<B, 2>::random(
            [d, new_num_tokens - old],
            Distribution::Normal(0.0, 0.02),
            &device,
        );
        Tensor::cat(vec![weight, extra], 1)
    };

    let bias = head.bias.map(|b| {
        let b = b.val();
        let b = if new_num_tokens <= old {
            b.slice([0..new_num_tokens])
        } else {
            Tensor::cat(vec![b, Tensor::zeros([new_num_tokens - old], &device)], 0)
        };
        Param::from_tensor(b)
    });

    Ok(Linear { weight: Param::from_tensor(weight), bias })
}
