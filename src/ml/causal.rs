// ============================================================
// Layer 5 — Causal-LM captioner (GIT-style)
// ============================================================
// One transformer stack reads the image patches and the caption
// as a single sequence:
//
//   [ p_1 … p_n | t_1 … t_m ]
//
//   image rows attend to image columns only
//   text rows attend to every image column and to text columns ≤ own
//
// Logits are produced for the text positions only, so the output
// lines up with `input_ids` / `labels` and the shared next-token loss
// applies unchanged.
//
// Reference: Wang et al. (2022) GIT: A Generative Image-to-text Transformer

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::domain::error::PipelineError;
use crate::ml::config::PretrainedConfig;
use crate::ml::model::{
    position_ids, resize_embedding, resize_lm_head,
    CaptionModel, EncoderBlock, EncoderBlockConfig, PatchEmbedding, PatchEmbeddingConfig,
};

#[derive(Config, Debug)]
pub struct CausalCaptionerConfig {
    pub vocab_size:          usize,
    pub hidden_size:         usize,
    pub num_layers:          usize,
    pub num_heads:           usize,
    pub intermediate_size:   usize,
    pub max_positions:       usize,
    pub image_size:          usize,
    pub patch_size:          usize,
    pub num_channels:        usize,
    pub vision_hidden_size:  usize,
    pub vision_layers:       usize,
    pub vision_heads:        usize,
    pub vision_intermediate: usize,
    #[config(default = 0.1)]
    pub dropout:             f64,
}

impl CausalCaptionerConfig {
    pub fn from_pretrained(config: &PretrainedConfig) -> Self {
        let text   = config.text_dims();
        let vision = config.vision_dims();
        Self::new(
            text.vocab_size, text.hidden_size, text.num_layers, text.num_heads,
            text.intermediate, text.max_positions,
            vision.image_size, vision.patch_size, vision.num_channels,
            vision.hidden_size, vision.num_layers, vision.num_heads, vision.intermediate,
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalCaptioner<B> {
        let patch_embed = PatchEmbeddingConfig::new(
            self.num_channels, self.patch_size, self.image_size, self.vision_hidden_size,
        )
        .init(device);

        let vision_block = EncoderBlockConfig::new(
            self.vision_hidden_size, self.vision_heads, self.vision_intermediate,
        )
        .with_dropout(self.dropout);
        let vision_layers = (0..self.vision_layers).map(|_| vision_block.init(device)).collect();

        let text_block = EncoderBlockConfig::new(
            self.hidden_size, self.num_heads, self.intermediate_size,
        )
        .with_dropout(self.dropout);
        let layers = (0..self.num_layers).map(|_| text_block.init(device)).collect();

        CausalCaptioner {
            patch_embed,
            vision_layers,
            visual_projection:  LinearConfig::new(self.vision_hidden_size, self.hidden_size).init(device),
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            position_embedding: EmbeddingConfig::new(self.max_positions, self.hidden_size).init(device),
            layers,
            final_norm: LayerNormConfig::new(self.hidden_size).init(device),
            lm_head:    LinearConfig::new(self.hidden_size, self.vocab_size).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct CausalCaptioner<B: Backend> {
    pub patch_embed:        PatchEmbedding<B>,
    pub vision_layers:      Vec<EncoderBlock<B>>,
    pub visual_projection:  Linear<B>,
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub dropout:            Dropout,
}

/// [batch, n+m, n+m] attention mask for an image prefix of `n` tokens
/// followed by `m` caption tokens. true = masked.
pub fn prefix_causal_mask<B: Backend>(
    batch:  usize,
    n:      usize,
    m:      usize,
    device: &B::Device,
) -> Tensor<B, 3, Bool> {
    let s = n + m;
    let mut masked = Vec::with_capacity(s * s);
    for i in 0..s {
        for j in 0..s {
            let blocked = if i < n { j >= n } else { j >= n && j > i };
            masked.push(blocked);
        }
    }
    Tensor::<B, 2, Bool>::from_data(TensorData::new(masked, [s, s]), device)
        .unsqueeze::<3>()
        .expand([batch, s, s])
}

impl<B: Backend> CaptionModel<B> for CausalCaptioner<B> {
    fn forward(
        &self,
        pixel_values:   Tensor<B, 4>,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let [batch, m] = input_ids.dims();
        let device = input_ids.device();

        // ── Image prefix ─────────────────────────────────────────────────────
        let mut image = self.patch_embed.forward(pixel_values);
        for layer in &self.vision_layers {
            image = layer.forward(image, None, None);
        }
        let image = self.visual_projection.forward(image);
        let n = image.dims()[1];

        // ── Caption tokens ───────────────────────────────────────────────────
        let text = self.token_embedding.forward(input_ids)
            + self.position_embedding.forward(position_ids::<B>(batch, m, &device));

        let mut x = self.dropout.forward(Tensor::cat(vec![image, text], 1));

        // Image positions are never padding.
        let mask_pad = Tensor::cat(
            vec![Tensor::<B, 2, Int>::ones([batch, n], &device), attention_mask],
            1,
        )
        .equal_elem(0);
        let mask_attn = prefix_causal_mask::<B>(batch, n, m, &device);

        for layer in &self.layers {
            x = layer.forward(x, Some(mask_pad.clone()), Some(mask_attn.clone()));
        }
        let x = self.final_norm.forward(x);

        let hidden = x.dims()[2];
        self.lm_head.forward(x.slice([0..batch, n..n + m, 0..hidden]))
    }

    fn vocab_size(&self) -> usize {
        self.lm_head.weight.val().dims()[1]
    }

    fn resize_token_embeddings(self, new_num_tokens: usize) -> Result<Self, PipelineError> {
        Ok(Self {
            token_embedding: resize_embedding(self.token_embedding, new_num_tokens)?,
            lm_head:         resize_lm_head(self.lm_head, new_num_tokens)?,
            ..self
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// 8×8 images, 4×4 patches, 16-dim text stack.
    pub fn tiny_config(vocab_size: usize) -> CausalCaptionerConfig {
        CausalCaptionerConfig::new(vocab_size, 16, 1, 2, 32, 16, 8, 4, 3, 8, 1, 2, 16)
            .with_dropout(0.0)
    }
}
