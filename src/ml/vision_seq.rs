// ============================================================
// Layer 5 — Vision-to-sequence captioner (BLIP / VisionEncoderDecoder style)
// ============================================================
// Encoder-decoder split:
//
//   pixels ─► patch embedding ─► TransformerEncoder ─► memory
//                                                        │ cross-attention
//   caption ─► token + position embedding ─► TransformerDecoder ─► lm_head
//
// The decoder is causally masked and ignores padded caption
// positions; the encoder sees every patch.

use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        transformer::{
            TransformerDecoder, TransformerDecoderConfig, TransformerDecoderInput,
            TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput,
        },
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
    CaptionModel, PatchEmbedding, PatchEmbeddingConfig,
};

#[derive(Config, Debug)]
pub struct VisionSeq2SeqConfig {
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

impl VisionSeq2SeqConfig {
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

    pub fn init<B: Backend>(&self, device: &B::Device) -> VisionSeq2Seq<B> {
        let patch_embed = PatchEmbeddingConfig::new(
            self.num_channels, self.patch_size, self.image_size, self.vision_hidden_size,
        )
        .init(device);

        let encoder = TransformerEncoderConfig::new(
            self.vision_hidden_size, self.vision_intermediate, self.vision_heads, self.vision_layers,
        )
        .with_dropout(self.dropout)
        .init(device);

        let decoder = TransformerDecoderConfig::new(
            self.hidden_size, self.intermediate_size, self.num_heads, self.num_layers,
        )
        .with_dropout(self.dropout)
        .init(device);

        VisionSeq2Seq {
            patch_embed,
            encoder,
            encoder_norm:       LayerNormConfig::new(self.vision_hidden_size).init(device),
            encoder_projection: LinearConfig::new(self.vision_hidden_size, self.hidden_size).init(device),
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            position_embedding: EmbeddingConfig::new(self.max_positions, self.hidden_size).init(device),
            decoder,
            lm_head: LinearConfig::new(self.hidden_size, self.vocab_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct VisionSeq2Seq<B: Backend> {
    pub patch_embed:        PatchEmbedding<B>,
    pub encoder:            TransformerEncoder<B>,
    pub encoder_norm:       LayerNorm<B>,
    /// Maps encoder width onto the decoder width used by cross-attention.
    pub encoder_projection: Linear<B>,
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub decoder:            TransformerDecoder<B>,
    pub lm_head:            Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> CaptionModel<B> for VisionSeq2Seq<B> {
    fn forward(
        &self,
        pixel_values:   Tensor<B, 4>,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let [batch, seq] = input_ids.dims();
        let device = input_ids.device();

        let patches = self.patch_embed.forward(pixel_values);
        let memory  = self.encoder.forward(TransformerEncoderInput::new(patches));
        let memory  = self.encoder_projection.forward(self.encoder_norm.forward(memory));

        let target = self.token_embedding.forward(input_ids)
            + self.position_embedding.forward(position_ids::<B>(batch, seq, &device));
        let target = self.dropout.forward(target);

        let input = TransformerDecoderInput::new(target, memory)
            .target_mask_attn(generate_autoregressive_mask::<B>(batch, seq, &device))
            .target_mask_pad(attention_mask.equal_elem(0));

        self.lm_head.forward(self.decoder.forward(input))
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
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn tiny(vocab_size: usize) -> VisionSeq2SeqConfig {
        VisionSeq2SeqConfig::new(vocab_size, 16, 1, 2, 32, 16, 8, 4, 3, 8, 1, 2, 16)
            .with_dropout(0.0)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = tiny(30).init::<TB>(&device);

        let pixels = Tensor::<TB, 4>::zeros([2, 3, 8, 8], &device);
        let ids  = Tensor::<TB, 1, Int>::from_ints([5, 6, 7, 8, 0, 0].as_slice(), &device).reshape([2, 3]);
        let mask = Tensor::<TB, 1, Int>::from_ints([1, 1, 1, 1, 0, 0].as_slice(), &device).reshape([2, 3]);

        assert_eq!(model.forward(pixels, ids, mask).dims(), [2, 3, 30]);
    }

    #[test]
    fn test_from_pretrained_reads_blip_sections() {
        let cfg: PretrainedConfig = serde_json::from_str(r#"{
            "architectures": ["BlipForConditionalGeneration"],
            "text_config":   {"vocab_size": 50, "hidden_size": 32, "num_attention_heads": 4},
            "vision_config": {"image_size": 16, "patch_size": 8, "hidden_size": 24}
        }"#).unwrap();
        let model_cfg = VisionSeq2SeqConfig::from_pretrained(&cfg);

        assert_eq!(model_cfg.vocab_size, 50);
        assert_eq!(model_cfg.hidden_size, 32);
        assert_eq!(model_cfg.num_heads, 4);
        assert_eq!(model_cfg.image_size, 16);
        assert_eq!(model_cfg.vision_hidden_size, 24);
    }

    #[test]
    fn test_shrink_vocabulary() {
        let device = Default::default();
        let model = tiny(30).init::<TB>(&device).resize_token_embeddings(12).unwrap();
        assert_eq!(model.vocab_size(), 12);
        assert_eq!(model.token_embedding.weight.val().dims(), [12, 16]);
    }
}
