// ============================================================
// Layer 2 — FinetuneUseCase
// ============================================================
// Orchestrates the full fine-tuning job in order:
//
//   Step 1: Log the run, save training_args.json   (Layer 6 - infra)
//   Step 2: Load train / eval splits               (Layer 4 - data)
//   Step 3: Validate image and text columns        (Layer 4 - data)
//   Step 4: Load config, image processor, tokenizer (Layer 5/6)
//   Step 5: Truncate to max_*_samples              (Layer 4 - data)
//   Step 6: Encode samples, drop unusable rows     (Layer 4 - data)
//   Step 7: preprocessing_only → write JSON, stop  (Layer 4 - data)
//   Step 8: Dispatch on architecture, build model  (Layer 5 - ml)
//   Step 9: Optional vocabulary resize             (Layer 5 - ml)
//   Step 10: Save processor, tokenizer, config     (Layer 4/5/6)
//   Step 11: Train and/or evaluate, save results   (Layer 5/6)
//
// Everything is written on the main process only; replicas compute
// but never touch output_dir.

use anyhow::Result;
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use std::path::PathBuf;

use crate::cli::args::{DataArguments, ModelArguments, TrainingArguments};
use crate::data::{
    dataset::CaptionDataset,
    image_processor::ImageProcessor,
    loader::{DatasetLoader, JsonlSplit},
    preprocessor::CaptionPreparer,
    splitter::DEFAULT_TEST_SIZE,
};
use crate::domain::{
    error::PipelineError,
    traits::{SampleSource, SavePretrained},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    http::HttpImageFetcher,
    hub::PretrainedResolver,
    metrics::MetricsLogger,
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    config::PretrainedConfig,
    dispatcher::{load_model, LoadedModel},
    model::CaptionModel,
    trainer::CaptionTrainer,
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Raw splits after loading, holdout and truncation.
#[derive(Debug, Default)]
pub struct RawSplits {
    pub train: Option<JsonlSplit>,
    pub eval:  Option<JsonlSplit>,
}

/// Encoded splits ready for the trainer.
#[derive(Debug, Default)]
pub struct PreparedSplits {
    pub train: Option<CaptionDataset>,
    pub eval:  Option<CaptionDataset>,
}

/// Everything loaded from the pretrained checkpoint except the weights.
struct Pretrained {
    resolver:        PretrainedResolver,
    config:          PretrainedConfig,
    image_processor: ImageProcessor,
    tokenizer:       TokenizerStore,
}

pub struct FinetuneUseCase {
    model:    ModelArguments,
    data:     DataArguments,
    training: TrainingArguments,
}

impl FinetuneUseCase {
    pub fn new(model: ModelArguments, data: DataArguments, training: TrainingArguments) -> Self {
        Self { model, data, training }
    }

    /// Execute the job end to end on the default WGPU device.
    pub fn execute(&self) -> Result<()> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        self.execute_on::<MyBackend>(&device)
    }

    pub fn execute_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<()> {
        let training = &self.training;
        let is_main  = training.is_main_process();

        // ── Step 1: run summary ──────────────────────────────────────────────
        tracing::info!(
            "Process rank: {}, device: {:?}, distributed training: {}",
            training.local_rank,
            device,
            training.local_rank != -1,
        );
        tracing::info!("Training/evaluation parameters {:?}", training);

        let checkpoints = CheckpointManager::new(&training.output_dir)?;
        if is_main {
            checkpoints.save_training_args(training)?;
        }

        // ── Steps 2-3: dataset ───────────────────────────────────────────────
        let splits = self.load_splits()?;
        let Some(first) = splits.train.as_ref().or(splits.eval.as_ref()) else {
            tracing::warn!("Neither do_train nor do_eval is set; nothing to do");
            return Ok(());
        };
        self.validate_columns(first)?;

        // ── Step 4: pretrained artefacts ─────────────────────────────────────
        let pretrained = self.load_pretrained()?;

        // ── Step 5: truncation ───────────────────────────────────────────────
        let splits = self.truncate(splits);

        // ── Step 6: encode ───────────────────────────────────────────────────
        let prepared = self.prepare(&splits, &pretrained)?;

        // ── Step 7: preprocessing-only exit ──────────────────────────────────
        if self.data.preprocessing_only {
            let written = self.save_preprocessed(&splits, &prepared)?;
            tracing::info!("Data preprocessing finished. Files cached at {:?}.", written);
            return Ok(());
        }

        // ── Step 8: model ────────────────────────────────────────────────────
        let checkpoint = self.model.model_source();
        let loaded = load_model::<B>(&pretrained.resolver, checkpoint, &pretrained.config, device)?
            .ok_or_else(|| PipelineError::UnknownArchitecture {
                architecture: pretrained.config.primary_architecture().unwrap_or_default().to_string(),
                checkpoint:   checkpoint.to_string(),
            })?;
        tracing::info!("Model ready: {} ({} parameters)", loaded.category(), loaded.num_params());

        match loaded {
            LoadedModel::CausalLm(model) => {
                self.run_model::<B, _>(model, pretrained, prepared, &checkpoints, device)
            }
            LoadedModel::VisionToSeq(model) => {
                self.run_model::<B, _>(model, pretrained, prepared, &checkpoints, device)
            }
        }
    }

    /// Train split when `do_train`; eval split when `do_eval` names one,
    /// otherwise 15% of the train split is held out.
    pub fn load_splits(&self) -> Result<RawSplits> {
        let data     = &self.data;
        let training = &self.training;
        let loader   = DatasetLoader::new(&data.dataset_name, data.dataset_config_name.clone());

        let mut splits = RawSplits::default();
        if training.do_train {
            splits.train = Some(loader.load_split(data.train_split())?);
        }

        match (&data.eval_split_name, splits.train.take()) {
            (Some(name), train) => {
                if training.do_eval {
                    splits.eval = Some(loader.load_split(name)?);
                }
                splits.train = train;
            }
            (None, Some(train)) => {
                let (train, eval) = train.train_test_split(DEFAULT_TEST_SIZE, training.seed);
                tracing::info!(
                    "No eval split named; held out {} of {} rows for evaluation",
                    eval.num_rows(),
                    train.num_rows() + eval.num_rows(),
                );
                splits.train = Some(train);
                splits.eval  = Some(eval);
            }
            (None, None) => {}
        }

        if training.do_eval && splits.eval.is_none() {
            return Err(PipelineError::Config(
                "do_eval needs either eval_split_name or a train split to hold out from".to_string(),
            )
            .into());
        }
        Ok(splits)
    }

    /// Both configured columns must exist in `split`.
    pub fn validate_columns(&self, split: &dyn SampleSource) -> Result<(), PipelineError> {
        let available = split.column_names();
        for column in [&self.data.image_column_name, &self.data.text_column_name] {
            if !available.contains(column) {
                return Err(PipelineError::MissingColumn {
                    column:    column.clone(),
                    available: available.clone(),
                });
            }
        }
        Ok(())
    }

    fn load_pretrained(&self) -> Result<Pretrained> {
        let model    = &self.model;
        let resolver = PretrainedResolver::new(model.cache_dir.clone());

        let config = PretrainedConfig::from_pretrained(&resolver, model.config_source())?;
        let image_processor = ImageProcessor::from_pretrained(&resolver, model.model_source())?;
        let tokenizer = TokenizerStore::from_pretrained(
            &resolver,
            model.tokenizer_source(),
            model.use_fast_tokenizer,
        )?
        .with_max_length(config.text_dims().max_positions);

        let processor_cfg = image_processor.config();
        let vision = config.vision_dims();
        if processor_cfg.do_resize {
            let (w, h) = processor_cfg.size.dims();
            if (w as usize, h as usize) != (vision.image_size, vision.image_size) {
                return Err(PipelineError::Config(format!(
                    "image processor resizes to {w}x{h} but the vision encoder expects {0}x{0}",
                    vision.image_size
                ))
                .into());
            }
        }

        Ok(Pretrained { resolver, config, image_processor, tokenizer })
    }

    fn truncate(&self, mut splits: RawSplits) -> RawSplits {
        if let Some(n) = self.data.max_train_samples {
            splits.train = splits.train.map(|s| s.select(n));
        }
        if let Some(n) = self.data.max_eval_samples {
            splits.eval = splits.eval.map(|s| s.select(n));
        }
        splits
    }

    fn prepare(&self, splits: &RawSplits, pretrained: &Pretrained) -> Result<PreparedSplits> {
        let fetcher  = HttpImageFetcher::new(self.data.requests_timeout)?;
        let preparer = CaptionPreparer::new(&pretrained.image_processor, &pretrained.tokenizer, fetcher);
        let show_progress = self.training.is_main_process();

        let encode = |split: &JsonlSplit| -> Result<CaptionDataset> {
            let (samples, stats) = preparer.prepare_split(
                split,
                &self.data.image_column_name,
                &self.data.text_column_name,
                show_progress,
            )?;
            tracing::info!(
                "Prepared split '{}': kept {}, dropped {} ({:.1}%)",
                split.name(),
                stats.kept,
                stats.dropped,
                stats.drop_rate() * 100.0,
            );
            Ok(CaptionDataset::new(samples))
        };

        let mut prepared = PreparedSplits::default();
        if self.training.do_train {
            prepared.train = splits.train.as_ref().map(&encode).transpose()?;
        }
        if self.training.do_eval {
            prepared.eval = splits.eval.as_ref().map(&encode).transpose()?;
        }
        Ok(prepared)
    }

    /// `<cache_dir or output_dir>/preprocessed/<split>.json`
    fn save_preprocessed(&self, splits: &RawSplits, prepared: &PreparedSplits) -> Result<Vec<PathBuf>> {
        let root = self
            .model
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.training.output_dir.clone())
            .join("preprocessed");

        let mut written = Vec::new();
        if !self.training.is_main_process() {
            return Ok(written);
        }
        let pairs = [
            (splits.train.as_ref(), prepared.train.as_ref()),
            (splits.eval.as_ref(), prepared.eval.as_ref()),
        ];
        for (raw, encoded) in pairs {
            if let (Some(raw), Some(encoded)) = (raw, encoded) {
                let path = root.join(format!("{}.json", raw.name()));
                encoded.save_json(&path)?;
                written.push(path);
            }
        }
        Ok(written)
    }

    fn run_model<B, M>(
        &self,
        model:       M,
        pretrained:  Pretrained,
        prepared:    PreparedSplits,
        checkpoints: &CheckpointManager,
        device:      &B::Device,
    ) -> Result<()>
    where
        B: AutodiffBackend,
        M: CaptionModel<B> + AutodiffModule<B>,
        M::InnerModule: CaptionModel<B::InnerBackend>,
    {
        let Pretrained { mut config, image_processor, tokenizer, .. } = pretrained;
        let training = &self.training;
        let is_main  = training.is_main_process();

        // ── Step 9: vocabulary ───────────────────────────────────────────────
        let model = if self.model.overwrite_vocabulary {
            let new_size = tokenizer.len();
            let model = model.resize_token_embeddings(new_size).map_err(|e| {
                tracing::warn!("Failed to resize token embeddings: {e}.");
                e
            })?;
            config.set_vocab_size(new_size);
            tracing::info!("Resized token embeddings to {}", new_size);
            model
        } else {
            if tokenizer.len() > model.vocab_size() {
                return Err(PipelineError::Config(format!(
                    "tokenizer has {} tokens but the model vocabulary is {}; \
                     pass --overwrite-vocabulary to resize the embeddings",
                    tokenizer.len(),
                    model.vocab_size(),
                ))
                .into());
            }
            model
        };

        // ── Step 10: processor files ─────────────────────────────────────────
        if is_main {
            image_processor.save_pretrained(&training.output_dir)?;
            tokenizer.save_pretrained(&training.output_dir)?;
            config.save_pretrained(&training.output_dir)?;
        }

        // ── Step 11: train / evaluate ────────────────────────────────────────
        let metrics = MetricsLogger::new(&training.output_dir)?;
        let trainer = CaptionTrainer::new(training, tokenizer.pad_token_id(), checkpoints, &metrics);

        let mut model = model;
        if let Some(train) = prepared.train {
            let (trained, train_metrics, state) =
                trainer.train::<B, M>(model, train, prepared.eval.as_ref(), device)?;
            model = trained;
            if is_main {
                checkpoints.save_model::<B, M>(&model)?;
                metrics.save_metrics("train", &train_metrics)?;
                metrics.save_state(&state)?;
            }
        }

        if let Some(eval) = prepared.eval.as_ref() {
            let eval_metrics = trainer.evaluate::<B::InnerBackend, _>(&model.valid(), eval, device)?;
            if is_main {
                metrics.save_metrics("eval", &eval_metrics)?;
            }
        }

        if is_main {
            tracing::info!("Per-epoch metrics in '{}'", metrics.csv_path().display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::test_support::png_bytes;
    use crate::infra::http::test_support::serve;
    use crate::infra::tokenizer_store::test_support::word_level_json;
    use crate::infra::checkpoint::load_weights;
    use crate::ml::causal::CausalCaptionerConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::prelude::*;
    use serde_json::json;
    use std::path::Path;

    type TB = Autodiff<NdArray>;

    fn write_jsonl(path: &Path, rows: &[serde_json::Value]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        std::fs::write(path, body.join("\n")).unwrap();
    }

    /// Tiny GIT checkpoint: 8×8 images, 4×4 patches.
    fn write_checkpoint(dir: &Path, architecture: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("config.json"), json!({
            "architectures": [architecture],
            "vocab_size": 120, "hidden_size": 16, "num_hidden_layers": 1,
            "num_attention_heads": 2, "intermediate_size": 32, "max_position_embeddings": 16,
            "vision_config": {"image_size": 8, "patch_size": 4, "hidden_size": 8,
                              "num_hidden_layers": 1, "num_attention_heads": 2, "intermediate_size": 16}
        }).to_string()).unwrap();
        std::fs::write(dir.join("preprocessor_config.json"), json!({
            "size": {"height": 8, "width": 8}
        }).to_string()).unwrap();
        std::fs::write(
            dir.join("tokenizer.json"),
            word_level_json(&["a", "dog", "cat", "on", "mat"]).to_string(),
        ).unwrap();
    }

    fn embedded(text: &str) -> serde_json::Value {
        json!({"image": {"bytes": png_bytes()}, "text": text})
    }

    fn use_case(root: &Path, overrides: serde_json::Value) -> FinetuneUseCase {
        let mut body = json!({
            "model_name_or_path": root.join("ckpt"),
            "dataset_name": root.join("data"),
            "image_column_name": "image",
            "text_column_name": "text",
            "output_dir": root.join("out"),
            "per_device_train_batch_size": 2,
            "num_train_epochs": 1,
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), overrides.as_object()) {
            obj.extend(extra.clone());
        }
        let model: ModelArguments = serde_json::from_value(body.clone()).unwrap();
        let data: DataArguments = serde_json::from_value(body.clone()).unwrap();
        let training: TrainingArguments = serde_json::from_value(body).unwrap();
        FinetuneUseCase::new(model, data, training)
    }

    #[test]
    fn test_missing_column_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        write_jsonl(&root.path().join("data/train.jsonl"), &[json!({"picture": "x", "text": "a"})]);

        let uc = use_case(root.path(), json!({"do_train": true}));
        let err = uc.execute_on::<TB>(&Default::default()).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingColumn { column, .. }) => assert_eq!(column, "image"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_without_source_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let uc = use_case(root.path(), json!({"do_eval": true}));
        let err = uc.load_splits().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_))));
    }

    #[test]
    fn test_holdout_when_no_eval_split_named() {
        let root = tempfile::tempdir().unwrap();
        let rows: Vec<_> = (0..20).map(|i| json!({"image": "u", "text": format!("c{i}")})).collect();
        write_jsonl(&root.path().join("data/train.jsonl"), &rows);

        let uc = use_case(root.path(), json!({"do_train": true, "do_eval": true}));
        let splits = uc.load_splits().unwrap();
        assert_eq!(splits.train.as_ref().map(|s| s.num_rows()), Some(17));
        assert_eq!(splits.eval.as_ref().map(|s| s.num_rows()), Some(3));
    }

    #[test]
    fn test_named_eval_split_uses_dataset_config() {
        let root = tempfile::tempdir().unwrap();
        write_jsonl(&root.path().join("data/coco/test.jsonl"), &[embedded("a cat")]);

        let uc = use_case(root.path(), json!({
            "do_eval": true,
            "dataset_config_name": "coco",
            "eval_split_name": "test"
        }));
        let splits = uc.load_splits().unwrap();
        assert!(splits.train.is_none());
        assert_eq!(splits.eval.map(|s| s.num_rows()), Some(1));
    }

    #[test]
    fn test_preprocessing_only_drops_broken_url() {
        let root = tempfile::tempdir().unwrap();
        write_checkpoint(&root.path().join("ckpt"), "GitForCausalLM");

        let base = serve(vec![("/cat.png", "200 OK", png_bytes())], 2);
        write_jsonl(&root.path().join("data/train.jsonl"), &[
            embedded("a dog"),
            json!({"image": format!("{base}/cat.png"), "text": "a cat"}),
            json!({"image": format!("{base}/missing.png"), "text": "a mat"}),
        ]);

        let uc = use_case(root.path(), json!({
            "do_train": true,
            "eval_split_name": "validation",
            "preprocessing_only": true
        }));
        uc.execute_on::<TB>(&Default::default()).unwrap();

        let written = root.path().join("out/preprocessed/train.json");
        let samples: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(samples.as_array().map(Vec::len), Some(2));
        assert!(!root.path().join("out/model.mpk").exists());
    }

    #[test]
    fn test_unknown_architecture_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        write_checkpoint(&root.path().join("ckpt"), "SomeUnknownArch");
        write_jsonl(&root.path().join("data/train.jsonl"), &[embedded("a dog")]);

        let uc = use_case(root.path(), json!({"do_train": true, "eval_split_name": "validation"}));
        let err = uc.execute_on::<TB>(&Default::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownArchitecture { .. })
        ));
    }

    #[test]
    fn test_train_and_eval_write_outputs() {
        let root = tempfile::tempdir().unwrap();
        write_checkpoint(&root.path().join("ckpt"), "GitForCausalLM");
        write_jsonl(&root.path().join("data/train.jsonl"), &[
            embedded("a dog"),
            embedded("a cat on a mat"),
            embedded("a cat"),
        ]);
        write_jsonl(&root.path().join("data/validation.jsonl"), &[embedded("a dog on a mat")]);

        let uc = use_case(root.path(), json!({
            "do_train": true,
            "do_eval": true,
            "eval_split_name": "validation"
        }));
        uc.execute_on::<TB>(&Default::default()).unwrap();

        let out = root.path().join("out");
        for file in [
            "config.json",
            "preprocessor_config.json",
            "tokenizer.json",
            "training_args.json",
            "model.mpk",
            "metrics.csv",
            "train_results.json",
            "eval_results.json",
            "all_results.json",
            "trainer_state.json",
            "checkpoints/model_epoch_1.mpk",
        ] {
            assert!(out.join(file).exists(), "missing {file}");
        }

        // The output directory is itself a loadable checkpoint.
        let cfg = PretrainedConfig::from_file(&out.join("config.json")).unwrap();
        let resolver = PretrainedResolver::new(None);
        let reloaded = load_model::<NdArray>(
            &resolver,
            &out.to_string_lossy(),
            &cfg,
            &Default::default(),
        )
        .unwrap();
        let Some(LoadedModel::CausalLm(reloaded)) = reloaded else {
            panic!("expected the causal-lm loader");
        };

        // model.mpk holds the trained weights, i.e. those of the last epoch.
        let device = Default::default();
        let last_epoch = load_weights::<NdArray, _>(
            CausalCaptionerConfig::from_pretrained(&cfg).init::<NdArray>(&device),
            &out.join("checkpoints/model_epoch_1.mpk"),
            &device,
        )
        .unwrap();
        let diff: f64 = (reloaded.token_embedding.weight.val()
            - last_epoch.token_embedding.weight.val())
            .abs()
            .max()
            .into_scalar()
            .elem();
        assert_eq!(diff, 0.0);
    }
}
