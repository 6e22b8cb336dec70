// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Train + evaluation loop using Burn's DataLoader and AdamW,
// generic over every CaptionModel the dispatcher can build.
//
//   - Training runs on an AutodiffBackend for gradients
//   - model.valid() returns the model on B::InnerBackend, so the
//     evaluation batcher also uses B::InnerBackend
//   - Batches arrive as Result; the first malformed batch aborts
//   - lr decays linearly from learning_rate to 0 over all steps
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::time::Instant;

use crate::cli::args::TrainingArguments;
use crate::data::{batcher::CaptionBatcher, dataset::CaptionDataset};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{per_second, EpochMetrics, EvalMetrics, LogEntry, MetricsLogger, TrainMetrics, TrainerState},
};
use crate::ml::model::CaptionModel;

/// Linear decay to zero over `total_steps`.
pub fn linear_lr(base: f64, step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return base;
    }
    base * (1.0 - step as f64 / total_steps as f64).max(0.0)
}

fn steps_per_epoch(samples: usize, batch_size: usize) -> usize {
    samples.div_ceil(batch_size.max(1))
}

pub struct CaptionTrainer<'a> {
    args:         &'a TrainingArguments,
    pad_token_id: u32,
    checkpoints:  &'a CheckpointManager,
    metrics:      &'a MetricsLogger,
}

impl<'a> CaptionTrainer<'a> {
    pub fn new(
        args:         &'a TrainingArguments,
        pad_token_id: u32,
        checkpoints:  &'a CheckpointManager,
        metrics:      &'a MetricsLogger,
    ) -> Self {
        Self { args, pad_token_id, checkpoints, metrics }
    }

    /// Run every epoch; evaluates on `eval_dataset` after each one when given.
    /// Checkpoints and CSV rows are written on the main process only.
    pub fn train<B, M>(
        &self,
        mut model:     M,
        train_dataset: CaptionDataset,
        eval_dataset:  Option<&CaptionDataset>,
        device:        &B::Device,
    ) -> Result<(M, TrainMetrics, TrainerState)>
    where
        B: AutodiffBackend,
        M: CaptionModel<B> + AutodiffModule<B>,
        M::InnerModule: CaptionModel<B::InnerBackend>,
    {
        let args = self.args;
        let is_main = args.is_main_process();
        let train_samples = train_dataset.sample_count();
        let per_epoch     = steps_per_epoch(train_samples, args.per_device_train_batch_size);
        let total_steps   = per_epoch * args.num_train_epochs;

        tracing::info!("***** Running training *****");
        tracing::info!("  Num examples = {}", train_samples);
        tracing::info!("  Num epochs = {}", args.num_train_epochs);
        tracing::info!("  Batch size = {}", args.per_device_train_batch_size);
        tracing::info!("  Total optimisation steps = {}", total_steps);

        let optim_cfg = AdamWConfig::new()
            .with_epsilon(1e-8)
            .with_weight_decay(args.weight_decay as f32)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(args.max_grad_norm as f32)));
        let mut optim = optim_cfg.init();

        let train_batcher = CaptionBatcher::<B>::new(device.clone(), self.pad_token_id);
        let train_loader  = DataLoaderBuilder::new(train_batcher)
            .batch_size(args.per_device_train_batch_size)
            .shuffle(args.seed)
            .num_workers(args.dataloader_num_workers)
            .build(train_dataset);

        let mut state = TrainerState {
            num_train_epochs: args.num_train_epochs,
            ..Default::default()
        };
        let mut total_loss  = 0.0f64;
        let mut running     = (0.0f64, 0usize);
        let mut lr          = args.learning_rate;
        let started         = Instant::now();

        for epoch in 1..=args.num_train_epochs {
            let mut epoch_loss    = 0.0f64;
            let mut epoch_batches = 0usize;

            for batch in train_loader.iter() {
                let batch = batch?;
                let loss = model.forward_loss(&batch);
                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                lr = linear_lr(args.learning_rate, state.global_step, total_steps);
                model = optim.step(lr, model, grads);

                state.global_step += 1;
                epoch_loss    += loss_val;
                epoch_batches += 1;
                total_loss    += loss_val;
                running.0     += loss_val;
                running.1     += 1;

                if args.logging_steps > 0 && state.global_step % args.logging_steps == 0 {
                    let mean = running.0 / running.1 as f64;
                    tracing::info!(
                        "step {:>6} | loss={:.4} | lr={:.3e}",
                        state.global_step, mean, lr,
                    );
                    state.log_history.push(LogEntry {
                        step:          state.global_step,
                        epoch:         state.global_step as f64 / per_epoch.max(1) as f64,
                        loss:          Some(mean),
                        learning_rate: Some(lr),
                        ..Default::default()
                    });
                    running = (0.0, 0);
                }
            }

            let avg_train_loss = if epoch_batches > 0 {
                epoch_loss / epoch_batches as f64
            } else { f64::NAN };

            // ── Evaluation phase ──────────────────────────────────────────────
            // model.valid() → M::InnerModule, dropout disabled
            let eval_loss = match eval_dataset {
                Some(ds) => Some(self.evaluate::<B::InnerBackend, _>(&model.valid(), ds, device)?.eval_loss),
                None => None,
            };

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | eval_loss={}",
                epoch,
                args.num_train_epochs,
                avg_train_loss,
                eval_loss.map_or("-".to_string(), |l| format!("{l:.4}")),
            );

            let row = EpochMetrics::new(epoch, avg_train_loss, eval_loss, lr);
            if row.is_improvement(state.best_eval_loss) {
                state.best_eval_loss = row.eval_loss;
            }
            if let Some(loss) = eval_loss {
                state.log_history.push(LogEntry {
                    step:      state.global_step,
                    epoch:     epoch as f64,
                    eval_loss: Some(loss),
                    ..Default::default()
                });
            }
            state.epoch = epoch as f64;

            if is_main {
                self.metrics.log(&row)?;
                self.checkpoints.save_epoch::<B, M>(&model, epoch)?;
                tracing::info!("Checkpoint saved for epoch {}", epoch);
            }
        }

        let runtime = started.elapsed().as_secs_f64();
        let train_loss = if state.global_step > 0 {
            total_loss / state.global_step as f64
        } else { f64::NAN };

        let metrics = TrainMetrics {
            epoch:                    state.epoch,
            train_loss,
            train_runtime:            runtime,
            train_samples,
            train_samples_per_second: per_second(train_samples * args.num_train_epochs, runtime),
            train_steps_per_second:   per_second(state.global_step, runtime),
        };

        if is_main && state.global_step > 0 {
            tracing::info!(
                "Training complete! Latest checkpoint: epoch {}",
                self.checkpoints.latest_epoch()?
            );
        }
        Ok((model, metrics, state))
    }

    /// Mean loss over `dataset`, weighted by batch size.
    pub fn evaluate<B, M>(
        &self,
        model:   &M,
        dataset: &CaptionDataset,
        device:  &B::Device,
    ) -> Result<EvalMetrics>
    where
        B: Backend,
        M: CaptionModel<B>,
    {
        let started = Instant::now();
        let batcher = CaptionBatcher::<B>::new(device.clone(), self.pad_token_id);
        let loader  = DataLoaderBuilder::new(batcher)
            .batch_size(self.args.per_device_eval_batch_size)
            .num_workers(self.args.dataloader_num_workers)
            .build(dataset.clone());

        let mut loss_sum = 0.0f64;
        let mut seen     = 0usize;
        for batch in loader.iter() {
            let batch = batch?;
            let n = batch.batch_size();
            let loss: f64 = model.forward_loss(&batch).into_scalar().elem::<f64>();
            loss_sum += loss * n as f64;
            seen     += n;
        }

        let eval_loss = if seen > 0 { loss_sum / seen as f64 } else { f64::NAN };
        Ok(EvalMetrics::new(eval_loss, started.elapsed().as_secs_f64(), seen))
    }
}
