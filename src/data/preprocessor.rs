// ============================================================
// Layer 4 — Caption Sample Preparation
// ============================================================
// Turns each raw dataset row into an EncodedSample:
//
//   RawImage::Decoded  → image processor directly (never any I/O)
//   RawImage::Url      → one GET via the ImageFetcher, then decode
//   caption text       → tokenizer (special tokens added)
//
// A row whose image cannot be fetched or decoded is not an error:
// one warning naming the URL is logged and the row yields None.
// The same holds for a caption that tokenizes to no ids at all
// (empty or missing text with a tokenizer that adds no special
// tokens); the collator only ever sees non-empty sequences.
// `prepare_split` keeps only the Some results, so the dataset handed
// to the trainer never contains an unusable sample.
//
// Tokenizer failures ARE errors. They are not a property of one
// row's data, they mean the tokenizer itself is broken.

use anyhow::Result;
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;

use crate::data::image_processor::ImageProcessor;
use crate::domain::sample::{EncodedSample, RawImage, RawSample};
use crate::domain::traits::{ImageFetcher, SampleSource};
use crate::infra::tokenizer_store::TokenizerStore;

/// Outcome counts for one prepared split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareStats {
    pub kept:    usize,
    pub dropped: usize,
}

impl PrepareStats {
    pub fn total(&self) -> usize {
        self.kept + self.dropped
    }

    /// Fraction of rows dropped, 0.0 for an empty split.
    pub fn drop_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.dropped as f64 / self.total() as f64
        }
    }
}

pub struct CaptionPreparer<'a, F: ImageFetcher> {
    image_processor: &'a ImageProcessor,
    tokenizer:       &'a TokenizerStore,
    fetcher:         F,
}

impl<'a, F: ImageFetcher> CaptionPreparer<'a, F> {
    pub fn new(image_processor: &'a ImageProcessor, tokenizer: &'a TokenizerStore, fetcher: F) -> Self {
        Self { image_processor, tokenizer, fetcher }
    }

    /// Encode one row. `Ok(None)` means the row must be dropped.
    pub fn prepare(&self, sample: &RawSample) -> Result<Option<EncodedSample>> {
        let (input_ids, attention_mask) = self.tokenizer.encode(&sample.text)?;
        if input_ids.is_empty() {
            tracing::warn!("Skipping sample whose caption {:?} has no tokens", sample.text);
            return Ok(None);
        }

        let image: Cow<'_, DynamicImage> = match &sample.image {
            RawImage::Decoded(img) => Cow::Borrowed(img),
            RawImage::Url(url) => match self.load_url(url) {
                Ok(img) => Cow::Owned(img),
                Err(e) => {
                    tracing::warn!("Skipping sample due to error fetching URL {}: {:#}", url, e);
                    return Ok(None);
                }
            },
        };

        let pixels = self.image_processor.process(&image);

        Ok(Some(EncodedSample {
            pixel_values: pixels.data,
            pixel_shape:  pixels.shape,
            input_ids,
            attention_mask,
        }))
    }

    fn load_url(&self, url: &str) -> Result<DynamicImage> {
        let bytes = self.fetcher.fetch(url)?;
        Ok(image::load_from_memory(&bytes)?)
    }

    /// Encode every row of `source`, keeping only usable samples.
    pub fn prepare_split(
        &self,
        source:        &dyn SampleSource,
        image_column:  &str,
        text_column:   &str,
        show_progress: bool,
    ) -> Result<(Vec<EncodedSample>, PrepareStats)> {
        let total = source.num_rows();
        let progress = if show_progress {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} Processing images [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut samples = Vec::with_capacity(total);
        let mut stats   = PrepareStats::default();

        for index in 0..total {
            let encoded = match source.sample(index, image_column, text_column) {
                Ok(raw) => self.prepare(&raw)?,
                Err(e) => {
                    tracing::warn!("Skipping row {}: {:#}", index, e);
                    None
                }
            };

            match encoded {
                Some(s) => {
                    samples.push(s);
                    stats.kept += 1;
                }
                None => stats.dropped += 1,
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok((samples, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{collate, CaptionBatcher};
    use crate::data::image_processor::{ImageProcessorConfig, ImageSize};
    use crate::data::loader::{test_support::png_bytes, JsonlSplit, Row};
    use crate::infra::http::{test_support::serve, HttpImageFetcher};
    use crate::infra::tokenizer_store::test_support::word_level_store;
    use burn::backend::NdArray;
    use burn::data::dataloader::batcher::Batcher;
    use std::cell::Cell;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Counts calls and always fails; proves in-memory images skip I/O.
    struct CountingFetcher {
        calls: Cell<usize>,
    }

    impl ImageFetcher for CountingFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            anyhow::bail!("offline")
        }
    }

    /// Log sink for asserting on emitted warnings.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn run<T>(&self, f: impl FnOnce() -> T) -> T {
            let sink = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::WARN)
                .finish();
            tracing::subscriber::with_default(subscriber, f)
        }

        fn warnings(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|l| l.contains("WARN"))
                .map(str::to_string)
                .collect()
        }
    }

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn processor() -> ImageProcessor {
        ImageProcessor::new(ImageProcessorConfig {
            size: ImageSize::Square(8),
            ..Default::default()
        })
    }

    fn decoded() -> RawImage {
        RawImage::Decoded(image::load_from_memory(&png_bytes()).unwrap())
    }

    #[test]
    fn test_in_memory_image_never_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["a", "dog"]);
        let proc = processor();
        let fetcher = CountingFetcher { calls: Cell::new(0) };
        let preparer = CaptionPreparer::new(&proc, &tok, fetcher);

        let out = preparer.prepare(&RawSample::new(decoded(), "a dog")).unwrap().unwrap();
        assert_eq!(preparer.fetcher.calls.get(), 0);
        assert_eq!(out.pixel_shape, [3, 8, 8]);
        assert_eq!(out.input_ids, vec![104, 105]);
        assert!(out.is_well_formed());
    }

    #[test]
    fn test_failed_fetch_drops_sample() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["broken"]);
        let proc = processor();
        let fetcher = CountingFetcher { calls: Cell::new(0) };
        let preparer = CaptionPreparer::new(&proc, &tok, fetcher);

        let raw = RawSample::new(RawImage::Url("http://example.invalid/x.png".into()), "broken");
        let logs = CapturedLogs::default();
        assert!(logs.run(|| preparer.prepare(&raw)).unwrap().is_none());
        assert_eq!(preparer.fetcher.calls.get(), 1);

        let warnings = logs.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("http://example.invalid/x.png"));
    }

    #[test]
    fn test_non_success_status_drops_sample() {
        let base = serve(vec![], 1);
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["x"]);
        let proc = processor();
        let preparer = CaptionPreparer::new(&proc, &tok, HttpImageFetcher::new(2).unwrap());

        let raw = RawSample::new(RawImage::Url(format!("{base}/gone.png")), "x");
        assert!(preparer.prepare(&raw).unwrap().is_none());
    }

    #[test]
    fn test_undecodable_body_drops_sample() {
        let base = serve(vec![("/junk.png", "200 OK", b"not an image".to_vec())], 1);
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["x"]);
        let proc = processor();
        let preparer = CaptionPreparer::new(&proc, &tok, HttpImageFetcher::new(2).unwrap());

        let raw = RawSample::new(RawImage::Url(format!("{base}/junk.png")), "x");
        assert!(preparer.prepare(&raw).unwrap().is_none());
    }

    #[test]
    fn test_prepare_split_keeps_only_usable_rows() {
        let base = serve(vec![("/cat.png", "200 OK", png_bytes())], 2);
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["a", "dog", "cat", "broken"]);
        let proc = processor();
        let preparer = CaptionPreparer::new(&proc, &tok, HttpImageFetcher::new(2).unwrap());

        let split = JsonlSplit::from_rows("train", rows(vec![
            serde_json::json!({"image": {"bytes": png_bytes()}, "text": "a dog"}),
            serde_json::json!({"image": format!("{base}/cat.png"), "text": "a cat"}),
            serde_json::json!({"image": format!("{base}/broken.png"), "text": "broken"}),
        ]), ".");

        let (samples, stats) = preparer.prepare_split(&split, "image", "text", false).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(stats, PrepareStats { kept: 2, dropped: 1 });
        assert!(samples.iter().all(EncodedSample::is_well_formed));
        assert_eq!(samples[1].input_ids, vec![104, 106]);

        let padded = collate(&samples, 0).unwrap();
        assert_eq!(padded.batch_size, 2);
        assert_eq!(padded.pixel_shape, [3, 8, 8]);

        let batcher = CaptionBatcher::<NdArray>::new(Default::default(), 0);
        let batch = batcher.batch(samples).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.pixel_values.dims(), [2, 3, 8, 8]);
    }

    #[test]
    fn test_empty_caption_is_dropped_not_batched() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_store(dir.path(), &["a", "dog"]);
        let proc = processor();
        let fetcher = CountingFetcher { calls: Cell::new(0) };
        let preparer = CaptionPreparer::new(&proc, &tok, fetcher);

        let split = JsonlSplit::from_rows("train", rows(vec![
            serde_json::json!({"image": {"bytes": png_bytes()}, "text": "a dog"}),
            serde_json::json!({"image": {"bytes": png_bytes()}, "text": ""}),
            serde_json::json!({"image": {"bytes": png_bytes()}}),
        ]), ".");

        let logs = CapturedLogs::default();
        let (samples, stats) = logs
            .run(|| preparer.prepare_split(&split, "image", "text", false))
            .unwrap();
        assert_eq!(stats, PrepareStats { kept: 1, dropped: 2 });
        assert_eq!(logs.warnings().len(), 2);
        assert_eq!(preparer.fetcher.calls.get(), 0);
        assert_eq!(collate(&samples, 0).unwrap().batch_size, 1);
    }

    #[test]
    fn test_drop_rate() {
        assert_eq!(PrepareStats::default().drop_rate(), 0.0);
        assert_eq!(PrepareStats { kept: 3, dropped: 1 }.drop_rate(), 0.25);
    }
}
