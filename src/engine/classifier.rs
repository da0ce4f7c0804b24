//! Flower classifier
//!
//! Preprocess, predict, then decode the top class. Both the input and the
//! output tensor are owned by `classify` and released on every exit path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::labels::LabelSet;
use super::model::ModelHandle;
use super::preprocess::{Preprocessor, RawImage};
use crate::error::{Error, Result};
use crate::utils::math::{argmax, round_to};

/// Top class and its confidence in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: String,
    /// Percentage in `[0, 100]`, two decimals
    pub confidence: f32,
}

/// Image classifier over a shared model handle
pub struct Classifier {
    model: Arc<ModelHandle>,
    preprocessor: Preprocessor,
    labels: LabelSet,
}

impl Classifier {
    pub fn new(model: Arc<ModelHandle>, preprocessor: Preprocessor, labels: LabelSet) -> Self {
        Self {
            model,
            preprocessor,
            labels,
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Classify one image
    ///
    /// A missing or empty image and an unavailable model are rejected before
    /// any tensor is allocated.
    pub fn classify(&self, image: Option<&RawImage>) -> Result<PredictionResult> {
        let image = image.filter(|img| !img.is_empty()).ok_or(Error::NoInput)?;
        self.model.ensure_ready()?;

        let input = self.preprocessor.prepare(image)?;
        let output = self.model.predict(&input)?;
        let scores = output.to_vec();
        drop(output);
        drop(input);

        debug!(?scores, "Raw predictions");
        decode_top_class(&scores, &self.labels)
    }
}

/// Pick the highest score and map it onto the label set
///
/// Ties go to the lowest index. The score vector must have exactly one entry
/// per label.
pub fn decode_top_class(scores: &[f32], labels: &LabelSet) -> Result<PredictionResult> {
    let mismatch = || Error::LabelMismatch {
        outputs: scores.len(),
        labels: labels.len(),
    };

    if scores.len() != labels.len() {
        return Err(mismatch());
    }
    let (index, value) = argmax(scores).ok_or_else(mismatch)?;
    if !value.is_finite() {
        return Err(Error::Predict(format!("non-finite score {} at index {}", value, index)));
    }
    let label = labels.get(index).ok_or_else(mismatch)?;

    Ok(PredictionResult {
        label: label.to_string(),
        confidence: round_to(value * 100.0, 2).clamp(0.0, 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::testing::{Script, ScriptedLoader};
    use crate::engine::model::WarmupPolicy;
    use crate::engine::preprocess::InputShape;
    use crate::engine::tensor::TensorLedger;
    use crate::error::ErrorKind;
    use image::{Rgb, RgbImage};

    fn image() -> RawImage {
        RawImage::from_rgb(RgbImage::from_fn(64, 48, |x, y| {
            Rgb([x as u8, y as u8, (x + y) as u8])
        }))
    }

    fn classifier(ledger: &TensorLedger, labels: LabelSet) -> (Classifier, Arc<ModelHandle>) {
        let model = Arc::new(ModelHandle::new(
            InputShape::default(),
            ledger.clone(),
            WarmupPolicy::Skip,
        ));
        let pre = Preprocessor::new(ledger.clone(), InputShape::default());
        (Classifier::new(model.clone(), pre, labels), model)
    }

    async fn loaded(ledger: &TensorLedger, script: Script) -> Classifier {
        let (classifier, model) = classifier(ledger, LabelSet::default());
        model.load(ScriptedLoader::new(script)).await.unwrap();
        classifier
    }

    #[tokio::test]
    async fn test_rose_scenario() {
        let ledger = TensorLedger::new();
        let classifier = loaded(&ledger, Script::Scores(vec![0.05, 0.05, 0.80, 0.05, 0.05])).await;

        let result = classifier.classify(Some(&image())).unwrap();
        assert_eq!(result.label, "rose");
        assert!((result.confidence - 80.0).abs() < 1e-4);
        assert_eq!(ledger.live(), 0);
    }

    #[tokio::test]
    async fn test_short_output_is_label_mismatch() {
        let ledger = TensorLedger::new();
        let classifier = loaded(&ledger, Script::Scores(vec![0.1, 0.2, 0.3, 0.4])).await;

        let err = classifier.classify(Some(&image())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LabelMismatch);
        assert!(matches!(err, Error::LabelMismatch { outputs: 4, labels: 5 }));
        assert_eq!(ledger.live(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_releases_tensors() {
        let ledger = TensorLedger::new();
        let classifier = loaded(&ledger, Script::Fail("device lost".into())).await;
        let before = ledger.snapshot();

        let err = classifier.classify(Some(&image())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PredictFailure);
        assert!(err.to_string().contains("device lost"));

        let after = ledger.snapshot();
        assert_eq!(after.live, before.live);
        assert!(after.allocated > before.allocated);
    }

    #[tokio::test]
    async fn test_exhausted_ledger_keeps_caller_tensors() {
        // one slot is held by the caller, leaving too little for preprocessing
        let ledger = TensorLedger::with_limit(Some(2));
        let (classifier, model) = classifier(&ledger, LabelSet::default());
        model.load(ScriptedLoader::scores(&[0.2; 5])).await.unwrap();

        let _held = ledger.zeros::<u8>(&[1]).unwrap();
        let err = classifier.classify(Some(&image())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreprocessFailure);
        assert_eq!(ledger.live(), 1);
    }

    #[test]
    fn test_no_input_touches_nothing() {
        let ledger = TensorLedger::new();
        let (classifier, model) = classifier(&ledger, LabelSet::default());

        let err = classifier.classify(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoInput);

        let empty = RawImage::from_rgb(RgbImage::new(0, 10));
        assert_eq!(classifier.classify(Some(&empty)).unwrap_err().kind(), ErrorKind::NoInput);

        assert_eq!(ledger.snapshot().allocated, 0);
        assert_eq!(model.state(), crate::engine::model::ModelState::NotLoaded);
    }

    #[test]
    fn test_before_load_is_not_ready_without_allocation() {
        let ledger = TensorLedger::new();
        let (classifier, _) = classifier(&ledger, LabelSet::default());

        let err = classifier.classify(Some(&image())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelNotReady);
        assert_eq!(ledger.snapshot().allocated, 0);
    }

    #[tokio::test]
    async fn test_failed_load_reports_no_model() {
        let ledger = TensorLedger::new();
        let (classifier, model) = classifier(&ledger, LabelSet::default());
        let loader = ScriptedLoader::missing();
        assert!(model.load(loader).await.is_err());

        let err = classifier.classify(Some(&image())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoModel);
        assert_eq!(ledger.snapshot().allocated, 0);
    }

    #[tokio::test]
    async fn test_repeated_classification_is_stable() {
        let ledger = TensorLedger::new();
        let loader = ScriptedLoader::scores(&[0.1, 0.6, 0.1, 0.1, 0.1]);
        let (classifier, model) = classifier(&ledger, LabelSet::default());
        let calls = loader.calls.clone();
        model.load(loader).await.unwrap();

        let img = image();
        let first = classifier.classify(Some(&img)).unwrap();
        let second = classifier.classify(Some(&img)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.label, "dandelion");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_decode_tie_goes_to_lowest_index() {
        let labels = LabelSet::default();
        let result = decode_top_class(&[0.1, 0.4, 0.0, 0.4, 0.1], &labels).unwrap();
        assert_eq!(result.label, "dandelion");
        assert!((result.confidence - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_rounds_and_clamps() {
        let labels = LabelSet::new(["a", "b"]);
        let result = decode_top_class(&[0.123456, 0.1], &labels).unwrap();
        assert!((result.confidence - 12.35).abs() < 1e-4);

        let logits = decode_top_class(&[3.5, -1.0], &labels).unwrap();
        assert_eq!(logits.confidence, 100.0);
    }

    #[test]
    fn test_decode_rejects_bad_vectors() {
        let labels = LabelSet::default();
        assert_eq!(
            decode_top_class(&[], &labels).unwrap_err().kind(),
            ErrorKind::LabelMismatch
        );
        assert_eq!(
            decode_top_class(&[0.1; 6], &labels).unwrap_err().kind(),
            ErrorKind::LabelMismatch
        );
        let nan = decode_top_class(&[f32::NAN, 0.1, 0.1, 0.1, 0.1], &labels).unwrap_err();
        assert_eq!(nan.kind(), ErrorKind::PredictFailure);
    }
}
