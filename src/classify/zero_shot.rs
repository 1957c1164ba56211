use anyhow::Result;
use rust_bert::pipelines::zero_shot_classification::ZeroShotClassificationModel;
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::{Classifier, SentimentLabel};
use crate::error::ClassificationError;

const MAX_INPUT_LENGTH: usize = 128;

struct MLRequest {
    text: String,
    response_tx: mpsc::Sender<Result<SentimentLabel, ClassificationError>>,
}

/// Zero-shot sentiment model running on its own thread.
#[derive(Clone)]
pub struct MLHandle {
    request_tx: mpsc::Sender<MLRequest>,
    timeout: Duration,
}

impl MLHandle {
    pub fn spawn(timeout: Duration) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<MLRequest>();

        thread::spawn(move || {
            if let Err(e) = run_ml_worker(request_rx) {
                error!(error = %e, "sentiment worker failed");
            }
        });

        Ok(Self {
            request_tx,
            timeout,
        })
    }
}

impl Classifier for MLHandle {
    fn classify(&self, text: &str) -> Result<SentimentLabel, ClassificationError> {
        if text.trim().is_empty() {
            return Err(ClassificationError::EmptyText);
        }

        let (response_tx, response_rx) = mpsc::channel();
        self.request_tx
            .send(MLRequest {
                text: text.to_string(),
                response_tx,
            })
            .map_err(|_| ClassificationError::Unavailable("worker channel closed".into()))?;

        response_rx
            .recv_timeout(self.timeout)
            .map_err(|e| ClassificationError::Unavailable(e.to_string()))?
    }
}

fn run_ml_worker(request_rx: mpsc::Receiver<MLRequest>) -> Result<()> {
    info!("loading zero-shot classification model");
    let start = Instant::now();
    let model = ZeroShotClassificationModel::new(Default::default())?;
    info!(
        secs = start.elapsed().as_secs_f32(),
        "zero-shot model ready"
    );

    for MLRequest { text, response_tx } in request_rx {
        let _ = response_tx.send(classify_sentiment(&model, &text));
    }

    Ok(())
}

fn classify_sentiment(
    model: &ZeroShotClassificationModel,
    text: &str,
) -> Result<SentimentLabel, ClassificationError> {
    let labels = SentimentLabel::all_labels();

    let predictions = model
        .predict(
            [text],
            &labels,
            Some(Box::new(|label| {
                format!("The sentiment of this comment is {}.", label)
            })),
            MAX_INPUT_LENGTH,
        )
        .map_err(|e| ClassificationError::Failed(e.to_string()))?;

    let best = predictions
        .first()
        .ok_or_else(|| ClassificationError::Failed("model returned no prediction".into()))?;

    SentimentLabel::from_str(&best.text)
        .map_err(|_| ClassificationError::Failed(format!("unknown label {:?}", best.text)))
}
