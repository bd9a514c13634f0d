use crate::classify::classify;
use crate::config::{AnalyzeConfig, Deadline};
use crate::error::AnalyzeError;
use crate::history::HistoryReader;
use crate::range::{ExtractedRange, RangeExtractor};
use crate::report::{Outcome, PromotionReport, StageTip};
use crate::sync_point::{MarkerPredicate, RegexMarker, SyncPointLocator};
use crate::verify::ContentVerifier;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Pipeline states, in the order a run passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    LocateSync,
    ExtractRange,
    VerifyContent,
    Classify,
    Report,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::LocateSync => "locate-sync",
            Stage::ExtractRange => "extract-range",
            Stage::VerifyContent => "verify-content",
            Stage::Classify => "classify",
            Stage::Report => "report",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage) {
    debug!(stage = %stage, "entering stage");
}

/// The two stages to compare, by ref name or commit id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub upstream: String,
    pub downstream: String,
}

impl AnalyzeRequest {
    pub fn new(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
        }
    }
}

/// Everything computed before verification fans out
struct Prepared {
    upstream: StageTip,
    downstream: StageTip,
    range: ExtractedRange,
    verifier: ContentVerifier,
    trail: Vec<String>,
}

pub struct Analyzer {
    history: Arc<dyn HistoryReader>,
    config: AnalyzeConfig,
    predicate: Option<Arc<dyn MarkerPredicate>>,
}

impl Analyzer {
    pub fn new(history: Arc<dyn HistoryReader>, config: AnalyzeConfig) -> Self {
        Self {
            history,
            config,
            predicate: None,
        }
    }

    /// Replace the message-pattern marker test with a custom predicate
    pub fn with_predicate(mut self, predicate: Arc<dyn MarkerPredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn config(&self) -> &AnalyzeConfig {
        &self.config
    }

    /// Run the pipeline within the configured wall-clock budget
    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<PromotionReport, AnalyzeError> {
        enter(Stage::Start);
        self.config.validate()?;
        let deadline = Deadline::after(self.config.timeout);

        let result = match tokio::time::timeout(self.config.timeout, self.run(request, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(AnalyzeError::Timeout(self.config.timeout)),
        };

        match &result {
            Ok(report) => {
                enter(Stage::Report);
                info!(
                    upstream = %report.upstream.name,
                    downstream = %report.downstream.name,
                    pending = report.counts.pending,
                    already_present = report.counts.already_present,
                    ambiguous = report.counts.ambiguous,
                    "analysis complete"
                );
            }
            Err(err) => {
                enter(Stage::Failed);
                debug!(reason = err.code(), error = %err, "analysis failed");
            }
        }
        result
    }

    /// Like [`Analyzer::analyze`], folding failures into the outcome
    pub async fn outcome(&self, request: &AnalyzeRequest) -> Outcome {
        self.analyze(request).await.into()
    }

    async fn run(
        &self,
        request: &AnalyzeRequest,
        deadline: Deadline,
    ) -> Result<PromotionReport, AnalyzeError> {
        let predicate = self.marker_predicate(request)?;
        let history = self.history.clone();
        let config = self.config.clone();
        let request_owned = request.clone();

        // Graph walks block; keep them off the async workers
        let prepared = tokio::task::spawn_blocking(move || {
            prepare(history, predicate.as_ref(), &config, &request_owned, &deadline)
        })
        .await
        .map_err(|e| AnalyzeError::BackendUnavailable(format!("analysis worker failed: {e}")))??;

        enter(Stage::VerifyContent);
        let Prepared {
            upstream,
            downstream,
            range,
            verifier,
            trail,
        } = prepared;
        let verifications = verifier.verify_all(range.commits, deadline).await?;

        enter(Stage::Classify);
        let classification = classify(verifications);

        Ok(PromotionReport::new(
            upstream,
            downstream,
            range.sync,
            verifier.anchor().clone(),
            classification,
            trail,
        ))
    }

    fn marker_predicate(
        &self,
        request: &AnalyzeRequest,
    ) -> Result<Arc<dyn MarkerPredicate>, AnalyzeError> {
        if let Some(predicate) = &self.predicate {
            return Ok(predicate.clone());
        }
        let marker = match &self.config.marker_pattern {
            Some(pattern) => RegexMarker::new(pattern)?,
            None => RegexMarker::for_stage(&request.downstream)?,
        };
        Ok(Arc::new(marker))
    }
}

fn prepare(
    history: Arc<dyn HistoryReader>,
    predicate: &dyn MarkerPredicate,
    config: &AnalyzeConfig,
    request: &AnalyzeRequest,
    deadline: &Deadline,
) -> Result<Prepared, AnalyzeError> {
    let mut trail = Vec::new();

    let upstream = StageTip {
        name: request.upstream.clone(),
        tip: history.resolve(&request.upstream)?,
    };
    let downstream = StageTip {
        name: request.downstream.clone(),
        tip: history.resolve(&request.downstream)?,
    };
    info!(upstream = %upstream.name, tip = %upstream.tip, "resolved upstream stage");
    info!(downstream = %downstream.name, tip = %downstream.tip, "resolved downstream stage");
    trail.push(format!("upstream {} at {}", upstream.name, upstream.tip));
    trail.push(format!("downstream {} at {}", downstream.name, downstream.tip));

    enter(Stage::LocateSync);
    let marker = SyncPointLocator::new(history.as_ref(), predicate, config.scan_window)
        .locate(&upstream.tip, &downstream.tip, deadline)?;
    match &marker {
        Some(found) => trail.push(format!(
            "sync marker {} merged {} ({})",
            found.commit.short_id(),
            found.downstream_parent.get(..8).unwrap_or(&found.downstream_parent),
            predicate.describe()
        )),
        None => trail.push(format!(
            "no sync marker within {} merge commits ({})",
            config.scan_window,
            predicate.describe()
        )),
    }

    enter(Stage::ExtractRange);
    let range = RangeExtractor::new(history.as_ref()).extract(
        &upstream.tip,
        &downstream.tip,
        marker.as_ref(),
        deadline,
    )?;
    trail.push(format!(
        "range bounded by {}: {} candidates, {} merge commits skipped",
        range.sync.label(),
        range.commits.len(),
        range.merges_skipped
    ));

    let verifier = ContentVerifier::prepare(
        history,
        &downstream.tip,
        range.sync.boundary(),
        &config.squash_regex()?,
        config.max_workers,
        deadline,
    )?;
    let anchor = verifier.anchor();
    trail.push(format!(
        "squash anchor {}{}; {} downstream signatures indexed",
        anchor.commit.get(..8).unwrap_or(&anchor.commit),
        if anchor.matched_pattern { "" } else { " (downstream tip)" },
        verifier.indexed()
    ));

    Ok(Prepared {
        upstream,
        downstream,
        range,
        verifier,
        trail,
    })
}
