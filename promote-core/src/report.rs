use crate::classify::{Classification, PromotionCandidate};
use crate::error::AnalyzeError;
use crate::history::CommitId;
use crate::range::SyncSource;
use crate::verify::SquashAnchor;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// A stage as named on the command line and the commit it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTip {
    pub name: String,
    pub tip: CommitId,
}

/// Verdict tallies. `pending`, `already_present` and `ambiguous` never
/// overlap and add up to `scanned`; the pending list holds both the
/// `pending` and the `ambiguous` candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Candidates examined, merges left out
    pub scanned: usize,
    /// Neither signal fired
    pub pending: usize,
    pub already_present: usize,
    /// Flagged for review; listed as pending
    pub ambiguous: usize,
}

/// Non-fatal conditions that lower confidence in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Warning {
    /// No sync marker; the common ancestor bounded the range
    DegradedSync { base: CommitId },
    /// The stages share no history
    Unverified,
    /// A pending candidate whose equivalence signals disagree
    Ambiguous { commit: CommitId },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DegradedSync { base } => write!(
                f,
                "no sync marker found; range computed from common ancestor {}",
                short(base)
            ),
            Warning::Unverified => write!(
                f,
                "upstream and downstream share no history; every upstream commit was checked by content only"
            ),
            Warning::Ambiguous { commit } => write!(
                f,
                "{} needs review: equivalence signals disagree",
                short(commit)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub upstream: StageTip,
    pub downstream: StageTip,
    pub sync: SyncSource,
    pub sync_label: String,
    pub squash_anchor: SquashAnchor,
    pub pending: Vec<PromotionCandidate>,
    pub excluded: Vec<PromotionCandidate>,
    pub counts: Counts,
    pub warnings: Vec<Warning>,
    pub trail: Vec<String>,
}

impl PromotionReport {
    /// Assemble the report; counts and warnings are derived here so they
    /// always agree with the lists.
    pub fn new(
        upstream: StageTip,
        downstream: StageTip,
        sync: SyncSource,
        squash_anchor: SquashAnchor,
        classification: Classification,
        mut trail: Vec<String>,
    ) -> Self {
        let mut warnings = Vec::new();
        match &sync {
            SyncSource::CommonAncestor { commit } => warnings.push(Warning::DegradedSync {
                base: commit.clone(),
            }),
            SyncSource::Disjoint => warnings.push(Warning::Unverified),
            SyncSource::Marker { .. } => {}
        }
        warnings.extend(classification.ambiguous().map(|c| Warning::Ambiguous {
            commit: c.id.clone(),
        }));

        let ambiguous = classification.ambiguous().count();
        let counts = Counts {
            scanned: classification.pending.len() + classification.excluded.len(),
            pending: classification.pending.len() - ambiguous,
            already_present: classification.excluded.len(),
            ambiguous,
        };

        trail.extend(classification.trail);

        Self {
            upstream,
            downstream,
            sync_label: sync.label(),
            sync,
            squash_anchor,
            pending: classification.pending,
            excluded: classification.excluded,
            counts,
            warnings,
            trail,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self.sync, SyncSource::Marker { .. })
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "upstream:      {} ({})", self.upstream.name, short(&self.upstream.tip));
        let _ = writeln!(out, "downstream:    {} ({})", self.downstream.name, short(&self.downstream.tip));
        let _ = writeln!(out, "sync point:    {}", self.sync_label);
        let _ = writeln!(
            out,
            "squash anchor: {}{}",
            short(&self.squash_anchor.commit),
            if self.squash_anchor.matched_pattern { "" } else { " (downstream tip)" }
        );

        let _ = writeln!(out, "\npending ({}):", self.pending.len());
        if self.pending.is_empty() {
            let _ = writeln!(out, "  nothing to promote");
        }
        for candidate in &self.pending {
            let flag = if candidate.flagged { "?" } else { " " };
            let _ = writeln!(
                out,
                "{flag} {} {} {}",
                candidate.short_id(),
                candidate.authored_at.format("%Y-%m-%d %H:%M"),
                candidate.message
            );
            if candidate.flagged {
                let _ = writeln!(out, "    {}", candidate.detail);
            }
        }

        if !self.excluded.is_empty() {
            let _ = writeln!(out, "\nalready present ({}):", self.counts.already_present);
            for candidate in &self.excluded {
                let _ = writeln!(
                    out,
                    "  {} {} [{}]",
                    candidate.short_id(),
                    candidate.message,
                    candidate.detail
                );
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "\nwarnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {warning}");
            }
        }
        out
    }
}

/// Why a run produced no report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    pub detail: String,
}

impl From<&AnalyzeError> for Failure {
    fn from(err: &AnalyzeError) -> Self {
        Self {
            reason: err.code().to_string(),
            detail: err.to_string(),
        }
    }
}

/// Terminal state of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Report(PromotionReport),
    Failed(Failure),
}

impl Outcome {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        match self {
            Outcome::Report(report) => report.render_text(),
            Outcome::Failed(failure) => format!("failed ({}): {}\n", failure.reason, failure.detail),
        }
    }
}

impl From<Result<PromotionReport, AnalyzeError>> for Outcome {
    fn from(result: Result<PromotionReport, AnalyzeError>) -> Self {
        match result {
            Ok(report) => Outcome::Report(report),
            Err(err) => Outcome::Failed(Failure::from(&err)),
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
