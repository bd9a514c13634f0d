use crate::history::CommitId;
use crate::verify::{Signals, Verdict, VerdictReason, Verification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One upstream commit as it appears in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionCandidate {
    pub id: CommitId,
    /// First line of the commit message
    pub message: String,
    pub authored_at: DateTime<Utc>,
    pub verdict: Verdict,
    /// Machine-readable reason code
    pub reason: String,
    /// Human-readable explanation of `reason`
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<CommitId>,
    pub signals: Signals,
    /// Set when the two signals disagree and a human should look
    pub flagged: bool,
}

impl PromotionCandidate {
    fn new(verification: &Verification, verdict: Verdict, reason: &VerdictReason) -> Self {
        let duplicate_of = match reason {
            VerdictReason::DuplicateOfEarlierCandidate { earlier } => Some(earlier.clone()),
            _ => None,
        };
        Self {
            id: verification.commit.id.clone(),
            message: verification.commit.summary().to_string(),
            authored_at: verification.commit.authored_at,
            verdict,
            reason: reason.code().to_string(),
            detail: reason.to_string(),
            duplicate_of,
            signals: verification.signals,
            flagged: verdict == Verdict::Ambiguous,
        }
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Pending and Ambiguous candidates, in promotion order
    pub pending: Vec<PromotionCandidate>,
    /// AlreadyPresent candidates, in promotion order
    pub excluded: Vec<PromotionCandidate>,
    /// One line per candidate describing its fate
    pub trail: Vec<String>,
}

impl Classification {
    pub fn ambiguous(&self) -> impl Iterator<Item = &PromotionCandidate> {
        self.pending.iter().filter(|c| c.flagged)
    }
}

/// Split verifications, already in promotion order, into pending and
/// excluded. A later candidate whose signature repeats an earlier pending
/// one is collapsed into it.
pub fn classify(verifications: Vec<Verification>) -> Classification {
    let mut first_seen: HashMap<String, CommitId> = HashMap::new();
    let mut result = Classification::default();

    for verification in &verifications {
        let (verdict, reason) = match verification.verdict {
            Verdict::AlreadyPresent => (verification.verdict, verification.reason.clone()),
            Verdict::Pending | Verdict::Ambiguous => {
                match first_seen.get(&verification.signature) {
                    Some(earlier) => (
                        Verdict::AlreadyPresent,
                        VerdictReason::DuplicateOfEarlierCandidate {
                            earlier: earlier.clone(),
                        },
                    ),
                    None => {
                        first_seen.insert(
                            verification.signature.clone(),
                            verification.commit.id.clone(),
                        );
                        (verification.verdict, verification.reason.clone())
                    }
                }
            }
        };

        let candidate = PromotionCandidate::new(verification, verdict, &reason);
        result.trail.push(format!(
            "{} {}: {} ({})",
            candidate.short_id(),
            candidate.verdict,
            candidate.detail,
            candidate.message
        ));
        match verdict {
            Verdict::AlreadyPresent => result.excluded.push(candidate),
            Verdict::Pending | Verdict::Ambiguous => result.pending.push(candidate),
        }
    }

    debug!(
        pending = result.pending.len(),
        excluded = result.excluded.len(),
        "classified candidates"
    );
    result
}
