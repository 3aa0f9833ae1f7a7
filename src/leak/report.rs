//! Leak candidates and reports.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::now_millis;
use crate::core::record::AllocationRecord;

static REPORT_IDS: AtomicU64 = AtomicU64::new(0);

/// Candidates keep at most this many sample records.
const MAX_SAMPLE_RECORDS: usize = 10;

/// Which strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeakKind {
    AgeBased,
    GrowthBased,
    WindowBased,
    ReferenceBased,
}

impl LeakKind {
    pub fn description(&self) -> &'static str {
        match self {
            LeakKind::AgeBased => "Age-based detection",
            LeakKind::GrowthBased => "Growth pattern detection",
            LeakKind::WindowBased => "Time window analysis",
            LeakKind::ReferenceBased => "Reference chain analysis",
        }
    }
}

/// One suspected leak: a single class flagged by a single strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakCandidate {
    pub class_name: String,
    pub instance_count: u64,
    pub total_size: u64,
    pub kind: LeakKind,
    pub allocation_site: String,
    pub sample_records: Vec<Arc<AllocationRecord>>,
    pub description: String,
    pub detected_at_ms: u64,
}

impl LeakCandidate {
    pub fn new(
        class_name: impl Into<String>,
        instance_count: u64,
        total_size: u64,
        kind: LeakKind,
        allocation_site: impl Into<String>,
        mut sample_records: Vec<Arc<AllocationRecord>>,
        description: impl Into<String>,
    ) -> Self {
        sample_records.truncate(MAX_SAMPLE_RECORDS);
        Self {
            class_name: class_name.into(),
            instance_count,
            total_size,
            kind,
            allocation_site: allocation_site.into(),
            sample_records,
            description: description.into(),
            detected_at_ms: now_millis(),
        }
    }

    /// Severity score in [0, 100]: a size bucket and a count bucket worth up
    /// to 40 each, plus a strategy weight.
    pub fn severity(&self) -> u8 {
        let mut score = 0u32;

        score += if self.total_size > 100 * 1024 * 1024 {
            40
        } else if self.total_size > 10 * 1024 * 1024 {
            30
        } else if self.total_size > 1024 * 1024 {
            20
        } else {
            10
        };

        score += if self.instance_count > 10_000 {
            40
        } else if self.instance_count > 1_000 {
            30
        } else if self.instance_count > 100 {
            20
        } else {
            10
        };

        score += match self.kind {
            LeakKind::WindowBased => 20,
            LeakKind::GrowthBased => 15,
            _ => 10,
        };

        score.min(100) as u8
    }
}

impl fmt::Display for LeakCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LeakCandidate{{class={}, count={}, size={}MB, kind={:?}, severity={}}}",
            self.class_name,
            self.instance_count,
            self.total_size / 1024 / 1024,
            self.kind,
            self.severity()
        )
    }
}

/// Severity grouping of one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_candidates: usize,
    pub high_severity: usize,
    pub medium_severity: usize,
    pub low_severity: usize,
    pub total_size: u64,
    pub total_instances: u64,
}

/// One detection pass's findings, ordered by total size descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakReport {
    report_id: u64,
    timestamp_ms: u64,
    candidates: Vec<LeakCandidate>,
    detection_number: u64,
}

impl LeakReport {
    pub fn new(timestamp_ms: u64, mut candidates: Vec<LeakCandidate>, detection_number: u64) -> Self {
        candidates.sort_by(|a, b| b.total_size.cmp(&a.total_size));
        Self {
            report_id: REPORT_IDS.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_ms,
            candidates,
            detection_number,
        }
    }

    pub fn report_id(&self) -> u64 {
        self.report_id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn detection_number(&self) -> u64 {
        self.detection_number
    }

    pub fn candidates(&self) -> &[LeakCandidate] {
        &self.candidates
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn total_leaked_size(&self) -> u64 {
        self.candidates.iter().map(|c| c.total_size).sum()
    }

    pub fn total_leaked_instances(&self) -> u64 {
        self.candidates.iter().map(|c| c.instance_count).sum()
    }

    /// Candidates at or above `min_severity`, strongest first.
    pub fn candidates_by_severity(&self, min_severity: u8) -> Vec<&LeakCandidate> {
        let mut matched: Vec<&LeakCandidate> = self
            .candidates
            .iter()
            .filter(|c| c.severity() >= min_severity)
            .collect();
        matched.sort_by(|a, b| b.severity().cmp(&a.severity()));
        matched
    }

    pub fn candidates_by_kind(&self, kind: LeakKind) -> Vec<&LeakCandidate> {
        self.candidates.iter().filter(|c| c.kind == kind).collect()
    }

    /// The `limit` strongest candidates by severity.
    pub fn top(&self, limit: usize) -> Vec<&LeakCandidate> {
        let mut sorted: Vec<&LeakCandidate> = self.candidates.iter().collect();
        sorted.sort_by(|a, b| b.severity().cmp(&a.severity()));
        sorted.truncate(limit);
        sorted
    }

    /// Affected class names in report order, deduplicated.
    pub fn affected_classes(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for candidate in &self.candidates {
            if !seen.contains(&candidate.class_name) {
                seen.push(candidate.class_name.clone());
            }
        }
        seen
    }

    /// Implicated allocation sites in report order, deduplicated.
    pub fn allocation_sites(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for candidate in &self.candidates {
            if !seen.contains(&candidate.allocation_site) {
                seen.push(candidate.allocation_site.clone());
            }
        }
        seen
    }

    pub fn summary(&self) -> ReportSummary {
        let mut high = 0;
        let mut medium = 0;
        let mut low = 0;
        for candidate in &self.candidates {
            let severity = candidate.severity();
            if severity >= 70 {
                high += 1;
            } else if severity >= 40 {
                medium += 1;
            } else {
                low += 1;
            }
        }
        ReportSummary {
            total_candidates: self.candidates.len(),
            high_severity: high,
            medium_severity: medium,
            low_severity: low,
            total_size: self.total_leaked_size(),
            total_instances: self.total_leaked_instances(),
        }
    }

    /// Human-readable next steps for this report.
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        if self.candidates.is_empty() {
            recommendations.push("No potential leaks detected. Continue monitoring.".to_string());
            return recommendations;
        }

        let summary = self.summary();
        if summary.high_severity > 0 {
            recommendations.push(format!(
                "URGENT: {} high-severity potential leaks detected. Immediate investigation recommended.",
                summary.high_severity
            ));
        }

        let mut by_kind: HashMap<LeakKind, usize> = HashMap::new();
        for candidate in &self.candidates {
            *by_kind.entry(candidate.kind).or_insert(0) += 1;
        }

        if by_kind.contains_key(&LeakKind::AgeBased) {
            recommendations.push(
                "Age-based detection found long-lived objects. Check for static collections, \
                 caches without eviction, or unclosed resources."
                    .to_string(),
            );
        }
        if by_kind.contains_key(&LeakKind::GrowthBased) {
            recommendations.push(
                "Growth pattern detected. Look for unbounded collections, missing cleanup in \
                 loops, or event listener accumulation."
                    .to_string(),
            );
        }
        if by_kind.contains_key(&LeakKind::WindowBased) {
            recommendations.push(
                "Time window analysis shows consistent growth. This strongly indicates a memory \
                 leak. Review recent code changes."
                    .to_string(),
            );
        }

        if let Some(top) = self.candidates.first() {
            recommendations.push(format!(
                "Top suspect: {} with {} instances ({:.2} MB) at {}",
                top.class_name,
                top.instance_count,
                top.total_size as f64 / 1024.0 / 1024.0,
                top.allocation_site
            ));
        }

        recommendations
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        write!(
            f,
            "LeakReport{{id={}, candidates={}, high={}, medium={}, low={}, totalSize={}MB}}",
            self.report_id,
            summary.total_candidates,
            summary.high_severity,
            summary.medium_severity,
            summary.low_severity,
            summary.total_size / 1024 / 1024
        )
    }
}
