//! Scored rubric review for higher-stakes task classes.
//!
//! The auditor derives nine boolean signals from a task, scores the bucket's
//! checklist (a check passes only when all of its signals hold), and decides:
//!
//! - `PASS` when the score reaches `pass_score`, no critical signal is
//!   missing and no required fix remains
//! - `NEEDS_HUMAN` when the score is below `human_score`, or fixes remain and
//!   the rework budget is spent
//! - `FAIL_REWORK` otherwise, which sends the task back to execution and
//!   bumps `rework_count`

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tl_core::config::{AuditorConfig, PipelineConfig};
use tl_core::error::RecoverExt;
use tl_core::pipeline_log::LogEntry;
use tl_core::store::{TaskPatch, TaskStore};
use tl_core::text::{replace_delimited_block, AUDITOR_BLOCK_END, AUDITOR_BLOCK_START};
use tl_core::types::{
    AuditHistoryEntry, AuditVerdict, AuditorState, PipelineStage, ReviewStatus, Task, TaskStatus,
};
use tl_telemetry::metrics::{global_metrics, AUDITOR_VERDICTS};

use crate::auto_review::{awaits_review, project_dir};
use crate::checklist::{AuditChecklist, ChecklistLoader, Severity};
use crate::notifications::{HumanAlert, NotificationSink, EVENT_AUDITOR_NEEDS_HUMAN};
use crate::orchestrator::Result;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    AcceptanceCriteria,
    ExecutorOutput,
    OutputFilesPresent,
    OutputFilesAccessible,
    SourceLinks,
    ValidationEvidence,
    RollbackPlan,
    Summary,
    NoPlaceholderLanguage,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Signal::AcceptanceCriteria,
        Signal::ExecutorOutput,
        Signal::OutputFilesPresent,
        Signal::OutputFilesAccessible,
        Signal::SourceLinks,
        Signal::ValidationEvidence,
        Signal::RollbackPlan,
        Signal::Summary,
        Signal::NoPlaceholderLanguage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::ExecutorOutput => "executor_output",
            Self::OutputFilesPresent => "output_files_present",
            Self::OutputFilesAccessible => "output_files_accessible",
            Self::SourceLinks => "source_links",
            Self::ValidationEvidence => "validation_evidence",
            Self::RollbackPlan => "rollback_plan",
            Self::Summary => "summary",
            Self::NoPlaceholderLanguage => "no_placeholder_language",
        }
    }
}

/// Evaluated value of every signal for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet(BTreeMap<Signal, bool>);

impl SignalSet {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Signal, bool)>) -> Self {
        let mut set = Self(Signal::ALL.iter().map(|s| (*s, false)).collect());
        for (signal, value) in pairs {
            set.0.insert(signal, value);
        }
        set
    }

    pub fn get(&self, signal: Signal) -> bool {
        self.0.get(&signal).copied().unwrap_or(false)
    }

    pub fn missing(&self, signals: &[Signal]) -> Vec<Signal> {
        signals.iter().copied().filter(|s| !self.get(*s)).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.0.values().filter(|v| **v).count()
    }
}

fn link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s)>\]"']+"#).expect("static regex"))
}

fn validation_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)✅|\b(tests?|testing|passed|validated|verified)\b").expect("static regex")
    })
}

fn rollback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(rollback|roll back|revert(ed|ing)?)\b").expect("static regex"))
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(todo|tbd|fixme|lorem ipsum)\b|<placeholder>").expect("static regex")
    })
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Evaluate every signal except file accessibility, which needs the
/// filesystem and is passed in.
pub fn evaluate_signals(task: &Task, files_accessible: bool) -> SignalSet {
    let output = task.latest_output.as_deref().unwrap_or("");
    let description = task.description.as_deref().unwrap_or("");
    let files_present = !task.output_files.is_empty();

    SignalSet::from_pairs([
        (Signal::AcceptanceCriteria, non_blank(task.acceptance_criteria.as_deref())),
        (Signal::ExecutorOutput, !output.trim().is_empty()),
        (Signal::OutputFilesPresent, files_present),
        (Signal::OutputFilesAccessible, files_present && files_accessible),
        (Signal::SourceLinks, link_pattern().is_match(output)),
        (
            Signal::ValidationEvidence,
            task.review_status == Some(ReviewStatus::Passed) || validation_pattern().is_match(output),
        ),
        (
            Signal::RollbackPlan,
            rollback_pattern().is_match(output) || rollback_pattern().is_match(description),
        ),
        (
            Signal::Summary,
            output.lines().filter(|l| !l.trim().is_empty()).count() >= 2,
        ),
        (Signal::NoPlaceholderLanguage, !placeholder_pattern().is_match(output)),
    ])
}

async fn output_files_accessible(task: &Task, base: &Path) -> bool {
    if task.output_files.is_empty() {
        return false;
    }
    for file in &task.output_files {
        let path = Path::new(file);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Buckets and checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBucket {
    Coding,
    Research,
    Infra,
    Report,
    Default,
}

impl AuditBucket {
    /// Buckets outside the fixed table get the default evidence rule.
    pub fn from_name(name: &str) -> Self {
        match name {
            "coding" => Self::Coding,
            "research" => Self::Research,
            "infra" => Self::Infra,
            "report" => Self::Report,
            _ => Self::Default,
        }
    }

    pub fn evidence_signals(&self) -> &'static [Signal] {
        match self {
            Self::Coding => &[Signal::OutputFilesAccessible, Signal::ValidationEvidence],
            Self::Research => &[Signal::SourceLinks, Signal::Summary],
            Self::Infra => &[Signal::OutputFilesAccessible, Signal::RollbackPlan],
            Self::Report => &[Signal::OutputFilesAccessible, Signal::SourceLinks],
            Self::Default => &[Signal::ExecutorOutput],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    DodCompleteness,
    EvidenceQuality,
    PolicyCompliance,
    HandoffQuality,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DodCompleteness => "dod_completeness",
            Self::EvidenceQuality => "evidence_quality",
            Self::PolicyCompliance => "policy_compliance",
            Self::HandoffQuality => "handoff_quality",
        }
    }

    pub fn signals(&self, bucket: AuditBucket) -> &'static [Signal] {
        match self {
            Self::DodCompleteness => &[Signal::AcceptanceCriteria, Signal::ExecutorOutput],
            Self::EvidenceQuality => bucket.evidence_signals(),
            Self::PolicyCompliance => &[Signal::NoPlaceholderLanguage],
            Self::HandoffQuality => &[Signal::Summary, Signal::ExecutorOutput],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: CheckKind,
    pub weight: u32,
    pub passed: bool,
    pub missing: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFix {
    pub signal: Signal,
    pub severity: Severity,
    pub fix: String,
}

/// Score every check. Returns the per-check results and the summed weight of
/// the checks that passed.
pub fn score_checks(
    checklist: &AuditChecklist,
    bucket: AuditBucket,
    signals: &SignalSet,
) -> (Vec<CheckResult>, u32) {
    let results: Vec<CheckResult> = checklist
        .checks
        .iter()
        .map(|item| {
            let missing = signals.missing(item.name.signals(bucket));
            CheckResult {
                name: item.name,
                weight: item.weight,
                passed: missing.is_empty(),
                missing,
            }
        })
        .collect();
    let score = results.iter().filter(|c| c.passed).map(|c| c.weight).sum();
    (results, score)
}

/// Missing required signals, then missing critical signals, then whatever a
/// failed check still lacks. One fix per signal.
pub fn required_fixes(
    checklist: &AuditChecklist,
    checks: &[CheckResult],
    signals: &SignalSet,
    task_name: &str,
) -> Vec<RequiredFix> {
    let mut fixes: Vec<RequiredFix> = Vec::new();
    let covered = |fixes: &[RequiredFix], signal: Signal| fixes.iter().any(|f| f.signal == signal);

    for req in &checklist.required {
        if !signals.get(req.signal) && !covered(&fixes, req.signal) {
            fixes.push(RequiredFix {
                signal: req.signal,
                severity: req.severity,
                fix: req.render_fix(task_name),
            });
        }
    }
    for signal in signals.missing(&checklist.critical) {
        if !covered(&fixes, signal) {
            fixes.push(RequiredFix {
                signal,
                severity: Severity::Critical,
                fix: format!("Provide {} for '{task_name}'; it is required to pass.", signal.as_str()),
            });
        }
    }
    for check in checks.iter().filter(|c| !c.passed) {
        for signal in &check.missing {
            if !covered(&fixes, *signal) {
                fixes.push(RequiredFix {
                    signal: *signal,
                    severity: Severity::Medium,
                    fix: format!(
                        "{} failed: provide {} for '{task_name}'.",
                        check.name.as_str(),
                        signal.as_str()
                    ),
                });
            }
        }
    }
    fixes
}

pub fn decide_verdict(
    score: u32,
    critical_missing: bool,
    has_fixes: bool,
    rework_count: u32,
    config: &AuditorConfig,
) -> AuditVerdict {
    if score >= config.pass_score && !critical_missing && !has_fixes {
        AuditVerdict::Pass
    } else if score < config.human_score || (has_fixes && rework_count >= config.max_rework_loops) {
        AuditVerdict::NeedsHuman
    } else {
        AuditVerdict::FailRework
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditProof {
    pub signals: SignalSet,
    pub output_files: Vec<String>,
    pub links: Vec<String>,
    pub validation_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub verdict: AuditVerdict,
    pub score: u32,
    pub max_score: u32,
    pub checks: Vec<CheckResult>,
    pub required_fixes: Vec<RequiredFix>,
    pub proof: AuditProof,
    /// Share of signals that held, 0.0 to 1.0.
    pub confidence: f64,
    /// Bucket name the checklist was loaded for.
    pub task_type: String,
    pub trigger: String,
    /// Counter value after this verdict.
    pub rework_count: u32,
}

pub fn render_verdict_block(report: &AuditReport) -> String {
    let mut block = String::new();
    block.push_str(AUDITOR_BLOCK_START);
    block.push_str(&format!(
        "\n**Auditor verdict: {}** (score {}/{}, {}, trigger: {})\n",
        report.verdict, report.score, report.max_score, report.task_type, report.trigger
    ));
    for check in &report.checks {
        let mark = if check.passed { "x" } else { " " };
        block.push_str(&format!("- [{mark}] {} ({})", check.name.as_str(), check.weight));
        if !check.missing.is_empty() {
            let missing: Vec<&str> = check.missing.iter().map(Signal::as_str).collect();
            block.push_str(&format!(": missing {}", missing.join(", ")));
        }
        block.push('\n');
    }
    if !report.required_fixes.is_empty() {
        block.push_str("\nRequired fixes:\n");
        for fix in &report.required_fixes {
            block.push_str(&format!("- [{}] {}\n", fix.severity.as_str(), fix.fix));
        }
    }
    block.push_str(AUDITOR_BLOCK_END);
    block
}

// ---------------------------------------------------------------------------
// Auditor
// ---------------------------------------------------------------------------

pub struct Auditor {
    config: Arc<PipelineConfig>,
    store: Arc<dyn TaskStore>,
    checklists: Arc<dyn ChecklistLoader>,
    notifier: Arc<dyn NotificationSink>,
}

impl Auditor {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn TaskStore>,
        checklists: Arc<dyn ChecklistLoader>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            store,
            checklists,
            notifier,
        }
    }

    /// First auditable tag (config order), else the pipeline type mapping,
    /// else `default`.
    pub fn bucket_for(&self, task: &Task) -> String {
        let cfg = &self.config.auditor;
        if let Some(tag) = cfg.auditable_tags.iter().find(|t| task.has_tag(t)) {
            return tag.clone();
        }
        task.pipeline_type
            .as_deref()
            .and_then(|pt| cfg.bucket_map.get(pt))
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }

    /// Score the task without persisting anything.
    pub async fn evaluate(&self, task: &Task, trigger: &str) -> AuditReport {
        let task_type = self.bucket_for(task);
        let bucket = AuditBucket::from_name(&task_type);
        let checklist = self
            .checklists
            .load(&task_type)
            .await
            .or_fallback("audit checklist", AuditChecklist::builtin(&task_type));

        let base = project_dir(task, &self.config.review);
        let signals = evaluate_signals(task, output_files_accessible(task, &base).await);
        let (checks, score) = score_checks(&checklist, bucket, &signals);
        let required_fixes = required_fixes(&checklist, &checks, &signals, &task.name);
        let critical_missing = !signals.missing(&checklist.critical).is_empty();

        let prior = task.auditor_state().rework_count;
        let verdict = decide_verdict(
            score,
            critical_missing,
            !required_fixes.is_empty(),
            prior,
            &self.config.auditor,
        );
        let rework_count = if verdict == AuditVerdict::FailRework {
            prior.saturating_add(1)
        } else {
            prior
        };

        let output = task.latest_output.as_deref().unwrap_or("");
        let links = link_pattern()
            .find_iter(output)
            .take(10)
            .map(|m| m.as_str().to_string())
            .collect();
        let confidence =
            (signals.passed_count() as f64 / Signal::ALL.len() as f64 * 100.0).round() / 100.0;

        AuditReport {
            verdict,
            score,
            max_score: checklist.max_score(),
            checks,
            required_fixes,
            proof: AuditProof {
                signals,
                output_files: task.output_files.clone(),
                links,
                validation_command: task.validation_command.clone(),
            },
            confidence,
            task_type,
            trigger: trigger.to_string(),
            rework_count,
        }
    }

    /// Audit and persist. `None` unless the task is routed or executing, or
    /// when it changed stage while the audit ran.
    pub async fn audit(&self, id: Uuid, trigger: &str) -> Result<Option<AuditReport>> {
        let task = self.store.get(id).await?;
        if !awaits_review(&task.pipeline_stage) {
            warn!(task_id = %id, stage = %task.pipeline_stage, "audit skipped; task has not been executed");
            return Ok(None);
        }

        let report = self.evaluate(&task, trigger).await;
        let observing = self.config.observation_mode;
        let patch = self
            .patch_for(&task, &report, observing)
            .expecting(task.pipeline_stage.clone());
        let patch = if observing { patch.log_only() } else { patch };

        match self.store.apply(id, patch).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                warn!(task_id = %id, error = %e, "task changed during audit; verdict dropped");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        if !observing && report.verdict == AuditVerdict::NeedsHuman {
            self.alert(&task, &report).await;
        }

        let verdict = report.verdict.to_string();
        global_metrics().increment_counter(AUDITOR_VERDICTS, &[("verdict", verdict.as_str())]);
        info!(
            task_id = %id,
            verdict = %verdict,
            score = report.score,
            task_type = %report.task_type,
            rework_count = report.rework_count,
            observation = observing,
            "audit complete"
        );
        Ok(Some(report))
    }

    fn patch_for(&self, task: &Task, report: &AuditReport, observing: bool) -> TaskPatch {
        let cfg = &self.config.auditor;
        let now = Utc::now();

        let mut state: AuditorState = task.auditor_state();
        state.last_verdict = Some(report.verdict);
        state.last_score = Some(report.score);
        state.rework_count = report.rework_count;
        state.last_audited_at = Some(now);
        state.history.push(AuditHistoryEntry {
            verdict: report.verdict,
            score: report.score,
            trigger: report.trigger.clone(),
            at: now,
        });
        if state.history.len() > cfg.history_limit {
            let excess = state.history.len() - cfg.history_limit;
            state.history.drain(..excess);
        }

        let description = replace_delimited_block(
            task.description.as_deref().unwrap_or(""),
            AUDITOR_BLOCK_START,
            AUDITOR_BLOCK_END,
            &render_verdict_block(report),
        );

        let mut patch = TaskPatch::log(
            LogEntry::new(
                "audit",
                json!({
                    "verdict": report.verdict,
                    "score": report.score,
                    "task_type": report.task_type,
                    "trigger": report.trigger,
                    "required_fixes": report.required_fixes.len(),
                }),
            )
            .observed(observing),
        );
        patch.description = Some(description);
        patch.review_result = Some(serde_json::to_value(report).unwrap_or_default());
        patch.auditor_state = Some(state);

        match report.verdict {
            AuditVerdict::Pass => {
                patch.review_status = Some(ReviewStatus::Passed);
                if cfg.auto_accept {
                    patch.status = Some(TaskStatus::Done);
                    patch.pipeline_stage = Some(PipelineStage::Completed);
                    patch.completed_at = Some(now);
                }
            }
            AuditVerdict::FailRework => {
                patch.review_status = Some(ReviewStatus::Failed);
                patch.status = Some(TaskStatus::InProgress);
                patch.pipeline_stage = Some(PipelineStage::Executing);
                patch.claimed_by = Some(None);
            }
            AuditVerdict::NeedsHuman => {
                patch.review_status = Some(ReviewStatus::Pending);
                patch.status = Some(TaskStatus::HumanReview);
            }
        }
        patch
    }

    async fn alert(&self, task: &Task, report: &AuditReport) {
        let alert = HumanAlert::new(
            task.user_id.clone(),
            task.id,
            EVENT_AUDITOR_NEEDS_HUMAN,
            format!("Audit needs a human: {}", task.name),
            format!(
                "score {}/{}, {} required fixes, rework count {}",
                report.score,
                report.max_score,
                report.required_fixes.len(),
                report.rework_count
            ),
        );
        let created = self
            .notifier
            .notify_once(alert)
            .await
            .or_fallback("auditor notification", false);
        if !created {
            info!(task_id = %task.id, "human alert already raised for this task");
        }
    }
}
