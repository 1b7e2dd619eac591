//! Triage engine - orchestrates the full per-file pipeline
//!
//! fingerprint -> cache lookup -> local similarity match -> routing
//! decision -> (synthesize locally | remote call under a budget
//! reservation) -> validation feedback -> pattern learning -> cache write.
//!
//! Analysis always produces a result for every requested file. Remote
//! failures release their reservation and downgrade the result; they
//! never abort the batch.

use crate::agent::{AgentRequest, AnalysisAgent};
use crate::budget::BudgetTracker;
use crate::cache::ResultCache;
use crate::config::Settings;
use crate::discover::DiscoveredFile;
use crate::embedding;
use crate::fingerprint::fingerprint;
use crate::knowledge::{KnowledgeBase, Pattern, PatternKind, SimilarityMatch};
use crate::router::{self, RouteInput, RouterThresholds};
use crate::types::{
    AgentKind, AnalysisOutcome, CacheStatus, Decision, DecisionReason, Depth, FileReport, Issue,
    RiskClass, Routing, Severity,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Baseline score a local-only result carries: known-good pattern, no
/// knowledge at all, or an anti-pattern alert
fn baseline_score(has_pattern: bool, has_alerts: bool) -> u8 {
    if has_alerts {
        40
    } else if has_pattern {
        85
    } else {
        50
    }
}

/// Remote and local scores within this many points count as agreement
const AGREEMENT_TOLERANCE: i32 = 20;

pub struct TriageEngine {
    settings: Settings,
    knowledge: Mutex<KnowledgeBase>,
    cache: Mutex<ResultCache>,
    budget: BudgetTracker,
    agent: Arc<dyn AnalysisAgent>,
    /// Caps concurrent remote calls across files
    fan_out: Arc<Semaphore>,
    cancelled: AtomicBool,
}

impl TriageEngine {
    pub fn new(
        mut settings: Settings,
        knowledge: KnowledgeBase,
        cache: ResultCache,
        agent: Arc<dyn AnalysisAgent>,
    ) -> Self {
        // The engine indexes into the agent list, so an empty one falls
        // back to the full specialty set rather than trusting the caller
        // to have run Settings::validate
        if settings.agents.is_empty() {
            warn!("no analysis agents configured, using the full default specialty list");
            settings.agents = Settings::default().agents;
        }
        let budget = BudgetTracker::new(settings.budget_ceiling);
        let fan_out = Arc::new(Semaphore::new(settings.fan_out.max(1)));
        Self {
            settings,
            knowledge: Mutex::new(knowledge),
            cache: Mutex::new(cache),
            budget,
            agent,
            fan_out,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Stop issuing new remote calls. In-flight calls complete and commit
    /// their already-reserved cost.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        info!("cancellation requested; no further remote calls will be issued");
    }

    pub fn total_spend(&self) -> f64 {
        self.budget.spend()
    }

    pub fn remaining_budget(&self) -> f64 {
        self.budget.remaining()
    }

    fn thresholds(&self) -> RouterThresholds {
        RouterThresholds {
            skip: self.settings.skip_threshold,
            validate: self.settings.validate_threshold,
            reserve_floor: self.settings.reserve_floor,
        }
    }

    /// Analyze a batch of independent files concurrently. Results come
    /// back sorted by path; per-file ordering beyond that is not
    /// guaranteed and not needed.
    pub async fn run(self: Arc<Self>, files: Vec<DiscoveredFile>) -> Vec<FileReport> {
        let mut set = JoinSet::new();
        for file in files {
            let engine = Arc::clone(&self);
            set.spawn(async move { engine.review_file(&file).await });
        }

        let mut reports = Vec::new();
        while let Some(result) = set.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "analysis task failed to complete"),
            }
        }
        reports.sort_by(|a, b| a.path.cmp(&b.path));
        reports
    }

    /// Analyze one file. Infallible by design: every error path degrades
    /// to a local result with a warning attached.
    pub async fn review_file(&self, file: &DiscoveredFile) -> FileReport {
        let config = self.settings.analysis_config();
        let key = fingerprint(&file.content, &config);

        match self.cache.lock().unwrap().get(&key) {
            Ok(Some(mut hit)) => {
                debug!(path = %file.path.display(), "cache hit");
                hit.cache = CacheStatus::Hit;
                return hit;
            }
            Ok(None) => {}
            Err(e) => warn!(path = %file.path.display(), error = %e, "cache read failed"),
        }

        let text = String::from_utf8_lossy(&file.content).into_owned();
        let vector = embedding::embed(&text);
        let local = self
            .knowledge
            .lock()
            .unwrap()
            .best_match(&vector, self.settings.anti_pattern_alert)
            .unwrap_or_else(|e| {
                warn!(error = %e, "knowledge base match failed, treating as empty");
                SimilarityMatch {
                    best: None,
                    runners_up: Vec::new(),
                    anti_pattern_alerts: Vec::new(),
                }
            });

        let mut warnings = Vec::new();
        let mut risk = router::classify_risk(&file.path, &self.settings.high_risk_markers);
        if let Some((name, score)) = local.anti_pattern_alerts.first() {
            // Anti-pattern similarity is a risk signal, not a shortcut
            risk = RiskClass::High;
            warnings.push(format!("anti-pattern match: {} ({:.2})", name, score));
        }

        let confidence = local.confidence();
        let routing = router::route(
            &RouteInput {
                confidence,
                risk,
                depth: self.settings.depth,
                remaining_budget: self.budget.remaining(),
            },
            &self.thresholds(),
        );
        debug!(
            path = %file.path.display(),
            confidence,
            decision = routing.decision.name(),
            reason = routing.reason.name(),
            "routed"
        );

        let report = match routing.decision {
            Decision::Skip => {
                let outcome = if routing.reason == DecisionReason::BudgetExhausted {
                    warnings.push("degraded: budget".to_string());
                    AnalysisOutcome::Degraded
                } else {
                    AnalysisOutcome::SkippedLocal
                };
                self.synthesize_local(file, &local, routing, confidence, outcome, warnings)
            }
            _ if self.cancelled.load(Ordering::SeqCst) => {
                warnings.push("unvalidated: run cancelled before remote call".to_string());
                self.synthesize_local(
                    file,
                    &local,
                    routing,
                    confidence,
                    AnalysisOutcome::Degraded,
                    warnings,
                )
            }
            _ => {
                self.remote_analysis(file, &text, &local, routing, confidence, warnings)
                    .await
            }
        };

        // Cache write happens after any remote cost has been committed.
        // Degraded results are transient (remote outage, cancellation,
        // empty budget) and caching one would suppress re-analysis for
        // the whole TTL, so they are never written.
        if report.outcome == AnalysisOutcome::Degraded {
            debug!(path = %file.path.display(), "degraded result, skipping cache write");
        } else if let Err(e) =
            self.cache
                .lock()
                .unwrap()
                .put(&key, &report, report.cost, self.settings.cache_ttl_secs)
        {
            warn!(path = %file.path.display(), error = %e, "cache write failed");
        }

        report
    }

    /// Build a zero-cost result from the matched pattern's issue templates
    fn synthesize_local(
        &self,
        file: &DiscoveredFile,
        local: &SimilarityMatch,
        routing: Routing,
        confidence: f64,
        outcome: AnalysisOutcome,
        warnings: Vec<String>,
    ) -> FileReport {
        let knowledge = self.knowledge.lock().unwrap();

        let mut issues = Vec::new();
        let matched_pattern = local.best.as_ref().map(|(name, _)| name.clone());
        if let Some(name) = &matched_pattern {
            if let Ok(Some(pattern)) = knowledge.lookup(name) {
                issues.extend(pattern.issue_templates);
            }
            if outcome == AnalysisOutcome::SkippedLocal {
                if let Err(e) = knowledge.record_use(name) {
                    warn!(pattern = name.as_str(), error = %e, "usage update failed");
                }
            }
        }
        for (name, _) in &local.anti_pattern_alerts {
            if let Ok(Some(pattern)) = knowledge.lookup(name) {
                issues.extend(pattern.issue_templates);
            }
        }
        drop(knowledge);

        let score = baseline_score(matched_pattern.is_some(), !local.anti_pattern_alerts.is_empty());

        FileReport {
            path: file.path.clone(),
            language: file.language.clone(),
            overall_score: score,
            issues: FileReport::prioritize_issues(issues),
            agent_reports: Vec::new(),
            cost: 0.0,
            decision: routing.decision,
            reason: routing.reason,
            outcome,
            cache: CacheStatus::Miss,
            confidence,
            matched_pattern,
            warnings,
            created_at: Utc::now(),
        }
    }

    async fn remote_analysis(
        &self,
        file: &DiscoveredFile,
        text: &str,
        local: &SimilarityMatch,
        routing: Routing,
        confidence: f64,
        mut warnings: Vec<String>,
    ) -> FileReport {
        // Validate is one cheap confirmation call; escalate runs every
        // configured specialty at the requested depth
        let (depth, kinds): (Depth, Vec<AgentKind>) = match routing.decision {
            Decision::Validate => (self.settings.validate_depth, vec![self.settings.agents[0]]),
            _ => (self.settings.depth, self.settings.agents.clone()),
        };

        let estimate: f64 = kinds
            .iter()
            .map(|_| self.agent.estimate_cost(text.len(), depth))
            .sum();

        let token = match self.budget.reserve(estimate) {
            Ok(token) => token,
            Err(e) => {
                warnings.push(format!("degraded: budget ({})", e));
                return self.synthesize_local(
                    file,
                    local,
                    routing,
                    confidence,
                    AnalysisOutcome::Degraded,
                    warnings,
                );
            }
        };

        // Specialties run concurrently, each under its own fan-out permit
        let mut set = JoinSet::new();
        for kind in kinds {
            let agent = Arc::clone(&self.agent);
            let semaphore = Arc::clone(&self.fan_out);
            let request = AgentRequest {
                path: file.path.display().to_string(),
                language: file.language.clone(),
                content: text.to_string(),
                kind,
                depth,
            };
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = agent.analyze(&request).await;
                (kind, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((kind, Err(e))) => {
                    warn!(path = %file.path.display(), agent = kind.name(), error = %e, "remote agent call failed");
                    warnings.push(format!("agent {} failed: {}", kind.name(), e));
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "remote agent task failed");
                    warnings.push(format!("agent task failed: {}", e));
                }
            }
        }

        if reports.is_empty() {
            // Nothing billed: give the reservation back and return the
            // local result flagged as unvalidated
            self.budget.release(token);
            warnings.push("unvalidated: all remote calls failed".to_string());
            return self.synthesize_local(
                file,
                local,
                routing,
                confidence,
                AnalysisOutcome::Degraded,
                warnings,
            );
        }

        let actual: f64 = reports.iter().map(|r| r.cost).sum();
        self.budget.commit(token, actual);

        let remote_score = FileReport::composite_score(&reports);

        // Feed agreement back into the matched pattern's confidence
        if let Some((name, _)) = &local.best {
            let local_score =
                baseline_score(true, !local.anti_pattern_alerts.is_empty()) as i32;
            let agreed = (remote_score as i32 - local_score).abs() <= AGREEMENT_TOLERANCE;
            if let Err(e) = self.knowledge.lock().unwrap().record_validation(name, agreed) {
                warn!(pattern = name.as_str(), error = %e, "validation feedback failed");
            }
        }

        if routing.decision == Decision::Escalate {
            self.learn_pattern(file, text, &reports);
        }

        let outcome = match routing.decision {
            Decision::Validate => AnalysisOutcome::Validated,
            _ => AnalysisOutcome::Analyzed,
        };
        let all_issues: Vec<Issue> = reports.iter().flat_map(|r| r.issues.clone()).collect();

        FileReport {
            path: file.path.clone(),
            language: file.language.clone(),
            overall_score: remote_score,
            issues: FileReport::prioritize_issues(all_issues),
            agent_reports: reports,
            cost: actual,
            decision: routing.decision,
            reason: routing.reason,
            outcome,
            cache: CacheStatus::Miss,
            confidence,
            matched_pattern: local.best.as_ref().map(|(name, _)| name.clone()),
            warnings,
            created_at: Utc::now(),
        }
    }

    /// Turn a decisive escalation result into a durable pattern. Clearly
    /// clean files become patterns, clearly bad ones anti-patterns with
    /// their top issues as templates; middling scores teach nothing.
    fn learn_pattern(&self, file: &DiscoveredFile, text: &str, reports: &[crate::types::AgentReport]) {
        let score = FileReport::composite_score(reports);
        let (kind, templates) = if score < 60 {
            let top: Vec<Issue> = FileReport::prioritize_issues(
                reports
                    .iter()
                    .flat_map(|r| r.issues.clone())
                    .filter(|i| matches!(i.severity, Severity::Critical | Severity::High))
                    .collect(),
            )
            .into_iter()
            .take(3)
            .collect();
            (PatternKind::AntiPattern, top)
        } else if score >= 80 {
            (PatternKind::Pattern, Vec::new())
        } else {
            return;
        };

        let key = fingerprint(&file.content, &self.settings.analysis_config());
        let pattern = Pattern {
            name: format!("learned-{}", key.short()),
            kind,
            vector: embedding::embed(text),
            issue_templates: templates,
            confidence: 0.2, // new patterns start low and earn trust
            usage_count: 1,
            version: 1,
            examples: vec![file.path.display().to_string()],
        };

        if let Err(e) = self.knowledge.lock().unwrap().upsert(&pattern) {
            warn!(pattern = pattern.name.as_str(), error = %e, "pattern learning failed");
        } else {
            info!(pattern = pattern.name.as_str(), kind = kind.as_str(), "learned pattern");
        }
    }
}
