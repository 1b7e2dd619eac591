//! Knowledge base of learned code patterns
//!
//! SQLite-backed store of patterns and anti-patterns with reference
//! vectors, issue templates, and a learned confidence that moves by a
//! bounded EMA step on every cloud validation. Superseded pattern
//! versions are archived, never deleted, so confidence history stays
//! auditable.

use crate::embedding::{self, EMBEDDING_DIM};
use crate::error::TriageError;
use crate::types::Issue;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA: &str = r#"
-- Patterns: learned code shapes with reference vectors
CREATE TABLE IF NOT EXISTS patterns (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,                       -- 'pattern' | 'anti-pattern'
    vector BLOB NOT NULL,                     -- f32 little-endian
    issue_templates TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0.2,
    usage_count INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1,
    examples TEXT NOT NULL DEFAULT '[]',      -- JSON array of provenance paths
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Superseded pattern snapshots (versioned, never destroyed)
CREATE TABLE IF NOT EXISTS pattern_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    kind TEXT NOT NULL,
    vector BLOB NOT NULL,
    issue_templates TEXT NOT NULL,
    confidence REAL NOT NULL,
    usage_count INTEGER NOT NULL,
    superseded_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_pattern_versions_name ON pattern_versions(name);

-- Validation feedback from cloud agents, for audit
CREATE TABLE IF NOT EXISTS validations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_name TEXT NOT NULL REFERENCES patterns(name),
    agreed INTEGER NOT NULL,
    adjustment REAL NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_validations_pattern ON validations(pattern_name);
"#;

/// A recognized code shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub kind: PatternKind,
    pub vector: Vec<f32>,
    /// Issues synthesized when this pattern matches locally
    pub issue_templates: Vec<Issue>,
    pub confidence: f64,
    pub usage_count: i64,
    pub version: i64,
    /// Paths of files this pattern was learned from
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    Pattern,
    AntiPattern,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Pattern => "pattern",
            PatternKind::AntiPattern => "anti-pattern",
        }
    }

    fn from_str(s: &str) -> PatternKind {
        match s {
            "anti-pattern" => PatternKind::AntiPattern,
            _ => PatternKind::Pattern,
        }
    }
}

/// Ephemeral result of matching one input vector against the store.
/// Owned exclusively by the matching call, never persisted.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    /// Best pattern-kind match: (name, confidence in [0, 1])
    pub best: Option<(String, f64)>,
    /// Runner-up patterns in descending confidence order, for diagnostics
    pub runners_up: Vec<(String, f64)>,
    /// Anti-pattern matches at or above the alert threshold
    pub anti_pattern_alerts: Vec<(String, f64)>,
}

impl SimilarityMatch {
    pub fn confidence(&self) -> f64 {
        self.best.as_ref().map(|(_, c)| *c).unwrap_or(0.0)
    }
}

/// Summary statistics for reporting
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub pattern_count: i64,
    pub anti_pattern_count: i64,
    pub total_usage: i64,
    pub mean_confidence: f64,
    pub superseded_versions: i64,
}

pub struct KnowledgeBase {
    conn: Connection,
    learning_rate: f64,
}

impl KnowledgeBase {
    /// Open (or create) the on-disk knowledge base.
    ///
    /// The caller decides whether an unavailable store is fatal; the
    /// usual fallback is [`KnowledgeBase::open_in_memory`], which degrades
    /// the run to always-escalate behavior.
    pub fn open(path: &Path, learning_rate: f64) -> Result<Self, TriageError> {
        let conn = Connection::open(path)
            .map_err(|e| TriageError::KnowledgeBaseUnavailable(format!("{}: {}", path.display(), e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TriageError::KnowledgeBaseUnavailable(e.to_string()))?;
        Ok(Self { conn, learning_rate })
    }

    /// Empty in-memory store; every match scores confidence 0
    pub fn open_in_memory(learning_rate: f64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, learning_rate })
    }

    pub fn lookup(&self, name: &str) -> Result<Option<Pattern>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, kind, vector, issue_templates, confidence, usage_count, version, examples
             FROM patterns WHERE name = ?1",
        )?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_pattern(row)?)),
            None => Ok(None),
        }
    }

    /// All patterns in insertion order
    pub fn all(&self) -> Result<Vec<Pattern>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, kind, vector, issue_templates, confidence, usage_count, version, examples
             FROM patterns ORDER BY rowid",
        )?;
        let patterns = stmt
            .query_map([], |row| {
                row_to_pattern_sql(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// Insert a pattern, or merge with the stored one of the same name.
    ///
    /// A merge archives the previous version, sums usage counts, replaces
    /// the reference vector and templates with the fresh observation, and
    /// recomputes confidence as a usage-weighted running average.
    pub fn upsert(&mut self, pattern: &Pattern) -> Result<()> {
        anyhow::ensure!(
            pattern.vector.len() == EMBEDDING_DIM,
            "reference vector must have {} dimensions, got {}",
            EMBEDDING_DIM,
            pattern.vector.len()
        );

        let existing = self.lookup(&pattern.name)?;
        let tx = self.conn.transaction()?;

        match existing {
            None => {
                tx.execute(
                    "INSERT INTO patterns (name, kind, vector, issue_templates, confidence,
                                           usage_count, version, examples)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                    params![
                        pattern.name,
                        pattern.kind.as_str(),
                        vec_to_blob(&pattern.vector),
                        serde_json::to_string(&pattern.issue_templates)?,
                        pattern.confidence.clamp(0.0, 1.0),
                        pattern.usage_count.max(0),
                        serde_json::to_string(&pattern.examples)?,
                    ],
                )?;
            }
            Some(old) => {
                // Archive the superseded version before touching the row
                tx.execute(
                    "INSERT INTO pattern_versions (name, version, kind, vector, issue_templates,
                                                   confidence, usage_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        old.name,
                        old.version,
                        old.kind.as_str(),
                        vec_to_blob(&old.vector),
                        serde_json::to_string(&old.issue_templates)?,
                        old.confidence,
                        old.usage_count,
                    ],
                )?;

                let old_weight = old.usage_count.max(1) as f64;
                let new_weight = pattern.usage_count.max(1) as f64;
                let merged_confidence = (old.confidence * old_weight
                    + pattern.confidence * new_weight)
                    / (old_weight + new_weight);

                let mut examples = old.examples.clone();
                for example in &pattern.examples {
                    if !examples.contains(example) {
                        examples.push(example.clone());
                    }
                }

                tx.execute(
                    "UPDATE patterns
                     SET kind = ?2, vector = ?3, issue_templates = ?4, confidence = ?5,
                         usage_count = ?6, version = ?7, examples = ?8,
                         updated_at = CURRENT_TIMESTAMP
                     WHERE name = ?1",
                    params![
                        old.name,
                        pattern.kind.as_str(),
                        vec_to_blob(&pattern.vector),
                        serde_json::to_string(&pattern.issue_templates)?,
                        merged_confidence.clamp(0.0, 1.0),
                        old.usage_count + pattern.usage_count.max(1),
                        old.version + 1,
                        serde_json::to_string(&examples)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Count a successful local match against a pattern
    pub fn record_use(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE patterns
             SET usage_count = usage_count + 1, updated_at = CURRENT_TIMESTAMP
             WHERE name = ?1",
            [name],
        )?;
        Ok(())
    }

    /// Feed a cloud agent's agreement or contradiction back into the
    /// pattern's confidence.
    ///
    /// EMA toward 1.0 (agreed) or 0.0 (contradicted); a single call moves
    /// confidence by at most the learning rate, so one noisy response
    /// cannot destabilize a mature pattern. Returns the new confidence.
    pub fn record_validation(&self, name: &str, agreed: bool) -> Result<f64> {
        let current: f64 = self
            .conn
            .query_row("SELECT confidence FROM patterns WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .with_context(|| format!("no pattern named '{}'", name))?;

        let target = if agreed { 1.0 } else { 0.0 };
        let adjustment = self.learning_rate * (target - current);
        let updated = (current + adjustment).clamp(0.0, 1.0);

        self.conn.execute(
            "UPDATE patterns
             SET confidence = ?2, usage_count = usage_count + 1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE name = ?1",
            params![name, updated],
        )?;
        self.conn.execute(
            "INSERT INTO validations (pattern_name, agreed, adjustment) VALUES (?1, ?2, ?3)",
            params![name, agreed as i32, adjustment],
        )?;

        Ok(updated)
    }

    /// Score an input vector against every stored pattern.
    ///
    /// Pattern-kind entries compete for the best match (ties broken by
    /// higher usage count, then name for determinism); anti-pattern
    /// entries at or above `alert_threshold` are collected separately.
    /// An empty store yields confidence 0.
    pub fn best_match(&self, vector: &[f32], alert_threshold: f64) -> Result<SimilarityMatch> {
        let mut scored: Vec<(String, f64, i64)> = Vec::new();
        let mut alerts: Vec<(String, f64)> = Vec::new();

        for pattern in self.all()? {
            let score = embedding::confidence(embedding::cosine_similarity(vector, &pattern.vector));
            match pattern.kind {
                PatternKind::Pattern => scored.push((pattern.name, score, pattern.usage_count)),
                PatternKind::AntiPattern => {
                    if score >= alert_threshold {
                        alerts.push((pattern.name, score));
                    }
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
                .then(a.0.cmp(&b.0))
        });
        alerts.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let best = scored.first().map(|(name, score, _)| (name.clone(), *score));
        let runners_up = scored
            .iter()
            .skip(1)
            .take(5)
            .map(|(name, score, _)| (name.clone(), *score))
            .collect();

        Ok(SimilarityMatch {
            best,
            runners_up,
            anti_pattern_alerts: alerts,
        })
    }

    pub fn stats(&self) -> Result<KnowledgeStats> {
        let (pattern_count, anti_pattern_count, total_usage, mean_confidence) =
            self.conn.query_row(
                "SELECT
                    COALESCE(SUM(kind = 'pattern'), 0),
                    COALESCE(SUM(kind = 'anti-pattern'), 0),
                    COALESCE(SUM(usage_count), 0),
                    COALESCE(AVG(confidence), 0.0)
                 FROM patterns",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let superseded_versions: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pattern_versions", [], |row| row.get(0))?;

        Ok(KnowledgeStats {
            pattern_count,
            anti_pattern_count,
            total_usage,
            mean_confidence,
            superseded_versions,
        })
    }
}

fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_pattern_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pattern> {
    let kind: String = row.get(1)?;
    let blob: Vec<u8> = row.get(2)?;
    let templates_json: String = row.get(3)?;
    let examples_json: String = row.get(7)?;
    Ok(Pattern {
        name: row.get(0)?,
        kind: PatternKind::from_str(&kind),
        vector: blob_to_vec(&blob),
        issue_templates: serde_json::from_str(&templates_json).unwrap_or_default(),
        confidence: row.get(4)?,
        usage_count: row.get(5)?,
        version: row.get(6)?,
        examples: serde_json::from_str(&examples_json).unwrap_or_default(),
    })
}

fn row_to_pattern(row: &rusqlite::Row<'_>) -> Result<Pattern> {
    Ok(row_to_pattern_sql(row)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::embed;
    use crate::types::Severity;

    fn test_kb() -> KnowledgeBase {
        KnowledgeBase::open_in_memory(0.1).unwrap()
    }

    fn test_pattern(name: &str, kind: PatternKind, text: &str) -> Pattern {
        Pattern {
            name: name.to_string(),
            kind,
            vector: embed(text),
            issue_templates: vec![],
            confidence: 0.5,
            usage_count: 1,
            version: 1,
            examples: vec!["src/example.py".to_string()],
        }
    }

    #[test]
    fn test_upsert_insert_and_lookup() {
        let mut kb = test_kb();
        kb.upsert(&test_pattern("retry-loop", PatternKind::Pattern, "while retries < max"))
            .unwrap();

        let found = kb.lookup("retry-loop").unwrap().unwrap();
        assert_eq!(found.name, "retry-loop");
        assert_eq!(found.kind, PatternKind::Pattern);
        assert_eq!(found.version, 1);
        assert_eq!(found.vector.len(), EMBEDDING_DIM);
        assert!(kb.lookup("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension() {
        let mut kb = test_kb();
        let mut p = test_pattern("bad", PatternKind::Pattern, "x");
        p.vector = vec![0.5; 8];
        assert!(kb.upsert(&p).is_err());
    }

    #[test]
    fn test_upsert_merge_weights_confidence_and_versions() {
        let mut kb = test_kb();

        let mut first = test_pattern("sql-concat", PatternKind::AntiPattern, "query + user_input");
        first.confidence = 0.8;
        first.usage_count = 3;
        kb.upsert(&first).unwrap();

        let mut second = test_pattern("sql-concat", PatternKind::AntiPattern, "query + user_input v2");
        second.confidence = 0.4;
        second.usage_count = 1;
        kb.upsert(&second).unwrap();

        let merged = kb.lookup("sql-concat").unwrap().unwrap();
        // Weighted by usage: (0.8*3 + 0.4*1) / 4 = 0.7
        assert!((merged.confidence - 0.7).abs() < 1e-9);
        assert_eq!(merged.usage_count, 4);
        assert_eq!(merged.version, 2);

        // Old version archived, not destroyed
        let stats = kb.stats().unwrap();
        assert_eq!(stats.superseded_versions, 1);
    }

    #[test]
    fn test_all_insertion_order() {
        let mut kb = test_kb();
        kb.upsert(&test_pattern("zebra", PatternKind::Pattern, "aaa")).unwrap();
        kb.upsert(&test_pattern("alpha", PatternKind::Pattern, "bbb")).unwrap();

        let names: Vec<String> = kb.all().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["zebra", "alpha"]);
    }

    #[test]
    fn test_record_validation_bounded_by_learning_rate() {
        let mut kb = test_kb();
        let mut p = test_pattern("p", PatternKind::Pattern, "some code");
        p.confidence = 0.5;
        kb.upsert(&p).unwrap();

        let after_agree = kb.record_validation("p", true).unwrap();
        assert!((after_agree - 0.55).abs() < 1e-9);
        assert!(after_agree - 0.5 <= 0.1 + 1e-9);

        let after_disagree = kb.record_validation("p", false).unwrap();
        assert!((after_disagree - (after_agree - 0.1 * after_agree)).abs() < 1e-9);
        assert!((after_agree - after_disagree).abs() <= 0.1 + 1e-9);
    }

    #[test]
    fn test_record_validation_never_snaps_to_extremes() {
        let mut kb = test_kb();
        let mut p = test_pattern("p", PatternKind::Pattern, "some code");
        p.confidence = 0.9;
        kb.upsert(&p).unwrap();

        for _ in 0..50 {
            kb.record_validation("p", true).unwrap();
        }
        let conf = kb.lookup("p").unwrap().unwrap().confidence;
        assert!(conf < 1.0, "EMA approaches but never reaches 1.0");

        for _ in 0..100 {
            kb.record_validation("p", false).unwrap();
        }
        let conf = kb.lookup("p").unwrap().unwrap().confidence;
        assert!(conf > 0.0, "EMA approaches but never reaches 0.0");
    }

    #[test]
    fn test_usage_count_monotonic() {
        let mut kb = test_kb();
        kb.upsert(&test_pattern("p", PatternKind::Pattern, "code")).unwrap();

        let mut last = kb.lookup("p").unwrap().unwrap().usage_count;
        kb.record_use("p").unwrap();
        let after_use = kb.lookup("p").unwrap().unwrap().usage_count;
        assert!(after_use > last);
        last = after_use;

        kb.record_validation("p", false).unwrap();
        assert!(kb.lookup("p").unwrap().unwrap().usage_count > last);
    }

    #[test]
    fn test_empty_kb_matches_with_zero_confidence() {
        let kb = test_kb();
        let m = kb.best_match(&embed("anything"), 0.8).unwrap();
        assert!(m.best.is_none());
        assert_eq!(m.confidence(), 0.0);
        assert!(m.anti_pattern_alerts.is_empty());
    }

    #[test]
    fn test_best_match_finds_closest_pattern() {
        let mut kb = test_kb();
        kb.upsert(&test_pattern(
            "list-comprehension",
            PatternKind::Pattern,
            "result = [transform(x) for x in items if x.valid]",
        ))
        .unwrap();
        kb.upsert(&test_pattern(
            "singleton",
            PatternKind::Pattern,
            "class Config: _instance = None",
        ))
        .unwrap();

        let query = embed("result = [transform(x) for x in items if x.valid]");
        let m = kb.best_match(&query, 0.8).unwrap();
        let (name, conf) = m.best.unwrap();
        assert_eq!(name, "list-comprehension");
        assert!(conf > 0.99);
        assert_eq!(m.runners_up.len(), 1);
    }

    #[test]
    fn test_anti_pattern_alerts_above_threshold_only() {
        let mut kb = test_kb();
        let mut anti = test_pattern(
            "sql-injection",
            PatternKind::AntiPattern,
            "query = \"SELECT * FROM t WHERE id=\" + user_id",
        );
        anti.issue_templates = vec![Issue {
            title: "SQL injection".to_string(),
            severity: Severity::Critical,
            description: "String-concatenated SQL query".to_string(),
            recommendation: "Use parameterized queries".to_string(),
        }];
        kb.upsert(&anti).unwrap();

        // Identical content trips the alert
        let hit = kb
            .best_match(&embed("query = \"SELECT * FROM t WHERE id=\" + user_id"), 0.8)
            .unwrap();
        assert_eq!(hit.anti_pattern_alerts.len(), 1);
        assert_eq!(hit.anti_pattern_alerts[0].0, "sql-injection");

        // Unrelated content stays quiet
        let quiet = kb.best_match(&embed("fn render(widget: &Widget)"), 0.8).unwrap();
        assert!(quiet.anti_pattern_alerts.is_empty());
        // Anti-patterns never compete for the best pattern slot
        assert!(hit.best.is_none());
    }

    #[test]
    fn test_tie_broken_by_usage_then_name() {
        let mut kb = test_kb();
        // Same vector, different usage counts
        let mut a = test_pattern("later", PatternKind::Pattern, "identical text");
        a.usage_count = 2;
        let mut b = test_pattern("earlier", PatternKind::Pattern, "identical text");
        b.usage_count = 9;
        kb.upsert(&a).unwrap();
        kb.upsert(&b).unwrap();

        let m = kb.best_match(&embed("identical text"), 0.8).unwrap();
        assert_eq!(m.best.unwrap().0, "earlier", "higher usage wins the tie");

        // Equal usage: lexicographically smaller name wins
        let mut c = test_pattern("aardvark", PatternKind::Pattern, "identical text");
        c.usage_count = 9;
        kb.upsert(&c).unwrap();
        let m = kb.best_match(&embed("identical text"), 0.8).unwrap();
        assert_eq!(m.best.unwrap().0, "aardvark");
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.db");

        {
            let mut kb = KnowledgeBase::open(&path, 0.1).unwrap();
            kb.upsert(&test_pattern("persisted", PatternKind::Pattern, "code")).unwrap();
        }

        let kb = KnowledgeBase::open(&path, 0.1).unwrap();
        assert!(kb.lookup("persisted").unwrap().is_some());
    }

    #[test]
    fn test_stats() {
        let mut kb = test_kb();
        kb.upsert(&test_pattern("p1", PatternKind::Pattern, "one")).unwrap();
        kb.upsert(&test_pattern("a1", PatternKind::AntiPattern, "two")).unwrap();

        let stats = kb.stats().unwrap();
        assert_eq!(stats.pattern_count, 1);
        assert_eq!(stats.anti_pattern_count, 1);
        assert!((stats.mean_confidence - 0.5).abs() < 1e-9);
    }
}
