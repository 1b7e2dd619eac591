//! codetriage - cost-aware code review routing
//!
//! Routes source files between free local pattern matching and paid
//! remote LLM analysis. Files the knowledge base recognizes with high
//! confidence are answered locally for nothing; unfamiliar or risky
//! files escalate to remote specialist agents, and every remote answer
//! feeds back into the knowledge base so the next run is cheaper.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use codetriage::{discover, ResultCache, KnowledgeBase, Settings, TriageEngine};
//! use codetriage::agent::HttpAgent;
//! use std::sync::Arc;
//!
//! let settings = Settings::from_env()?;
//! settings.validate(true)?;
//!
//! let knowledge = KnowledgeBase::open(&settings.knowledge_path(), settings.learning_rate)?;
//! let cache = ResultCache::open(&settings.cache_path())?;
//! let agent = Arc::new(HttpAgent::from_settings(&settings)?);
//!
//! let files = discover::discover(&root, &settings.include_patterns, &settings.exclude_patterns)?;
//! let engine = Arc::new(TriageEngine::new(settings, knowledge, cache, agent));
//! let reports = engine.run(files).await;
//! ```
//!
//! # Pipeline
//!
//! ```text
//! file ──► fingerprint ──► cache? ──► embed ──► similarity match
//!                            │                        │
//!                           hit                   confidence
//!                            │                        │
//!                            ▼                        ▼
//!                         result ◄── synthesize ◄── route ──► remote agents
//!                                     (free)         │        (reserve/commit)
//!                                                    │              │
//!                                                    └── feedback ◄─┘
//! ```

pub mod agent;
pub mod budget;
pub mod cache;
pub mod config;
pub mod discover;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod knowledge;
pub mod router;
pub mod types;

// Core pipeline
pub use engine::TriageEngine;
pub use router::{classify_risk, route, RouteInput, RouterThresholds};

// Storage
pub use cache::ResultCache;
pub use knowledge::{KnowledgeBase, KnowledgeStats, Pattern, PatternKind, SimilarityMatch};

// Budget accounting
pub use budget::{BudgetTracker, ReservationToken};

// Remote boundary
pub use agent::{AgentRequest, AnalysisAgent, HttpAgent};

// Identity and similarity
pub use embedding::{cosine_similarity, embed, EMBEDDING_DIM};
pub use fingerprint::{fingerprint, FingerprintKey};

// Configuration and shared types
pub use config::{AnalysisConfig, Settings};
pub use error::TriageError;
pub use types::*;
