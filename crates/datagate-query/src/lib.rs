//! datagate-query — query analysis and result caching in front of an executor.
//!
//! # Architecture
//!
//! ```text
//! execute_optimized_query(executor, sql, params)
//!   → hash(normalized sql + params)
//!   → SELECT and cache enabled   → fresh cached result? return it
//!   → analyze_query              → suggestions, cacheability, risk
//!   → executor(sql, params)      → timing into per-shape stats
//!   → slower than threshold      → slow-query record
//!   → cacheable and fast         → result cache (oldest evicted first)
//! ```
//!
//! The executor is any async closure; in a full deployment it is
//! `ConnectionPool::query`. Its error type passes through unchanged.

pub mod analyzer;
pub mod config;
pub mod optimizer;

pub use analyzer::{
    Performance, QueryAnalysis, RiskLevel, Severity, StatementKind, Suggestion, analyze_query,
    normalize_sql,
};
pub use config::OptimizerConfig;
pub use optimizer::{
    ExecuteOptions, PerformanceReport, QueryOptimizer, QueryState, QueryStatRecord, query_hash,
    SlowQueryRecord, SlowQuerySummary,
};
