//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Opportunity detection from order books
//! - Profit/cost calculations
//! - Paired execution with partial-fill recovery

pub mod calculator;
pub mod detector;
pub mod executor;

pub use calculator::{calculate_opportunity, ArbitrageOpportunity};
pub use detector::{check_arbitrage, diagnose_no_opportunity, NoOpportunityDiagnosis, ScanParams};
pub use executor::{
    ExecState, ExecutionResult, ExecutionSettings, LegUnwind, PairedExecutionEngine,
    UnwindOutcome,
};
