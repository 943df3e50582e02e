//! Aggregation pipeline.
//!
//! Resolves the rule set for a request and applies its rules one at a time.
//! A [`PipelineRun`] holds all per-request state, so the pipeline itself is
//! shared freely between the inline path and the job workers.

use crate::request::AggregationRequest;
use crate::result::{AggregationResult, AggregationStatus, AggregationSummary, RuleFailure};
use std::sync::Arc;
use std::time::Instant;
use tally_core::{AggregationError, AggregationId, DataValue, TallyResult, Timestamp};
use tally_rules::{AggregationRule, RuleEvaluator, sorted_by_order};
use tally_schema::{AggregationType, SchemaRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Output written to the working data
    Applied,
    /// Disabled or condition false
    Skipped,
    /// Evaluation error
    Failed(String),
}

/// Runs requests through their rule sets
#[derive(Debug, Clone)]
pub struct AggregationPipeline {
    registry: Arc<SchemaRegistry>,
    evaluator: RuleEvaluator,
}

impl AggregationPipeline {
    /// Create a pipeline over a schema registry
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            evaluator: RuleEvaluator::new(),
        }
    }

    /// The schema registry
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Validate a request and resolve its rule set
    ///
    /// Rules come from the schema when `schema_id` names a registered rule
    /// set, otherwise from the inline rules, otherwise there are none.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the request is invalid
    pub fn prepare(&self, request: &AggregationRequest) -> TallyResult<PipelineRun> {
        let aggregation_type = request.validate()?;
        let data = request.data.clone().unwrap_or_default();

        let inline = || sorted_by_order(request.rules.as_deref().unwrap_or_default());
        let (schema_id, rules) = match request.schema_id.as_deref() {
            Some(id) => match self.registry.get(id) {
                Ok(set) => (Some(set.id.clone()), set.ordered_rules()),
                Err(err) => {
                    warn!(schema_id = %id, error = %err, "schema not found, falling back to inline rules");
                    (None, inline())
                }
            },
            None => (None, inline()),
        };

        Ok(PipelineRun::new(
            self.evaluator,
            aggregation_type,
            request.business_id.clone(),
            schema_id,
            data,
            rules,
        ))
    }

    /// Run a request to completion, checking `cancel` before every rule
    ///
    /// # Errors
    ///
    /// Returns a validation error if the request is invalid, or
    /// [`AggregationError::Cancelled`] if `cancel` fires
    pub fn run(
        &self,
        request: &AggregationRequest,
        cancel: &CancellationToken,
    ) -> TallyResult<AggregationResult> {
        let mut run = self.prepare(request)?;
        while !run.is_finished() {
            if cancel.is_cancelled() {
                return Err(AggregationError::Cancelled);
            }
            run.step();
        }
        Ok(run.finish())
    }
}

/// In-progress application of one request's rules
#[derive(Debug)]
pub struct PipelineRun {
    evaluator: RuleEvaluator,
    aggregation_type: AggregationType,
    business_id: Option<String>,
    schema_id: Option<String>,
    original: DataValue,
    working: DataValue,
    rules: Vec<AggregationRule>,
    next: usize,
    applied: Vec<AggregationRule>,
    skipped: Vec<AggregationRule>,
    failed: Vec<RuleFailure>,
    started: Instant,
}

impl PipelineRun {
    fn new(
        evaluator: RuleEvaluator,
        aggregation_type: AggregationType,
        business_id: Option<String>,
        schema_id: Option<String>,
        data: DataValue,
        rules: Vec<AggregationRule>,
    ) -> Self {
        Self {
            evaluator,
            aggregation_type,
            business_id,
            schema_id,
            working: data.clone(),
            original: data,
            rules,
            next: 0,
            applied: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Rules in execution order
    #[must_use]
    pub fn rules(&self) -> &[AggregationRule] {
        &self.rules
    }

    /// Rules processed so far
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.next
    }

    /// Whether every rule has been processed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.next >= self.rules.len()
    }

    /// Percentage of rules processed, 100 when there are none
    #[must_use]
    pub fn progress(&self) -> u8 {
        if self.rules.is_empty() {
            return 100;
        }
        ((self.next * 100) / self.rules.len()) as u8
    }

    /// Process the next rule; `None` once every rule is processed
    pub fn step(&mut self) -> Option<RuleOutcome> {
        let rule = self.rules.get(self.next)?.clone();
        self.next += 1;

        let outcome = self.evaluate(&rule);
        match &outcome {
            RuleOutcome::Applied => self.applied.push(rule),
            RuleOutcome::Skipped => self.skipped.push(rule),
            RuleOutcome::Failed(error) => {
                debug!(field = %rule.field, operation = %rule.operation, error = %error, "rule failed");
                self.failed.push(RuleFailure {
                    rule,
                    error: error.clone(),
                });
            }
        }
        Some(outcome)
    }

    fn evaluate(&mut self, rule: &AggregationRule) -> RuleOutcome {
        if !rule.enabled {
            return RuleOutcome::Skipped;
        }
        match self.evaluator.condition_holds(&self.working, rule) {
            Ok(true) => {}
            Ok(false) => return RuleOutcome::Skipped,
            Err(err) => return RuleOutcome::Failed(err.to_string()),
        }
        match self.evaluator.apply(&self.working, rule) {
            Ok(output) => {
                self.working = output;
                RuleOutcome::Applied
            }
            Err(err) => RuleOutcome::Failed(err.to_string()),
        }
    }

    /// Process any remaining rules and build the result
    #[must_use]
    pub fn finish(mut self) -> AggregationResult {
        while self.step().is_some() {}

        let status = AggregationStatus::from_counts(self.applied.len(), self.failed.len());
        let summary = AggregationSummary::new(
            self.applied.len(),
            self.skipped.len(),
            self.failed.len(),
            self.original.element_count(),
        );
        let processing_time_ms = self.started.elapsed().as_millis() as u64;
        let aggregation_id = AggregationId::new();

        info!(
            aggregation_id = %aggregation_id,
            aggregation_type = %self.aggregation_type,
            status = %status,
            applied = summary.applied_count,
            skipped = summary.skipped_count,
            failed = summary.failed_count,
            processing_time_ms,
            "aggregation finished"
        );

        AggregationResult {
            aggregation_id,
            aggregation_type: self.aggregation_type,
            business_id: self.business_id,
            schema_id: self.schema_id,
            status,
            is_successful: status == AggregationStatus::Success,
            original_data: self.original,
            aggregated_data: self.working,
            applied_rules: self.applied,
            skipped_rules: self.skipped,
            failed_rules: self.failed,
            summary,
            aggregated_at: Timestamp::now(),
            processing_time_ms,
        }
    }
}
