use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn};

use crate::ai::GenerationClient;
use crate::categorizer::{validate, PromptBuilder, PromptInput};
use crate::db::{category_repo, job_repo, spending_repo, user_repo, Database};
use crate::worker::job::{JobOutcome, JobStatus};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;

/// Drives one job from `pending` to a terminal status.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    db: Database,
    client: Arc<dyn GenerationClient>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, db: Database, client: Arc<dyn GenerationClient>) -> Self {
        Self { config, db, client }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run the full pipeline for a single job.
    /// Returns the outcome together with the final context.
    pub fn run(&self, mut ctx: PipelineContext) -> (JobOutcome, PipelineContext) {
        let _pipeline_span = info_span!("categorize_job",
            job_id = %ctx.job.id,
            user_id = ctx.job.user_id,
        )
        .entered();

        // Step 1: Claim
        {
            let _step = info_span!("claim").entered();
            match job_repo::mark_processing(&self.db, &ctx.job.id, Utc::now()) {
                Ok(true) => ctx.job.status = JobStatus::Processing,
                Ok(false) => {
                    let status = job_repo::find_by_id(&self.db, &ctx.job.id)
                        .ok()
                        .flatten()
                        .map(|j| j.status)
                        .unwrap_or(ctx.job.status);
                    debug!("Job not pending ({}), skipping", status);
                    return (JobOutcome::skipped(&ctx.job, status), ctx);
                }
                Err(e) => {
                    // Still pending; startup recovery picks it up again.
                    warn!("Failed to claim job, leaving it pending: {}", e);
                    let mut outcome = JobOutcome::skipped(&ctx.job, JobStatus::Pending);
                    outcome.error = Some(PipelineError::from(e).to_string());
                    return (outcome, ctx);
                }
            }
        }

        match self.process(&mut ctx) {
            Ok(()) => {
                info!(
                    "Job completed after {} attempt(s) with {} line item(s)",
                    ctx.attempts,
                    ctx.spending_ids.len()
                );
                let outcome = JobOutcome::completed(&ctx.job, ctx.attempts, ctx.spending_ids.len());
                (outcome, ctx)
            }
            Err(e) => {
                let error = e.to_string();
                warn!("Job failed after {} attempt(s): {}", ctx.attempts, error);
                match job_repo::mark_failed(&self.db, &ctx.job.id, &error, ctx.attempts, Utc::now())
                {
                    Ok(true) => ctx.job.status = JobStatus::Failed,
                    Ok(false) => warn!("Job left processing before it could be marked failed"),
                    Err(db_err) => warn!("Failed to record job failure: {}", db_err),
                }
                ctx.job.error = Some(error.clone());
                (JobOutcome::failed(&ctx.job, ctx.attempts, error), ctx)
            }
        }
    }

    fn process(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        // Step 2: Resolve people and catalog
        {
            let _step = info_span!("resolve_context").entered();
            self.step_resolve_context(ctx)?;
        }

        // Step 3: Generate and validate, bounded
        {
            let _step = info_span!("generate").entered();
            self.step_generate(ctx)?;
        }

        // Step 4: Commit
        {
            let _step = info_span!("commit").entered();
            self.step_commit(ctx)?;
        }

        Ok(())
    }

    fn step_resolve_context(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let submitter = user_repo::find_person(&self.db, ctx.job.user_id)?.ok_or_else(|| {
            PipelineError::Configuration(format!("submitter {} not found", ctx.job.user_id))
        })?;

        let co_payer = match ctx.job.partner_id {
            Some(partner_id) => Some(user_repo::find_person(&self.db, partner_id)?.ok_or_else(
                || PipelineError::Configuration(format!("co-payer {} not found", partner_id)),
            )?),
            None => None,
        };

        let catalog = category_repo::list(&self.db)?;
        if catalog.is_empty() {
            return Err(PipelineError::Configuration(
                "category catalog is empty".to_string(),
            ));
        }

        let prompt = PromptBuilder::build(&PromptInput {
            total_amount: ctx.job.total_amount,
            submitter: &submitter,
            co_payer: co_payer.as_ref(),
            free_text: &ctx.job.prompt,
            sharing_hint: ctx.job.sharing_hint,
            catalog: &catalog,
        });
        debug!(
            "Resolved context: {} categories, co-payer {}",
            catalog.len(),
            if co_payer.is_some() { "present" } else { "absent" }
        );

        ctx.submitter = Some(submitter);
        ctx.co_payer = co_payer;
        ctx.catalog = catalog;
        ctx.base_prompt = Some(prompt);
        Ok(())
    }

    fn step_generate(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let base_prompt = ctx
            .base_prompt
            .clone()
            .ok_or_else(|| PipelineError::Configuration("prompt was not built".to_string()))?;

        while ctx.attempts < self.config.max_attempts {
            ctx.attempts += 1;
            let _attempt = info_span!("attempt", n = ctx.attempts).entered();

            let prompt = match ctx.rejections.last() {
                Some(rejection) => PromptBuilder::with_feedback(&base_prompt, rejection),
                None => base_prompt.clone(),
            };

            if let Err(e) = job_repo::record_attempts(&self.db, &ctx.job.id, ctx.attempts, Utc::now())
            {
                warn!("Failed to record attempt count: {}", e);
            }

            let reply = self.client.generate(&prompt)?;

            match validate(&reply, &ctx.job, &ctx.catalog) {
                Ok(result) => {
                    ctx.result = Some(result);
                    return Ok(());
                }
                Err(rejection) => {
                    warn!("Attempt {} rejected: {}", ctx.attempts, rejection);
                    ctx.rejections.push(rejection);
                }
            }
        }

        match ctx.rejections.last() {
            Some(last) => Err(PipelineError::RetriesExhausted {
                attempts: ctx.attempts,
                last: last.clone(),
            }),
            None => Err(PipelineError::Configuration(
                "max_attempts must be at least 1".to_string(),
            )),
        }
    }

    fn step_commit(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let result = ctx
            .result
            .as_ref()
            .ok_or_else(|| PipelineError::Configuration("no validated result".to_string()))?;

        let ids = spending_repo::commit(&self.db, &ctx.job, result, ctx.attempts, Utc::now())?;

        ctx.job.status = JobStatus::Completed;
        ctx.job.ambiguous = result.ambiguous;
        ctx.job.ambiguity_reason = result.ambiguity_reason.clone();
        ctx.spending_ids = ids;
        Ok(())
    }
}
