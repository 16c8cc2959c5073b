//! The translation profile engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_expr::{EvalContext, ExpressionEvaluator};
use tessera_types::TypeCatalog;
use tracing::{debug, debug_span, info, trace};

use crate::action::{ActionEnv, ActionError, ActionKind, Flow};
use crate::context::{
    ConfirmedElement, RegistrationContextBuilder, RegistrationRequest, RequestSubmitStatus,
    Trigger,
};
use crate::profile::TranslationProfile;
use crate::result::{AutomaticRequestAction, TranslatedResult};
use crate::{Result, TranslationError};

/// Trace of one translation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub result: TranslatedResult,
    /// Indexes of rules whose condition was evaluated.
    pub evaluated: Vec<usize>,
    /// Indexes of rules whose action was applied.
    pub applied: Vec<usize>,
    /// Index of the rule whose break action ended the pass.
    pub stopped_at: Option<usize>,
}

/// Runs translation profiles.
///
/// Stateless between calls: every run owns its accumulator, so one engine
/// can serve concurrent requests.
#[derive(Clone)]
pub struct TranslationEngine {
    expressions: Arc<dyn ExpressionEvaluator>,
    types: Option<Arc<TypeCatalog>>,
    log_context: bool,
    default_credential_requirement: Option<String>,
    clock: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for TranslationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationEngine")
            .field("types", &self.types.as_ref().map(|t| t.len()))
            .field("log_context", &self.log_context)
            .field(
                "default_credential_requirement",
                &self.default_credential_requirement,
            )
            .finish_non_exhaustive()
    }
}

impl TranslationEngine {
    pub fn new(expressions: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            expressions,
            types: None,
            log_context: false,
            default_credential_requirement: None,
            clock: Utc::now,
        }
    }

    /// Validates added attributes against `types`.
    pub fn with_types(mut self, types: Arc<TypeCatalog>) -> Self {
        self.types = Some(types);
        self
    }

    /// Dumps the context at debug level before every pass.
    pub fn with_context_logging(mut self, enabled: bool) -> Self {
        self.log_context = enabled;
        self
    }

    /// Credential requirement used when neither the form nor a rule sets one.
    pub fn with_default_credential_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.default_credential_requirement = Some(requirement.into());
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn expressions(&self) -> &Arc<dyn ExpressionEvaluator> {
        &self.expressions
    }

    // ========================================================================
    // Core Pass
    // ========================================================================

    /// Runs `profile` from an empty accumulator.
    ///
    /// With `filter`, rules of other action kinds are skipped entirely:
    /// neither their condition nor their action runs.
    pub fn run(
        &self,
        profile: &TranslationProfile,
        context: &EvalContext,
        filter: Option<ActionKind>,
    ) -> Result<TranslatedResult> {
        let seed = TranslatedResult::new(self.default_credential_requirement.clone());
        self.run_seeded(profile, context, seed, filter)
    }

    /// Runs `profile` on top of `seed`.
    pub fn run_seeded(
        &self,
        profile: &TranslationProfile,
        context: &EvalContext,
        seed: TranslatedResult,
        filter: Option<ActionKind>,
    ) -> Result<TranslatedResult> {
        Ok(self.run_detailed(profile, context, seed, filter)?.result)
    }

    /// Runs `profile` on top of `seed`, reporting which rules ran.
    pub fn run_detailed(
        &self,
        profile: &TranslationProfile,
        context: &EvalContext,
        seed: TranslatedResult,
        filter: Option<ActionKind>,
    ) -> Result<TranslationOutcome> {
        let span = debug_span!(
            "translation",
            profile = %profile.name,
            kind = ?profile.profile_type,
            filter = filter.map(ActionKind::as_str),
        );
        let _guard = span.enter();

        if self.log_context {
            debug!("Translation context:\n{context}");
        }

        let env = ActionEnv {
            context,
            expressions: self.expressions.as_ref(),
            types: self.types.as_deref(),
            now: (self.clock)(),
        };
        let mut outcome = TranslationOutcome {
            result: seed,
            evaluated: Vec::new(),
            applied: Vec::new(),
            stopped_at: None,
        };

        for (index, rule) in profile.rules.iter().enumerate() {
            let kind = rule.action.kind();
            if filter.is_some_and(|wanted| wanted != kind) {
                continue;
            }

            outcome.evaluated.push(index);
            let matched = self
                .expressions
                .evaluate_boolean(&rule.condition, context)
                .map_err(|source| TranslationError::Expression {
                    profile: profile.name.clone(),
                    rule: index,
                    source,
                })?;
            if !matched {
                trace!(rule = index, condition = %rule.condition, "Condition not met");
                continue;
            }

            trace!(rule = index, action = %kind, "Applying action");
            outcome.applied.push(index);
            let flow = rule
                .action
                .apply(&mut outcome.result, &env)
                .map_err(|err| match err {
                    ActionError::Expression(source) => TranslationError::Expression {
                        profile: profile.name.clone(),
                        rule: index,
                        source,
                    },
                    ActionError::InvalidOutput(reason) => TranslationError::InvalidOutput {
                        profile: profile.name.clone(),
                        rule: index,
                        reason,
                    },
                })?;

            if flow == Flow::Break {
                info!(rule = index, "Break action fired, remaining rules skipped");
                outcome.stopped_at = Some(index);
                break;
            }
        }

        debug!(
            evaluated = outcome.evaluated.len(),
            applied = outcome.applied.len(),
            "Translation complete"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Registration Queries
    // ========================================================================

    /// Full translation of a submitted request.
    pub fn translate(
        &self,
        profile: &TranslationProfile,
        request: &RegistrationRequest,
        trigger: Trigger,
    ) -> Result<TranslatedResult> {
        let context = RegistrationContextBuilder::for_request(request)
            .with_trigger(trigger)
            .build();
        self.run_seeded(profile, &context, self.seed(request), None)
    }

    /// The automatic processing decision for `request`.
    pub fn auto_process_action(
        &self,
        profile: &TranslationProfile,
        request: &RegistrationRequest,
        trigger: Trigger,
        status: RequestSubmitStatus,
    ) -> Result<AutomaticRequestAction> {
        let context = RegistrationContextBuilder::for_request(request)
            .with_trigger(trigger)
            .with_status(status)
            .build();
        let result =
            self.run_seeded(profile, &context, self.seed(request), Some(ActionKind::SetAutoAction))?;
        Ok(result.auto_action())
    }

    /// Where to send the user after submitting `request`.
    pub fn post_submit_redirect_url(
        &self,
        profile: &TranslationProfile,
        request: &RegistrationRequest,
        trigger: Trigger,
    ) -> Result<Option<String>> {
        let context = RegistrationContextBuilder::for_request(request)
            .with_trigger(trigger)
            .build();
        let result =
            self.run_seeded(profile, &context, self.seed(request), Some(ActionKind::SetRedirectUrl))?;
        Ok(result.redirect_url().map(str::to_string))
    }

    /// Where to send the user after abandoning `form`. Only the base context
    /// is available.
    pub fn post_cancel_redirect_url(
        &self,
        profile: &TranslationProfile,
        form: &str,
        trigger: Trigger,
    ) -> Result<Option<String>> {
        let context = RegistrationContextBuilder::new(form)
            .with_trigger(trigger)
            .with_status(RequestSubmitStatus::NotSubmitted)
            .build();
        let result = self.run(profile, &context, Some(ActionKind::SetRedirectUrl))?;
        Ok(result.redirect_url().map(str::to_string))
    }

    /// Where to send the user after confirming an element of `request`.
    /// An empty URL means no redirect.
    pub fn post_confirmation_redirect_url(
        &self,
        profile: &TranslationProfile,
        request: &RegistrationRequest,
        trigger: Trigger,
        confirmed: ConfirmedElement,
    ) -> Result<Option<String>> {
        let context = RegistrationContextBuilder::for_request(request)
            .with_trigger(trigger)
            .with_confirmation(confirmed)
            .build();
        let result = self.run_seeded(
            profile,
            &context,
            self.seed(request),
            Some(ActionKind::SetConfirmationRedirectUrl),
        )?;
        Ok(result
            .redirect_url()
            .filter(|url| !url.is_empty())
            .map(str::to_string))
    }

    fn seed(&self, request: &RegistrationRequest) -> TranslatedResult {
        request.initial_result(self.default_credential_requirement.as_deref())
    }
}
