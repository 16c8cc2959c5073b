//! Unit tests for tessera-translation

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};
use tessera_expr::{EvalContext, ExpressionError, ExpressionEvaluator, RegistryEvaluator};
use tessera_types::{
    Attribute, AttributeType, EntityState, GroupPath, Identity, TypeCatalog, ValueSyntax,
};

use crate::{
    Action, ActionKind, AutomaticRequestAction, ConfirmedElement, GroupSelection, ProfileType,
    RegistrationContextBuilder, RegistrationRequest, Submitted, TranslatedResult,
    TranslationEngine, TranslationError, TranslationProfile, Trigger, TriggeringMode,
};

// ============================================================================
// Fixtures
// ============================================================================

fn root() -> GroupPath {
    GroupPath::root()
}

fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Evaluator understanding the expressions used across these tests.
fn registry() -> RegistryEvaluator {
    RegistryEvaluator::new()
        .register("emailIsCorp", |ctx: &EvalContext| {
            let email = ctx
                .lookup(&["idsByType", "email", "0"])
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!(email.ends_with("@corp")))
        })
        .register("fails", |_: &EvalContext| {
            Err(ExpressionError::evaluation("fails", "division by zero"))
        })
        .register_value("notAGroup", json!("relative/path"))
}

/// Records every evaluated expression.
struct Recording {
    inner: RegistryEvaluator,
    seen: Mutex<Vec<String>>,
}

impl Recording {
    fn new() -> Self {
        Self {
            inner: registry(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl ExpressionEvaluator for Recording {
    fn evaluate_value(&self, expression: &str, context: &EvalContext) -> tessera_expr::Result<Value> {
        self.seen.lock().unwrap().push(expression.to_string());
        self.inner.evaluate_value(expression, context)
    }
}

fn engine() -> TranslationEngine {
    TranslationEngine::new(Arc::new(registry())).with_clock(fixed_now)
}

fn corp_request() -> RegistrationRequest {
    RegistrationRequest {
        identities: vec![Submitted::interactive(Identity::new("email", "alice@corp"))],
        ..RegistrationRequest::new("signup")
    }
}

fn add_role(value: &str) -> Action {
    Action::AddAttribute {
        attribute: "role".into(),
        group: root(),
        expression: format!("'{value}'"),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn later_matching_rule_wins_for_same_attribute() {
    let profile = TranslationProfile::new("signup", ProfileType::Registration)
        .with_rule("true", add_role("member"))
        .with_rule("emailIsCorp", add_role("admin"));
    let request = corp_request();
    let ctx = RegistrationContextBuilder::for_request(&request).build();

    let result = engine().run(&profile, &ctx, None).unwrap();

    assert_eq!(result.attributes().count(), 1);
    assert_eq!(result.attribute(&root(), "role").unwrap().values, vec!["admin"]);
}

#[test]
fn non_matching_later_rule_leaves_earlier_value() {
    let profile = TranslationProfile::new("signup", ProfileType::Registration)
        .with_rule("true", add_role("member"))
        .with_rule("emailIsCorp", add_role("admin"));
    let request = RegistrationRequest {
        identities: vec![Submitted::interactive(Identity::new("email", "bob@example.org"))],
        ..RegistrationRequest::new("signup")
    };
    let ctx = RegistrationContextBuilder::for_request(&request).build();

    let result = engine().run(&profile, &ctx, None).unwrap();
    assert_eq!(result.attribute(&root(), "role").unwrap().values, vec!["member"]);
}

#[test]
fn break_keeps_earlier_effects_and_skips_the_rest() {
    let profile = TranslationProfile::new("auto", ProfileType::Registration)
        .with_rule("true", Action::SetAutoAction { decision: AutomaticRequestAction::Accept })
        .with_rule("true", Action::Break)
        .with_rule("emailIsCorp", add_role("late"));
    let recording = Arc::new(Recording::new());
    let engine = TranslationEngine::new(recording.clone());

    let outcome = engine
        .run_detailed(&profile, &EvalContext::new(), TranslatedResult::default(), None)
        .unwrap();

    assert_eq!(outcome.result.auto_action(), AutomaticRequestAction::Accept);
    assert_eq!(outcome.result.attributes().count(), 0);
    assert_eq!(outcome.stopped_at, Some(1));
    assert_eq!(outcome.evaluated, vec![0, 1]);
    assert_eq!(recording.seen(), vec!["true", "true"]);
}

#[test]
fn filtered_rules_are_not_evaluated() {
    let profile = TranslationProfile::new("redirects", ProfileType::Registration)
        .with_rule("fails", add_role("never"))
        .with_rule("true", Action::Break)
        .with_rule("true", Action::SetRedirectUrl { expression: "'https://done'".into() });
    let recording = Arc::new(Recording::new());
    let engine = TranslationEngine::new(recording.clone());

    let outcome = engine
        .run_detailed(
            &profile,
            &EvalContext::new(),
            TranslatedResult::default(),
            Some(ActionKind::SetRedirectUrl),
        )
        .unwrap();

    assert_eq!(outcome.result.redirect_url(), Some("https://done"));
    assert_eq!(outcome.evaluated, vec![2]);
    assert_eq!(outcome.stopped_at, None);
    assert_eq!(recording.seen(), vec!["true", "'https://done'"]);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn failing_condition_aborts_the_pass() {
    let profile = TranslationProfile::new("broken", ProfileType::Registration)
        .with_rule("true", add_role("member"))
        .with_rule("fails", add_role("admin"));

    let err = engine().run(&profile, &EvalContext::new(), None).unwrap_err();

    match err {
        TranslationError::Expression { profile, rule, source } => {
            assert_eq!(profile, "broken");
            assert_eq!(rule, 1);
            assert!(matches!(source, ExpressionError::Evaluation { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failing_action_expression_aborts_the_pass() {
    let profile = TranslationProfile::new("broken", ProfileType::Registration).with_rule(
        "true",
        Action::SetPostSubmitMessage { expression: "unknownVariable".into() },
    );
    let err = engine().run(&profile, &EvalContext::new(), None).unwrap_err();
    assert!(matches!(err, TranslationError::Expression { rule: 0, .. }));
}

#[test]
fn invalid_group_output_is_fatal() {
    let profile = TranslationProfile::new("groups", ProfileType::Registration)
        .with_rule("true", Action::AddToGroup { expression: "notAGroup".into() });
    let err = engine().run(&profile, &EvalContext::new(), None).unwrap_err();
    assert!(matches!(err, TranslationError::InvalidOutput { rule: 0, .. }));
}

#[test]
fn unknown_attribute_type_produces_nothing() {
    let types = Arc::new(TypeCatalog::new().with_type(AttributeType::new("cn", ValueSyntax::String)));
    let profile = TranslationProfile::new("typed", ProfileType::Registration)
        .with_rule("true", add_role("member"))
        .with_rule(
            "true",
            Action::AddAttribute {
                attribute: "cn".into(),
                group: root(),
                expression: "'Alice'".into(),
            },
        );

    let result = engine()
        .with_types(types)
        .run(&profile, &EvalContext::new(), None)
        .unwrap();

    assert!(result.attribute(&root(), "role").is_none());
    assert_eq!(result.attribute(&root(), "cn").unwrap().values, vec!["Alice"]);
}

// ============================================================================
// Registration Flow
// ============================================================================

#[test]
fn translate_seeds_from_request_and_applies_rules() {
    let tmp = GroupPath::new("/tmp").unwrap();
    let staff = GroupPath::new("/staff").unwrap();
    let request = RegistrationRequest {
        attributes: vec![Submitted::interactive(Attribute::new("cn", root(), ["Alice"]))],
        groups: vec![GroupSelection::selected(tmp.clone())],
        default_credential_requirement: Some("password".into()),
        ..corp_request()
    };
    let profile = TranslationProfile::new("signup", ProfileType::Registration)
        .with_rule("true", Action::FilterGroup { pattern: crate::Pattern::new("/tmp.*").unwrap() })
        .with_rule("emailIsCorp", Action::AddToGroup { expression: "'/staff'".into() })
        .with_rule("emailIsCorp", Action::SetEntityState { state: EntityState::OnlyLoginPermitted })
        .with_rule(
            "true",
            Action::ScheduleEntityChange {
                operation: tessera_types::EntityScheduledOperation::Disable,
                days: 30,
            },
        );

    let result = engine()
        .translate(&profile, &request, Trigger::new(TriggeringMode::ManualStandalone))
        .unwrap();

    assert!(!result.is_group_selected(&tmp));
    assert!(result.is_group_selected(&staff));
    assert_eq!(result.attribute(&root(), "cn").unwrap().values, vec!["Alice"]);
    assert!(result.identity("email", "alice@corp").is_some());
    assert_eq!(result.entity_state(), EntityState::OnlyLoginPermitted);
    assert_eq!(result.credential_requirement(), Some("password"));
    assert_eq!(
        result.entity_change().unwrap().at,
        fixed_now() + chrono::Duration::days(30)
    );
}

#[test]
fn convenience_queries_use_their_action_only() {
    let profile = TranslationProfile::new("flow", ProfileType::Registration)
        .with_rule("true", Action::SetAutoAction { decision: AutomaticRequestAction::Reject })
        .with_rule("emailIsCorp", Action::SetAutoAction { decision: AutomaticRequestAction::Accept })
        .with_rule("true", Action::SetRedirectUrl { expression: "'https://after'".into() })
        .with_rule("true", Action::SetConfirmationRedirectUrl { expression: "''".into() });
    let request = corp_request();
    let trigger = Trigger::default();
    let engine = engine();

    let decision = engine
        .auto_process_action(&profile, &request, trigger, crate::RequestSubmitStatus::Submitted)
        .unwrap();
    assert_eq!(decision, AutomaticRequestAction::Accept);

    let submitted = engine.post_submit_redirect_url(&profile, &request, trigger).unwrap();
    assert_eq!(submitted.as_deref(), Some("https://after"));

    let cancelled = engine.post_cancel_redirect_url(&profile, "flow", trigger).unwrap();
    assert_eq!(cancelled.as_deref(), Some("https://after"));

    let confirmed = engine
        .post_confirmation_redirect_url(
            &profile,
            &request,
            trigger,
            ConfirmedElement::identity(&Identity::new("email", "alice@corp")),
        )
        .unwrap();
    assert_eq!(confirmed, None);
}

#[test]
fn cancel_redirect_sees_no_request_data() {
    let profile = TranslationProfile::new("flow", ProfileType::Registration)
        .with_rule("emailIsCorp", Action::SetRedirectUrl { expression: "'https://corp'".into() });
    let url = engine()
        .post_cancel_redirect_url(&profile, "flow", Trigger::default())
        .unwrap();
    assert_eq!(url, None);
}

#[test]
fn default_credential_requirement_seeds_empty_runs() {
    let profile = TranslationProfile::new("p", ProfileType::Enquiry);
    let result = engine()
        .with_default_credential_requirement("sys:all")
        .run(&profile, &EvalContext::new(), None)
        .unwrap();
    assert_eq!(result.credential_requirement(), Some("sys:all"));
}

// ============================================================================
// Properties
// ============================================================================

fn arb_rule() -> impl Strategy<Value = (bool, Action)> {
    let name = prop::sample::select(vec!["role", "cn", "mail"]);
    let value = "[a-z]{1,5}";
    prop_oneof![
        (any::<bool>(), name, value).prop_map(|(cond, n, v)| (
            cond,
            Action::AddAttribute {
                attribute: n.to_string(),
                group: GroupPath::root(),
                expression: format!("'{v}'"),
            }
        )),
        (any::<bool>(), value).prop_map(|(cond, v)| (
            cond,
            Action::AddIdentity {
                identity_type: "email".into(),
                expression: format!("'{v}'"),
            }
        )),
        any::<bool>().prop_map(|cond| (cond, Action::Break)),
    ]
}

fn profile_of(rules: &[(bool, Action)]) -> TranslationProfile {
    rules.iter().fold(
        TranslationProfile::new("generated", ProfileType::Registration),
        |profile, (cond, action)| profile.with_rule(cond.to_string(), action.clone()),
    )
}

proptest! {
    /// Property: two runs of the same profile serialize byte-identically
    #[test]
    fn prop_runs_are_byte_identical(rules in prop::collection::vec(arb_rule(), 0..12)) {
        let profile = profile_of(&rules);
        let engine = engine();
        let first = engine.run(&profile, &EvalContext::new(), None).unwrap();
        let second = engine.run(&profile, &EvalContext::new(), None).unwrap();
        prop_assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    /// Property: each attribute key holds the value of the last matching
    /// rule before the first matching break
    #[test]
    fn prop_last_write_wins_until_break(rules in prop::collection::vec(arb_rule(), 0..12)) {
        let profile = profile_of(&rules);
        let result = engine().run(&profile, &EvalContext::new(), None).unwrap();

        let mut expected = std::collections::BTreeMap::new();
        for (cond, action) in &rules {
            if !cond {
                continue;
            }
            match action {
                Action::Break => break,
                Action::AddAttribute { attribute, expression, .. } => {
                    expected.insert(attribute.clone(), expression.trim_matches('\'').to_string());
                }
                _ => {}
            }
        }

        prop_assert_eq!(result.attributes().count(), expected.len());
        for (name, value) in expected {
            let attribute = result.attribute(&GroupPath::root(), &name).unwrap();
            prop_assert_eq!(&attribute.values, &vec![value]);
        }
    }
}
