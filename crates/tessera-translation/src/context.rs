//! Translation contexts built from registration and enquiry requests.
//!
//! The context is an ephemeral [`EvalContext`] rebuilt for every pass. Keys
//! prefixed with `r` (`rattr`, `ridsByType`, `rgroups`) hold only the
//! elements collected automatically, without user interaction.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tessera_expr::EvalContext;
use tessera_types::{Attribute, GroupPath, Identity};

use crate::result::{SelectedGroup, TranslatedResult};

/// Names of the variables exposed to profile expressions.
pub mod context_keys {
    pub const ATTR: &str = "attr";
    pub const ATTRS: &str = "attrs";
    pub const RATTR: &str = "rattr";
    pub const RATTRS: &str = "rattrs";
    pub const IDS_BY_TYPE: &str = "idsByType";
    pub const RIDS_BY_TYPE: &str = "ridsByType";
    /// Alias of [`IDS_BY_TYPE`].
    pub const IDS_BY_TYPE_OBJ: &str = "idsByTypeObj";
    /// Alias of [`RIDS_BY_TYPE`].
    pub const RIDS_BY_TYPE_OBJ: &str = "ridsByTypeObj";
    pub const GROUPS: &str = "groups";
    pub const RGROUPS: &str = "rgroups";
    pub const AGREEMENTS: &str = "agrs";
    pub const STATUS: &str = "status";
    pub const TRIGGERED: &str = "triggered";
    pub const ON_IDP_ENDPOINT: &str = "onIdpEndpoint";
    pub const USER_LOCALE: &str = "userLocale";
    pub const REGISTRATION_FORM: &str = "registrationForm";
    pub const REQUEST_ID: &str = "requestId";
    pub const CONFIRMED_ELEMENT_TYPE: &str = "confirmedElementType";
    pub const CONFIRMED_ELEMENT_NAME: &str = "confirmedElementName";
    pub const CONFIRMED_ELEMENT_VALUE: &str = "confirmedElementValue";
}

// ============================================================================
// Request Model
// ============================================================================

/// How a request element was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Retrieval {
    /// Entered by the user.
    #[default]
    Interactive,
    /// Taken from a remote login, shown read-only.
    Automatic,
    /// Taken from a remote login, not shown.
    AutomaticHidden,
    /// Taken from a remote login when available, editable otherwise.
    AutomaticOrInteractive,
}

impl Retrieval {
    /// Whether the element can only come from a remote login.
    pub fn is_automatic_only(self) -> bool {
        matches!(self, Self::Automatic | Self::AutomaticHidden)
    }
}

/// A request element with its collection mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted<T> {
    pub value: T,
    #[serde(default)]
    pub retrieval: Retrieval,
}

impl<T> Submitted<T> {
    pub fn interactive(value: T) -> Self {
        Self {
            value,
            retrieval: Retrieval::Interactive,
        }
    }

    pub fn automatic(value: T) -> Self {
        Self {
            value,
            retrieval: Retrieval::Automatic,
        }
    }
}

/// A group offered by the form, with the user's choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSelection {
    pub group: GroupPath,
    pub selected: bool,
    #[serde(default)]
    pub retrieval: Retrieval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_idp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_profile: Option<String>,
}

impl GroupSelection {
    pub fn selected(group: GroupPath) -> Self {
        Self {
            group,
            selected: true,
            retrieval: Retrieval::Interactive,
            remote_idp: None,
            translation_profile: None,
        }
    }

    pub fn with_retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_remote_origin(
        mut self,
        remote_idp: impl Into<String>,
        translation_profile: impl Into<String>,
    ) -> Self {
        self.remote_idp = Some(remote_idp.into());
        self.translation_profile = Some(translation_profile.into());
        self
    }
}

/// A submitted registration or enquiry request together with the form
/// settings the translation needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationRequest {
    pub form: String,
    pub request_id: Option<String>,
    pub user_locale: Option<String>,
    pub attributes: Vec<Submitted<Attribute>>,
    pub identities: Vec<Submitted<Identity>>,
    pub groups: Vec<GroupSelection>,
    pub agreements: Vec<bool>,
    /// Credential requirement of the form, used when no rule sets one.
    pub default_credential_requirement: Option<String>,
}

impl RegistrationRequest {
    pub fn new(form: impl Into<String>) -> Self {
        Self {
            form: form.into(),
            ..Self::default()
        }
    }

    /// Accumulator seeded with everything the request declares.
    ///
    /// `fallback_requirement` applies when the form has no default
    /// credential requirement.
    pub fn initial_result(&self, fallback_requirement: Option<&str>) -> TranslatedResult {
        let requirement = self
            .default_credential_requirement
            .as_deref()
            .or(fallback_requirement)
            .map(str::to_string);
        let mut result = TranslatedResult::new(requirement);
        for attribute in &self.attributes {
            result.add_attribute(attribute.value.clone());
        }
        for identity in &self.identities {
            result.add_identity(identity.value.clone());
        }
        for selection in self.groups.iter().filter(|g| g.selected) {
            result.add_group(SelectedGroup {
                group: selection.group.clone(),
                remote_idp: selection.remote_idp.clone(),
                translation_profile: selection.translation_profile.clone(),
            });
        }
        result
    }
}

// ============================================================================
// Trigger Metadata
// ============================================================================

/// What started the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggeringMode {
    /// User opened the form while logging in.
    ManualAtLogin,
    /// User opened the standalone form.
    #[default]
    ManualStandalone,
    /// An administrator filed the request.
    ManualAdmin,
    /// Triggered automatically after a remote login of an unknown user.
    AfterRemoteLogin,
}

impl TriggeringMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManualAtLogin => "manualAtLogin",
            Self::ManualStandalone => "manualStandalone",
            Self::ManualAdmin => "manualAdmin",
            Self::AfterRemoteLogin => "afterRemoteLogin",
        }
    }
}

impl Display for TriggeringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the request was submitted or the form abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestSubmitStatus {
    #[default]
    Submitted,
    NotSubmitted,
}

impl RequestSubmitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::NotSubmitted => "notSubmitted",
        }
    }
}

/// How the form was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub mode: TriggeringMode,
    pub on_idp_endpoint: bool,
}

impl Trigger {
    pub fn new(mode: TriggeringMode) -> Self {
        Self {
            mode,
            on_idp_endpoint: false,
        }
    }

    pub fn on_idp_endpoint(mut self) -> Self {
        self.on_idp_endpoint = true;
        self
    }
}

// ============================================================================
// Confirmation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmedElementType {
    Identity,
    Attribute,
}

impl ConfirmedElementType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Attribute => "attribute",
        }
    }
}

/// The request element whose confirmation link was followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedElement {
    pub element_type: ConfirmedElementType,
    pub name: String,
    pub value: String,
}

impl ConfirmedElement {
    pub fn identity(identity: &Identity) -> Self {
        Self {
            element_type: ConfirmedElementType::Identity,
            name: identity.type_id.clone(),
            value: identity.value.clone(),
        }
    }

    /// Confirmation of an attribute's first value.
    pub fn attribute(attribute: &Attribute) -> Self {
        Self {
            element_type: ConfirmedElementType::Attribute,
            name: attribute.name.clone(),
            value: attribute.first_value().to_string(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds the [`EvalContext`] of a translation pass.
///
/// Without a request only the base keys (`status`, `triggered`,
/// `onIdpEndpoint`, `registrationForm`) are present.
#[derive(Debug, Clone)]
pub struct RegistrationContextBuilder<'a> {
    form: String,
    request: Option<&'a RegistrationRequest>,
    status: RequestSubmitStatus,
    trigger: Trigger,
    confirmed: Option<ConfirmedElement>,
}

impl<'a> RegistrationContextBuilder<'a> {
    /// Base context of `form`, without request data.
    pub fn new(form: impl Into<String>) -> Self {
        Self {
            form: form.into(),
            request: None,
            status: RequestSubmitStatus::Submitted,
            trigger: Trigger::default(),
            confirmed: None,
        }
    }

    /// Context of a submitted request.
    pub fn for_request(request: &'a RegistrationRequest) -> Self {
        Self {
            request: Some(request),
            ..Self::new(request.form.clone())
        }
    }

    pub fn with_status(mut self, status: RequestSubmitStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_confirmation(mut self, confirmed: ConfirmedElement) -> Self {
        self.confirmed = Some(confirmed);
        self
    }

    pub fn build(&self) -> EvalContext {
        let mut ctx = EvalContext::new()
            .with(context_keys::ON_IDP_ENDPOINT, self.trigger.on_idp_endpoint)
            .with(context_keys::TRIGGERED, self.trigger.mode.as_str())
            .with(context_keys::STATUS, self.status.as_str())
            .with(context_keys::REGISTRATION_FORM, self.form.as_str());

        if let Some(request) = self.request {
            insert_request(&mut ctx, request);
        }

        if let Some(confirmed) = &self.confirmed {
            ctx.insert(context_keys::CONFIRMED_ELEMENT_TYPE, confirmed.element_type.as_str());
            ctx.insert(context_keys::CONFIRMED_ELEMENT_NAME, confirmed.name.as_str());
            ctx.insert(context_keys::CONFIRMED_ELEMENT_VALUE, confirmed.value.as_str());
        }
        ctx
    }
}

fn insert_request(ctx: &mut EvalContext, request: &RegistrationRequest) {
    ctx.insert(context_keys::USER_LOCALE, optional(request.user_locale.as_deref()));
    ctx.insert(context_keys::REQUEST_ID, optional(request.request_id.as_deref()));

    let mut attr = Map::new();
    let mut attrs = Map::new();
    let mut rattr = Map::new();
    let mut rattrs = Map::new();
    for submitted in &request.attributes {
        let attribute = &submitted.value;
        let first = json!(attribute.first_value());
        let all = json!(attribute.values);
        if submitted.retrieval.is_automatic_only() {
            rattr.insert(attribute.name.clone(), first.clone());
            rattrs.insert(attribute.name.clone(), all.clone());
        }
        attr.insert(attribute.name.clone(), first);
        attrs.insert(attribute.name.clone(), all);
    }
    ctx.insert(context_keys::ATTR, attr);
    ctx.insert(context_keys::ATTRS, attrs);
    ctx.insert(context_keys::RATTR, rattr);
    ctx.insert(context_keys::RATTRS, rattrs);

    let mut ids: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut rids: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for submitted in &request.identities {
        let identity = &submitted.value;
        ids.entry(&identity.type_id).or_default().push(&identity.value);
        if submitted.retrieval.is_automatic_only() {
            rids.entry(&identity.type_id).or_default().push(&identity.value);
        }
    }
    let ids = json!(ids);
    let rids = json!(rids);
    ctx.insert(context_keys::IDS_BY_TYPE_OBJ, ids.clone());
    ctx.insert(context_keys::RIDS_BY_TYPE_OBJ, rids.clone());
    ctx.insert(context_keys::IDS_BY_TYPE, ids);
    ctx.insert(context_keys::RIDS_BY_TYPE, rids);

    let selected = request.groups.iter().filter(|g| g.selected);
    let groups: Vec<&str> = selected.clone().map(|g| g.group.as_str()).collect();
    let rgroups: Vec<&str> = selected
        .filter(|g| g.retrieval.is_automatic_only())
        .map(|g| g.group.as_str())
        .collect();
    ctx.insert(context_keys::GROUPS, json!(groups));
    ctx.insert(context_keys::RGROUPS, json!(rgroups));

    let agreements: Vec<String> = request.agreements.iter().map(ToString::to_string).collect();
    ctx.insert(context_keys::AGREEMENTS, json!(agreements));
}

fn optional(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}
