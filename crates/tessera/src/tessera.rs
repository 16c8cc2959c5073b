//! Main entry point for the Tessera SDK.
//!
//! The `Tessera` struct wires configuration, a directory store and an
//! expression evaluator into the resolution and translation services.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tessera_bulk::{
    BulkOptions, BulkResolver, EntityInGroup, GroupAttributes, GroupStructure, Instrumentation,
    ResolvedAttributes,
};
use tessera_config::{ConfigLoader, TesseraConfig};
use tessera_expr::ExpressionEvaluator;
use tessera_store::DirectoryStore;
use tessera_translation::{
    AutomaticRequestAction, RegistrationRequest, RequestSubmitStatus, TranslatedResult,
    TranslationEngine, TranslationProfile, Trigger,
};
use tessera_types::{Attribute, EntityId, GroupPath};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, TesseraError};

/// Installs a global fmt subscriber filtered by `filter`.
///
/// `RUST_LOG`, when set, takes precedence over `filter`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| TesseraError::Tracing(e.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| TesseraError::Tracing(e.to_string()))
}

/// A configured Tessera instance.
///
/// Every resolution call takes its own store snapshot, so one instance can
/// serve concurrent callers.
pub struct Tessera {
    config: TesseraConfig,
    store: Arc<dyn DirectoryStore>,
    expressions: Arc<dyn ExpressionEvaluator>,
    bulk: BulkResolver,
    translation: TranslationEngine,
    profiles: BTreeMap<String, TranslationProfile>,
}

impl std::fmt::Debug for Tessera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tessera")
            .field("config", &self.config)
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Tessera {
    /// Creates an instance from an already loaded configuration.
    pub fn new(
        config: TesseraConfig,
        store: Arc<dyn DirectoryStore>,
        expressions: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        config.validate()?;

        let bulk = BulkResolver::new(Arc::clone(&expressions)).with_options(bulk_options(&config));
        let mut translation = TranslationEngine::new(Arc::clone(&expressions))
            .with_context_logging(config.translation.log_context);
        if let Some(requirement) = &config.translation.default_credential_requirement {
            translation = translation.with_default_credential_requirement(requirement.clone());
        }

        Ok(Self {
            config,
            store,
            expressions,
            bulk,
            translation,
            profiles: BTreeMap::new(),
        })
    }

    /// Loads layered configuration for `project_dir` and creates an instance.
    pub fn open(
        project_dir: impl AsRef<Path>,
        store: Arc<dyn DirectoryStore>,
        expressions: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        let config = ConfigLoader::new().with_project_dir(project_dir).load()?;
        Self::new(config, store, expressions)
    }

    /// Records batch read timings in `instrumentation`.
    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.bulk = self.bulk.with_instrumentation(instrumentation);
        self
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn translation_engine(&self) -> &TranslationEngine {
        &self.translation
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Effective attributes of every member of `groups`.
    pub fn resolve_many(
        &self,
        groups: &[GroupPath],
        names: Option<&[String]>,
    ) -> Result<ResolvedAttributes> {
        let snapshot = self.store.snapshot()?;
        Ok(self.bulk.resolve_many(snapshot.as_ref(), groups, names)?)
    }

    /// Effective attributes of `entity` in `group`.
    pub fn resolve_group(&self, entity: EntityId, group: &GroupPath) -> Result<GroupAttributes> {
        let snapshot = self.store.snapshot()?;
        Ok(self.bulk.resolve_group(snapshot.as_ref(), entity, group)?)
    }

    /// One effective attribute of `entity` in `group`.
    pub fn resolve_attribute(
        &self,
        entity: EntityId,
        group: &GroupPath,
        name: &str,
    ) -> Result<Option<Attribute>> {
        let snapshot = self.store.snapshot()?;
        Ok(self
            .bulk
            .resolve_attribute(snapshot.as_ref(), entity, group, name)?)
    }

    pub fn group_and_subgroups(&self, root: &GroupPath) -> Result<GroupStructure> {
        let snapshot = self.store.snapshot()?;
        Ok(self.bulk.group_and_subgroups(snapshot.as_ref(), root)?)
    }

    pub fn membership_info(&self, group: &GroupPath) -> Result<BTreeMap<EntityId, EntityInGroup>> {
        let snapshot = self.store.snapshot()?;
        Ok(self.bulk.membership_info(snapshot.as_ref(), group)?)
    }

    // ========================================================================
    // Translation Profiles
    // ========================================================================

    /// Loads every `*.json` profile from the configured profiles directory.
    ///
    /// Profiles are validated against the expression evaluator. A missing
    /// directory loads nothing. Returns the number of profiles loaded.
    pub fn load_profiles(&mut self) -> Result<usize> {
        let dir = self.config.translation.profiles_dir.clone();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No profiles directory");
            return Ok(0);
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| TesseraError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| TesseraError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = BTreeMap::new();
        for path in paths {
            let json = std::fs::read_to_string(&path).map_err(|source| TesseraError::Io {
                path: path.clone(),
                source,
            })?;
            let profile = TranslationProfile::from_json(&json)?;
            profile.validate(Some(self.expressions.as_ref()))?;
            debug!(profile = %profile.name, path = %path.display(), "Profile loaded");
            if loaded.contains_key(&profile.name) {
                return Err(TesseraError::DuplicateProfile {
                    name: profile.name,
                    path,
                });
            }
            loaded.insert(profile.name.clone(), profile);
        }

        let count = loaded.len();
        self.profiles = loaded;
        info!(count, dir = %dir.display(), "Translation profiles loaded");
        Ok(count)
    }

    /// Registers `profile` after validating it, replacing one of the same name.
    pub fn add_profile(&mut self, profile: TranslationProfile) -> Result<()> {
        profile.validate(Some(self.expressions.as_ref()))?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&TranslationProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| TesseraError::ProfileNotFound(name.to_string()))
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    // ========================================================================
    // Translation
    // ========================================================================

    /// Translates `request` with the named profile.
    ///
    /// Added attributes are checked against the store's current type catalog.
    pub fn translate(
        &self,
        profile: &str,
        request: &RegistrationRequest,
        trigger: Trigger,
    ) -> Result<TranslatedResult> {
        let profile = self.profile(profile)?;
        Ok(self.typed_engine()?.translate(profile, request, trigger)?)
    }

    pub fn auto_process_action(
        &self,
        profile: &str,
        request: &RegistrationRequest,
        trigger: Trigger,
        status: RequestSubmitStatus,
    ) -> Result<AutomaticRequestAction> {
        let profile = self.profile(profile)?;
        Ok(self
            .translation
            .auto_process_action(profile, request, trigger, status)?)
    }

    pub fn post_submit_redirect_url(
        &self,
        profile: &str,
        request: &RegistrationRequest,
        trigger: Trigger,
    ) -> Result<Option<String>> {
        let profile = self.profile(profile)?;
        Ok(self
            .translation
            .post_submit_redirect_url(profile, request, trigger)?)
    }

    pub fn post_cancel_redirect_url(
        &self,
        profile: &str,
        form: &str,
        trigger: Trigger,
    ) -> Result<Option<String>> {
        let profile = self.profile(profile)?;
        Ok(self
            .translation
            .post_cancel_redirect_url(profile, form, trigger)?)
    }

    fn typed_engine(&self) -> Result<TranslationEngine> {
        let types = self.store.snapshot()?.attribute_types()?;
        Ok(self.translation.clone().with_types(Arc::new(types)))
    }
}

fn bulk_options(config: &TesseraConfig) -> BulkOptions {
    BulkOptions {
        slow_read_threshold: Duration::from_millis(config.bulk.slow_read_threshold_ms),
        include_global_attributes: config.bulk.include_global_attributes,
        evaluate_statements: config.statements.evaluate_statements,
        max_entities: config.bulk.max_entities,
    }
}
