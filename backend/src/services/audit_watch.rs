//! Declarative description of which entities, fields and operations are
//! captured automatically.
//!
//! Specs are built once at start-up into a [`WatchRegistry`] and shared by
//! reference with every unit of work. They can be declared in code with
//! [`Watch`] or loaded from a JSON table whose keys are resolved against an
//! [`EntityCatalog`] of registered types.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    any::{type_name, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    str::FromStr,
    sync::Arc,
};

use crate::utils::normalize::AuditValue;

/// An entity the capture pipeline can read fields from.
pub trait Auditable: Send + Sync + 'static {
    /// Current value of `name`; `None` when the entity has no such field or
    /// it was never loaded.
    fn field(&self, name: &str) -> Option<AuditValue>;

    fn entity_type_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    fn entity_type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Keeps the recognised operations; an empty result means all of them.
pub fn normalize_operations<I, S>(raw: I) -> Vec<Operation>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selected = Vec::new();
    for candidate in raw {
        if let Ok(op) = candidate.as_ref().parse::<Operation>() {
            if !selected.contains(&op) {
                selected.push(op);
            }
        }
    }
    if selected.is_empty() {
        Operation::ALL.to_vec()
    } else {
        selected
    }
}

#[derive(Debug, Clone)]
pub struct ModelChangeSpec {
    type_id: TypeId,
    type_name: &'static str,
    pub entity_type: String,
    pub tracked_fields: Vec<String>,
    pub identity_field: String,
    pub identity_fallbacks: Vec<String>,
    pub operations: Vec<Operation>,
}

impl ModelChangeSpec {
    pub fn watches(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn applies_to(&self, entity: &dyn Auditable) -> bool {
        entity.entity_type_id() == self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Identity field first, then each fallback; blank values are skipped.
    pub fn resolve_identity(&self, entity: &dyn Auditable) -> Option<String> {
        std::iter::once(self.identity_field.as_str())
            .chain(self.identity_fallbacks.iter().map(String::as_str))
            .filter(|name| !name.is_empty())
            .find_map(|name| entity.field(name).and_then(|value| value.as_identity()))
    }
}

/// Typed watch declaration for entity type `T`.
pub struct Watch<T> {
    entity_type: String,
    fields: Vec<String>,
    identity_field: String,
    fallbacks: Vec<String>,
    operations: Vec<Operation>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Auditable> Watch<T> {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: Vec::new(),
            identity_field: "id".to_string(),
            fallbacks: Vec::new(),
            operations: Operation::ALL.to_vec(),
            _entity: PhantomData,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn identity(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    pub fn fallback<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallbacks = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn operations<I>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        let selected: Vec<Operation> = operations.into_iter().collect();
        self.operations = if selected.is_empty() {
            Operation::ALL.to_vec()
        } else {
            selected
        };
        self
    }

    fn into_spec(self) -> ModelChangeSpec {
        ModelChangeSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            entity_type: self.entity_type,
            tracked_fields: self.fields,
            identity_field: self.identity_field,
            identity_fallbacks: self.fallbacks,
            operations: self.operations,
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    type_id: TypeId,
    type_name: &'static str,
    default_entity: String,
}

/// Entity types that declarative watch entries may refer to by name.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `reference` (e.g. `"identity.User"`). The default
    /// audit entity name is the lower-cased last path segment.
    pub fn register<T: Auditable>(mut self, reference: &str) -> Self {
        let default_entity = reference
            .rsplit('.')
            .next()
            .unwrap_or(reference)
            .to_ascii_lowercase();
        self.entries.insert(
            reference.to_string(),
            CatalogEntry {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                default_entity,
            },
        );
        self
    }

    fn resolve(&self, reference: &str) -> Option<&CatalogEntry> {
        self.entries.get(reference)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn default_identity_field() -> String {
    "id".to_string()
}

/// One entry of the declarative watch table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatchOptions {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub fields: Vec<String>,
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub fallback_identity: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub operations: Vec<String>,
}

impl WatchOptions {
    fn new(entity: &str, fields: &[&str], fallback: &[&str]) -> Self {
        Self {
            entity: Some(entity.to_string()),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            identity_field: default_identity_field(),
            fallback_identity: fallback.iter().map(|f| f.to_string()).collect(),
            operations: Vec::new(),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "entity": self.entity,
            "fields": self.fields,
            "identity_field": self.identity_field,
            "fallback_identity": self.fallback_identity,
            "operations": self.operations,
        })
    }
}

/// Declarative watch table: type reference to options, in evaluation order.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    entries: Vec<(String, Value)>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        let entries = [
            (
                "identity.User",
                WatchOptions::new(
                    "user",
                    &[
                        "email",
                        "status",
                        "first_name",
                        "last_name",
                        "is_service_account",
                        "locale_preference",
                        "theme_preference",
                    ],
                    &["email"],
                ),
            ),
            (
                "identity.Role",
                WatchOptions::new("role", &["name", "description"], &["name"]),
            ),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(reference, options)| (reference.to_string(), options.to_value()))
                .collect(),
        }
    }
}

impl WatchConfig {
    pub fn disabled() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }

    /// Interprets the external override: unset or blank keeps the default
    /// table, `false` disables capture, a JSON object replaces the table.
    /// Anything else is logged and ignored.
    pub fn from_setting(raw: Option<&str>) -> Self {
        let Some(trimmed) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::default();
        };
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::disabled();
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Self::from_map(map),
            _ => {
                tracing::warn!("AUDIT_LOG_MODEL_EVENTS must be a JSON object; using defaults");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchRegistry {
    specs: Vec<Arc<ModelChangeSpec>>,
}

impl WatchRegistry {
    pub fn builder() -> WatchRegistryBuilder {
        WatchRegistryBuilder::default()
    }

    /// Resolves each entry of `config` against `catalog`. Entries that are
    /// malformed, have no fields, or name an unknown type are skipped with a
    /// warning.
    pub fn from_config(config: &WatchConfig, catalog: &EntityCatalog) -> Self {
        let mut specs: Vec<Arc<ModelChangeSpec>> = Vec::with_capacity(config.entries.len());
        for (reference, raw) in &config.entries {
            let options = match serde_json::from_value::<WatchOptions>(raw.clone()) {
                Ok(options) => options,
                Err(err) => {
                    tracing::warn!(
                        entry = %reference,
                        error = %err,
                        "Audit watch entry is not a valid mapping; skipping"
                    );
                    continue;
                }
            };
            if options.fields.is_empty() {
                tracing::warn!(entry = %reference, "Audit watch entry has no fields; skipping");
                continue;
            }
            let Some(resolved) = catalog.resolve(reference) else {
                tracing::warn!(
                    entry = %reference,
                    "Audit watch entry refers to an unregistered entity type; skipping"
                );
                continue;
            };
            let entity_type = options
                .entity
                .filter(|entity| !entity.trim().is_empty())
                .unwrap_or_else(|| resolved.default_entity.clone());
            if let Some(earlier) = specs.iter().find(|spec| spec.type_id == resolved.type_id) {
                tracing::warn!(
                    entry = %reference,
                    shadowed_by = %earlier.entity_type,
                    "Audit watch entry repeats an earlier entity type; it will never match"
                );
            }
            specs.push(Arc::new(ModelChangeSpec {
                type_id: resolved.type_id,
                type_name: resolved.type_name,
                entity_type,
                tracked_fields: options.fields,
                identity_field: options.identity_field,
                identity_fallbacks: options.fallback_identity,
                operations: normalize_operations(&options.operations),
            }));
        }
        Self { specs }
    }

    /// First spec watching the entity's concrete type.
    pub fn matching(&self, entity: &dyn Auditable) -> Option<&Arc<ModelChangeSpec>> {
        self.specs.iter().find(|spec| spec.applies_to(entity))
    }

    pub fn specs(&self) -> &[Arc<ModelChangeSpec>] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }
}

#[derive(Default)]
pub struct WatchRegistryBuilder {
    specs: Vec<Arc<ModelChangeSpec>>,
}

impl WatchRegistryBuilder {
    pub fn watch<T: Auditable>(mut self, watch: Watch<T>) -> Self {
        if watch.fields.is_empty() {
            tracing::warn!(
                entity = %watch.entity_type,
                model = type_name::<T>(),
                "Audit watch declaration has no fields; skipping"
            );
            return self;
        }
        self.specs.push(Arc::new(watch.into_spec()));
        self
    }

    pub fn build(self) -> WatchRegistry {
        WatchRegistry { specs: self.specs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct User {
        id: Option<i64>,
        email: String,
    }

    impl Auditable for User {
        fn field(&self, name: &str) -> Option<AuditValue> {
            match name {
                "id" => Some(self.id.into()),
                "email" => Some(self.email.as_str().into()),
                _ => None,
            }
        }
    }

    struct Role;

    impl Auditable for Role {
        fn field(&self, _name: &str) -> Option<AuditValue> {
            None
        }
    }

    fn catalog() -> EntityCatalog {
        EntityCatalog::new()
            .register::<User>("identity.User")
            .register::<Role>("identity.Role")
    }

    #[test]
    fn operations_are_normalized() {
        assert_eq!(
            normalize_operations([" Insert ", "DELETE", "bogus"]),
            vec![Operation::Insert, Operation::Delete]
        );
        assert_eq!(normalize_operations(Vec::<&str>::new()), Operation::ALL.to_vec());
        assert_eq!(normalize_operations(["nope"]), Operation::ALL.to_vec());
    }

    #[test]
    fn default_config_resolves_registered_types() {
        let registry = WatchRegistry::from_config(&WatchConfig::default(), &catalog());
        assert_eq!(registry.len(), 2);
        let user = User {
            id: Some(1),
            email: "a@example.com".into(),
        };
        let spec = registry.matching(&user).expect("user spec");
        assert_eq!(spec.entity_type, "user");
        assert!(spec.tracked_fields.contains(&"status".to_string()));
        assert_eq!(spec.operations, Operation::ALL.to_vec());
        assert_eq!(registry.matching(&Role).expect("role").entity_type, "role");
    }

    #[test]
    fn bad_entries_are_skipped() {
        let config = WatchConfig::from_map(
            json!({
                "identity.User": { "fields": "email", "operations": ["update"] },
                "identity.Role": { "fields": [] },
                "identity.Missing": { "fields": ["name"] },
                "identity.Broken": "not a mapping"
            })
            .as_object()
            .cloned()
            .expect("object"),
        );
        let registry = WatchRegistry::from_config(&config, &catalog());
        assert_eq!(registry.len(), 1);
        let spec = &registry.specs()[0];
        assert_eq!(spec.entity_type, "user");
        assert_eq!(spec.tracked_fields, vec!["email".to_string()]);
        assert_eq!(spec.operations, vec![Operation::Update]);
    }

    #[test]
    fn setting_false_disables_and_garbage_uses_defaults() {
        assert!(WatchConfig::from_setting(Some("false")).is_empty());
        assert_eq!(WatchConfig::from_setting(None), WatchConfig::default());
        assert_eq!(WatchConfig::from_setting(Some("  ")), WatchConfig::default());
        assert_eq!(WatchConfig::from_setting(Some("[1, 2]")), WatchConfig::default());
        assert_eq!(WatchConfig::from_setting(Some("{not json")), WatchConfig::default());

        let custom = WatchConfig::from_setting(Some(r#"{"identity.Role": {"fields": ["name"]}}"#));
        assert_eq!(custom.len(), 1);
    }

    #[test]
    fn first_listed_entry_wins_for_aliased_types() {
        let catalog = EntityCatalog::new()
            .register::<User>("z.Person")
            .register::<User>("a.Person");
        let config = WatchConfig::from_setting(Some(
            r#"{
                "z.Person": { "entity": "first_listed", "fields": ["email"] },
                "a.Person": { "entity": "second_listed", "fields": ["email"] }
            }"#,
        ));
        let registry = WatchRegistry::from_config(&config, &catalog);
        assert_eq!(registry.len(), 2);
        let user = User {
            id: Some(1),
            email: "a@example.com".into(),
        };
        assert_eq!(
            registry.matching(&user).expect("user spec").entity_type,
            "first_listed"
        );
    }

    #[test]
    fn identity_uses_fallback_when_primary_missing() {
        let registry = WatchRegistry::builder()
            .watch(
                Watch::<User>::new("user")
                    .fields(["email"])
                    .fallback(["email"]),
            )
            .build();
        let spec = &registry.specs()[0];
        let pending = User {
            id: None,
            email: "new@example.com".into(),
        };
        assert_eq!(spec.resolve_identity(&pending).as_deref(), Some("new@example.com"));
        let saved = User {
            id: Some(12),
            email: "new@example.com".into(),
        };
        assert_eq!(spec.resolve_identity(&saved).as_deref(), Some("12"));
    }

    #[test]
    fn typed_watch_without_fields_is_skipped() {
        let registry = WatchRegistry::builder()
            .watch(Watch::<Role>::new("role"))
            .build();
        assert!(registry.is_empty());
        assert!(registry.matching(&Role).is_none());
    }
}
