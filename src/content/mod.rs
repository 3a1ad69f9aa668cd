/// Content stores
///
/// Each entity type is a tag with a [`ContentKind`] behind it. The moderation
/// engine looks the kind up in a [`ContentRegistry`] and never needs to know
/// which tables a given tag lives in.

pub mod images;
pub mod learning;
pub mod reflections;
pub mod topics;

pub use images::{StudentImage, StudentImageKind, StudentImageStore};
pub use learning::{LearningEntry, LearningEntryKind, LearningEntryStore};
pub use reflections::{
    Reflection, ReflectionKind, ReflectionStatus, ReflectionStore, REMOVED_BY_STAFF,
};
pub use topics::{Topic, TopicStore};

use crate::error::{DeskError, DeskResult};
use crate::moderation::{ActionType, EntityType, ModerationRequest, Snapshot};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;

/// Current state of a stored entity
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: i64,
    pub owner_id: String,
    pub snapshot: Snapshot,
}

/// JSON shape a snapshot field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    OptionalText,
    Integer,
}

/// An editable snapshot field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required_on_create: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, required_on_create: bool) -> Self {
        Self {
            name,
            kind,
            required_on_create,
        }
    }
}

/// Per-type behaviour the moderation engine dispatches to
///
/// All storage methods run on the caller's connection, which is inside the
/// intake or resolution transaction.
#[async_trait]
pub trait ContentKind: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Editable fields of this entity type
    fn fields(&self) -> &'static [FieldSpec];

    /// Shape check for proposed content
    fn validate(&self, action: ActionType, content: &Snapshot) -> DeskResult<()> {
        validate_fields(self.entity_type(), self.fields(), action, content)
    }

    /// Checks against stored state, may fill defaults
    async fn prepare(
        &self,
        _conn: &mut SqliteConnection,
        _action: ActionType,
        _content: &mut Snapshot,
    ) -> DeskResult<()> {
        Ok(())
    }

    /// Load the current state of an entity
    async fn load(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<EntityRecord>>;

    /// Whether an existing entity may be targeted by update or delete
    fn check_mutable(&self, _record: &EntityRecord) -> DeskResult<()> {
        Ok(())
    }

    /// Display-only writes made when a request is submitted
    async fn stage(&self, _conn: &mut SqliteConnection, _request: &ModerationRequest) -> DeskResult<()> {
        Ok(())
    }

    /// Undo `stage` after a rejection; published content is left as it was
    async fn unstage(
        &self,
        _conn: &mut SqliteConnection,
        _request: &ModerationRequest,
    ) -> DeskResult<()> {
        Ok(())
    }

    /// Publish an approved create, returning the new entity id
    async fn publish(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<i64>;

    /// Overwrite an entity with approved content
    async fn replace(&self, conn: &mut SqliteConnection, id: i64, content: &Snapshot) -> DeskResult<()>;

    /// Remove an entity after an approved delete
    async fn remove(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<()>;
}

/// Lookup of content kinds by entity tag
#[derive(Clone)]
pub struct ContentRegistry {
    kinds: HashMap<EntityType, Arc<dyn ContentKind>>,
}

impl ContentRegistry {
    /// Registry with every built-in entity type
    pub fn new() -> Self {
        let mut registry = Self {
            kinds: HashMap::new(),
        };

        registry.register(Arc::new(ReflectionKind));
        registry.register(Arc::new(StudentImageKind));
        registry.register(Arc::new(LearningEntryKind));

        registry
    }

    pub fn register(&mut self, kind: Arc<dyn ContentKind>) {
        self.kinds.insert(kind.entity_type(), kind);
    }

    pub fn get(&self, entity_type: EntityType) -> DeskResult<Arc<dyn ContentKind>> {
        self.kinds.get(&entity_type).cloned().ok_or_else(|| {
            DeskError::Internal(format!("No content kind registered for {}", entity_type))
        })
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a value carries anything
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Shared snapshot validation driven by field specs
pub fn validate_fields(
    entity_type: EntityType,
    fields: &[FieldSpec],
    action: ActionType,
    content: &Snapshot,
) -> DeskResult<()> {
    if action == ActionType::Delete {
        return Ok(());
    }

    if content.values().all(is_blank) {
        return Err(DeskError::Validation(format!(
            "{} content must include at least one non-empty field",
            action.as_str()
        )));
    }

    for (name, value) in content {
        let spec = fields.iter().find(|f| f.name == name).ok_or_else(|| {
            DeskError::Validation(format!("Field '{}' is not editable on {}", name, entity_type))
        })?;

        let type_ok = match spec.kind {
            FieldKind::Text => value.is_string(),
            FieldKind::OptionalText => value.is_string() || value.is_null(),
            FieldKind::Integer => value.as_i64().is_some(),
        };
        if !type_ok {
            return Err(DeskError::Validation(format!(
                "Field '{}' has the wrong type",
                name
            )));
        }

        if spec.required_on_create && is_blank(value) {
            return Err(DeskError::Validation(format!("Field '{}' cannot be empty", name)));
        }
    }

    if action == ActionType::Create {
        if let Some(missing) = fields
            .iter()
            .find(|f| f.required_on_create && !content.contains_key(f.name))
        {
            return Err(DeskError::Validation(format!(
                "Required field '{}' is missing",
                missing.name
            )));
        }
    }

    Ok(())
}

/// Read a text field
pub(crate) fn text_field(content: &Snapshot, name: &str) -> Option<String> {
    content.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Read an integer field
pub(crate) fn int_field(content: &Snapshot, name: &str) -> Option<i64> {
    content.get(name).and_then(Value::as_i64)
}

/// Pick the new value of an optional text field if the snapshot carries it
pub(crate) fn merge_optional_text(content: &Snapshot, name: &str, current: Option<String>) -> Option<String> {
    match content.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) => None,
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::new("title", FieldKind::Text, true),
        FieldSpec::new("subject", FieldKind::OptionalText, false),
        FieldSpec::new("rank", FieldKind::Integer, false),
    ];

    fn snapshot(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    fn check(action: ActionType, value: Value) -> DeskResult<()> {
        validate_fields(EntityType::LearningEntry, FIELDS, action, &snapshot(value))
    }

    #[test]
    fn test_create_requires_required_fields() {
        assert!(check(ActionType::Create, json!({"title": "Fractions"})).is_ok());
        assert!(matches!(
            check(ActionType::Create, json!({"subject": "Math"})),
            Err(DeskError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_content_rejected() {
        assert!(check(ActionType::Create, json!({})).is_err());
        assert!(check(ActionType::Update, json!({"subject": "  "})).is_err());
        assert!(check(ActionType::Update, json!({"subject": null})).is_err());
    }

    #[test]
    fn test_unknown_and_mistyped_fields_rejected() {
        assert!(check(ActionType::Update, json!({"colour": "red"})).is_err());
        assert!(check(ActionType::Update, json!({"rank": "first"})).is_err());
        assert!(check(ActionType::Update, json!({"title": 3})).is_err());
    }

    #[test]
    fn test_update_may_be_partial_but_not_blank_required() {
        assert!(check(ActionType::Update, json!({"subject": "Science"})).is_ok());
        assert!(check(ActionType::Update, json!({"title": "", "subject": "Science"})).is_err());
    }

    #[test]
    fn test_registry_resolves_every_tag() {
        let registry = ContentRegistry::new();
        for ty in [
            EntityType::Reflection,
            EntityType::StudentImage,
            EntityType::LearningEntry,
        ] {
            assert_eq!(registry.get(ty).unwrap().entity_type(), ty);
        }
    }

    #[test]
    fn test_merge_optional_text() {
        let content = snapshot(json!({"caption": null, "alt": "hello"}));
        assert_eq!(merge_optional_text(&content, "caption", Some("old".into())), None);
        assert_eq!(
            merge_optional_text(&content, "alt", None),
            Some("hello".to_string())
        );
        assert_eq!(
            merge_optional_text(&content, "missing", Some("keep".into())),
            Some("keep".to_string())
        );
    }
}
