//! The model abstraction.
//!
//! [`Model`] is implemented by every struct that maps to a table. The bulk
//! engine works with models generically, reading and writing fields by their
//! storage attribute and keeping loaded related rows in an optional
//! [`RelatedCache`].
//!
//! [`Record`] is the object-safe read-only view of a model instance (or of a
//! related row) that trigger conditions evaluate against. Every `Model`
//! is a `Record` through a blanket implementation.

use bulk_triggers_core::TriggerResult;

use crate::fields::FieldDef;
use crate::relations::RelatedCache;
use crate::row::Row;
use crate::value::Value;

/// Object-safe, read-only access to a row-like value.
pub trait Record: Send + Sync {
    /// The table this record belongs to.
    fn model_name(&self) -> &str;

    /// Returns the value of a field, by name or storage attribute.
    ///
    /// `pk` is accepted as an alias of the primary key. Unknown fields yield
    /// `None`.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Returns the already-loaded row a relation field points to.
    fn related(&self, field: &str) -> Option<&dyn Record>;
}

/// The core trait for all models.
///
/// # Examples
///
/// ```
/// use std::sync::LazyLock;
/// use bulk_triggers_core::{TriggerError, TriggerResult};
/// use bulk_triggers_db::fields::{FieldDef, FieldType};
/// use bulk_triggers_db::model::{Model, ModelMeta};
/// use bulk_triggers_db::row::Row;
/// use bulk_triggers_db::value::Value;
///
/// #[derive(Clone)]
/// struct Tag {
///     id: Option<i64>,
///     label: String,
/// }
///
/// static META: LazyLock<ModelMeta> = LazyLock::new(|| {
///     ModelMeta::new("crm", "Tag", "crm_tag").fields(vec![
///         FieldDef::new("id", FieldType::BigAutoField).primary_key(),
///         FieldDef::new("label", FieldType::CharField),
///     ])
/// });
///
/// impl Model for Tag {
///     fn meta() -> &'static ModelMeta { &META }
///     fn pk(&self) -> Option<Value> { self.id.map(Value::Int) }
///     fn set_pk(&mut self, value: Value) {
///         if let Value::Int(id) = value { self.id = Some(id); }
///     }
///     fn field_values(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", Value::from(self.id)), ("label", Value::from(self.label.as_str()))]
///     }
///     fn set_field_value(&mut self, attname: &str, value: Value) -> TriggerResult<()> {
///         match (attname, value) {
///             ("label", Value::String(s)) => self.label = s,
///             (other, _) => return Err(TriggerError::ValueError(format!("bad field {other}"))),
///         }
///         Ok(())
///     }
///     fn from_row(row: &Row) -> TriggerResult<Self> {
///         Ok(Tag { id: row.get("id")?, label: row.get("label")? })
///     }
/// }
///
/// assert_eq!(Tag::table_name(), "crm_tag");
/// assert_eq!(Tag::pk_field_name(), "id");
/// ```
pub trait Model: Clone + Send + Sync + 'static {
    /// Returns the static metadata for this model type.
    fn meta() -> &'static ModelMeta;

    /// Returns the database table name.
    fn table_name() -> &'static str {
        Self::meta().db_table.as_str()
    }

    /// Returns the primary key column.
    fn pk_field_name() -> &'static str {
        Self::meta().pk_column()
    }

    /// Returns the primary key value, or `None` if the instance is unsaved.
    fn pk(&self) -> Option<Value>;

    /// Sets the primary key value (used after INSERT).
    fn set_pk(&mut self, value: Value);

    /// Returns `(column, value)` pairs for every concrete field.
    fn field_values(&self) -> Vec<(&'static str, Value)>;

    /// Returns `(column, value)` pairs excluding the primary key.
    fn non_pk_field_values(&self) -> Vec<(&'static str, Value)> {
        let pk_name = Self::pk_field_name();
        self.field_values()
            .into_iter()
            .filter(|(name, _)| *name != pk_name)
            .collect()
    }

    /// Assigns a field by its storage attribute.
    ///
    /// # Errors
    ///
    /// Implementations return `TypeError` when the value does not fit the
    /// field and `ValueError` for unknown attributes.
    fn set_field_value(&mut self, attname: &str, value: Value) -> TriggerResult<()>;

    /// Constructs an instance from a database row.
    fn from_row(row: &Row) -> TriggerResult<Self>;

    /// The cache of loaded related rows, for models that keep one.
    fn related_cache(&self) -> Option<&RelatedCache> {
        None
    }

    fn related_cache_mut(&mut self) -> Option<&mut RelatedCache> {
        None
    }

    /// Reads a field by name or storage attribute.
    ///
    /// For a foreign key, both `account` and `account_id` return the stored key.
    fn field_value(&self, name: &str) -> Option<Value> {
        let column = if name == "pk" {
            Self::pk_field_name()
        } else {
            Self::meta()
                .get_field(name)
                .map_or(name, |f| f.attname.as_str())
        };
        self.field_values()
            .into_iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }
}

impl<M: Model> Record for M {
    fn model_name(&self) -> &str {
        M::table_name()
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.field_value(field)
    }

    fn related(&self, field: &str) -> Option<&dyn Record> {
        self.related_cache()?
            .get(field)
            .map(|record| record as &dyn Record)
    }
}

/// Links a child table to its parent under multi-table inheritance.
///
/// The child's primary key column doubles as the link to the parent's
/// primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// The parent table.
    pub table: String,
    /// The parent table's primary key column.
    pub parent_pk: String,
}

/// Metadata for a model type.
#[derive(Debug)]
pub struct ModelMeta {
    pub app_label: &'static str,
    /// The type name, e.g. `Account`.
    pub model_name: &'static str,
    pub db_table: String,
    /// Every field, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Set for children under multi-table inheritance.
    pub parent: Option<ParentLink>,
}

impl ModelMeta {
    /// Creates metadata with no fields.
    pub fn new(app_label: &'static str, model_name: &'static str, db_table: &str) -> Self {
        Self {
            app_label,
            model_name,
            db_table: db_table.to_string(),
            fields: Vec::new(),
            parent: None,
        }
    }

    /// Sets the field list.
    pub fn fields(mut self, fields: Vec<FieldDef>) -> Self {
        self.fields = fields;
        self
    }

    /// Declares the parent table for multi-table inheritance.
    pub fn parent(mut self, table: &str, parent_pk: &str) -> Self {
        self.parent = Some(ParentLink {
            table: table.to_string(),
            parent_pk: parent_pk.to_string(),
        });
        self
    }

    /// `app_label.ModelName`
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.model_name)
    }

    /// Looks up a field by name or storage attribute.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.attname == name))
    }

    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// The primary key column, `id` when no field is marked.
    pub fn pk_column(&self) -> &str {
        self.pk_field().map_or("id", |f| f.attname.as_str())
    }

    /// Fields with a column on the table, primary key included.
    pub fn concrete_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_concrete())
    }

    /// Concrete single-valued relation fields.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.field_type.is_single_relation())
    }

    /// Returns `true` under multi-table inheritance.
    pub const fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns `true` when `column` lives on the parent table.
    pub fn is_parent_column(&self, column: &str) -> bool {
        self.parent.is_some()
            && self
                .fields
                .iter()
                .any(|f| f.inherited && f.attname == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Account;

    #[test]
    fn test_meta_defaults() {
        let meta = Account::meta();
        assert_eq!(meta.label(), "crm.Account");
        assert_eq!(Account::table_name(), "crm_account");
        assert_eq!(Account::pk_field_name(), "id");
        assert!(!meta.has_parent());
    }

    #[test]
    fn test_get_field_by_name_or_attname() {
        let meta = Account::meta();
        assert_eq!(meta.get_field("owner").unwrap().attname, "owner_id");
        assert_eq!(meta.get_field("owner_id").unwrap().name, "owner");
        assert!(meta.get_field("nope").is_none());
    }

    #[test]
    fn test_concrete_fields_skip_m2m() {
        let names: Vec<&str> = Account::meta().concrete_fields().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["id", "name", "status", "revenue", "owner", "updated_at"]
        );
        let relations: Vec<&str> = Account::meta().relation_fields().map(|f| f.name).collect();
        assert_eq!(relations, vec!["owner"]);
    }

    #[test]
    fn test_field_value_resolves_names() {
        let mut a = Account::saved(3, "Acme", "open", 10);
        a.owner_id = Some(9);
        assert_eq!(a.field_value("owner"), Some(Value::Int(9)));
        assert_eq!(a.field_value("owner_id"), Some(Value::Int(9)));
        assert_eq!(a.field_value("pk"), Some(Value::Int(3)));
        assert_eq!(a.field_value("missing"), None);
    }

    #[test]
    fn test_non_pk_field_values() {
        let a = Account::saved(1, "Acme", "open", 10);
        let cols: Vec<&str> = a.non_pk_field_values().into_iter().map(|(c, _)| c).collect();
        assert!(!cols.contains(&"id"));
        assert_eq!(cols.len(), 5);
    }

    #[test]
    fn test_record_view() {
        let a = Account::saved(1, "Acme", "open", 10);
        let record: &dyn Record = &a;
        assert_eq!(record.model_name(), "crm_account");
        assert_eq!(record.get_value("status"), Some(Value::from("open")));
        assert!(record.related("owner").is_none());
    }

    #[test]
    fn test_from_row_roundtrip() {
        let a = Account::saved(4, "Globex", "closed", 99);
        let back = Account::from_row(&a.row()).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_set_field_value_type_error() {
        let mut a = Account::new("x", "open", 0);
        let err = a.set_field_value("revenue", Value::from("lots")).unwrap_err();
        assert!(matches!(err, bulk_triggers_core::TriggerError::TypeError(_)));
    }

    #[test]
    fn test_parent_link() {
        let meta = ModelMeta::new("geo", "Restaurant", "geo_restaurant")
            .fields(vec![
                FieldDef::new("place_ptr_id", crate::fields::FieldType::BigIntegerField)
                    .primary_key(),
                FieldDef::new("name", crate::fields::FieldType::CharField).inherited(),
                FieldDef::new("seats", crate::fields::FieldType::IntegerField),
            ])
            .parent("geo_place", "id");
        assert!(meta.has_parent());
        assert_eq!(meta.pk_column(), "place_ptr_id");
        assert!(meta.is_parent_column("name"));
        assert!(!meta.is_parent_column("seats"));
    }
}
