//! Field type definitions.
//!
//! [`FieldType`] is both the column type of a model field and the declared
//! output type of a computed SQL expression. [`FieldDef`] captures everything
//! the bulk engine needs to know about one field: its storage attribute, its
//! relation target, and its save-time hooks.

use crate::model::Record;
use crate::value::Value;

/// A save-time hook, called with the instance and whether it is being added.
///
/// Returning `Some` assigns the value to the field before the write.
pub type PreSaveFn = fn(&dyn Record, bool) -> Option<Value>;

/// The type of a model field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Fixed-precision decimal number.
    DecimalField {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Boolean.
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// Time without date.
    TimeField,
    /// UUID.
    UuidField,
    /// JSON document.
    JsonField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target table.
        to: String,
        /// The referenced column on the target table.
        to_field: String,
        /// Behavior when the referenced row is deleted.
        on_delete: OnDelete,
    },
    /// One-to-one relationship.
    OneToOneField {
        /// The target table.
        to: String,
        /// The referenced column on the target table.
        to_field: String,
        /// Behavior when the referenced row is deleted.
        on_delete: OnDelete,
    },
    /// Many-to-many relationship. Has no column on the owning table.
    ManyToManyField {
        /// The target table.
        to: String,
        /// Optional explicit intermediate table.
        through: Option<String>,
    },
}

impl FieldType {
    /// Returns `true` for foreign keys and one-to-one fields.
    pub const fn is_single_relation(&self) -> bool {
        matches!(self, Self::ForeignKey { .. } | Self::OneToOneField { .. })
    }

    /// Returns the target table and column of a single-valued relation.
    pub fn relation_target(&self) -> Option<(&str, &str)> {
        match self {
            Self::ForeignKey { to, to_field, .. } | Self::OneToOneField { to, to_field, .. } => {
                Some((to.as_str(), to_field.as_str()))
            }
            _ => None,
        }
    }

    /// The SQL type used when an expression of this type is cast.
    ///
    /// Relations cast as their key type. Many-to-many and JSON have no
    /// scalar cast and return `None`.
    pub const fn cast_type(&self) -> Option<&'static str> {
        match self {
            Self::AutoField
            | Self::BigAutoField
            | Self::IntegerField
            | Self::BigIntegerField
            | Self::BooleanField
            | Self::ForeignKey { .. }
            | Self::OneToOneField { .. } => Some("INTEGER"),
            Self::FloatField => Some("REAL"),
            Self::DecimalField { .. } => Some("NUMERIC"),
            Self::CharField
            | Self::TextField
            | Self::DateField
            | Self::DateTimeField
            | Self::TimeField
            | Self::UuidField => Some("TEXT"),
            Self::JsonField | Self::ManyToManyField { .. } => None,
        }
    }
}

/// Behavior when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Delete all related rows.
    Cascade,
    /// Prevent deletion while related rows exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Take no action.
    DoNothing,
}

/// Complete definition of a model field.
///
/// Relation fields have two names: `name` is the relation itself
/// (`account`) and `attname` is the stored key attribute and column
/// (`account_id`). For every other field the two are the same.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The attribute name of this field.
    pub name: &'static str,
    /// The storage attribute, which is also the database column.
    pub attname: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Whether NULL is allowed.
    pub null: bool,
    /// Whether a UNIQUE constraint is applied.
    pub unique: bool,
    /// Default value for new instances.
    pub default: Option<Value>,
    /// Stamped with the current time on every save.
    pub auto_now: bool,
    /// Stamped with the current time when the row is created.
    pub auto_now_add: bool,
    /// Stored on the parent table under multi-table inheritance.
    pub inherited: bool,
    /// Save-time hook, see [`PreSaveFn`].
    pub pre_save: Option<PreSaveFn>,
}

impl FieldDef {
    /// Creates a non-null, non-unique field whose column equals its name.
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            attname: name.to_string(),
            field_type,
            primary_key: false,
            null: false,
            unique: false,
            default: None,
            auto_now: false,
            auto_now_add: false,
            inherited: false,
            pre_save: None,
        }
    }

    /// Creates a foreign key to `to`.`id` stored in `<name>_id`.
    pub fn foreign_key(name: &'static str, to: impl Into<String>) -> Self {
        let mut field = Self::new(
            name,
            FieldType::ForeignKey {
                to: to.into(),
                to_field: "id".to_string(),
                on_delete: OnDelete::Cascade,
            },
        );
        field.attname = format!("{name}_id");
        field
    }

    /// Creates a many-to-many relation to `to`.
    pub fn many_to_many(name: &'static str, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ManyToManyField {
                to: to.into(),
                through: None,
            },
        )
    }

    /// Sets the storage attribute and column.
    pub fn column(mut self, attname: impl Into<String>) -> Self {
        self.attname = attname.into();
        self
    }

    /// Marks this field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values.
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Adds a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    /// Marks this field as stored on the parent table.
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }

    pub fn pre_save(mut self, hook: PreSaveFn) -> Self {
        self.pre_save = Some(hook);
        self
    }

    /// The database column (always the storage attribute).
    pub fn column_name(&self) -> &str {
        &self.attname
    }

    /// Returns `true` for any relation, many-to-many included.
    pub const fn is_relation(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::ForeignKey { .. }
                | FieldType::OneToOneField { .. }
                | FieldType::ManyToManyField { .. }
        )
    }

    /// Returns `true` for many-to-many relations.
    pub const fn is_many_to_many(&self) -> bool {
        matches!(self.field_type, FieldType::ManyToManyField { .. })
    }

    /// Returns `true` when the field has a column on its table.
    pub const fn is_concrete(&self) -> bool {
        !self.is_many_to_many()
    }

    /// Returns `true` when the field matches `name` by name or storage attribute.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.attname == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let f = FieldDef::new("status", FieldType::CharField);
        assert_eq!(f.attname, "status");
        assert!(!f.primary_key);
        assert!(!f.null);
        assert!(f.is_concrete());
        assert!(!f.is_relation());
        assert!(f.pre_save.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let f = FieldDef::new("updated_at", FieldType::DateTimeField)
            .nullable()
            .auto_now();
        assert!(f.null);
        assert!(f.auto_now);
        assert!(!f.auto_now_add);
    }

    #[test]
    fn test_foreign_key_attname() {
        let f = FieldDef::foreign_key("account", "crm_account");
        assert_eq!(f.name, "account");
        assert_eq!(f.attname, "account_id");
        assert_eq!(f.column_name(), "account_id");
        assert!(f.is_relation());
        assert!(f.is_concrete());
        assert_eq!(
            f.field_type.relation_target(),
            Some(("crm_account", "id"))
        );
        assert!(f.answers_to("account"));
        assert!(f.answers_to("account_id"));
        assert!(!f.answers_to("owner"));
    }

    #[test]
    fn test_many_to_many_not_concrete() {
        let f = FieldDef::many_to_many("tags", "crm_tag");
        assert!(f.is_relation());
        assert!(f.is_many_to_many());
        assert!(!f.is_concrete());
        assert_eq!(f.field_type.cast_type(), None);
    }

    #[test]
    fn test_cast_types() {
        assert_eq!(FieldType::IntegerField.cast_type(), Some("INTEGER"));
        assert_eq!(FieldType::FloatField.cast_type(), Some("REAL"));
        assert_eq!(FieldType::CharField.cast_type(), Some("TEXT"));
        assert_eq!(FieldType::JsonField.cast_type(), None);
    }
}
