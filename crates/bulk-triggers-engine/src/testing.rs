//! Unit-test fixtures: sample models, a SQLite schema and a shared log.

use std::sync::{Arc, LazyLock, Mutex};

use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::{
    DbExecutor, FieldDef, FieldType, FromValue, Model, ModelMeta, RelatedCache, Row, Value,
};
use bulk_triggers_db_backends::SqliteBackend;

pub const SCHEMA: &str = "
    CREATE TABLE crm_owner (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL);
    CREATE TABLE crm_account (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        revenue INTEGER NOT NULL DEFAULT 0,
        owner_id INTEGER REFERENCES crm_owner(id),
        updated_at TEXT
    );
    CREATE TABLE crm_line (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL REFERENCES crm_account(id),
        amount INTEGER NOT NULL
    );
";

/// An executor with no tables, for tests that never reach the database.
pub fn memory_db() -> Arc<dyn DbExecutor> {
    Arc::new(SqliteBackend::memory().expect("in-memory sqlite"))
}

/// An in-memory database with [`SCHEMA`] applied.
pub async fn schema_db() -> Arc<SqliteBackend> {
    let db = SqliteBackend::memory().expect("in-memory sqlite");
    db.execute_script(SCHEMA).await.expect("schema");
    Arc::new(db)
}

/// A cloneable, thread-safe list of strings handlers append to.
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: String) {
        self.0.lock().expect("log lock").push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub id: Option<i64>,
    pub name: String,
    pub status: String,
    pub revenue: i64,
    pub owner_id: Option<i64>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub related: RelatedCache,
}

impl Account {
    pub fn new(name: &str, status: &str, revenue: i64) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            revenue,
            ..Self::default()
        }
    }

    pub fn saved(id: i64, name: &str, status: &str, revenue: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::new(name, status, revenue)
        }
    }
}

static ACCOUNT_META: LazyLock<ModelMeta> = LazyLock::new(|| {
    ModelMeta::new("crm", "Account", "crm_account").fields(vec![
        FieldDef::new("id", FieldType::BigAutoField).primary_key(),
        FieldDef::new("name", FieldType::CharField),
        FieldDef::new("status", FieldType::CharField),
        FieldDef::new("revenue", FieldType::IntegerField),
        FieldDef::foreign_key("owner", "crm_owner").nullable(),
        FieldDef::new("updated_at", FieldType::DateTimeField)
            .nullable()
            .auto_now(),
    ])
});

impl Model for Account {
    fn meta() -> &'static ModelMeta {
        &ACCOUNT_META
    }

    fn pk(&self) -> Option<Value> {
        self.id.map(Value::Int)
    }

    fn set_pk(&mut self, value: Value) {
        if let Value::Int(id) = value {
            self.id = Some(id);
        }
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.as_str())),
            ("status", Value::from(self.status.as_str())),
            ("revenue", Value::Int(self.revenue)),
            ("owner_id", Value::from(self.owner_id)),
            ("updated_at", Value::from(self.updated_at)),
        ]
    }

    fn set_field_value(&mut self, attname: &str, value: Value) -> TriggerResult<()> {
        match attname {
            "id" => self.id = FromValue::from_value(&value)?,
            "name" => self.name = FromValue::from_value(&value)?,
            "status" => self.status = FromValue::from_value(&value)?,
            "revenue" => self.revenue = FromValue::from_value(&value)?,
            "owner_id" => self.owner_id = FromValue::from_value(&value)?,
            "updated_at" => self.updated_at = FromValue::from_value(&value)?,
            other => return Err(TriggerError::ValueError(format!("Account has no field '{other}'"))),
        }
        Ok(())
    }

    fn from_row(row: &Row) -> TriggerResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            status: row.get("status")?,
            revenue: row.get("revenue")?,
            owner_id: row.get("owner_id")?,
            updated_at: row.get("updated_at")?,
            related: RelatedCache::default(),
        })
    }

    fn related_cache(&self) -> Option<&RelatedCache> {
        Some(&self.related)
    }

    fn related_cache_mut(&mut self) -> Option<&mut RelatedCache> {
        Some(&mut self.related)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub id: Option<i64>,
    pub account_id: i64,
    pub amount: i64,
}

static LINE_META: LazyLock<ModelMeta> = LazyLock::new(|| {
    ModelMeta::new("crm", "Line", "crm_line").fields(vec![
        FieldDef::new("id", FieldType::BigAutoField).primary_key(),
        FieldDef::foreign_key("account", "crm_account"),
        FieldDef::new("amount", FieldType::IntegerField),
    ])
});

impl Model for Line {
    fn meta() -> &'static ModelMeta {
        &LINE_META
    }

    fn pk(&self) -> Option<Value> {
        self.id.map(Value::Int)
    }

    fn set_pk(&mut self, value: Value) {
        if let Value::Int(id) = value {
            self.id = Some(id);
        }
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("account_id", Value::Int(self.account_id)),
            ("amount", Value::Int(self.amount)),
        ]
    }

    fn set_field_value(&mut self, attname: &str, value: Value) -> TriggerResult<()> {
        match attname {
            "id" => self.id = FromValue::from_value(&value)?,
            "account_id" => self.account_id = FromValue::from_value(&value)?,
            "amount" => self.amount = FromValue::from_value(&value)?,
            other => return Err(TriggerError::ValueError(format!("Line has no field '{other}'"))),
        }
        Ok(())
    }

    fn from_row(row: &Row) -> TriggerResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            amount: row.get("amount")?,
        })
    }
}
