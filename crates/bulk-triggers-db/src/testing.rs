//! Shared unit-test fixtures: a recording executor and a sample model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::LazyLock;

use bulk_triggers_core::{TriggerError, TriggerResult};
use tokio::sync::Mutex;

use crate::executor::DbExecutor;
use crate::fields::{FieldDef, FieldType};
use crate::model::{Model, ModelMeta};
use crate::query::compiler::DatabaseBackendType;
use crate::relations::RelatedCache;
use crate::row::{FromValue, Row};
use crate::value::Value;

/// A mock executor that records SQL and serves queued result sets.
pub struct MockDb {
    backend: DatabaseBackendType,
    statements: Mutex<Vec<String>>,
    params: Mutex<Vec<Vec<Value>>>,
    results: Mutex<VecDeque<Vec<Row>>>,
    next_id: AtomicI64,
}

impl MockDb {
    pub fn new(backend: DatabaseBackendType) -> Self {
        Self {
            backend,
            statements: Mutex::new(Vec::new()),
            params: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Queues the rows returned by the next `query` call.
    pub async fn push_rows(&self, rows: Vec<Row>) {
        self.results.lock().await.push_back(rows);
    }

    pub async fn statements(&self) -> Vec<String> {
        self.statements.lock().await.clone()
    }

    pub async fn params(&self) -> Vec<Vec<Value>> {
        self.params.lock().await.clone()
    }

    async fn record(&self, sql: &str, params: &[Value]) {
        self.statements.lock().await.push(sql.to_string());
        self.params.lock().await.push(params.to_vec());
    }
}

#[async_trait::async_trait]
impl DbExecutor for MockDb {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TriggerResult<u64> {
        self.record(sql, params).await;
        Ok(1)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>> {
        self.record(sql, params).await;
        Ok(self.results.lock().await.pop_front().unwrap_or_default())
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TriggerResult<Value> {
        self.record(sql, params).await;
        Ok(Value::Int(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

/// A sample model with a foreign key and an auto-now timestamp.
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

    pub fn row(&self) -> Row {
        let (columns, values): (Vec<String>, Vec<Value>) = self
            .field_values()
            .into_iter()
            .map(|(c, v)| (c.to_string(), v))
            .unzip();
        Row::new(columns, values)
    }
}

static ACCOUNT_META: LazyLock<ModelMeta> = LazyLock::new(|| {
    ModelMeta::new("crm", "Account", "crm_account").fields(vec![
        FieldDef::new("id", FieldType::BigAutoField).primary_key(),
        FieldDef::new("name", FieldType::CharField),
        FieldDef::new("status", FieldType::CharField),
        FieldDef::new("revenue", FieldType::IntegerField),
        FieldDef::foreign_key("owner", "crm_user").nullable(),
        FieldDef::new("updated_at", FieldType::DateTimeField)
            .nullable()
            .auto_now(),
        FieldDef::many_to_many("tags", "crm_tag"),
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
            other => {
                return Err(TriggerError::ValueError(format!(
                    "Account has no field '{other}'"
                )))
            }
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

/// A multi-table child: `name` lives on `geo_place`, `seats` on
/// `geo_restaurant`, linked through `place_ptr_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restaurant {
    pub place_ptr_id: Option<i64>,
    pub name: String,
    pub seats: i64,
}

impl Restaurant {
    pub fn new(name: &str, seats: i64) -> Self {
        Self {
            place_ptr_id: None,
            name: name.to_string(),
            seats,
        }
    }
}

static RESTAURANT_META: LazyLock<ModelMeta> = LazyLock::new(|| {
    ModelMeta::new("geo", "Restaurant", "geo_restaurant")
        .fields(vec![
            FieldDef::new("place_ptr_id", FieldType::BigIntegerField).primary_key(),
            FieldDef::new("name", FieldType::CharField).inherited(),
            FieldDef::new("seats", FieldType::IntegerField),
        ])
        .parent("geo_place", "id")
});

impl Model for Restaurant {
    fn meta() -> &'static ModelMeta {
        &RESTAURANT_META
    }

    fn pk(&self) -> Option<Value> {
        self.place_ptr_id.map(Value::Int)
    }

    fn set_pk(&mut self, value: Value) {
        if let Value::Int(id) = value {
            self.place_ptr_id = Some(id);
        }
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("place_ptr_id", Value::from(self.place_ptr_id)),
            ("name", Value::from(self.name.as_str())),
            ("seats", Value::Int(self.seats)),
        ]
    }

    fn set_field_value(&mut self, attname: &str, value: Value) -> TriggerResult<()> {
        match attname {
            "place_ptr_id" => self.place_ptr_id = FromValue::from_value(&value)?,
            "name" => self.name = FromValue::from_value(&value)?,
            "seats" => self.seats = FromValue::from_value(&value)?,
            other => {
                return Err(TriggerError::ValueError(format!(
                    "Restaurant has no field '{other}'"
                )))
            }
        }
        Ok(())
    }

    fn from_row(row: &Row) -> TriggerResult<Self> {
        Ok(Self {
            place_ptr_id: row.get("place_ptr_id")?,
            name: row.get("name")?,
            seats: row.get("seats")?,
        })
    }
}
