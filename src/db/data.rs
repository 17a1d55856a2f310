//! Data objects registered by the flow engine, with per-object access rules.
//!
//! The engine writes result files under `DATA_DIR/<id>/`; rows here carry
//! identity, the descriptor document, and who may see or fetch the files.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::users::User;
use crate::error::Result;
use crate::query::ordering::{self, OrderingFields};
use crate::query::push_contains;

pub const ORDERING_FIELDS: OrderingFields = OrderingFields {
    columns: &["id", "name", "slug", "created_at", "modified_at"],
    json_columns: &["descriptor"],
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DataObject {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub owner_id: Option<i64>,
    pub public: bool,
    /// Descriptor document, stored serialized.
    pub descriptor: String,
    pub created_at: String,
    pub modified_at: String,
}

/// Wire shape with the descriptor inlined as a JSON document.
#[derive(Debug, Serialize)]
pub struct DataObjectResponse {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub owner_id: Option<i64>,
    pub public: bool,
    pub descriptor: Value,
    pub created_at: String,
    pub modified_at: String,
}

impl From<DataObject> for DataObjectResponse {
    fn from(data: DataObject) -> Self {
        let descriptor = serde_json::from_str(&data.descriptor).unwrap_or(Value::Null);
        Self {
            id: data.id,
            name: data.name,
            slug: data.slug,
            owner_id: data.owner_id,
            public: data.public,
            descriptor,
            created_at: data.created_at,
            modified_at: data.modified_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DataListQuery {
    pub id: Option<i64>,
    pub slug: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "name__contains")]
    pub name_contains: Option<String>,
    pub ordering: Option<String>,
}

pub struct DataRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DataRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<DataObject>> {
        let data = sqlx::query_as::<_, DataObject>("SELECT * FROM data_objects WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(data)
    }

    pub async fn create(
        &self,
        name: &str,
        slug: &str,
        owner_id: Option<i64>,
        public: bool,
        descriptor: &Value,
    ) -> Result<DataObject> {
        let now = chrono::Utc::now().to_rfc3339();
        let data = sqlx::query_as::<_, DataObject>(
            r#"
            INSERT INTO data_objects (name, slug, owner_id, public, descriptor, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(slug)
        .bind(owner_id)
        .bind(public)
        .bind(descriptor.to_string())
        .bind(&now)
        .bind(&now)
        .fetch_one(self.pool)
        .await?;
        Ok(data)
    }

    pub async fn grant_user(&self, data_id: i64, user_id: i64, permission: &str) -> Result<()> {
        sqlx::query("INSERT INTO data_permissions (data_id, user_id, permission) VALUES (?, ?, ?)")
            .bind(data_id)
            .bind(user_id)
            .bind(permission)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn grant_group(&self, data_id: i64, group_id: i64, permission: &str) -> Result<()> {
        sqlx::query("INSERT INTO data_permissions (data_id, group_id, permission) VALUES (?, ?, ?)")
            .bind(data_id)
            .bind(group_id)
            .bind(permission)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Whether `user` may see the object at all.
    pub async fn can_view(&self, data_id: i64, user: Option<&User>) -> Result<bool> {
        self.has_access(data_id, user, "('view', 'download', 'edit')")
            .await
    }

    /// Whether `user` may fetch the object's files. Requires a grant at
    /// download level or above; public objects are downloadable by anyone.
    pub async fn can_download(&self, data_id: i64, user: Option<&User>) -> Result<bool> {
        self.has_access(data_id, user, "('download', 'edit')").await
    }

    async fn has_access(
        &self,
        data_id: i64,
        user: Option<&User>,
        levels: &'static str,
    ) -> Result<bool> {
        let allowed = match user {
            None => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM data_objects WHERE id = ? AND public = 1)",
                )
                .bind(data_id)
                .fetch_one(self.pool)
                .await?
            }
            Some(user) if user.is_superuser => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM data_objects WHERE id = ?)",
                )
                .bind(data_id)
                .fetch_one(self.pool)
                .await?
            }
            Some(user) => {
                let sql = format!(
                    "SELECT EXISTS( \
                       SELECT 1 FROM data_objects d \
                       WHERE d.id = ? \
                         AND (d.public = 1 \
                              OR d.owner_id = ? \
                              OR EXISTS( \
                                   SELECT 1 FROM data_permissions p \
                                   WHERE p.data_id = d.id \
                                     AND p.permission IN {levels} \
                                     AND (p.user_id = ? \
                                          OR p.group_id IN (SELECT group_id FROM group_members \
                                                            WHERE user_id = ?)))))",
                );
                sqlx::query_scalar::<_, bool>(&sql)
                    .bind(data_id)
                    .bind(user.id)
                    .bind(user.id)
                    .bind(user.id)
                    .fetch_one(self.pool)
                    .await?
            }
        };
        Ok(allowed)
    }

    /// Objects the viewer may see, filtered and ordered per the query.
    pub async fn list_visible(
        &self,
        viewer: Option<&User>,
        query: &DataListQuery,
    ) -> Result<Vec<DataObject>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM data_objects WHERE 1=1");
        match viewer {
            None => {
                qb.push(" AND public = 1");
            }
            Some(user) if user.is_superuser => {}
            Some(user) => {
                qb.push(" AND (public = 1 OR owner_id = ");
                qb.push_bind(user.id);
                qb.push(
                    " OR EXISTS(SELECT 1 FROM data_permissions p \
                     WHERE p.data_id = data_objects.id AND (p.user_id = ",
                );
                qb.push_bind(user.id);
                qb.push(
                    " OR p.group_id IN (SELECT group_id FROM group_members WHERE user_id = ",
                );
                qb.push_bind(user.id);
                qb.push("))))");
            }
        }
        if let Some(id) = query.id {
            qb.push(" AND id = ");
            qb.push_bind(id);
        }
        if let Some(slug) = &query.slug {
            qb.push(" AND slug = ");
            qb.push_bind(slug.clone());
        }
        if let Some(name) = &query.name {
            qb.push(" AND name = ");
            qb.push_bind(name.clone());
        }
        push_contains(&mut qb, "name", query.name_contains.as_deref());
        if !ordering::push_order_by(&mut qb, query.ordering.as_deref(), &ORDERING_FIELDS) {
            qb.push(" ORDER BY id");
        }

        Ok(qb.build_query_as::<DataObject>().fetch_all(self.pool).await?)
    }
}
