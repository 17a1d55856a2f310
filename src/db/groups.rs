//! Groups and group membership.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::users::User;
use crate::error::Result;
use crate::query::ordering::{self, OrderingFields};
use crate::query::push_contains;

pub const ORDERING_FIELDS: OrderingFields = OrderingFields {
    columns: &["id", "name"],
    json_columns: &[],
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// Wire shape for group endpoints: the group plus its member ids.
#[derive(Debug, Serialize)]
pub struct GroupWithUsers {
    pub id: i64,
    pub name: String,
    pub users: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupListQuery {
    pub name: Option<String>,
    #[serde(rename = "name__contains")]
    pub name_contains: Option<String>,
    pub ordering: Option<String>,
}

pub struct GroupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GroupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>("SELECT id, name FROM groups WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(group)
    }

    pub async fn create(&self, name: &str) -> Result<Group> {
        let group =
            sqlx::query_as::<_, Group>("INSERT INTO groups (name) VALUES (?) RETURNING id, name")
                .bind(name)
                .fetch_one(self.pool)
                .await?;
        Ok(group)
    }

    pub async fn rename(&self, id: i64, name: &str) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            "UPDATE groups SET name = ? WHERE id = ? RETURNING id, name",
        )
        .bind(name)
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(group)
    }

    pub async fn member_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Adds users to the group. Existing memberships are kept as-is; a
    /// nonexistent user id fails the whole call.
    pub async fn add_users(&self, group_id: i64, user_ids: &[i64]) -> Result<()> {
        for &user_id in user_ids {
            sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
                .bind(group_id)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn remove_users(&self, group_id: i64, user_ids: &[i64]) -> Result<()> {
        for &user_id in user_ids {
            sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        }
        Ok(())
    }

    /// Groups the viewer may see: superusers see all, other authenticated
    /// users see the groups they belong to, anonymous callers see nothing.
    pub async fn list_visible(
        &self,
        viewer: Option<&User>,
        query: &GroupListQuery,
    ) -> Result<Vec<GroupWithUsers>> {
        let viewer = match viewer {
            Some(viewer) => viewer,
            None => return Ok(Vec::new()),
        };

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name FROM groups WHERE 1=1");
        if !viewer.is_superuser {
            qb.push(" AND id IN (SELECT group_id FROM group_members WHERE user_id = ");
            qb.push_bind(viewer.id);
            qb.push(")");
        }
        if let Some(name) = &query.name {
            qb.push(" AND name = ");
            qb.push_bind(name.clone());
        }
        push_contains(&mut qb, "name", query.name_contains.as_deref());
        if !ordering::push_order_by(&mut qb, query.ordering.as_deref(), &ORDERING_FIELDS) {
            qb.push(" ORDER BY id");
        }
        let groups = qb.build_query_as::<Group>().fetch_all(self.pool).await?;

        let mut result = Vec::with_capacity(groups.len());
        for group in groups {
            let users = self.member_ids(group.id).await?;
            result.push(GroupWithUsers {
                id: group.id,
                name: group.name,
                users,
            });
        }
        Ok(result)
    }
}
