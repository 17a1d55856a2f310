//! User accounts and the visibility rules applied to account listings.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::Result;
use crate::query::ordering::{self, OrderingFields};
use crate::query::push_contains;

pub const ORDERING_FIELDS: OrderingFields = OrderingFields {
    columns: &[
        "id",
        "username",
        "first_name",
        "last_name",
        "email",
        "date_joined",
        "last_login",
    ],
    json_columns: &[],
};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub is_staff: bool,
    #[serde(skip_serializing)]
    pub is_superuser: bool,
    #[serde(skip_serializing)]
    pub is_active: bool,
    pub date_joined: String,
    pub last_login: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub current_only: Option<String>,
    pub id: Option<i64>,
    pub username: Option<String>,
    #[serde(rename = "username__contains")]
    pub username_contains: Option<String>,
    #[serde(rename = "first_name__contains")]
    pub first_name_contains: Option<String>,
    #[serde(rename = "last_name__contains")]
    pub last_name_contains: Option<String>,
    pub ordering: Option<String>,
}

impl UserListQuery {
    /// The flag is on when the parameter is present with any non-empty value.
    pub fn current_only(&self) -> bool {
        matches!(self.current_only.as_deref(), Some(v) if !v.is_empty())
    }
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn create(&self, new: &CreateUser, password_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, first_name, last_name, email, date_joined)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&new.username)
        .bind(password_hash)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_one(self.pool)
        .await?;
        Ok(user)
    }

    /// Updates the profile fields that are present; absent fields are kept.
    pub async fn update_profile(&self, id: i64, update: &UpdateUser) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                email = COALESCE(?, email)
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(update.first_name.clone())
        .bind(update.last_name.clone())
        .bind(update.email.clone())
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(user)
    }

    pub async fn set_password(&self, id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_last_login(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Accounts the viewer may see: superusers see everyone, other
    /// authenticated users see themselves plus members of shared groups,
    /// anonymous callers see nothing.
    pub async fn list_visible(
        &self,
        viewer: Option<&User>,
        query: &UserListQuery,
    ) -> Result<Vec<User>> {
        let viewer = match viewer {
            Some(viewer) => viewer,
            None => return Ok(Vec::new()),
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM users WHERE 1=1");
        if !viewer.is_superuser {
            qb.push(" AND (id = ");
            qb.push_bind(viewer.id);
            qb.push(
                " OR id IN (SELECT gm2.user_id FROM group_members gm1 \
                 JOIN group_members gm2 ON gm2.group_id = gm1.group_id \
                 WHERE gm1.user_id = ",
            );
            qb.push_bind(viewer.id);
            qb.push("))");
        }
        if let Some(id) = query.id {
            qb.push(" AND id = ");
            qb.push_bind(id);
        }
        if let Some(username) = &query.username {
            qb.push(" AND username = ");
            qb.push_bind(username.clone());
        }
        push_contains(&mut qb, "username", query.username_contains.as_deref());
        push_contains(&mut qb, "first_name", query.first_name_contains.as_deref());
        push_contains(&mut qb, "last_name", query.last_name_contains.as_deref());
        if !ordering::push_order_by(&mut qb, query.ordering.as_deref(), &ORDERING_FIELDS) {
            qb.push(" ORDER BY id");
        }

        Ok(qb.build_query_as::<User>().fetch_all(self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::SCHEMA_SQL;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::query(SCHEMA_SQL).execute(&pool).await.unwrap();
        pool
    }

    async fn make_user(pool: &SqlitePool, username: &str) -> User {
        UserRepository::new(pool)
            .create(
                &CreateUser {
                    username: username.to_string(),
                    password: "irrelevant".to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                    email: format!("{username}@example.com"),
                },
                "hash",
            )
            .await
            .unwrap()
    }

    async fn make_superuser(pool: &SqlitePool, username: &str) -> User {
        let user = make_user(pool, username).await;
        sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
            .bind(user.id)
            .execute(pool)
            .await
            .unwrap();
        UserRepository::new(pool).get(user.id).await.unwrap().unwrap()
    }

    async fn put_in_group(pool: &SqlitePool, group: &str, user_id: i64) {
        sqlx::query("INSERT OR IGNORE INTO groups (name) VALUES (?)")
            .bind(group)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) \
             SELECT id, ? FROM groups WHERE name = ?",
        )
        .bind(user_id)
        .bind(group)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let pool = setup_pool().await;
        let repo = UserRepository::new(&pool);
        let created = make_user(&pool, "ada").await;
        let fetched = repo.get_by_username("ada").await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.password_hash, "hash");
        assert!(fetched.is_active);
        assert!(!fetched.is_superuser);
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let pool = setup_pool().await;
        make_user(&pool, "ada").await;
        let result = UserRepository::new(&pool)
            .create(
                &CreateUser {
                    username: "ada".to_string(),
                    password: "x".to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                    email: String::new(),
                },
                "hash",
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serialization_hides_credentials_and_flags() {
        let pool = setup_pool().await;
        let user = make_user(&pool, "ada").await;
        let value = serde_json::to_value(&user).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("username"));
        assert!(!obj.contains_key("password_hash"));
        assert!(!obj.contains_key("is_superuser"));
        assert!(!obj.contains_key("is_staff"));
    }

    #[tokio::test]
    async fn anonymous_viewer_sees_nothing() {
        let pool = setup_pool().await;
        make_user(&pool, "ada").await;
        let listed = UserRepository::new(&pool)
            .list_visible(None, &UserListQuery::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn superuser_sees_everyone() {
        let pool = setup_pool().await;
        let root = make_superuser(&pool, "root").await;
        make_user(&pool, "ada").await;
        make_user(&pool, "grace").await;
        let listed = UserRepository::new(&pool)
            .list_visible(Some(&root), &UserListQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn regular_viewer_sees_self_and_groupmates() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let grace = make_user(&pool, "grace").await;
        make_user(&pool, "stranger").await;
        put_in_group(&pool, "lab", ada.id).await;
        put_in_group(&pool, "lab", grace.id).await;

        let listed = UserRepository::new(&pool)
            .list_visible(Some(&ada), &UserListQuery::default())
            .await
            .unwrap();
        let names: Vec<&str> = listed.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["ada", "grace"]);
    }

    #[tokio::test]
    async fn contains_filter_narrows_results() {
        let pool = setup_pool().await;
        let root = make_superuser(&pool, "root").await;
        make_user(&pool, "ada").await;
        make_user(&pool, "adam").await;
        make_user(&pool, "grace").await;

        let query = UserListQuery {
            username_contains: Some("ada".to_string()),
            ..Default::default()
        };
        let listed = UserRepository::new(&pool)
            .list_visible(Some(&root), &query)
            .await
            .unwrap();
        let names: Vec<&str> = listed.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["ada", "adam"]);
    }

    #[tokio::test]
    async fn update_profile_keeps_absent_fields() {
        let pool = setup_pool().await;
        let repo = UserRepository::new(&pool);
        let user = make_user(&pool, "ada").await;

        let updated = repo
            .update_profile(
                user.id,
                &UpdateUser {
                    first_name: Some("Ada".to_string()),
                    last_name: None,
                    email: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.email, "ada@example.com");
    }

    #[tokio::test]
    async fn current_only_requires_non_empty_value() {
        let on = UserListQuery {
            current_only: Some("1".to_string()),
            ..Default::default()
        };
        let off = UserListQuery {
            current_only: Some(String::new()),
            ..Default::default()
        };
        assert!(on.current_only());
        assert!(!off.current_only());
        assert!(!UserListQuery::default().current_only());
    }
}
