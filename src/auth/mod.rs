//! Caller identity and the URI authorization decision used by the reverse
//! proxy's auth subrequests.
//!
//! Identity can arrive three ways: the login session cookie, an API token
//! smuggled through HTTP Basic credentials as `token:<key>`, or a token
//! embedded in the download URL itself. All three resolve to the same user
//! rows; endpoints never care which mechanism was used.

use axum::http::{header, HeaderMap, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::db::data::DataRepository;
use crate::db::users::User;
use crate::error::{AppError, Result};

pub const SESSION_COOKIE: &str = "sessionid";

// ============================================================================
// Passwords
// ============================================================================

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    use argon2::password_hash::PasswordHash;
    use argon2::{Argon2, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// ============================================================================
// Sessions and tokens
// ============================================================================

pub async fn create_session(pool: &SqlitePool, user_id: i64, ttl_hours: i64) -> Result<String> {
    let key = uuid::Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions (key, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&key)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .bind((now + Duration::hours(ttl_hours)).to_rfc3339())
        .execute(pool)
        .await?;
    Ok(key)
}

pub async fn delete_session(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create_token(pool: &SqlitePool, user_id: i64) -> Result<String> {
    let key = uuid::Uuid::new_v4().simple().to_string();
    sqlx::query("INSERT INTO tokens (key, user_id, created_at) VALUES (?, ?, ?)")
        .bind(&key)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(key)
}

async fn user_for_session(pool: &SqlitePool, key: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT u.* FROM users u JOIN sessions s ON s.user_id = u.id \
         WHERE s.key = ? AND s.expires_at > ? AND u.is_active = 1",
    )
    .bind(key)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

async fn user_for_token(pool: &SqlitePool, key: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT u.* FROM users u JOIN tokens t ON t.user_id = u.id \
         WHERE t.key = ? AND u.is_active = 1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// ============================================================================
// Identity resolution
// ============================================================================

/// Establishes the caller's identity, if any. An inline token (from
/// tokenized download URLs) is tried first, then Basic credentials, then
/// the session cookie. An unknown token at one step does not block the
/// next; the caller simply stays anonymous if nothing resolves.
pub async fn resolve_identity(
    pool: &SqlitePool,
    headers: &HeaderMap,
    inline_token: Option<&str>,
) -> Result<Option<User>> {
    if let Some(token) = inline_token {
        if let Some(user) = user_for_token(pool, token).await? {
            return Ok(Some(user));
        }
    }
    if let Some(token) = basic_token(headers) {
        if let Some(user) = user_for_token(pool, &token).await? {
            return Ok(Some(user));
        }
    }
    if let Some(key) = session_key(headers) {
        if let Some(user) = user_for_session(pool, &key).await? {
            return Ok(Some(user));
        }
    }
    Ok(None)
}

/// Pulls a token key out of `Authorization: Basic base64("token:<key>")`.
fn basic_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (name, key) = decoded.split_once(':')?;
    if name != "token" || key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

pub fn session_key(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == SESSION_COOKIE {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ============================================================================
// URI authorization
// ============================================================================

/// How a checker status is to be acted on: 2xx allows, 401 and 403 are
/// relayed to the client verbatim, anything else means the checker itself
/// misbehaved and must surface as a generic server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Allow,
    Deny(StatusCode),
    Error(StatusCode),
}

pub fn classify_status(status: StatusCode) -> AuthOutcome {
    if status.is_success() {
        AuthOutcome::Allow
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AuthOutcome::Deny(status)
    } else {
        AuthOutcome::Error(status)
    }
}

/// Decides whether `user` may perform the request addressed by `uri`.
///
/// Upload requests require any authenticated account. Download requests
/// require the addressed data object to exist and be downloadable by the
/// caller. Every other URI is refused.
pub async fn authorize_uri(pool: &SqlitePool, user: Option<&User>, uri: &str) -> StatusCode {
    if uri == "/upload/" {
        return if user.is_some() {
            StatusCode::OK
        } else {
            StatusCode::FORBIDDEN
        };
    }
    if let Some(data_id) = download_target(uri) {
        return match DataRepository::new(pool).can_download(data_id, user).await {
            Ok(true) => StatusCode::OK,
            Ok(false) => StatusCode::FORBIDDEN,
            Err(e) => {
                tracing::error!(error = %e, uri, "authorization check failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
    }
    StatusCode::FORBIDDEN
}

/// Extracts the data id from `/data/<id>/...` or `/datagzip/<id>/...`.
/// The id must be all digits and must be followed by a slash.
fn download_target(uri: &str) -> Option<i64> {
    let rest = uri
        .strip_prefix("/data/")
        .or_else(|| uri.strip_prefix("/datagzip/"))?;
    let (id, _) = rest.split_once('/')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::SCHEMA_SQL;
    use crate::db::users::{CreateUser, UserRepository};
    use axum::http::HeaderValue;
    use serde_json::json;
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
                    email: String::new(),
                },
                "hash",
            )
            .await
            .unwrap()
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
        assert!(!verify_password("not-a-hash", "hunter2"));
    }

    #[test]
    fn basic_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", BASE64.encode("token:abc123"))).unwrap(),
        );
        assert_eq!(basic_token(&headers), Some("abc123".to_string()));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", BASE64.encode("alice:secret"))).unwrap(),
        );
        assert_eq!(basic_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!"));
        assert_eq!(basic_token(&headers), None);

        assert_eq!(basic_token(&HeaderMap::new()), None);
    }

    #[test]
    fn session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrftoken=zzz; sessionid=abc; theme=dark"),
        );
        assert_eq!(session_key(&headers), Some("abc".to_string()));
    }

    #[tokio::test]
    async fn session_identity_resolves() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let key = create_session(&pool, ada.id, 1).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sessionid={key}")).unwrap(),
        );
        let resolved = resolve_identity(&pool, &headers, None).await.unwrap();
        assert_eq!(resolved.unwrap().id, ada.id);
    }

    #[tokio::test]
    async fn expired_session_is_ignored() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let key = create_session(&pool, ada.id, -1).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sessionid={key}")).unwrap(),
        );
        let resolved = resolve_identity(&pool, &headers, None).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn inactive_account_cannot_authenticate() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let key = create_session(&pool, ada.id, 1).await.unwrap();
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(ada.id)
            .execute(&pool)
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sessionid={key}")).unwrap(),
        );
        let resolved = resolve_identity(&pool, &headers, None).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn token_identity_via_basic_credentials() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let token = create_token(&pool, ada.id).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", BASE64.encode(format!("token:{token}"))))
                .unwrap(),
        );
        let resolved = resolve_identity(&pool, &headers, None).await.unwrap();
        assert_eq!(resolved.unwrap().id, ada.id);
    }

    #[tokio::test]
    async fn inline_token_wins_but_falls_back_when_unknown() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let grace = make_user(&pool, "grace").await;
        let token = create_token(&pool, ada.id).await.unwrap();
        let session = create_session(&pool, grace.id, 1).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sessionid={session}")).unwrap(),
        );

        let resolved = resolve_identity(&pool, &headers, Some(&token)).await.unwrap();
        assert_eq!(resolved.unwrap().id, ada.id);

        let resolved = resolve_identity(&pool, &headers, Some("bogus")).await.unwrap();
        assert_eq!(resolved.unwrap().id, grace.id);
    }

    #[tokio::test]
    async fn upload_uri_requires_authentication() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        assert_eq!(
            authorize_uri(&pool, Some(&ada), "/upload/").await,
            StatusCode::OK
        );
        assert_eq!(
            authorize_uri(&pool, None, "/upload/").await,
            StatusCode::FORBIDDEN
        );
        // Only the exact upload path counts.
        assert_eq!(
            authorize_uri(&pool, Some(&ada), "/upload/extra").await,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn download_uri_follows_object_access() {
        let pool = setup_pool().await;
        let ada = make_user(&pool, "ada").await;
        let public = DataRepository::new(&pool)
            .create("genome", "genome", None, true, &json!({}))
            .await
            .unwrap();
        let private = DataRepository::new(&pool)
            .create("private", "private", Some(ada.id), false, &json!({}))
            .await
            .unwrap();

        let public_uri = format!("/data/{}/reads.fastq", public.id);
        let gzip_uri = format!("/datagzip/{}/reads.fastq.gz", public.id);
        let private_uri = format!("/data/{}/reads.fastq", private.id);

        assert_eq!(authorize_uri(&pool, None, &public_uri).await, StatusCode::OK);
        assert_eq!(authorize_uri(&pool, None, &gzip_uri).await, StatusCode::OK);
        assert_eq!(
            authorize_uri(&pool, None, &private_uri).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            authorize_uri(&pool, Some(&ada), &private_uri).await,
            StatusCode::OK
        );
        assert_eq!(
            authorize_uri(&pool, None, "/data/99999/file").await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            authorize_uri(&pool, Some(&ada), "/somewhere/else").await,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn download_target_extraction() {
        assert_eq!(download_target("/data/42/file.txt"), Some(42));
        assert_eq!(download_target("/datagzip/42/"), Some(42));
        assert_eq!(download_target("/data/42"), None);
        assert_eq!(download_target("/data/abc/file"), None);
        assert_eq!(download_target("/data//file"), None);
        assert_eq!(download_target("/upload/"), None);
    }

    #[test]
    fn status_contract_classification() {
        assert_eq!(classify_status(StatusCode::OK), AuthOutcome::Allow);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), AuthOutcome::Allow);
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            AuthOutcome::Deny(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            AuthOutcome::Deny(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            classify_status(StatusCode::FOUND),
            AuthOutcome::Error(StatusCode::FOUND)
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            AuthOutcome::Error(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
