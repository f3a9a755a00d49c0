use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::auth::issue_access_token,
    models::user::{
        GroupSummary, LoginRequest, LoginResponse, RegisterRequest, User, UserProfile,
    },
    services::{groups::GroupService, metrics},
};

const BCRYPT_COST: u32 = 10;
const USER_COLS: &str = "id, username, email, password_hash, group_id, created_at";
const BAD_CREDENTIALS: &str = "Invalid username or password";

pub struct AuthService;

impl AuthService {
    /// Create an account affiliated with the Default Group.
    pub async fn register(pool: &PgPool, req: &RegisterRequest) -> AppResult<Uuid> {
        let username = req.username.trim();
        if username.is_empty() || req.password.is_empty() {
            return Err(AppError::invalid("Username and password are required"));
        }

        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(pool)
                .await?;
        if taken {
            return Err(AppError::Conflict("Username already taken".into()));
        }

        let password_hash = hash_password(req.password.clone()).await?;
        let default_group = GroupService::ensure_default(pool).await?;
        let email = req
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (username, email, password_hash, group_id)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(default_group.id)
        .fetch_one(pool)
        .await
        .map_err(|e| match AppError::from(e) {
            // Lost a race against a concurrent registration of the same name.
            AppError::Conflict(_) => AppError::Conflict("Username already taken".into()),
            other => other,
        })?;

        metrics::REGISTRATIONS_COUNTER.inc();
        info!("Registered user {} ({})", username, user_id);
        Ok(user_id)
    }

    /// Verify credentials and issue a bearer token scoped to the user's
    /// current group.
    pub async fn login(
        pool: &PgPool,
        req: &LoginRequest,
        jwt_secret: &str,
        ttl_days: u64,
    ) -> AppResult<LoginResponse> {
        let username = req.username.trim();
        if username.is_empty() || req.password.is_empty() {
            return Err(AppError::invalid("Provide username and password"));
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(pool)
        .await?;

        let Some(user) = user else {
            metrics::LOGINS_COUNTER.with_label_values(&["failed"]).inc();
            return Err(AppError::Unauthenticated(BAD_CREDENTIALS.into()));
        };

        if !verify_password(req.password.clone(), user.password_hash.clone()).await? {
            metrics::LOGINS_COUNTER.with_label_values(&["failed"]).inc();
            warn!("Failed login for user {}", user.id);
            return Err(AppError::Unauthenticated(BAD_CREDENTIALS.into()));
        }

        let group = Self::current_group(pool, &user).await?;
        let token = issue_access_token(user.id, group.id, jwt_secret, ttl_days)?;

        metrics::LOGINS_COUNTER.with_label_values(&["success"]).inc();
        info!("User {} logged in (group {})", user.id, group.id);
        Ok(LoginResponse {
            token,
            user: UserProfile::new(user, Some(group)),
        })
    }

    /// Profile of the token holder, without the password hash.
    pub async fn me(pool: &PgPool, user_id: Uuid) -> AppResult<UserProfile> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

        let group = match user.group_id {
            Some(gid) => GroupService::summary(pool, gid).await?,
            None => None,
        };
        Ok(UserProfile::new(user, group))
    }

    /// The user's affiliated group. Users whose group is unset or was deleted
    /// are moved back to the Default Group.
    async fn current_group(pool: &PgPool, user: &User) -> AppResult<GroupSummary> {
        if let Some(gid) = user.group_id {
            if let Some(group) = GroupService::summary(pool, gid).await? {
                return Ok(group);
            }
        }

        let default_group = GroupService::ensure_default(pool).await?;
        sqlx::query("UPDATE users SET group_id = $1 WHERE id = $2")
            .bind(default_group.id)
            .bind(user.id)
            .execute(pool)
            .await?;
        info!("User {} reassigned to the default group", user.id);
        Ok(GroupSummary {
            id: default_group.id,
            name: default_group.name,
        })
    }
}

async fn hash_password(password: String) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(anyhow::Error::from)?
        .map_err(anyhow::Error::from)?;
    Ok(hash)
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(anyhow::Error::from)?
        // A malformed stored hash can never match.
        .unwrap_or(false);
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = hash_password("pw1".into()).await.unwrap();
        assert_ne!(hash, "pw1");
        assert!(verify_password("pw1".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("pw2".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_never_matches() {
        assert!(!verify_password("pw".into(), "not-a-bcrypt-hash".into()).await.unwrap());
    }

    #[tokio::test]
    async fn blank_credentials_fail_before_touching_the_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();

        let req = RegisterRequest {
            username: "   ".into(),
            password: "pw".into(),
            email: None,
        };
        assert!(matches!(
            AuthService::register(&pool, &req).await,
            Err(AppError::InvalidInput(_))
        ));

        let req = LoginRequest {
            username: "alice".into(),
            password: String::new(),
        };
        assert!(matches!(
            AuthService::login(&pool, &req, "s", 7).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
