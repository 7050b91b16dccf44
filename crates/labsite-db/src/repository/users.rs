//! User operations

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::{NewUser, ProfileUpdate, User, UserRole, extended_expiration};
use crate::repository::Database;
use crate::utils::encode_string_list;

const USER_COLUMNS: &str = "id, email, password_hash, role, name, position, phone, image, orcid, \
     biography, expertise, research_interests, education, must_change_password, \
     expiration_date, is_archived, reset_password_token, reset_password_expire, \
     created_at, updated_at";

const INSERT_COLUMNS: &str = "email, password_hash, role, name, position, phone, image, orcid, \
     biography, expertise, research_interests, education, must_change_password, \
     expiration_date, is_archived, created_at, updated_at";

impl Database {
    // ==================== User Operations ====================

    /// Insert a new user
    pub async fn insert_user(&self, user: NewUser) -> Result<User, DbError> {
        // Check if user already exists
        if self.get_user_by_email(&user.email).await?.is_some() {
            return Err(DbError::Duplicate(format!("User '{}' already exists", user.email)));
        }

        let sql = format!(
            "INSERT INTO users ({INSERT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING id"
        );
        self.insert_with(&sql, user)
            .await?
            .ok_or_else(|| DbError::NotFound("inserted user".to_string()))
    }

    /// Insert the first account, only while the table is empty
    ///
    /// Returns `None` when any user already exists. The emptiness check and
    /// the insert are one statement, so two concurrent bootstrap requests
    /// cannot both succeed.
    pub async fn insert_first_user(&self, user: NewUser) -> Result<Option<User>, DbError> {
        let sql = format!(
            "INSERT INTO users ({INSERT_COLUMNS}) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM users) RETURNING id"
        );
        self.insert_with(&sql, user).await
    }

    async fn insert_with(&self, sql: &str, user: NewUser) -> Result<Option<User>, DbError> {
        let now = Utc::now();
        let expiration = extended_expiration(now);
        let email = user.email.clone();

        let result = sqlx::query(sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.name)
            .bind(&user.profile.position)
            .bind(&user.profile.phone)
            .bind(&user.profile.image)
            .bind(&user.profile.orcid)
            .bind(&user.profile.biography)
            .bind(encode_string_list(&user.profile.expertise))
            .bind(encode_string_list(&user.profile.research_interests))
            .bind(encode_string_list(&user.profile.education))
            .bind(user.must_change_password)
            .bind(expiration.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DbError::from_insert(e, &format!("User '{}' already exists", email)))?;

        let Some(row) = result else {
            return Ok(None);
        };
        let id: i64 = row.get("id");
        debug!("Inserted user {} ({})", id, user.email);

        Ok(Some(User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            name: user.name,
            position: user.profile.position,
            phone: user.profile.phone,
            image: user.profile.image,
            orcid: user.profile.orcid,
            biography: user.profile.biography,
            expertise: user.profile.expertise,
            research_interests: user.profile.research_interests,
            education: user.profile.education,
            must_change_password: user.must_change_password,
            expiration_date: expiration,
            is_archived: false,
            reset_password_token: None,
            reset_password_expire: None,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Get a user by email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let result = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| User::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Get a user by ID
    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| User::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Get the user holding a reset token digest, regardless of its expiry
    pub async fn get_user_by_reset_token(
        &self,
        token_digest: &str,
    ) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE reset_password_token = ?");
        let result = sqlx::query(&sql)
            .bind(token_digest)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| User::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// List users ordered by name
    pub async fn list_users(&self, include_archived: bool) -> Result<Vec<User>, DbError> {
        let sql = if include_archived {
            format!("SELECT {USER_COLUMNS} FROM users ORDER BY name, id")
        } else {
            format!("SELECT {USER_COLUMNS} FROM users WHERE is_archived = 0 ORDER BY name, id")
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| User::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Check if any users exist
    pub async fn has_users(&self) -> Result<bool, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM users")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = result.get("count");
        Ok(count > 0)
    }

    /// Replace the password hash and leave the initial-password state
    pub async fn update_password(
        &self,
        id: i64,
        password_hash: &str,
        expiration_date: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?, must_change_password = 0, expiration_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(password_hash)
        .bind(expiration_date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Leave the initial-password state keeping the current hash
    pub async fn clear_must_change_password(
        &self,
        id: i64,
        expiration_date: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET must_change_password = 0, expiration_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(expiration_date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store a reset token digest and its expiry
    pub async fn set_reset_token(
        &self,
        id: i64,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_password_token = ?, reset_password_expire = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(token_digest)
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop any outstanding reset token
    pub async fn clear_reset_token(&self, id: i64) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET reset_password_token = NULL, reset_password_expire = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Consume a reset token: set the new hash and clear the reset fields
    ///
    /// The update only matches while the row still holds `token_digest`, so
    /// at most one consumer of a given token succeeds.
    pub async fn consume_reset_token(
        &self,
        id: i64,
        token_digest: &str,
        password_hash: &str,
        expiration_date: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?,
                must_change_password = 0,
                reset_password_token = NULL,
                reset_password_expire = NULL,
                expiration_date = ?,
                updated_at = ?
            WHERE id = ? AND reset_password_token = ?
            "#,
        )
        .bind(password_hash)
        .bind(expiration_date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(token_digest)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a profile patch, returning the updated user
    pub async fn update_profile(
        &self,
        id: i64,
        update: ProfileUpdate,
        expiration_date: DateTime<Utc>,
    ) -> Result<Option<User>, DbError> {
        let Some(mut user) = self.get_user_by_id(id).await? else {
            return Ok(None);
        };
        update.apply_to(&mut user);

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE users
            SET name = ?, position = ?, phone = ?, image = ?, orcid = ?, biography = ?,
                expertise = ?, research_interests = ?, education = ?,
                expiration_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.name)
        .bind(&user.position)
        .bind(&user.phone)
        .bind(&user.image)
        .bind(&user.orcid)
        .bind(&user.biography)
        .bind(encode_string_list(&user.expertise))
        .bind(encode_string_list(&user.research_interests))
        .bind(encode_string_list(&user.education))
        .bind(expiration_date.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        user.expiration_date = expiration_date;
        user.updated_at = now;
        Ok(Some(user))
    }

    /// Update user role
    pub async fn update_user_role(&self, id: i64, role: UserRole) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(role.as_str())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Archive or restore a user
    pub async fn set_user_archived(&self, id: i64, archived: bool) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_archived = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(archived)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;
    use chrono::Duration;

    fn new_user(email: &str, role: UserRole) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash-1".to_string(),
            role,
            name: "Grace Hopper".to_string(),
            must_change_password: true,
            profile: Profile {
                expertise: vec!["compilers".to_string(), "COBOL".to_string()],
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = Database::in_memory().await.unwrap();
        assert!(!db.has_users().await.unwrap());

        let user = db.insert_user(new_user("grace@lab.example", UserRole::Member)).await.unwrap();
        assert!(db.has_users().await.unwrap());
        assert!(user.expiration_date > user.created_at);

        let by_email = db.get_user_by_email("grace@lab.example").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.expertise, vec!["compilers".to_string(), "COBOL".to_string()]);
        assert!(by_email.must_change_password);
        assert!(by_email.reset_password_token.is_none());

        let by_id = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "grace@lab.example");
        assert!(db.get_user_by_id(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = Database::in_memory().await.unwrap();
        db.insert_user(new_user("dup@lab.example", UserRole::Member)).await.unwrap();
        let err = db
            .insert_user(new_user("dup@lab.example", UserRole::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_insert_first_user_only_when_empty() {
        let db = Database::in_memory().await.unwrap();
        let first = db
            .insert_first_user(new_user("boss@lab.example", UserRole::Admin))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = db
            .insert_first_user(new_user("other@lab.example", UserRole::Admin))
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(db.get_user_by_email("other@lab.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_update_clears_flag() {
        let db = Database::in_memory().await.unwrap();
        let user = db.insert_user(new_user("p@lab.example", UserRole::Member)).await.unwrap();
        let until = extended_expiration(Utc::now());

        assert!(db.update_password(user.id, "hash-2", until).await.unwrap());
        let stored = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-2");
        assert!(!stored.must_change_password);
        assert!(!db.update_password(4242, "hash-3", until).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_token_single_use() {
        let db = Database::in_memory().await.unwrap();
        let user = db.insert_user(new_user("r@lab.example", UserRole::Member)).await.unwrap();
        let expires = Utc::now() + Duration::hours(1);

        db.set_reset_token(user.id, "digest-a", expires).await.unwrap();
        let holder = db.get_user_by_reset_token("digest-a").await.unwrap().unwrap();
        assert_eq!(holder.id, user.id);
        assert!(holder.has_pending_reset(Utc::now()));

        let until = extended_expiration(Utc::now());
        assert!(db.consume_reset_token(user.id, "digest-a", "hash-new", until).await.unwrap());
        assert!(!db.consume_reset_token(user.id, "digest-a", "hash-evil", until).await.unwrap());

        let stored = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-new");
        assert!(stored.reset_password_token.is_none());
        assert!(stored.reset_password_expire.is_none());
        assert!(!stored.must_change_password);
        assert!(db.get_user_by_reset_token("digest-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_reset_token() {
        let db = Database::in_memory().await.unwrap();
        let user = db.insert_user(new_user("c@lab.example", UserRole::Member)).await.unwrap();
        db.set_reset_token(user.id, "digest-b", Utc::now() + Duration::hours(1)).await.unwrap();
        db.clear_reset_token(user.id).await.unwrap();

        let stored = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.reset_password_token.is_none());
        assert!(stored.reset_password_expire.is_none());
    }

    #[tokio::test]
    async fn test_profile_update_and_archive() {
        let db = Database::in_memory().await.unwrap();
        let user = db.insert_user(new_user("prof@lab.example", UserRole::Member)).await.unwrap();
        let until = extended_expiration(Utc::now());

        let updated = db
            .update_profile(
                user.id,
                ProfileUpdate {
                    orcid: Some("0000-0002-1825-0097".into()),
                    education: Some(vec!["PhD, Yale".into()]),
                    ..Default::default()
                },
                until,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.orcid.as_deref(), Some("0000-0002-1825-0097"));

        let stored = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.education, vec!["PhD, Yale".to_string()]);
        assert_eq!(stored.expertise.len(), 2);

        db.set_user_archived(user.id, true).await.unwrap();
        assert!(db.list_users(false).await.unwrap().is_empty());
        assert_eq!(db.list_users(true).await.unwrap().len(), 1);

        db.update_user_role(user.id, UserRole::Admin).await.unwrap();
        let stored = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.role, UserRole::Admin);
        assert!(stored.is_archived);
    }
}
