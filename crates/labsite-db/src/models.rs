//! Database models

use crate::utils::{decode_string_list, parse_datetime_or_now, parse_optional_datetime};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Years an account stays accessible after creation or its last
/// profile/password change
pub const ACCOUNT_LIFETIME_YEARS: u32 = 5;

/// Compute the account cutoff for a change made at `from`
pub fn extended_expiration(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(ACCOUNT_LIFETIME_YEARS * 12))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Error type for parsing models from strings
#[derive(Debug, Clone)]
pub enum ParseError {
    InvalidUserRole(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidUserRole(s) => write!(f, "Invalid user role: {}", s),
        }
    }
}

impl std::error::Error for ParseError {}

/// User role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Member => "member",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "member" => Ok(UserRole::Member),
            _ => Err(ParseError::InvalidUserRole(s.to_string())),
        }
    }
}

/// User model
///
/// Credential and reset fields never leave the server: they are skipped when
/// serializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub name: String,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Vec<String>,
    pub research_interests: Vec<String>,
    pub education: Vec<String>,
    pub must_change_password: bool,
    pub expiration_date: DateTime<Utc>,
    pub is_archived: bool,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_expire: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account access cutoff has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }

    /// Whether a password reset is outstanding and still usable at `now`
    pub fn has_pending_reset(&self, now: DateTime<Utc>) -> bool {
        matches!(
            (&self.reset_password_token, self.reset_password_expire),
            (Some(_), Some(expire)) if expire > now
        )
    }
}

/// Password lifecycle of an account
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AccountState {
    /// Provisioned or self-registered, first password not yet confirmed
    NeedsInitialPassword,
    Active,
    /// A reset link was issued and has not expired
    ResetPending,
}

impl AccountState {
    pub fn of(user: &User, now: DateTime<Utc>) -> Self {
        if user.must_change_password {
            AccountState::NeedsInitialPassword
        } else if user.has_pending_reset(now) {
            AccountState::ResetPending
        } else {
            AccountState::Active
        }
    }
}

/// Editable profile fields
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub position: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Vec<String>,
    pub research_interests: Vec<String>,
    pub education: Vec<String>,
}

/// New user (for insertion)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub name: String,
    pub must_change_password: bool,
    pub profile: Profile,
}

/// Partial profile update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Option<Vec<String>>,
    pub research_interests: Option<Vec<String>>,
    pub education: Option<Vec<String>>,
}

impl ProfileUpdate {
    /// Apply the patch to a stored user
    ///
    /// Unset fields are kept. An optional text field set to a blank string
    /// is cleared.
    pub fn apply_to(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        let optional = [
            (self.position, &mut user.position),
            (self.phone, &mut user.phone),
            (self.image, &mut user.image),
            (self.orcid, &mut user.orcid),
            (self.biography, &mut user.biography),
        ];
        for (value, field) in optional {
            if let Some(value) = value {
                *field = Some(value).filter(|v| !v.trim().is_empty());
            }
        }
        if let Some(expertise) = self.expertise {
            user.expertise = expertise;
        }
        if let Some(research_interests) = self.research_interests {
            user.research_interests = research_interests;
        }
        if let Some(education) = self.education {
            user.education = education;
        }
    }
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let role_str: String = row.try_get("role")?;
        let expertise: Option<String> = row.try_get("expertise")?;
        let research_interests: Option<String> = row.try_get("research_interests")?;
        let education: Option<String> = row.try_get("education")?;
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: UserRole::from_str(&role_str).unwrap_or(UserRole::Member),
            name: row.try_get("name")?,
            position: row.try_get("position")?,
            phone: row.try_get("phone")?,
            image: row.try_get("image")?,
            orcid: row.try_get("orcid")?,
            biography: row.try_get("biography")?,
            expertise: decode_string_list(expertise.as_deref()),
            research_interests: decode_string_list(research_interests.as_deref()),
            education: decode_string_list(education.as_deref()),
            must_change_password: row.try_get("must_change_password")?,
            expiration_date: parse_datetime_or_now(&row.try_get::<String, _>("expiration_date")?),
            is_archived: row.try_get("is_archived")?,
            reset_password_token: row.try_get("reset_password_token")?,
            reset_password_expire: parse_optional_datetime(row.try_get("reset_password_expire")?),
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, TimeZone};

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: 1,
            email: "ada@lab.example".into(),
            password_hash: "$argon2id$secret".into(),
            role: UserRole::Member,
            name: "Ada".into(),
            position: None,
            phone: None,
            image: None,
            orcid: None,
            biography: None,
            expertise: vec!["optics".into()],
            research_interests: vec![],
            education: vec![],
            must_change_password: true,
            expiration_date: extended_expiration(now),
            is_archived: false,
            reset_password_token: Some("digest".into()),
            reset_password_expire: Some(now + Duration::hours(1)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("member".parse::<UserRole>().unwrap(), UserRole::Member);
        assert!("root".parse::<UserRole>().is_err());
        assert!(UserRole::Admin.is_admin());
        assert!(!UserRole::Member.is_admin());
    }

    #[test]
    fn test_extended_expiration_adds_five_years() {
        let from = Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap();
        let until = extended_expiration(from);
        assert_eq!(until.year(), 2029);
        assert!(until > from);
    }

    #[test]
    fn test_serialization_hides_secrets() {
        let json = serde_json::to_value(sample_user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_password_token").is_none());
        assert!(json.get("reset_password_expire").is_none());
        assert_eq!(json["role"], "member");
    }

    #[test]
    fn test_expiry_and_pending_reset() {
        let mut user = sample_user();
        let now = Utc::now();
        assert!(!user.is_expired(now));
        assert!(user.has_pending_reset(now));
        assert!(!user.has_pending_reset(now + Duration::hours(2)));

        user.expiration_date = now - Duration::days(1);
        assert!(user.is_expired(now));
    }

    #[test]
    fn test_account_state() {
        let now = Utc::now();
        let mut user = sample_user();
        assert_eq!(AccountState::of(&user, now), AccountState::NeedsInitialPassword);

        user.must_change_password = false;
        assert_eq!(AccountState::of(&user, now), AccountState::ResetPending);
        assert_eq!(
            AccountState::of(&user, now + Duration::hours(2)),
            AccountState::Active
        );

        user.reset_password_token = None;
        user.reset_password_expire = None;
        assert_eq!(AccountState::of(&user, now), AccountState::Active);
    }

    #[test]
    fn test_profile_update_keeps_unset_fields() {
        let mut user = sample_user();
        ProfileUpdate {
            position: Some("PhD student".into()),
            research_interests: Some(vec!["lasers".into()]),
            ..Default::default()
        }
        .apply_to(&mut user);
        assert_eq!(user.position.as_deref(), Some("PhD student"));
        assert_eq!(user.research_interests, vec!["lasers".to_string()]);
        assert_eq!(user.expertise, vec!["optics".to_string()]);
        assert_eq!(user.name, "Ada");
    }

    #[test]
    fn test_profile_update_blank_clears_field() {
        let mut user = sample_user();
        user.phone = Some("+49 30 1234".into());
        user.orcid = Some("0000-0002-1825-0097".into());

        ProfileUpdate {
            phone: Some(String::new()),
            orcid: Some("   ".into()),
            ..Default::default()
        }
        .apply_to(&mut user);
        assert_eq!(user.phone, None);
        assert_eq!(user.orcid, None);
    }
}
