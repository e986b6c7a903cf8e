// security/src/lib.rs
use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use models::errors::{CoreError, CoreResult};
use models::Role;
use storage::SchedulingStore;

pub mod policy;

const JWT_SECRET_ENV: &str = "SCHED_JWT_SECRET";
const DEV_JWT_SECRET: &str = "insecure-dev-only-jwt-secret-change-me-in-prod";
const TOKEN_TTL_SECS: u64 = 60 * 60 * 24;

/// Claims carried by a caller token. The identity subsystem mints these;
/// `sub` is the profile id shared with it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: u64,
    pub iat: u64,
}

/// A fully resolved caller: what the policy engine and the scheduling
/// engine work with. For doctors, `doctor_id` is the linked doctor record.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub profile_id: Uuid,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
    pub email_confirmed: bool,
}

fn jwt_secret() -> Vec<u8> {
    env::var(JWT_SECRET_ENV)
        .unwrap_or_else(|_| DEV_JWT_SECRET.to_string())
        .into_bytes()
}

/// Mints a token for a profile. Used by operators and tests; in production
/// deployments the identity subsystem issues tokens with the same claims.
pub fn issue_token(profile_id: Uuid, role: Role) -> CoreResult<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CoreError::Internal(format!("system time error: {}", e)))?
        .as_secs();
    let claims = Claims {
        sub: profile_id.to_string(),
        role,
        exp: now + TOKEN_TTL_SECS,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| CoreError::Internal(format!("failed to encode JWT: {}", e)))
}

/// Decodes and validates a caller token. Any defect (bad signature, expiry,
/// malformed claims) collapses to `Unauthenticated`.
pub fn validate_token(token: &str) -> CoreResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected caller token: {}", e);
        CoreError::Unauthenticated
    })
}

/// Resolves a caller token to an identity the rest of the core can act on.
///
/// The stored profile is authoritative for role and email confirmation; the
/// token only names the identity. A doctor-role identity without a linked
/// doctor record (provisioning still in flight) resolves to
/// `ProfileIncomplete`.
pub fn resolve(token: &str, store: &SchedulingStore) -> CoreResult<Caller> {
    let claims = validate_token(token)?;
    let profile_id = Uuid::parse_str(&claims.sub).map_err(|_| CoreError::Unauthenticated)?;
    let profile = store
        .get_profile(profile_id)?
        .ok_or(CoreError::Unauthenticated)?;

    let doctor_id = match profile.role {
        Role::Doctor => Some(
            store
                .get_doctor_by_profile(profile_id)?
                .ok_or(CoreError::ProfileIncomplete)?
                .id,
        ),
        _ => None,
    };

    Ok(Caller {
        profile_id,
        role: profile.role,
        doctor_id,
        email_confirmed: profile.email_confirmed,
    })
}
