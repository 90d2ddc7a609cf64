use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::PartyId;

/// Shared-password login where the user name is the party's ULID.
///
/// Who the party is matters for every role check, so a user name that
/// does not name a party is refused before the password is looked at.
#[derive(Debug)]
pub struct PartyAuthSource {
    password: String,
}

impl PartyAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

/// Parse a login user name into the acting party.
pub fn party_from_user(user: Option<&str>) -> PgWireResult<PartyId> {
    let user = user.ok_or_else(|| auth_err("no user name given".into()))?;
    Ulid::from_string(user)
        .map_err(|e| auth_err(format!("user name must be a party ULID ({user}): {e}")))
}

fn auth_err(message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".into(),
        "28000".into(),
        message,
    )))
}

#[async_trait]
impl AuthSource for PartyAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if let Err(e) = party_from_user(login.user()) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(e);
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
