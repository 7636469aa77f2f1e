use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::party::{Party, PartyRole},
};

pub const PARTY_ID_HEADER: &str = "x-party-id";
pub const PARTY_ROLE_HEADER: &str = "x-party-role";

/// Identity asserted by the gateway in front of us. A `Party` placed in the
/// request extensions by middleware wins over the headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentParty(pub Option<Party>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentParty
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(party) = parts.extensions.get::<Party>() {
            return Ok(Self(Some(*party)));
        }
        party_from_headers(&parts.headers).map(Self)
    }
}

fn party_from_headers(headers: &HeaderMap) -> Result<Option<Party>, AppError> {
    let header = |name: &str| -> Result<Option<&str>, AppError> {
        headers
            .get(name)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| AppError::BadRequest(format!("{name} is not valid text")))
            })
            .transpose()
    };
    let (Some(id), Some(role)) = (header(PARTY_ID_HEADER)?, header(PARTY_ROLE_HEADER)?) else {
        return Ok(None);
    };
    let id = Uuid::parse_str(id.trim()).map_err(|_| AppError::Unauthorized)?;
    let role = PartyRole::parse(role).ok_or(AppError::Unauthorized)?;
    Ok(Some(Party { id, role }))
}

impl CurrentParty {
    pub fn require_party(&self) -> Result<Party, AppError> {
        self.0.ok_or(AppError::Unauthorized)
    }

    pub fn require_rider(&self) -> Result<Party, AppError> {
        self.require_role(PartyRole::Rider)
    }

    pub fn require_driver(&self) -> Result<Party, AppError> {
        self.require_role(PartyRole::Driver)
    }

    pub fn require_system(&self) -> Result<Party, AppError> {
        self.require_role(PartyRole::System)
    }

    fn require_role(&self, role: PartyRole) -> Result<Party, AppError> {
        let party = self.require_party()?;
        if party.role == role {
            Ok(party)
        } else {
            Err(AppError::Forbidden)
        }
    }
}
