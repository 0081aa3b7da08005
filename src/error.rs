use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::{bson::ser::Error as BsonError, error::Error as DbError};
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::{json, Json},
    Request,
};
use thiserror::Error;

use crate::chain::ChainError;
use crate::model::{
    api::wallet::{AddressError, CipherError},
    db::voter::VoterStatus,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Bson(#[from] BsonError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("Failed to decrypt voter address: {0}")]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("{1}")]
    Status(Status, String),
    #[error("Voter is already registered")]
    AlreadyRegistered(VoterStatus),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Status(Status::NotFound, format!("{} not found", what.into()))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, msg.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Bson(_) | Self::Cipher(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Chain(_) => Status::BadGateway,
            Self::Address(_) => Status::BadRequest,
            Self::Status(status, _) => *status,
            Self::AlreadyRegistered(_) => Status::BadRequest,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("{self}"),
            _ => warn!("{self}"),
        }
        let body = match &self {
            Self::AlreadyRegistered(voter_status) => json!({
                "error": self.to_string(),
                "status": voter_status,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).respond_to(req)
    }
}
