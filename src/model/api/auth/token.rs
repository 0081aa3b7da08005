use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use mongodb::Database;
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    db::{admin::Admin, voter::Voter},
    mongodb::{Coll, Id},
};

use super::user::{Rights, User};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Proof that the bearer signed in as a particular admin or voter.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken<U> {
    pub id: Id,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U>
where
    U: User,
{
    pub fn new(user: &U) -> Self {
        Self {
            id: user.id(),
            rights: U::RIGHTS,
            phantom: PhantomData,
        }
    }

    /// Sign this token into an http-only cookie.
    #[allow(clippy::missing_panics_doc)]
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

fn unauthorized<T>(msg: &str) -> Outcome<T, Error> {
    Outcome::Failure((
        Status::Unauthorized,
        Error::Status(Status::Unauthorized, msg.to_string()),
    ))
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Read the token from its cookie, check it carries this user type's
    /// rights and that the user still exists.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => return unauthorized("Server configuration unavailable"),
        };

        let cookie = match req.cookies().get(AUTH_TOKEN_COOKIE) {
            Some(cookie) => cookie,
            None => return unauthorized("Not signed in"),
        };

        let token = match Self::from_cookie(cookie, config) {
            Ok(token) => token,
            Err(_) => return unauthorized("Invalid or expired auth token"),
        };

        if token.rights != U::RIGHTS {
            return Outcome::Failure((
                Status::Forbidden,
                Error::Status(
                    Status::Forbidden,
                    format!("This action requires {} rights", U::RIGHTS),
                ),
            ));
        }

        let db = match req.guard::<&State<Database>>().await {
            Outcome::Success(db) => db,
            _ => return unauthorized("Database unavailable"),
        };
        let exists = match token.rights {
            Rights::Voter => Coll::<Voter>::from_db(db)
                .find_one(token.id.as_doc(), None)
                .await
                .map(|voter| voter.is_some()),
            Rights::Admin => Coll::<Admin>::from_db(db)
                .find_one(token.id.as_doc(), None)
                .await
                .map(|admin| admin.is_some()),
        };
        match exists {
            Ok(true) => Outcome::Success(token),
            Ok(false) => unauthorized("Signed-in user no longer exists"),
            Err(e) => Outcome::Failure((Status::InternalServerError, e.into())),
        }
    }
}
