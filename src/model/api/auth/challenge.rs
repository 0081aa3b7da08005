use std::str::FromStr;

use chrono::{serde::ts_seconds, DateTime, Utc};
use data_encoding::HEXLOWER;
use ethers::types::Signature;
use jsonwebtoken::{
    errors::Error as JwtError, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use rand::RngCore;
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{self, FromRequest},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::{error::Error, model::api::wallet::WalletAddress, Config};

pub const CHALLENGE_COOKIE: &str = "challenge";

/// Length of the random sign-in nonce in bytes.
const NONCE_LENGTH: usize = 16;

/// A sign-in challenge: a one-off message the wallet owner must sign.
#[derive(Debug, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "adr")]
    pub address: WalletAddress,
    #[serde(rename = "msg")]
    pub message: String,
}

impl Challenge {
    /// Create a challenge with a fresh random nonce.
    pub fn new(address: WalletAddress) -> Self {
        let mut nonce = [0_u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);
        let message = format!(
            "Sign in to the e-voting service as {address}.\n\nNonce: {}",
            HEXLOWER.encode(&nonce)
        );
        Self { address, message }
    }

    /// Does `signature` prove control of the challenged address?
    ///
    /// The signature must be an EIP-191 personal-sign over the message.
    pub fn verify(&self, signature: &str) -> bool {
        let signature = match Signature::from_str(signature.trim()) {
            Ok(signature) => signature,
            Err(e) => {
                debug!("Malformed sign-in signature: {e}");
                return false;
            }
        };
        match signature.recover(self.message.as_str()) {
            Ok(signer) => signer == *self.address,
            Err(e) => {
                debug!("Could not recover sign-in signer: {e}");
                false
            }
        }
    }

    // Challenge serialization never fails.
    #[allow(clippy::missing_panics_doc)]
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            challenge: self,
            expire_at: Utc::now() + config.challenge_ttl(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");
        Cookie::build(CHALLENGE_COOKIE, token)
            .max_age(Duration::seconds(config.challenge_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, JwtError> {
        jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.challenge)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    challenge: Challenge,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Challenge {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            request::Outcome::Success(config) => config,
            _ => {
                return request::Outcome::Failure((
                    Status::InternalServerError,
                    Error::Status(
                        Status::InternalServerError,
                        "Server configuration unavailable".to_string(),
                    ),
                ))
            }
        };

        let challenge = req
            .cookies()
            .get_private(CHALLENGE_COOKIE)
            .ok_or("No sign-in challenge; request one first")
            .and_then(|cookie| {
                Challenge::from_cookie(&cookie, config)
                    .map_err(|_| "Sign-in challenge is invalid or has expired")
            });

        match challenge {
            Ok(challenge) => request::Outcome::Success(challenge),
            Err(msg) => request::Outcome::Failure((
                Status::Unauthorized,
                Error::Status(Status::Unauthorized, msg.to_string()),
            )),
        }
    }
}

/// Body of a sign-in attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    /// Hex signature of the challenge message.
    pub signature: String,
}

/// Response to a challenge request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub message: String,
}

/// Who the caller signed in as: `admin` or `voter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResponse {
    pub role: String,
}
