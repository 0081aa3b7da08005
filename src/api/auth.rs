use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};
use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{
                AuthToken, Challenge, ChallengeResponse, Rights, SignInRequest, SignInResponse,
                AUTH_TOKEN_COOKIE, CHALLENGE_COOKIE,
            },
            parse_body, JsonBody,
        },
        db::{
            admin::{self, Admin},
            voter::{self, Voter},
        },
        mongodb::Coll,
    },
    Config,
};

use super::required_address;

pub fn routes() -> Vec<Route> {
    routes![challenge, verify, logout]
}

#[get("/auth/challenge?<address>")]
pub async fn challenge(
    address: Option<&str>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
) -> Result<Json<ChallengeResponse>> {
    let address = required_address(address)?;
    let challenge = Challenge::new(address);
    let message = challenge.message.clone();
    cookies.add_private(challenge.into_cookie(config));
    Ok(Json(ChallengeResponse { message }))
}

#[post("/auth/verify", data = "<sign_in>", format = "json")]
pub async fn verify(
    challenge: Challenge,
    sign_in: JsonBody<'_, SignInRequest>,
    cookies: &CookieJar<'_>,
    admins: Coll<Admin>,
    voters: Coll<Voter>,
    config: &State<Config>,
) -> Result<Json<SignInResponse>> {
    let sign_in = parse_body(sign_in)?;
    if !challenge.verify(&sign_in.signature) {
        return Err(Error::Status(
            Status::Unauthorized,
            "Signature does not match the challenged wallet".to_string(),
        ));
    }

    // Each challenge can only be answered once.
    cookies.remove_private(Cookie::named(CHALLENGE_COOKIE));

    let rights = if let Some(admin) = admins
        .find_one(admin::with_address(challenge.address), None)
        .await?
    {
        cookies.add(AuthToken::new(&admin).into_cookie(config));
        Rights::Admin
    } else if let Some(voter) = voters
        .find_one(voter::with_address(challenge.address, config), None)
        .await?
    {
        cookies.add(AuthToken::new(&voter).into_cookie(config));
        Rights::Voter
    } else {
        return Err(Error::Status(
            Status::Unauthorized,
            format!("No admin or voter is registered with wallet {}", challenge.address),
        ));
    };

    info!("{} signed in as {rights}", challenge.address);
    Ok(Json(SignInResponse {
        role: rights.to_string(),
    }))
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    cookies.remove_private(Cookie::named(CHALLENGE_COOKIE));
    Status::Ok
}
