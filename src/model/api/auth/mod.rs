mod challenge;
mod token;
mod user;

pub use challenge::{
    Challenge, ChallengeResponse, SignInRequest, SignInResponse, CHALLENGE_COOKIE,
};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Rights, User};

#[cfg(test)]
pub use challenge::examples::{sign, wallet, ADMIN_KEY, VOTER_KEY};
