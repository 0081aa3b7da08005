use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::model::{
    db::{admin::Admin, voter::Voter},
    mongodb::Id,
};

/// A signed-in user of the API.
pub trait User {
    /// The rights a token for this user type carries.
    const RIGHTS: Rights;

    fn id(&self) -> Id;
}

/// Privilege levels, stored compactly in the token.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Voter => "voter",
            Self::Admin => "admin",
        };
        write!(formatter, "{name}")
    }
}

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;

    fn id(&self) -> Id {
        self.id
    }
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;

    fn id(&self) -> Id {
        self.id
    }
}
