use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Which side of the marketplace an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Business,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Customer => f.write_str("customer"),
            Role::Business => f.write_str("business"),
        }
    }
}

/// A conversation party. Identity is owned by the account system; only the
/// id and the role are kept here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Participant {
    Customer(Uuid),
    Business(Uuid),
}

impl Participant {
    pub fn new(id: Uuid, role: Role) -> Self {
        match role {
            Role::Customer => Participant::Customer(id),
            Role::Business => Participant::Business(id),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Participant::Customer(id) | Participant::Business(id) => *id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Participant::Customer(_) => Role::Customer,
            Participant::Business(_) => Role::Business,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role(), self.id())
    }
}

/// Two distinct participants in canonical (sorted) order, so the same pair
/// always maps to the same conversation regardless of who initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    first: Participant,
    second: Participant,
}

impl ParticipantPair {
    pub fn new(a: Participant, b: Participant) -> AppResult<Self> {
        if a == b {
            return Err(AppError::InvalidArgument(
                "a conversation needs two distinct participants".to_string(),
            ));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { first, second })
    }

    pub fn first(&self) -> Participant {
        self.first
    }

    pub fn second(&self) -> Participant {
        self.second
    }
}
