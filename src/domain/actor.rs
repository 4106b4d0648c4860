use uuid::Uuid;

pub type UserId = Uuid;

/// Authenticated caller identity, as presented by the (out of scope) auth
/// layer. The engine only ever checks role and ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer(UserId),
    Farmer(UserId),
    Admin,
}

impl Actor {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Actor::Buyer(id) | Actor::Farmer(id) => Some(*id),
            Actor::Admin => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }
}
