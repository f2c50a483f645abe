use serde::{Deserialize, Serialize};

pub type UserId = i32;

/// The account an item's audit fields point at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}
