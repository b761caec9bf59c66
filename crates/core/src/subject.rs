//! Subject records: ads and the sellers who own them.

use serde::{Deserialize, Serialize};

use crate::id::{PrincipalId, SubjectId};

/// A marketplace listing submitted for moderation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    pub id: SubjectId,
    pub seller_id: PrincipalId,
    pub title: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
}

/// Attributes needed to create an ad (the id is store-assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAd {
    pub seller_id: PrincipalId,
    pub title: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
}

impl NewAd {
    pub fn into_ad(self, id: SubjectId) -> Ad {
        Ad {
            id,
            seller_id: self.seller_id,
            title: self.title,
            description: self.description,
            category: self.category,
            images_qty: self.images_qty,
        }
    }
}

/// The principal owning an ad; supplies trust attributes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: PrincipalId,
    pub is_verified_seller: bool,
}
