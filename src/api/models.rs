use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Backend identifier. The API emits integer primary keys, but string ids are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Id(s),
            Raw::Int(n) => Id(n.to_string()),
        })
    }
}

pub type UserId = Id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<Id>,
    pub sender: UserId,
    pub recipient: UserId,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub recipient_avatar: Option<String>,
    #[serde(default)]
    pub property: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Id,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(alias = "created_at")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyImage {
    pub id: Id,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub images: Vec<PropertyImage>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

/// Fields for creating or updating a listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyDraft {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: Id,
    pub property: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Id,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub duration_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub plan: Option<SubscriptionPlan>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() { self.email.clone() } else { full.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Randomizes the order of featured listings in place.
pub fn shuffle_listings(listings: &mut [Property]) {
    listings.shuffle(&mut rand::thread_rng());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_accepts_int_and_string() {
        let a: Id = serde_json::from_str("17").unwrap();
        let b: Id = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"17\"");
    }

    #[test]
    fn test_message_minimal_fields() {
        let m: Message = serde_json::from_str(
            r#"{"sender": 1, "recipient": "2", "timestamp": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(m.id.is_none());
        assert_eq!(m.sender, Id::from(1));
        assert!(!m.is_read);
    }

    #[test]
    fn test_notification_aliases() {
        let n: Notification = serde_json::from_str(
            r#"{"id": 3, "message": "New offer", "created_at": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(n.body, "New offer");
    }

    #[test]
    fn test_property_detail_nested_arrays() {
        let p: Property = serde_json::from_str(
            r#"{"id": 9, "title": "2-bed flat", "images": [{"id": 1, "image": "a.jpg"}],
                "features": ["pool"], "reviews": [{"rating": 5, "comment": "great"}]}"#,
        )
        .unwrap();
        assert_eq!(p.images.len(), 1);
        assert_eq!(p.features, vec!["pool".to_string()]);
        assert_eq!(p.reviews[0].rating, Some(5));
    }

    #[test]
    fn test_shuffle_keeps_items() {
        let mut list: Vec<Property> = (0..20)
            .map(|i| Property {
                id: Id::from(i as u64),
                title: format!("p{}", i),
                description: String::new(),
                price: None,
                location: None,
                owner: None,
                images: vec![],
                features: vec![],
                reviews: vec![],
            })
            .collect();
        shuffle_listings(&mut list);
        let mut ids: Vec<u64> = list.iter().map(|p| p.id.as_str().parse().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, (0..20).collect::<Vec<u64>>());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let p = UserProfile {
            id: Id::from(1),
            email: "a@b.c".into(),
            first_name: String::new(),
            last_name: String::new(),
            avatar: None,
        };
        assert_eq!(p.display_name(), "a@b.c");
    }
}
