use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retrieval disposition of a listed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemDisposition {
    Open,
    Claimed,
}

impl ItemDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemDisposition::Open => "open",
            ItemDisposition::Claimed => "claimed",
        }
    }
}

/// A found item listing. Owned by the listing service; referenced here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    /// User who found and listed the item
    pub finder_id: String,
    pub disposition: ItemDisposition,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn open(id: impl Into<String>, finder_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            finder_id: finder_id.into(),
            disposition: ItemDisposition::Open,
            claimed_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.disposition == ItemDisposition::Claimed
    }
}
