//! Care record model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RecordId;

/// Category of care performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CareType {
    Feeding,
    Grooming,
    Exercise,
    Medication,
    Veterinary,
}

impl CareType {
    pub const ALL: [Self; 5] = [
        Self::Feeding,
        Self::Grooming,
        Self::Exercise,
        Self::Medication,
        Self::Veterinary,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feeding => "feeding",
            Self::Grooming => "grooming",
            Self::Exercise => "exercise",
            Self::Medication => "medication",
            Self::Veterinary => "veterinary",
        }
    }
}

impl fmt::Display for CareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CareType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|care_type| care_type.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown care type '{}' (expected one of: {})",
                    s.trim(),
                    Self::ALL.map(Self::as_str).join(", ")
                )
            })
    }
}

/// A care event for one animal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareRecord {
    /// Locally generated identifier
    pub id: RecordId,
    /// Local id of the animal this record belongs to (not enforced)
    pub animal_id: RecordId,
    pub care_type: CareType,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub next_due: Option<NaiveDate>,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub last_modified: i64,
}

impl CareRecord {
    /// Create a new, unsynced care record with a fresh local id
    #[must_use]
    pub fn new(animal_id: RecordId, care_type: CareType, date: NaiveDate) -> Self {
        Self {
            id: RecordId::new(),
            animal_id,
            care_type,
            date,
            notes: String::new(),
            next_due: None,
            completed_by: None,
            synced: false,
            last_modified: 0,
        }
    }

    /// Whether the next occurrence is due on or before `today`
    #[must_use]
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_due.is_some_and(|due| due <= today)
    }
}
