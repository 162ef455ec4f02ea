//! Animal model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::RecordId;

/// Species accepted by the remote service.
pub const KNOWN_SPECIES: [&str; 7] = [
    "Dog",
    "Cat",
    "Bird",
    "Rabbit",
    "Hamster",
    "Guinea Pig",
    "Other",
];

/// An animal as kept in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animal {
    /// Locally generated identifier
    pub id: RecordId,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub date_of_birth: NaiveDate,
    /// Weight in kilograms
    pub weight: f64,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub medical_history: String,
    /// Vaccination names, in the order they were entered
    #[serde(default)]
    pub vaccinations: Vec<String>,
    #[serde(default)]
    pub last_checkup: Option<NaiveDate>,
    /// Whether the remote service has confirmed this exact version
    #[serde(default)]
    pub synced: bool,
    /// Last local write (Unix ms)
    #[serde(default)]
    pub last_modified: i64,
}

impl Animal {
    /// Create a new, unsynced animal with a fresh local id
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        species: impl Into<String>,
        breed: impl Into<String>,
        date_of_birth: NaiveDate,
        weight: f64,
    ) -> Self {
        Self {
            id: RecordId::new(),
            name: name.into(),
            species: species.into(),
            breed: breed.into(),
            date_of_birth,
            weight,
            color: String::new(),
            medical_history: String::new(),
            vaccinations: Vec::new(),
            last_checkup: None,
            synced: false,
            last_modified: 0,
        }
    }

    /// Problems that would make the remote service reject this animal.
    ///
    /// An empty list means the record may be pushed.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("name is required".to_string());
        }
        if self.breed.trim().is_empty() {
            errors.push("breed is required".to_string());
        }
        if !KNOWN_SPECIES.contains(&self.species.as_str()) {
            errors.push(format!(
                "species '{}' must be one of: {}",
                self.species,
                KNOWN_SPECIES.join(", ")
            ));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            errors.push("weight must be a non-negative number".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max() -> Animal {
        Animal::new(
            "Max",
            "Dog",
            "Golden Retriever",
            NaiveDate::from_ymd_opt(2021, 4, 12).unwrap(),
            31.5,
        )
    }

    #[test]
    fn test_animal_new_is_unsynced() {
        let animal = max();
        assert!(!animal.synced);
        assert!(animal.vaccinations.is_empty());
        assert!(animal.last_checkup.is_none());
    }

    #[test]
    fn test_valid_animal_has_no_errors() {
        assert!(max().validation_errors().is_empty());
    }

    #[test]
    fn test_validation_reports_each_problem() {
        let mut animal = max();
        animal.name = "  ".to_string();
        animal.species = "Dragon".to_string();
        animal.weight = -1.0;

        let errors = animal.validation_errors();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|error| error.contains("name")));
        assert!(errors.iter().any(|error| error.contains("Dragon")));
        assert!(errors.iter().any(|error| error.contains("weight")));
    }

    #[test]
    fn test_serializes_camel_case_fields() {
        let json = serde_json::to_value(max()).unwrap();
        assert!(json.get("dateOfBirth").is_some());
        assert!(json.get("lastModified").is_some());
        assert!(json.get("medicalHistory").is_some());
    }
}
