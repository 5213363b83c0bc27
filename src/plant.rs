//! Plant types and their two-class vocabularies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Disease tag reported for every diseased label. The model does not
/// distinguish disease subtypes.
pub const UNSPECIFIED_DISEASE: &str = "unknown_disease";

const HEALTHY_PREFIX: &str = "healthy_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plant {
    Potato,
    Tomato,
}

impl Plant {
    pub const ALL: [Plant; 2] = [Plant::Potato, Plant::Tomato];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plant::Potato => "potato",
            Plant::Tomato => "tomato",
        }
    }

    /// Class names in the order the training pipeline bakes into checkpoints.
    pub fn default_class_names(&self) -> [String; 2] {
        [
            format!("diseased_{}", self.as_str()),
            format!("healthy_{}", self.as_str()),
        ]
    }
}

impl fmt::Display for Plant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "potato" => Ok(Plant::Potato),
            "tomato" => Ok(Plant::Tomato),
            _ => Err(ConfigError::UnsupportedPlant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Diseased,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Healthy => "healthy",
            Verdict::Diseased => "diseased",
        }
    }

    fn from_label(name: &str) -> Self {
        if name.starts_with(HEALTHY_PREFIX) {
            Verdict::Healthy
        } else {
            Verdict::Diseased
        }
    }
}

/// One output class of the model head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub name: String,
    pub verdict: Verdict,
    pub plant: Plant,
}

impl ClassLabel {
    fn new(name: String, plant: Plant) -> Self {
        let verdict = Verdict::from_label(&name);
        Self {
            name,
            verdict,
            plant,
        }
    }

    pub fn disease_type(&self) -> Option<&'static str> {
        match self.verdict {
            Verdict::Healthy => None,
            Verdict::Diseased => Some(UNSPECIFIED_DISEASE),
        }
    }
}

/// Ordered class labels for the active plant. Index `i` is head output `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    plant: Plant,
    labels: Vec<ClassLabel>,
}

impl Vocabulary {
    pub const SIZE: usize = 2;

    pub fn for_plant(plant: Plant) -> Self {
        let labels = plant
            .default_class_names()
            .into_iter()
            .map(|name| ClassLabel::new(name, plant))
            .collect();
        Self { plant, labels }
    }

    /// Uses the checkpoint's class names when they fit the two-class head,
    /// otherwise the plant's defaults.
    pub fn from_checkpoint(plant: Plant, class_names: Option<&[String]>) -> Self {
        match class_names {
            Some(names) if names.len() == Self::SIZE => Self {
                plant,
                labels: names
                    .iter()
                    .map(|name| ClassLabel::new(name.clone(), plant))
                    .collect(),
            },
            Some(names) => {
                warn!(
                    "Checkpoint lists {} classes for {}, expected {}; using default vocabulary",
                    names.len(),
                    plant,
                    Self::SIZE
                );
                Self::for_plant(plant)
            }
            None => Self::for_plant(plant),
        }
    }

    pub fn plant(&self) -> Plant {
        self.plant
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ClassLabel> {
        self.labels.get(index)
    }

    pub fn names(&self) -> Vec<String> {
        self.labels.iter().map(|label| label.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plants_case_insensitively() {
        assert_eq!("potato".parse::<Plant>().unwrap(), Plant::Potato);
        assert_eq!(" Tomato ".parse::<Plant>().unwrap(), Plant::Tomato);
        assert!(matches!(
            "cucumber".parse::<Plant>(),
            Err(ConfigError::UnsupportedPlant(p)) if p == "cucumber"
        ));
        assert!("".parse::<Plant>().is_err());
    }

    #[test]
    fn default_vocabulary_tags_labels() {
        let vocab = Vocabulary::for_plant(Plant::Tomato);
        assert_eq!(vocab.names(), vec!["diseased_tomato", "healthy_tomato"]);

        let diseased = vocab.get(0).unwrap();
        assert_eq!(diseased.verdict, Verdict::Diseased);
        assert_eq!(diseased.disease_type(), Some(UNSPECIFIED_DISEASE));
        assert_eq!(diseased.plant, Plant::Tomato);

        let healthy = vocab.get(1).unwrap();
        assert_eq!(healthy.verdict, Verdict::Healthy);
        assert_eq!(healthy.disease_type(), None);
    }

    #[test]
    fn checkpoint_names_keep_their_order() {
        let names = vec!["healthy_potato".to_string(), "diseased_potato".to_string()];
        let vocab = Vocabulary::from_checkpoint(Plant::Potato, Some(&names));
        assert_eq!(vocab.names(), names);
        assert_eq!(vocab.get(0).unwrap().verdict, Verdict::Healthy);
    }

    #[test]
    fn wrong_sized_checkpoint_names_use_defaults() {
        let names = vec![
            "a".to_string(),
            "b".to_string(),
            "healthy_potato".to_string(),
        ];
        let vocab = Vocabulary::from_checkpoint(Plant::Potato, Some(&names));
        assert_eq!(vocab, Vocabulary::for_plant(Plant::Potato));
        assert_eq!(
            Vocabulary::from_checkpoint(Plant::Tomato, None),
            Vocabulary::for_plant(Plant::Tomato)
        );
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Plant::Tomato).unwrap(), "\"tomato\"");
        assert_eq!(
            serde_json::to_string(&Verdict::Diseased).unwrap(),
            "\"diseased\""
        );
    }
}
