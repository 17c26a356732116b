use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

// Label vocabularies come either as an ordered class list (label encoder
// export) or as the class map written next to the multiclass model.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVocabulary {
    Classes {
        classes: Vec<String>,
    },
    ClassMap {
        num_classes: usize,
        id_to_label: HashMap<String, String>,
    },
}

/// Ordered mapping from multiclass class id to attack category name.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVocabulary {
    labels: BTreeMap<u32, String>,
}

impl LabelVocabulary {
    pub fn from_labels<I, S>(labels: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (id, label) in labels {
            let label = label.into();
            if label.trim().is_empty() {
                return Err(format!("class id {id} has an empty label"));
            }
            if map.insert(id, label).is_some() {
                return Err(format!("class id {id} is defined twice"));
            }
        }
        let vocabulary = Self { labels: map };
        if vocabulary.is_empty() {
            return Err("vocabulary has no classes".to_string());
        }
        Ok(vocabulary)
    }

    pub fn from_json(s: &str) -> Result<Self, String> {
        let raw: RawVocabulary = serde_json::from_str(s).map_err(|e| e.to_string())?;
        match raw {
            RawVocabulary::Classes { classes } => {
                Self::from_labels(classes.into_iter().enumerate().map(|(i, l)| (i as u32, l)))
            }
            RawVocabulary::ClassMap {
                num_classes,
                id_to_label,
            } => {
                let mut labels = Vec::with_capacity(id_to_label.len());
                for (k, v) in id_to_label {
                    let id = k
                        .parse::<u32>()
                        .map_err(|_| format!("class id '{k}' is not an integer"))?;
                    if id as usize >= num_classes {
                        return Err(format!("class id {id} exceeds num_classes {num_classes}"));
                    }
                    labels.push((id, v));
                }
                Self::from_labels(labels)
            }
        }
    }

    pub fn lookup(&self, class_id: u32) -> Option<&str> {
        self.labels.get(&class_id).map(String::as_str)
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.labels.contains_key(&class_id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of output columns a dense multiclass model needs to cover
    /// every id in the vocabulary.
    pub fn class_span(&self) -> usize {
        self.labels
            .keys()
            .next_back()
            .map(|max| *max as usize + 1)
            .unwrap_or(0)
    }

    /// Ids below [`class_span`](Self::class_span) with no label.
    pub fn gaps(&self) -> Vec<u32> {
        (0..self.class_span() as u32)
            .filter(|id| !self.labels.contains_key(id))
            .collect()
    }
}
