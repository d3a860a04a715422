use anyhow::{ensure, format_err, Context as _, Error, Result};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The ordered list of class names. The position of a name is its class id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary(IndexSet<String>);

impl Vocabulary {
    pub fn new<S>(labels: impl IntoIterator<Item = S>) -> Result<Self>
    where
        S: Into<String>,
    {
        let mut set = IndexSet::new();

        for label in labels {
            let label = label.into();
            ensure!(!label.is_empty(), "empty label name is not allowed");
            ensure!(
                !set.contains(&label),
                "duplicated label name '{}'",
                label
            );
            set.insert(label);
        }

        Ok(Self(set))
    }

    /// Parses a names file with one label per line. Blank lines are skipped.
    pub fn from_names(text: &str) -> Result<Self> {
        let labels = text
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty());
        Self::new(labels)
    }

    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read names file '{}'", path.display()))?;
        Self::from_names(&text)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&str> {
        self.0.get_index(index).map(String::as_str).ok_or_else(|| {
            format_err!(
                "class index {} is out of range, the vocabulary has {} labels",
                index,
                self.len()
            )
        })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.get_index_of(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = Error;

    fn try_from(from: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(from)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(from: Vocabulary) -> Self {
        from.0.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_file_order_defines_class_ids() -> Result<()> {
        let vocab = Vocabulary::from_names("person\n\nbicycle\r\ncar\n")?;
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.get(0)?, "person");
        assert_eq!(vocab.get(2)?, "car");
        assert_eq!(vocab.index_of("bicycle"), Some(1));
        Ok(())
    }

    #[test]
    fn out_of_range_index_is_an_error() -> Result<()> {
        let vocab = Vocabulary::new(["cat", "dog"])?;
        assert!(vocab.get(2).is_err());
        Ok(())
    }

    #[test]
    fn duplicated_names_are_rejected() {
        assert!(Vocabulary::new(["cat", "cat"]).is_err());
        assert!(serde_json::from_str::<Vocabulary>(r#"["a", "b", "a"]"#).is_err());
    }

    #[test]
    fn serializes_as_plain_list() -> Result<()> {
        let vocab = Vocabulary::new(["a", "b"])?;
        let text = serde_json::to_string(&vocab)?;
        assert_eq!(text, r#"["a","b"]"#);
        let back: Vocabulary = serde_json::from_str(&text)?;
        assert_eq!(back, vocab);
        Ok(())
    }
}
