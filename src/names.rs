//! Respondent name management and validation
//!
//! Respondents may pick a display name when they join. Names are trimmed,
//! length limited, profanity filtered and unique within a room. A respondent
//! who does not pick one, or joins a room that hands out random names, gets a
//! generated pet name instead. Names stick to the respondent's [`Id`], so a
//! reconnecting respondent keeps the name it had.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use heck::ToTitleCase;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{constants::names::MAX_LENGTH, watcher::Id};

/// Number of random draws tried before falling back to a numbered name
const GENERATION_ATTEMPTS: usize = 16;

/// Style of automatically generated respondent names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, garde::Validate)]
pub enum NameStyle {
    /// Pet-style names (adjective + animal combinations)
    Petname(#[garde(range(min = 2, max = 3))] u8),
}

impl Default for NameStyle {
    fn default() -> Self {
        Self::Petname(crate::constants::names::DEFAULT_PET_WORDS)
    }
}

impl NameStyle {
    /// Generates a random title-cased name in this style
    pub fn get_name(&self) -> String {
        match self {
            Self::Petname(count) => petname::petname(*count, " ").unwrap_or_default(),
        }
        .to_title_case()
    }
}

/// Errors that can occur during name validation and assignment
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested name is already in use by another respondent
    #[error("name already in-use")]
    Used,
    /// The respondent already has an assigned name
    #[error("respondent has an existing name")]
    Assigned,
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
}

/// Bidirectional mapping between respondents and their names
#[derive(Debug, Default, Clone)]
pub struct Names {
    mapping: HashMap<Id, String>,
    reverse_mapping: HashMap<String, Id>,
    existing: HashSet<String>,
}

impl Names {
    /// Retrieves the name associated with a respondent
    pub fn get_name(&self, id: &Id) -> Option<String> {
        self.mapping.get(id).map(std::borrow::ToOwned::to_owned)
    }

    /// Retrieves the respondent holding a name
    pub fn get_id(&self, name: &str) -> Option<Id> {
        self.reverse_mapping.get(name).copied()
    }

    /// Assigns a chosen name to a respondent after validation
    ///
    /// # Errors
    ///
    /// * `Error::TooLong` if the trimmed name exceeds [`MAX_LENGTH`] bytes
    /// * `Error::Empty` if the name is empty after trimming
    /// * `Error::Sinful` if the name contains inappropriate content
    /// * `Error::Used` if another respondent holds the name
    /// * `Error::Assigned` if the respondent already has a name
    pub fn set_name(&mut self, id: Id, name: &str) -> Result<String, Error> {
        let name = rustrict::trim_whitespace(name);
        if name.len() > MAX_LENGTH {
            return Err(Error::TooLong);
        }
        if name.is_empty() {
            return Err(Error::Empty);
        }
        if name.is_inappropriate() {
            return Err(Error::Sinful);
        }
        if self.mapping.contains_key(&id) {
            return Err(Error::Assigned);
        }
        if !self.existing.insert(name.to_owned()) {
            return Err(Error::Used);
        }
        match self.mapping.entry(id) {
            Entry::Occupied(_) => Err(Error::Assigned),
            Entry::Vacant(v) => {
                v.insert(name.to_owned());
                self.reverse_mapping.insert(name.to_owned(), id);
                Ok(name.to_owned())
            }
        }
    }

    /// Assigns a generated name in the given style
    ///
    /// Random draws that collide with a taken name are retried a few times;
    /// after that the name gets a numeric suffix until it is unique.
    ///
    /// # Errors
    ///
    /// * `Error::Assigned` if the respondent already has a name
    pub fn set_generated(&mut self, id: Id, style: NameStyle) -> Result<String, Error> {
        if self.mapping.contains_key(&id) {
            return Err(Error::Assigned);
        }

        let acceptable = |name: &str| {
            !name.is_empty() && name.len() <= MAX_LENGTH && !name.is_inappropriate()
        };

        let mut base = None;
        for _ in 0..GENERATION_ATTEMPTS {
            let candidate = style.get_name();
            if !acceptable(&candidate) {
                continue;
            }
            if !self.existing.contains(&candidate) {
                return self.set_name(id, &candidate);
            }
            base = Some(candidate);
        }

        let base = base
            .filter(|b| b.len() + 4 <= MAX_LENGTH)
            .unwrap_or_else(|| "Respondent".to_owned());
        let numbered = (2..)
            .map(|n| format!("{base} {n}"))
            .find(|candidate| !self.existing.contains(candidate));

        self.set_name(id, &numbered.unwrap_or(base))
    }

    /// Frees the name of a respondent whose join was refused
    pub fn release(&mut self, id: &Id) -> Option<String> {
        let name = self.mapping.remove(id)?;
        self.reverse_mapping.remove(&name);
        self.existing.remove(&name);
        Some(name)
    }

    /// Resolves the name of a joining respondent
    ///
    /// A respondent that already has a name keeps it. Otherwise a forced
    /// style (rooms with random names) or a missing request produces a
    /// generated name, and anything else goes through [`Names::set_name`].
    ///
    /// # Errors
    ///
    /// Any error of [`Names::set_name`] for a requested name.
    pub fn resolve(
        &mut self,
        id: Id,
        requested: Option<&str>,
        forced_style: Option<NameStyle>,
    ) -> Result<String, Error> {
        if let Some(name) = self.get_name(&id) {
            return Ok(name);
        }

        match (forced_style, requested) {
            (Some(style), _) => self.set_generated(id, style),
            (None, None) => self.set_generated(id, NameStyle::default()),
            (None, Some(name)) => self.set_name(id, name),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use garde::Validate;

    use super::*;

    #[test]
    fn test_names_set_and_get() {
        let mut names = Names::default();
        let id = Id::new();

        assert_eq!(names.set_name(id, "Ada").unwrap(), "Ada");
        assert_eq!(names.get_name(&id), Some("Ada".to_string()));
        assert_eq!(names.get_id("Ada"), Some(id));
    }

    #[test]
    fn test_names_length_limit() {
        let mut names = Names::default();

        assert_eq!(
            names.set_name(Id::new(), &"a".repeat(MAX_LENGTH + 1)),
            Err(Error::TooLong)
        );
        assert!(names.set_name(Id::new(), &"a".repeat(MAX_LENGTH)).is_ok());
    }

    #[test]
    fn test_names_length_measured_after_trim() {
        let mut names = Names::default();
        let padded = format!("  {}  ", "b".repeat(MAX_LENGTH));

        assert_eq!(names.set_name(Id::new(), &padded), Ok("b".repeat(MAX_LENGTH)));
    }

    #[test]
    fn test_names_empty_and_trimmed() {
        let mut names = Names::default();
        let id = Id::new();

        assert_eq!(names.set_name(id, "   "), Err(Error::Empty));
        assert_eq!(names.set_name(id, "  Grace  ").unwrap(), "Grace");
    }

    #[test]
    fn test_names_duplicate_and_assigned() {
        let mut names = Names::default();
        let id1 = Id::new();
        let id2 = Id::new();

        names.set_name(id1, "Linus").unwrap();
        assert_eq!(names.set_name(id2, " Linus "), Err(Error::Used));
        assert_eq!(names.set_name(id1, "Other"), Err(Error::Assigned));

        // the rejected name stays free
        assert!(names.set_name(id2, "Other").is_ok());
    }

    #[test]
    fn test_names_inappropriate_content() {
        let mut names = Names::default();

        for name in ["damn", "fuck", "shit"] {
            assert_eq!(
                names.set_name(Id::new(), name),
                Err(Error::Sinful),
                "Expected '{name}' to be flagged as inappropriate"
            );
        }
    }

    #[test]
    fn test_release_frees_name() {
        let mut names = Names::default();
        let id = Id::new();

        names.set_name(id, "Ada").unwrap();
        assert_eq!(names.release(&id), Some("Ada".to_owned()));
        assert_eq!(names.release(&id), None);
        assert_eq!(names.get_id("Ada"), None);
        assert!(names.set_name(Id::new(), "Ada").is_ok());
    }

    #[test]
    fn test_generated_names_are_unique() {
        let mut names = Names::default();
        let style = NameStyle::Petname(2);

        let generated: HashSet<String> = (0..50)
            .map(|_| names.set_generated(Id::new(), style).unwrap())
            .collect();

        assert_eq!(generated.len(), 50);
        assert!(generated.iter().all(|n| !n.is_empty()));
    }

    #[test]
    fn test_resolve_keeps_existing_name() {
        let mut names = Names::default();
        let id = Id::new();

        let first = names.resolve(id, Some("Ada"), None).unwrap();
        let second = names.resolve(id, Some("Someone Else"), None).unwrap();
        assert_eq!(first, "Ada");
        assert_eq!(second, "Ada");
    }

    #[test]
    fn test_resolve_generates_when_missing_or_forced() {
        let mut names = Names::default();

        let missing = names.resolve(Id::new(), None, None).unwrap();
        assert!(missing.contains(' '));

        let forced = names
            .resolve(Id::new(), Some("Ada"), Some(NameStyle::Petname(3)))
            .unwrap();
        assert_ne!(forced, "Ada");
        assert!(!forced.is_empty());
    }

    #[test]
    fn test_name_style_validation() {
        assert!(NameStyle::Petname(2).validate().is_ok());
        assert!(NameStyle::Petname(3).validate().is_ok());
        assert!(NameStyle::Petname(1).validate().is_err());
        assert!(NameStyle::Petname(4).validate().is_err());
        assert_eq!(NameStyle::default(), NameStyle::Petname(2));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Used.to_string(), "name already in-use");
        assert_eq!(Error::Empty.to_string(), "name cannot be empty");
        assert_eq!(Error::Sinful.to_string(), "name is inappropriate");
        assert_eq!(Error::TooLong.to_string(), "name is too long");
    }
}
