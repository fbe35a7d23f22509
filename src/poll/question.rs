//! Question configuration and validation
//!
//! A question is what the presenter posts to start a poll: the prompt, the
//! ordered answer options, which option is correct and how long respondents
//! get to answer. Validation runs twice, once on the presenter's client
//! before the question is sent and once in the room before the session state
//! machine sees it.

use std::{collections::HashSet, fmt::Display, time::Duration};

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::question::{
    MAX_DURATION, MAX_OPTION_COUNT, MAX_OPTION_LENGTH, MAX_TEXT_LENGTH, MIN_DURATION,
    MIN_OPTION_COUNT,
};

/// Stable identifier of an answer option within one question
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OptionId(pub u32);

impl Display for OptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Validates that a duration falls within `[MIN_SECONDS, MAX_SECONDS]`
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside the bounds.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> garde::Result {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) && val.subsec_nanos() == 0 {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}] seconds",
        )))
    }
}

/// One answer option of a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OptionConfig {
    /// Identifier the respondents vote with
    #[garde(skip)]
    pub id: OptionId,
    /// Text shown for the option
    #[garde(length(min = 1, max = MAX_OPTION_LENGTH))]
    pub text: String,
}

impl OptionConfig {
    /// Creates an option
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id: OptionId(id),
            text: text.into(),
        }
    }
}

/// A question as posted by the presenter
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QuestionConfig {
    /// The prompt shown to every participant
    #[garde(length(min = 1, max = MAX_TEXT_LENGTH))]
    text: String,
    /// Answer options in display order
    #[garde(length(min = MIN_OPTION_COUNT, max = MAX_OPTION_COUNT), dive)]
    options: Vec<OptionConfig>,
    /// The option counted as correct
    #[garde(skip)]
    correct: OptionId,
    /// How long the poll accepts answers
    #[garde(custom(validate_duration::<MIN_DURATION, MAX_DURATION>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    duration: Duration,
}

/// Reasons a question is refused
#[derive(Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A field is out of bounds; carries the validation report
    #[error("invalid question: {0}")]
    Invalid(String),
    /// The correct option id does not name one of the options
    #[error("correct option is not one of the options")]
    UnknownCorrectOption,
    /// Two options share an id
    #[error("option ids must be unique")]
    DuplicateOptionId,
}

impl QuestionConfig {
    /// Creates a question; nothing is validated until [`QuestionConfig::check`]
    pub fn new(
        text: impl Into<String>,
        options: Vec<OptionConfig>,
        correct: OptionId,
        duration: Duration,
    ) -> Self {
        Self {
            text: text.into(),
            options,
            correct,
            duration,
        }
    }

    /// The prompt text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The options in display order
    pub fn options(&self) -> &[OptionConfig] {
        &self.options
    }

    /// The correct option
    pub fn correct(&self) -> OptionId {
        self.correct
    }

    /// The configured answer window
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whole seconds of the answer window
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs()
    }

    /// Whether `option` names one of the options
    pub fn has_option(&self, option: OptionId) -> bool {
        self.options.iter().any(|o| o.id == option)
    }

    fn trimmed(&self) -> Self {
        Self {
            text: self.text.trim().to_owned(),
            options: self
                .options
                .iter()
                .map(|o| OptionConfig {
                    id: o.id,
                    text: o.text.trim().to_owned(),
                })
                .collect(),
            correct: self.correct,
            duration: self.duration,
        }
    }

    /// Checks that the question can start a poll
    ///
    /// Text fields are judged after trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// * `Error::Invalid` if a length, count or duration bound is violated
    /// * `Error::DuplicateOptionId` if two options share an id
    /// * `Error::UnknownCorrectOption` if the correct id names no option
    pub fn check(&self) -> Result<(), Error> {
        self.clone().into_checked().map(|_| ())
    }

    /// Trims and checks the question, returning the form the room stores
    ///
    /// # Errors
    ///
    /// See [`QuestionConfig::check`].
    pub fn into_checked(self) -> Result<Self, Error> {
        let question = self.trimmed();

        question
            .validate()
            .map_err(|report| Error::Invalid(report.to_string()))?;

        let mut seen = HashSet::new();
        if !question.options.iter().all(|o| seen.insert(o.id)) {
            return Err(Error::DuplicateOptionId);
        }

        if !question.has_option(question.correct) {
            return Err(Error::UnknownCorrectOption);
        }

        Ok(question)
    }
}
