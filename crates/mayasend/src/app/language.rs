//! Classify editor syntax identifiers into Maya languages.

use crate::domain::errors::ResolutionError;
use crate::domain::model::Language;

/// Outcome of resolving an editor syntax identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Supported(Language),
    Unsupported,
}

impl Resolution {
    pub fn language(self) -> Option<Language> {
        match self {
            Resolution::Supported(language) => Some(language),
            Resolution::Unsupported => None,
        }
    }
}

/// Case-insensitive substring match against each language token; Python wins ties.
pub fn resolve(syntax: &str) -> Resolution {
    let lowered = syntax.to_lowercase();
    Language::ALL
        .into_iter()
        .find(|language| lowered.contains(language.syntax_token()))
        .map_or(Resolution::Unsupported, Resolution::Supported)
}

/// Like [`resolve`], but treats an unsupported syntax as an error.
pub fn require(syntax: &str) -> Result<Language, ResolutionError> {
    resolve(syntax)
        .language()
        .ok_or_else(|| ResolutionError::Unsupported {
            syntax: syntax.to_owned(),
        })
}
