//! Language type and the table of languages the site is translated into.

use std::fmt;

/// Writing direction of a language, used for the HTML `dir` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDirection {
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextDirection::Ltr => "ltr",
            TextDirection::Rtl => "rtl",
        }
    }
}

impl fmt::Display for TextDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A language the site has content for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    /// ISO 639-1 language code (e.g., "en", "ar")
    pub code: &'static str,

    /// English name of the language (e.g., "Arabic")
    pub name: &'static str,

    /// Native name of the language (e.g., "العربية")
    pub native_name: &'static str,

    /// Full language tag used for `<html lang>` and `Content-Language`
    pub html_tag: &'static str,

    pub direction: TextDirection,
}

impl Language {
    pub const ENGLISH: Language = Language {
        code: "en",
        name: "English",
        native_name: "English",
        html_tag: "en-US",
        direction: TextDirection::Ltr,
    };

    pub const ARABIC: Language = Language {
        code: "ar",
        name: "Arabic",
        native_name: "العربية",
        html_tag: "ar-SA",
        direction: TextDirection::Rtl,
    };

    pub const FRENCH: Language = Language {
        code: "fr",
        name: "French",
        native_name: "Français",
        html_tag: "fr-FR",
        direction: TextDirection::Ltr,
    };

    pub const GERMAN: Language = Language {
        code: "de",
        name: "German",
        native_name: "Deutsch",
        html_tag: "de-DE",
        direction: TextDirection::Ltr,
    };

    pub const SPANISH: Language = Language {
        code: "es",
        name: "Spanish",
        native_name: "Español",
        html_tag: "es-ES",
        direction: TextDirection::Ltr,
    };

    /// Every language the site knows about.
    pub const ALL: [Language; 5] = [
        Language::ENGLISH,
        Language::ARABIC,
        Language::FRENCH,
        Language::GERMAN,
        Language::SPANISH,
    ];

    /// Look up a language by its exact lowercase code.
    ///
    /// # Returns
    /// * `Some(Language)` if the site has content in that language
    /// * `None` otherwise (including for uppercase or regional tags like "en-US")
    pub fn from_code(code: &str) -> Option<Language> {
        Language::ALL.iter().copied().find(|lang| lang.code == code)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}
