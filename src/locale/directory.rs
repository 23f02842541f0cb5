//! Country directory: single source of truth for the countries the site serves.
//!
//! The predefined table is built once on first access (`OnceLock`) and never
//! changes afterwards. Any well-formed two-letter code outside the table is
//! served as a *dynamic* country with English-only content, so lookups by
//! code never fail.

use crate::locale::aliases::map_country_alias;
use crate::locale::{map_language_alias, Language};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Flag shown for countries outside the predefined table.
const DYNAMIC_COUNTRY_FLAG: &str = "🌍";

/// A country the site can be browsed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    /// Lowercase ISO 3166-1 alpha-2 code (e.g., "fr")
    pub code: Cow<'static, str>,

    /// Display name (e.g., "France"); the uppercase code for dynamic countries
    pub name: Cow<'static, str>,

    pub flag: &'static str,

    /// Code of the language served when the URL carries no language segment
    pub default_language: &'static str,

    /// Supported languages in preference order. Never empty and always
    /// contains `default_language`.
    pub languages: Vec<Language>,

    dynamic: bool,
}

impl Country {
    /// Build a predefined country entry.
    ///
    /// # Panics
    /// Panics if `languages` does not contain `default_language`; the
    /// predefined table is static data so this is a programming error.
    pub fn predefined(
        code: &'static str,
        name: &'static str,
        flag: &'static str,
        default_language: &'static str,
        languages: &[Language],
    ) -> Self {
        assert!(
            languages.iter().any(|lang| lang.code == default_language),
            "default language '{}' of country '{}' must be one of its languages",
            default_language,
            code
        );

        Self {
            code: Cow::Borrowed(code),
            name: Cow::Borrowed(name),
            flag,
            default_language,
            languages: languages.to_vec(),
            dynamic: false,
        }
    }

    /// Whether this country was synthesized for a code outside the table.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Find one of this country's languages by code.
    pub fn language(&self, code: &str) -> Option<Language> {
        self.languages.iter().copied().find(|lang| lang.code == code)
    }

    pub fn supports_language(&self, code: &str) -> bool {
        self.language(code).is_some()
    }

    /// The full `Language` entry for `default_language`.
    pub fn default_language_entry(&self) -> Language {
        self.language(self.default_language)
            .unwrap_or(Language::ENGLISH)
    }
}

/// Immutable table of predefined countries.
#[derive(Debug, Clone)]
pub struct LocaleDirectory {
    countries: Vec<Country>,
}

/// Built-in directory instance (initialized lazily)
static BUILTIN: OnceLock<LocaleDirectory> = OnceLock::new();

/// Syntactic shape of a country code segment
static COUNTRY_CODE_REGEX: OnceLock<Regex> = OnceLock::new();

impl LocaleDirectory {
    /// Get the built-in directory with the site's predefined countries.
    pub fn builtin() -> &'static LocaleDirectory {
        BUILTIN.get_or_init(|| LocaleDirectory::new(default_countries()))
    }

    /// Build a directory from an explicit country table.
    pub fn new(countries: Vec<Country>) -> Self {
        Self { countries }
    }

    /// All predefined countries in table order.
    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    /// Exact-match lookup against the predefined table.
    ///
    /// Matching is case-sensitive; callers normalize to lowercase first.
    pub fn get_country(&self, code: &str) -> Option<&Country> {
        self.countries.iter().find(|country| country.code == code)
    }

    /// Whether `code` has the shape of a country code (two ASCII letters).
    ///
    /// This is deliberately permissive: codes outside the predefined table
    /// are valid and resolve to dynamic countries.
    pub fn is_valid_country_code(code: &str) -> bool {
        COUNTRY_CODE_REGEX
            .get_or_init(|| Regex::new(r"^[A-Za-z]{2}$").expect("country code pattern is valid"))
            .is_match(code)
    }

    /// Whether `lang_code` is one of the languages of the (possibly dynamic)
    /// country `country_code`.
    pub fn is_valid_language_for_country(&self, country_code: &str, lang_code: &str) -> bool {
        self.resolve_country(country_code)
            .supports_language(lang_code)
    }

    /// Build an English-only country for a code outside the table.
    ///
    /// Never fails; the code is lowercased for the country code and
    /// uppercased for its display name.
    pub fn synthesize_dynamic_country(code: &str) -> Country {
        Country {
            code: Cow::Owned(code.to_ascii_lowercase()),
            name: Cow::Owned(code.to_ascii_uppercase()),
            flag: DYNAMIC_COUNTRY_FLAG,
            default_language: Language::ENGLISH.code,
            languages: vec![Language::ENGLISH],
            dynamic: true,
        }
    }

    /// Resolve a country code to a predefined country, or synthesize a
    /// dynamic one.
    pub fn resolve_country(&self, code: &str) -> Cow<'_, Country> {
        let normalized = code.to_ascii_lowercase();
        match self.get_country(&normalized) {
            Some(country) => Cow::Borrowed(country),
            None => Cow::Owned(Self::synthesize_dynamic_country(&normalized)),
        }
    }

    /// Translate a geolocation provider's country code into a site code.
    ///
    /// Applies the alias table (e.g. "uk" -> "gb") and otherwise returns the
    /// lowercased input unchanged, leaving it to be served as a dynamic
    /// country.
    pub fn map_provider_country_code(provider_code: &str) -> String {
        let normalized = provider_code.trim().to_ascii_lowercase();
        match map_country_alias(&normalized) {
            Some(mapped) => mapped.to_string(),
            None => normalized,
        }
    }

    /// Resolve a provider country code straight to a `Country`.
    pub fn country_from_provider(&self, provider_code: &str) -> Cow<'_, Country> {
        let code = Self::map_provider_country_code(provider_code);
        self.resolve_country(&code)
    }

    /// Pick the best supported language of `country` for a provider language
    /// preference list such as `"en-US,es-US,haw,fr"`.
    ///
    /// For each of the country's languages in order, the provider list is
    /// searched for an exact code or a known alias. If nothing matches, a
    /// second pass accepts regional prefixes (`en-..`, `en_..`). Falls back to
    /// the country's default language.
    pub fn detect_best_language(country: &Country, provider_languages: &str) -> &'static str {
        let preferences: Vec<&str> = provider_languages
            .split(',')
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .collect();

        for supported in &country.languages {
            for preference in &preferences {
                if *preference == supported.code
                    || map_language_alias(preference) == Some(supported.code)
                {
                    return supported.code;
                }
            }
        }

        for supported in &country.languages {
            let dash = format!("{}-", supported.code);
            let underscore = format!("{}_", supported.code);
            if preferences
                .iter()
                .any(|preference| preference.starts_with(&dash) || preference.starts_with(&underscore))
            {
                return supported.code;
            }
        }

        country.default_language
    }
}

impl Default for LocaleDirectory {
    fn default() -> Self {
        Self::new(default_countries())
    }
}

/// Predefined countries. The first entry is the site-wide default.
fn default_countries() -> Vec<Country> {
    let english_only = [Language::ENGLISH];
    let arabic_english = [Language::ARABIC, Language::ENGLISH];

    vec![
        Country::predefined("in", "India", "🇮🇳", "en", &english_only),
        Country::predefined("ae", "UAE", "🇦🇪", "ar", &arabic_english),
        Country::predefined("sa", "Saudi Arabia", "🇸🇦", "ar", &arabic_english),
        Country::predefined("us", "United States", "🇺🇸", "en", &english_only),
        Country::predefined("gb", "United Kingdom", "🇬🇧", "en", &english_only),
        Country::predefined(
            "fr",
            "France",
            "🇫🇷",
            "fr",
            &[Language::FRENCH, Language::ENGLISH],
        ),
        Country::predefined(
            "de",
            "Germany",
            "🇩🇪",
            "de",
            &[Language::GERMAN, Language::ENGLISH],
        ),
        Country::predefined(
            "es",
            "Spain",
            "🇪🇸",
            "es",
            &[Language::SPANISH, Language::ENGLISH],
        ),
    ]
}
