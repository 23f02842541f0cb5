//! Locale resolver: maps a request path to a (country, language, page) tuple.
//!
//! Paths have the shape `/{country}[/{language}][/{page...}]`. The language
//! segment is only recognized when it is one of the country's languages, and
//! the country's default language is never spelled out in a canonical path.

use crate::locale::{Country, Language, LocaleDirectory};
use tracing::debug;

/// Pages that exist under every country/language prefix.
const DEFAULT_PAGES: &[&str] = &[
    "",
    "events",
    "events/tech-conference-2025",
    "events/web-development-workshop",
    "events/design-summit",
];

/// The fixed set of page paths the site serves (without locale prefix).
#[derive(Debug, Clone)]
pub struct KnownPages {
    paths: Vec<String>,
}

impl KnownPages {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `page_path` (segments joined by `/`, empty for home) exists.
    pub fn contains(&self, page_path: &str) -> bool {
        self.paths.iter().any(|path| path == page_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

impl Default for KnownPages {
    fn default() -> Self {
        Self::new(DEFAULT_PAGES.iter().copied())
    }
}

/// Locale information derived from an allowed request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleResolution {
    pub country: Country,
    pub language: Language,
    /// `language.code == country.default_language`
    pub is_default_language: bool,
    /// Remaining path after the locale prefix, without leading slash
    pub page_path: String,
}

impl LocaleResolution {
    /// The canonical URL path for this resolution.
    pub fn canonical_path(&self) -> String {
        localized_path(&self.country, self.language.code, &self.page_path)
    }
}

/// Outcome of resolving one request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Serve the page.
    Allow(LocaleResolution),
    /// Permanently redirect to the canonical location.
    Redirect(String),
    /// The page does not exist under this locale.
    NotFound,
}

/// Build the canonical path for a page in a country and language.
///
/// The language segment is omitted when it is the country's default.
pub fn localized_path(country: &Country, language_code: &str, page_path: &str) -> String {
    let mut path = format!("/{}", country.code);

    if language_code != country.default_language {
        path.push('/');
        path.push_str(language_code);
    }

    let page = page_path.trim_matches('/');
    if !page.is_empty() {
        path.push('/');
        path.push_str(page);
    }

    path
}

/// Resolves request paths against the locale directory and the known pages.
#[derive(Debug, Clone)]
pub struct LocaleResolver<'d> {
    directory: &'d LocaleDirectory,
    default_country: String,
    pages: KnownPages,
}

impl<'d> LocaleResolver<'d> {
    /// Create a resolver.
    ///
    /// `default_country` is the lowercase code every invalid path falls back to.
    pub fn new(directory: &'d LocaleDirectory, default_country: impl Into<String>, pages: KnownPages) -> Self {
        Self {
            directory,
            default_country: default_country.into().to_ascii_lowercase(),
            pages,
        }
    }

    pub fn directory(&self) -> &'d LocaleDirectory {
        self.directory
    }

    pub fn default_country(&self) -> &str {
        &self.default_country
    }

    /// Home path of the default country, e.g. `/in`.
    pub fn default_home(&self) -> String {
        format!("/{}", self.default_country)
    }

    /// Resolve a request path (without query string).
    ///
    /// Canonicalization redirects are decided before the page is checked, so
    /// a non-canonical path to an unknown page redirects, and its target then
    /// resolves to `NotFound`. Redirect targets never redirect again.
    pub fn resolve(&self, path: &str) -> Resolution {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let Some(&candidate) = segments.first() else {
            debug!("Empty path, redirecting to default country");
            return Resolution::Redirect(self.default_home());
        };

        if !LocaleDirectory::is_valid_country_code(candidate) {
            debug!("Invalid country code {:?}, redirecting to default country", candidate);
            return Resolution::Redirect(self.default_home());
        }

        let country_code = candidate.to_ascii_lowercase();
        let country = self.directory.resolve_country(&country_code);

        // Uppercase country codes are served under their lowercase form
        let mut needs_redirect = candidate != country_code;
        let mut language = country.default_language_entry();
        let mut rest = &segments[1..];

        if let Some(lang) = rest.first().and_then(|seg| country.language(seg)) {
            if lang.code == country.default_language {
                needs_redirect = true;
            }
            language = lang;
            rest = &rest[1..];
        }

        let page_path = rest.join("/");

        if needs_redirect {
            let target = localized_path(&country, language.code, &page_path);
            debug!("Canonicalizing {} -> {}", path, target);
            return Resolution::Redirect(target);
        }

        if !self.pages.contains(&page_path) {
            debug!("Unknown page {:?} for country {}", page_path, country.code);
            return Resolution::NotFound;
        }

        let is_default_language = language.code == country.default_language;
        Resolution::Allow(LocaleResolution {
            country: country.into_owned(),
            language,
            is_default_language,
            page_path,
        })
    }

    /// Path of the current page in another country/language, as used by a
    /// language switcher.
    ///
    /// The page part of `current_path` is kept; its locale prefix (country
    /// and, if present, language) is replaced.
    pub fn switch_language_path(&self, current_path: &str, country: &Country, language: &Language) -> String {
        let segments: Vec<&str> = current_path.split('/').filter(|s| !s.is_empty()).collect();

        let page_start = match segments.as_slice() {
            [current_country, current_lang, ..]
                if self
                    .directory
                    .is_valid_language_for_country(current_country, current_lang) =>
            {
                2
            }
            [] => 0,
            _ => 1,
        };

        localized_path(country, language.code, &segments[page_start..].join("/"))
    }
}
