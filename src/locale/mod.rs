//! Locale directory: supported languages and countries.
//!
//! This module is the single source of truth for which countries the site
//! serves and in which languages. Everything here is immutable after process
//! start; lookups are pure functions over static tables.
//!
//! # Architecture
//!
//! - `language`: the `Language` type and the table of known languages
//! - `directory`: the `Country` type, the predefined country table and the
//!   lookup/synthesis operations used by the resolver and redirect flow
//! - `aliases`: provider country-code and language-tag alias tables
//!
//! # Example
//!
//! ```rust,ignore
//! use locale_gateway::locale::LocaleDirectory;
//!
//! let directory = LocaleDirectory::builtin();
//! let france = directory.resolve_country("fr");
//! assert_eq!(france.default_language, "fr");
//!
//! // Unknown but well-formed codes become English-only dynamic countries
//! let italy = directory.resolve_country("it");
//! assert!(italy.is_dynamic());
//! ```

mod aliases;
mod directory;
mod language;

pub use aliases::{map_language_alias, COUNTRY_ALIASES};
pub use directory::{Country, LocaleDirectory};
pub use language::{Language, TextDirection};
