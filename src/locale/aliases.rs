//! Alias tables translating geolocation-provider codes into site codes.

/// Provider country codes that differ from the site's own codes.
///
/// Codes not listed here are used unchanged (lowercased).
pub const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("uk", "gb"),
    ("usa", "us"),
    ("ind", "in"),
    ("uae", "ae"),
    ("ksa", "sa"),
];

/// Regional language tags the provider reports, mapped to site language codes.
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("en", "en"),
    ("ar", "ar"),
    ("fr", "fr"),
    ("de", "de"),
    ("es", "es"),
    ("en-US", "en"),
    ("en-GB", "en"),
    ("en-CA", "en"),
    ("en-AU", "en"),
    ("en-NZ", "en"),
    ("en-ZA", "en"),
    ("en-IE", "en"),
    ("en-IN", "en"),
    ("ar-AE", "ar"),
    ("ar-SA", "ar"),
    ("ar-EG", "ar"),
    ("ar-JO", "ar"),
    ("ar-LB", "ar"),
    ("ar-KW", "ar"),
    ("ar-QA", "ar"),
    ("ar-BH", "ar"),
    ("ar-OM", "ar"),
    ("fr-FR", "fr"),
    ("fr-CA", "fr"),
    ("fr-BE", "fr"),
    ("fr-CH", "fr"),
    ("fr-LU", "fr"),
    ("fr-MC", "fr"),
    ("de-DE", "de"),
    ("de-AT", "de"),
    ("de-CH", "de"),
    ("de-LI", "de"),
    ("de-LU", "de"),
    ("es-ES", "es"),
    ("es-MX", "es"),
    ("es-AR", "es"),
    ("es-CL", "es"),
    ("es-CO", "es"),
    ("es-PE", "es"),
    ("es-VE", "es"),
    ("es-EC", "es"),
    ("es-UY", "es"),
    ("es-PY", "es"),
    ("es-BO", "es"),
    ("es-CR", "es"),
    ("es-PA", "es"),
    ("es-GT", "es"),
    ("es-HN", "es"),
    ("es-SV", "es"),
    ("es-NI", "es"),
    ("es-CU", "es"),
    ("es-DO", "es"),
    ("es-HT", "es"),
    ("es-JM", "es"),
    ("es-TT", "es"),
    ("es-BB", "es"),
];

/// Look up the site country code for a lowercase provider alias.
pub(crate) fn map_country_alias(code: &str) -> Option<&'static str> {
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == code)
        .map(|(_, target)| *target)
}

/// Look up the site language code for a provider language tag.
///
/// Matching is exact: "en-us" is not an alias of "en", only "en-US" is.
pub fn map_language_alias(tag: &str) -> Option<&'static str> {
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == tag)
        .map(|(_, target)| *target)
}
