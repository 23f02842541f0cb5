//! Resolve binary - prints what the gateway would do with the given paths
//!
//! Usage:
//!   cargo run --bin resolve -- /fr/en/events /FR /xyz
//!   cargo run --bin resolve -- --geo IT it-IT,en    # root redirect for a provider answer
//!
//! Optional:
//! - DEFAULT_COUNTRY (defaults to in)

use anyhow::{bail, Result};
use locale_gateway::{
    config::Config,
    geolocation::GeolocationRecord,
    locale::LocaleDirectory,
    redirect::target_for_record,
    resolver::{KnownPages, LocaleResolver, Resolution},
};

fn describe(resolver: &LocaleResolver<'_>, path: &str) -> String {
    match resolver.resolve(path) {
        Resolution::Allow(resolution) => format!(
            "ALLOW     country={} language={} default_language={} page={:?} canonical={}",
            resolution.country.code,
            resolution.language.code,
            resolution.is_default_language,
            resolution.page_path,
            resolution.canonical_path()
        ),
        Resolution::Redirect(target) => format!("REDIRECT  301 -> {}", target),
        Resolution::NotFound => "NOT_FOUND 404".to_string(),
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;
    let directory = LocaleDirectory::builtin();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--geo") {
        let Some(country_code) = args.get(1) else {
            bail!("usage: resolve --geo <COUNTRY_CODE> [LANGUAGES]");
        };
        let record = GeolocationRecord {
            country_code: Some(country_code.clone()),
            languages: args.get(2).cloned(),
            ..GeolocationRecord::default()
        };
        let target = target_for_record(directory, &record)
            .unwrap_or_else(|| format!("/{} (fallback)", config.default_country));
        println!("/ -> {}", target);
        return Ok(());
    }

    if args.is_empty() {
        bail!("usage: resolve <PATH>... | --geo <COUNTRY_CODE> [LANGUAGES]");
    }

    let resolver = LocaleResolver::new(directory, config.default_country.as_str(), KnownPages::default());
    for path in &args {
        println!("{:<40} {}", path, describe(&resolver, path));
    }

    Ok(())
}
