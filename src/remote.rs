//! Advisory listing of packages published by remote sources.
//!
//! Read-only: nothing here touches the local repository or configuration.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use crate::settings::{RemoteKind, RemoteSource, Settings};

const MANIFEST_LINK_PATTERN: &str = r#"title="([^"]*?\.toml)""#;
const DATA_PACKAGE_PATTERN: &str = r#"data-package="([^"]*)""#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

impl RemotePackage {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            os: None,
            architecture: None,
        }
    }
}

impl fmt::Display for RemotePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " (version {}", version)?;
            if let (Some(os), Some(arch)) = (&self.os, &self.architecture) {
                write!(f, ", {}-{}", os, arch)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Packages reported by one source, or why it could not be read.
#[derive(Debug)]
pub struct SourceListing {
    pub source: String,
    pub packages: Result<Vec<RemotePackage>>,
}

/// Query every configured source, or only the one called `only`.
pub async fn list_available(settings: &Settings, only: Option<&str>) -> Result<Vec<SourceListing>> {
    let sources: Vec<&RemoteSource> = settings
        .remotes
        .iter()
        .filter(|s| only.map_or(true, |name| s.name == name))
        .collect();

    if let Some(name) = only {
        if sources.is_empty() {
            return Err(anyhow!("No remote source named '{}' in settings", name));
        }
    }

    let client = Client::builder()
        .user_agent(concat!("svcpkg/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut listings = Vec::with_capacity(sources.len());
    for source in sources {
        let packages = fetch_source(&client, source).await;
        if let Err(e) = &packages {
            warn!(source = %source.name, "Remote listing failed: {:#}", e);
        }
        listings.push(SourceListing {
            source: source.name.clone(),
            packages,
        });
    }
    Ok(listings)
}

async fn fetch_source(client: &Client, source: &RemoteSource) -> Result<Vec<RemotePackage>> {
    debug!(source = %source.name, url = %source.url, "Fetching remote listing");
    let response = client
        .get(&source.url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", source.url))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "{} returned status {}",
            source.url,
            response.status()
        ));
    }

    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read body from {}", source.url))?;

    match source.kind {
        RemoteKind::Html => parse_manifest_links(&body),
        RemoteKind::Listing => parse_listing(&body),
    }
}

/// Manifest file links in a repository tree page, extension stripped.
pub fn parse_manifest_links(body: &str) -> Result<Vec<RemotePackage>> {
    let pattern = Regex::new(MANIFEST_LINK_PATTERN)?;
    let mut packages: Vec<RemotePackage> = Vec::new();
    for caps in pattern.captures_iter(body) {
        let file = &caps[1];
        let name = file.strip_suffix(".toml").unwrap_or(file);
        if !packages.iter().any(|p| p.name == name) {
            packages.push(RemotePackage::named(name));
        }
    }
    Ok(packages)
}

/// A JSON array of package entries, or failing that `data-package` attributes.
pub fn parse_listing(body: &str) -> Result<Vec<RemotePackage>> {
    if let Ok(packages) = serde_json::from_str::<Vec<RemotePackage>>(body) {
        return Ok(packages);
    }
    let pattern = Regex::new(DATA_PACKAGE_PATTERN)?;
    Ok(pattern
        .captures_iter(body)
        .map(|caps| RemotePackage::named(&caps[1]))
        .collect())
}
