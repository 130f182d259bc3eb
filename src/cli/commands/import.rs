//! Seed import: archives, providers and parsers from YAML files.

use std::path::Path;

use clap::ValueEnum;
use console::style;
use serde::Deserialize;

use crate::cdx::CdxDialect;
use crate::config::Settings;
use crate::docstore::{BulkAction, DocumentStore};
use crate::extraction::CompiledParser;
use crate::models::{Archive, ParserRecord, ParserTarget, ParserType, Provider};
use crate::pipeline::write_bulk;
use crate::stages::{status_paths, StageName};

use super::super::helpers::open_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeedKind {
    Archives,
    Providers,
    Parsers,
}

#[derive(Debug, Deserialize)]
struct ArchiveSeed {
    name: String,
    #[serde(default)]
    description: Option<String>,
    cdx_api_url: String,
    memento_api_url: String,
    #[serde(default)]
    cdx_dialect: CdxDialect,
    #[serde(default)]
    priority: Option<f32>,
}

impl From<ArchiveSeed> for Archive {
    fn from(seed: ArchiveSeed) -> Self {
        let mut archive = Archive::new(seed.name, seed.cdx_api_url, seed.memento_api_url);
        archive.description = seed.description;
        archive.cdx_dialect = seed.cdx_dialect;
        archive.priority = seed.priority;
        archive
    }
}

#[derive(Debug, Deserialize)]
struct ProviderSeed {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    exclusion_reason: Option<String>,
    domains: Vec<String>,
    #[serde(default)]
    url_path_prefixes: Vec<String>,
    #[serde(default)]
    priority: Option<f32>,
}

impl From<ProviderSeed> for Provider {
    fn from(seed: ProviderSeed) -> Self {
        let mut provider = Provider::new(seed.name, seed.domains, seed.url_path_prefixes);
        provider.description = seed.description;
        provider.exclusion_reason = seed.exclusion_reason;
        provider.priority = seed.priority;
        provider
    }
}

/// A parser definition. `provider` names the provider it is limited to.
#[derive(Debug, Deserialize)]
struct ParserSeed {
    #[serde(default)]
    name: Option<String>,
    target: ParserTarget,
    parser_type: ParserType,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    url_pattern_regex: Option<String>,
    #[serde(default)]
    priority: Option<f32>,
    #[serde(default)]
    parameter: Option<String>,
    #[serde(default)]
    segment: Option<usize>,
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    url_parameter: Option<String>,
    #[serde(default)]
    url_xpath: Option<String>,
    #[serde(default)]
    title_xpath: Option<String>,
    #[serde(default)]
    text_xpath: Option<String>,
    #[serde(default)]
    url_selector: Option<String>,
    #[serde(default)]
    title_selector: Option<String>,
    #[serde(default)]
    text_selector: Option<String>,
    #[serde(default)]
    remove_pattern: Option<String>,
    #[serde(default)]
    space_pattern: Option<String>,
}

impl From<ParserSeed> for ParserRecord {
    fn from(seed: ParserSeed) -> Self {
        let mut record = ParserRecord::new(seed.target, seed.parser_type);
        record.name = seed.name;
        record.provider_id = seed.provider.as_deref().map(Provider::derive_id);
        record.url_pattern_regex = seed.url_pattern_regex;
        record.priority = seed.priority;
        record.parameter = seed.parameter;
        record.segment = seed.segment;
        record.xpath = seed.xpath;
        record.url_xpath = seed.url_xpath;
        record.title_xpath = seed.title_xpath;
        record.text_xpath = seed.text_xpath;
        record.selector = seed.selector;
        record.attribute = seed.attribute;
        record.url_parameter = seed.url_parameter;
        record.url_selector = seed.url_selector;
        record.title_selector = seed.title_selector;
        record.text_selector = seed.text_selector;
        record.remove_pattern = seed.remove_pattern;
        record.space_pattern = seed.space_pattern;
        record.with_derived_id()
    }
}

/// Turn seed YAML into bulk writes. Parsers are compiled first so that a
/// broken definition is rejected before anything is stored.
fn seed_actions(kind: SeedKind, yaml: &str) -> anyhow::Result<Vec<BulkAction>> {
    let seed_status = status_paths(StageName::BuildSourcesArchives).preserved_keys();
    let actions = match kind {
        SeedKind::Archives => serde_yaml::from_str::<Vec<ArchiveSeed>>(yaml)?
            .into_iter()
            .map(|seed| BulkAction::merge_entity(&Archive::from(seed), seed_status.clone()))
            .collect::<Result<Vec<_>, _>>()?,
        SeedKind::Providers => serde_yaml::from_str::<Vec<ProviderSeed>>(yaml)?
            .into_iter()
            .map(|seed| BulkAction::merge_entity(&Provider::from(seed), seed_status.clone()))
            .collect::<Result<Vec<_>, _>>()?,
        SeedKind::Parsers => {
            let records: Vec<ParserRecord> = serde_yaml::from_str::<Vec<ParserSeed>>(yaml)?
                .into_iter()
                .map(ParserRecord::from)
                .collect();
            for record in &records {
                CompiledParser::try_from(record)?;
            }
            records
                .iter()
                .map(|record| BulkAction::merge_entity(record, Vec::new()))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(actions)
}

async fn import_into(store: &dyn DocumentStore, kind: SeedKind, yaml: &str) -> anyhow::Result<usize> {
    let actions = seed_actions(kind, yaml)?;
    let count = actions.len();
    write_bulk(store, "import", actions).await?;
    Ok(count)
}

/// Import seed records from a YAML file.
pub async fn cmd_import(settings: &Settings, kind: SeedKind, file: &Path) -> anyhow::Result<()> {
    let yaml = tokio::fs::read_to_string(file).await?;
    let store = open_store(settings).await?;
    let count = import_into(store.as_ref(), kind, &yaml).await?;
    println!(
        "{} Imported {} {:?} record(s) from {}",
        style("✓").green(),
        count,
        kind,
        file.display()
    );
    Ok(())
}
