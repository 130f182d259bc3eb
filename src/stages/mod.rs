//! The mining stages: source fan-out, capture discovery, URL parsing,
//! archived-content download and document parsing.
//!
//! Each stage is an [`EntityProcessor`] wrapped in an [`IncrementalStage`],
//! so selection, ordering, bulk writes and status bookkeeping are shared.

mod build_sources;
mod download_warcs;
mod fetch_captures;
mod parse_url;
mod parse_warc;

pub use build_sources::{ArchiveSourceBuilder, ProviderSourceBuilder};
pub use download_warcs::{WarcDownloader, DOWNLOADER_ID};
pub use fetch_captures::{CaptureFetcher, MAX_URL_LENGTH};
pub use parse_url::{UrlNumberParser, UrlQueryParser};
pub use parse_warc::{WarcField, WarcParser};

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use crate::config::Settings;
use crate::docstore::{DocumentStore, Index, Query, RankFeature, Ranking};
use crate::extraction::ParserCache;
use crate::http_client::HttpClient;
use crate::memento::MementoClient;
use crate::models::{Download, Parse, ParserTarget, StatusPaths};
use crate::pipeline::{IncrementalStage, PipelineStage, StageSpec};
use crate::warc_store::WarcStore;

/// Pivot of the saturating priority features.
const PRIORITY_PIVOT: f64 = 1.0;

/// Shared handles and tuning every stage is built from.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn DocumentStore>,
    pub http: HttpClient,
    pub warc_store: Arc<WarcStore>,
    pub parsers: Arc<ParserCache>,
    pub keep_alive: Duration,
    /// Entities processed concurrently within a chunk.
    pub concurrency: usize,
    /// CDX pages fetched concurrently per source.
    pub page_concurrency: usize,
    pub random_seed: u64,
    pub random_weight: f64,
}

impl StageContext {
    pub fn from_settings(settings: &Settings, store: Arc<dyn DocumentStore>) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder("archive", settings.request_timeout())
            .user_agent(&settings.user_agent)
            .retry(settings.retry_policy())
            .build()?;
        Ok(Self {
            parsers: Arc::new(ParserCache::new(store.clone(), settings.parser_cache_ttl())),
            warc_store: Arc::new(WarcStore::local(&settings.warc_dir, settings.warc_max_file_size)),
            store,
            http,
            keep_alive: settings.scan_keep_alive(),
            concurrency: 1,
            page_concurrency: settings.page_concurrency,
            random_seed: settings.effective_random_seed(),
            random_weight: settings.random_weight,
        })
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Order for seed entities that carry their own priority.
    fn seed_ranking(&self) -> Ranking {
        Ranking::default()
            .with_feature(RankFeature::saturation("priority", PRIORITY_PIVOT))
            .with_random(self.random_seed, self.random_weight)
    }

    /// Order for entities ranked by their archive's and provider's priority.
    fn derived_ranking(&self) -> Ranking {
        Ranking::default()
            .with_feature(RankFeature::saturation("archive.priority", PRIORITY_PIVOT))
            .with_feature(RankFeature::saturation("provider.priority", PRIORITY_PIVOT))
            .with_random(self.random_seed, self.random_weight)
    }

    fn spec(&self, name: StageName, index: Index, status: StatusPaths, ranking: Ranking) -> StageSpec {
        StageSpec::new(name.as_str(), index, status)
            .with_ranking(ranking)
            .with_keep_alive(self.keep_alive)
            .with_concurrency(self.concurrency)
    }
}

/// Stages in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum StageName {
    BuildSourcesArchives,
    BuildSourcesProviders,
    FetchCaptures,
    ParseUrlQuery,
    ParseUrlPage,
    ParseUrlOffset,
    DownloadWarcs,
    ParseWarcQuery,
    ParseWarcSnippets,
    ParseWarcDirectAnswers,
}

impl StageName {
    pub const ALL: [StageName; 10] = [
        Self::BuildSourcesArchives,
        Self::BuildSourcesProviders,
        Self::FetchCaptures,
        Self::ParseUrlQuery,
        Self::ParseUrlPage,
        Self::ParseUrlOffset,
        Self::DownloadWarcs,
        Self::ParseWarcQuery,
        Self::ParseWarcSnippets,
        Self::ParseWarcDirectAnswers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildSourcesArchives => "build-sources-archives",
            Self::BuildSourcesProviders => "build-sources-providers",
            Self::FetchCaptures => "fetch-captures",
            Self::ParseUrlQuery => "parse-url-query",
            Self::ParseUrlPage => "parse-url-page",
            Self::ParseUrlOffset => "parse-url-offset",
            Self::DownloadWarcs => "download-warcs",
            Self::ParseWarcQuery => "parse-warc-query",
            Self::ParseWarcSnippets => "parse-warc-snippets",
            Self::ParseWarcDirectAnswers => "parse-warc-direct-answers",
        }
    }

    /// Index whose entities the stage selects.
    pub fn index(&self) -> Index {
        match self {
            Self::BuildSourcesArchives => Index::Archives,
            Self::BuildSourcesProviders => Index::Providers,
            Self::FetchCaptures => Index::Sources,
            Self::ParseUrlQuery => Index::Captures,
            _ => Index::Serps,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where each stage keeps its status.
pub fn status_paths(name: StageName) -> StatusPaths {
    match name {
        StageName::BuildSourcesArchives | StageName::BuildSourcesProviders => {
            StatusPaths::top_level("should_build_sources", "last_built_sources")
        }
        StageName::FetchCaptures => StatusPaths::top_level("should_fetch_captures", "last_fetched_captures"),
        StageName::ParseUrlQuery => StatusPaths::embedded::<Parse>("url_query_parser"),
        StageName::ParseUrlPage => StatusPaths::embedded::<Parse>("url_page_parser"),
        StageName::ParseUrlOffset => StatusPaths::embedded::<Parse>("url_offset_parser"),
        StageName::DownloadWarcs => StatusPaths::embedded::<Download>("warc_downloader"),
        StageName::ParseWarcQuery => StatusPaths::embedded::<Parse>("warc_query_parser"),
        StageName::ParseWarcSnippets => StatusPaths::embedded::<Parse>("warc_snippets_parser"),
        StageName::ParseWarcDirectAnswers => StatusPaths::embedded::<Parse>("warc_direct_answers_parser"),
    }
}

/// Keys a re-observed SERP must not overwrite: every stage status.
pub fn serp_preserved_keys() -> Vec<String> {
    [
        StageName::ParseUrlQuery,
        StageName::ParseUrlPage,
        StageName::ParseUrlOffset,
        StageName::DownloadWarcs,
        StageName::ParseWarcQuery,
        StageName::ParseWarcSnippets,
        StageName::ParseWarcDirectAnswers,
    ]
    .iter()
    .flat_map(|name| status_paths(*name).preserved_keys())
    .collect()
}

/// Build the stage with the given name.
pub fn build_stage(name: StageName, ctx: &StageContext) -> Box<dyn PipelineStage> {
    let status = status_paths(name);
    let index = name.index();
    match name {
        StageName::BuildSourcesArchives => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.seed_ranking()),
            ctx.store.clone(),
            ArchiveSourceBuilder::new(ctx.store.clone(), ctx.keep_alive),
        )),
        StageName::BuildSourcesProviders => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.seed_ranking()),
            ctx.store.clone(),
            ProviderSourceBuilder::new(ctx.store.clone(), ctx.keep_alive),
        )),
        StageName::FetchCaptures => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.derived_ranking()),
            ctx.store.clone(),
            CaptureFetcher::new(ctx.store.clone(), ctx.http.clone()).with_page_concurrency(ctx.page_concurrency),
        )),
        StageName::ParseUrlQuery => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.derived_ranking())
                .with_filter(Query::term("status_code", 200)),
            ctx.store.clone(),
            UrlQueryParser::new(ctx.parsers.clone()),
        )),
        StageName::ParseUrlPage => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.derived_ranking()),
            ctx.store.clone(),
            UrlNumberParser::new(ctx.parsers.clone(), ParserTarget::UrlPage),
        )),
        StageName::ParseUrlOffset => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.derived_ranking()),
            ctx.store.clone(),
            UrlNumberParser::new(ctx.parsers.clone(), ParserTarget::UrlOffset),
        )),
        StageName::DownloadWarcs => Box::new(IncrementalStage::new(
            ctx.spec(name, index, status, ctx.derived_ranking()),
            ctx.store.clone(),
            WarcDownloader::new(MementoClient::new(ctx.http.clone()), ctx.warc_store.clone()),
        )),
        StageName::ParseWarcQuery => warc_stage(name, ctx, WarcField::Query),
        StageName::ParseWarcSnippets => warc_stage(name, ctx, WarcField::Snippets),
        StageName::ParseWarcDirectAnswers => warc_stage(name, ctx, WarcField::DirectAnswers),
    }
}

fn warc_stage(name: StageName, ctx: &StageContext, field: WarcField) -> Box<dyn PipelineStage> {
    Box::new(IncrementalStage::new(
        ctx.spec(name, name.index(), status_paths(name), ctx.derived_ranking())
            .with_filter(Query::exists("warc_location")),
        ctx.store.clone(),
        WarcParser::new(ctx.parsers.clone(), ctx.warc_store.clone(), field),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_match_cli_values() {
        for name in StageName::ALL {
            let parsed = StageName::from_str(name.as_str(), false).unwrap();
            assert_eq!(parsed, name);
        }
    }

    #[test]
    fn serp_preserves_every_status() {
        let keys = serp_preserved_keys();
        assert_eq!(keys.len(), 7);
        assert!(keys.contains(&"url_query_parser".to_string()));
        assert!(keys.contains(&"warc_downloader".to_string()));
    }

    #[test]
    fn derived_ranking_favours_priority() {
        let ctx_ranking = Ranking::default()
            .with_feature(RankFeature::saturation("archive.priority", PRIORITY_PIVOT))
            .with_feature(RankFeature::saturation("provider.priority", PRIORITY_PIVOT));
        let high = json!({"archive": {"priority": 5.0}, "provider": {"priority": 5.0}});
        let low = json!({"archive": {"priority": 1.0}, "provider": {}});
        assert_eq!(ctx_ranking.order([("low", &low), ("high", &high)]), vec!["high", "low"]);
    }
}
