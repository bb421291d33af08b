//! The queue drain loop.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use dc_catalog::{Catalog, DatasetResolver};
use dc_stac::stac_to_eo3;

use crate::queue::MessageSource;
use crate::resolve::{
    link_href, payload_from_message, s3_record_uris, value_at_path, DocumentFetcher,
    MetadataLocator,
};

/// Options wiring the CLI flags into message processing.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub locator: MetadataLocator,
    /// S3-record extraction mode with a key pattern filter.
    pub record_path: Option<String>,
    pub stac: bool,
    pub update: bool,
    pub archive: bool,
    pub allow_unsafe: bool,
}

/// Run counters, reported in the final summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub added: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Stats {
    pub fn processed(&self) -> usize {
        self.added + self.failed
    }
}

/// Per-message counters, folded into [`Stats`] by the drain loop.
#[derive(Debug, Default)]
pub struct Outcome {
    pub added: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Trait for the per-message indexing work, separated from queue mechanics.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &str) -> Result<Outcome>;
}

/// Production handler: resolve documents, optionally transform, index.
pub struct Indexer<'a> {
    pub catalog: &'a Catalog,
    pub resolver: &'a DatasetResolver<'a>,
    pub fetcher: &'a DocumentFetcher,
    pub opts: &'a DrainOptions,
}

#[async_trait]
impl MessageHandler for Indexer<'_> {
    async fn handle(&self, body: &str) -> Result<Outcome> {
        process_message(body, self.catalog, self.resolver, self.fetcher, self.opts).await
    }
}

/// Drain the queue until it reports empty or the limit is reached.
///
/// Messages are deleted after processing whether or not indexing
/// succeeded; failures are counted and reported in the summary instead
/// of being retried.
pub async fn drain_queue<Q, H>(queue: &Q, handler: &H, limit: Option<usize>) -> Result<Stats>
where
    Q: MessageSource,
    H: MessageHandler,
{
    let mut stats = Stats::default();

    loop {
        if let Some(limit) = limit {
            if stats.processed() >= limit {
                info!(limit, "Reached dataset limit");
                break;
            }
        }

        let Some(message) = queue.receive_one().await? else {
            info!("No more messages");
            break;
        };

        match handler.handle(&message.body).await {
            Ok(outcome) => {
                stats.added += outcome.added;
                stats.failed += outcome.failed;
                stats.skipped += outcome.skipped;
            }
            Err(e) => {
                stats.failed += 1;
                error!(error = %e, "Failed to process message");
            }
        }

        queue.delete(&message.receipt_handle).await?;
    }

    Ok(stats)
}

/// Work items from one message: an embedded or to-be-fetched document
/// plus its URI.
type Target = (Option<Value>, String);

/// Decide which documents a payload refers to.
///
/// Returns the targets and the number of S3 records filtered out by the
/// record-path pattern.
pub fn resolve_targets(payload: &Value, opts: &DrainOptions) -> Result<(Vec<Target>, usize)> {
    if let Some(pattern) = &opts.record_path {
        let (uris, skipped) = s3_record_uris(payload, pattern);
        return Ok((uris.into_iter().map(|uri| (None, uri)).collect(), skipped));
    }

    match &opts.locator {
        MetadataLocator::SelfLink => {
            let uri = link_href(payload, "self")
                .ok_or_else(|| anyhow!("No self link in metadata document"))?;
            Ok((vec![(Some(payload.clone()), uri)], 0))
        }
        MetadataLocator::LinkRel(rel) => {
            let uri = link_href(payload, rel)
                .ok_or_else(|| anyhow!("No link with rel '{}' in metadata document", rel))?;
            Ok((vec![(None, uri)], 0))
        }
        MetadataLocator::Path(path) => {
            let uri = value_at_path(payload, path)
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("No URI at path '{}' in message", path.join(".")))?;
            Ok((vec![(None, uri.to_string())], 0))
        }
    }
}

#[instrument(skip_all)]
async fn process_message(
    body: &str,
    catalog: &Catalog,
    resolver: &DatasetResolver<'_>,
    fetcher: &DocumentFetcher,
    opts: &DrainOptions,
) -> Result<Outcome> {
    let payload = payload_from_message(body)?;
    let (targets, skipped) = resolve_targets(&payload, opts)?;

    let mut outcome = Outcome {
        skipped,
        ..Outcome::default()
    };

    for (document, uri) in targets {
        let document = match document {
            Some(doc) => Ok(doc),
            None => fetcher.fetch(&uri).await,
        };

        let result = match document {
            Ok(doc) => index_document(&doc, &uri, catalog, resolver, opts).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => outcome.added += 1,
            Err(e) => {
                outcome.failed += 1;
                error!(uri = %uri, error = %e, "Failed to index dataset");
            }
        }
    }

    if outcome.added == 0 && outcome.failed == 0 && outcome.skipped > 0 {
        warn!("Message contained only filtered-out records");
    }

    Ok(outcome)
}

async fn index_document(
    document: &Value,
    uri: &str,
    catalog: &Catalog,
    resolver: &DatasetResolver<'_>,
    opts: &DrainOptions,
) -> Result<()> {
    let document = if opts.stac {
        serde_json::to_value(stac_to_eo3(document)?)?
    } else {
        document.clone()
    };

    if opts.archive {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| anyhow!("Document has no dataset id"))?;
        catalog.archive_dataset(id).await?;
        info!(id = %id, "Archived dataset");
        return Ok(());
    }

    let dataset = resolver.resolve(&document, uri).await?;

    if opts.update {
        catalog.update_dataset(&dataset, opts.allow_unsafe).await?;
        info!(id = %dataset.id, uri = %uri, "Updated dataset");
    } else {
        catalog.add_dataset(&dataset).await?;
        info!(id = %dataset.id, uri = %uri, "Added dataset");
    }

    Ok(())
}
