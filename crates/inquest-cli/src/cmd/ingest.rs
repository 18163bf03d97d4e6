//! `inquest ingest` — normalize and ingest one webhook payload from disk,
//! standing in for the HTTP ingress during local runs.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use inquest_core::idgen::IdGenerator;
use inquest_core::ingest::{EventIngestService, IngestParams};
use inquest_core::normalizer::MapperRegistry;
use inquest_core::queue::Producer;
use inquest_core::InquestError;

use crate::output;

pub struct IngestArgs {
    pub integration: u64,
    pub issue: String,
    pub payload: PathBuf,
    pub headers: Vec<String>,
    pub triggered_by: String,
    pub comment_body: Option<String>,
    pub comment_id: Option<String>,
    pub discussion_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(serde::Serialize)]
struct IngestOutput {
    engaged: bool,
    duplicated: bool,
    enqueued: bool,
    event_type: String,
    event_log_id: Option<u64>,
    issue_id: Option<u64>,
    dedupe_key: Option<String>,
}

pub fn run(config_path: &Path, args: IngestArgs, json: bool) -> anyhow::Result<()> {
    let (cfg, store, queue) = super::open_databases(config_path)?;

    let raw = read_payload(&args.payload)?;
    let payload: serde_json::Value =
        serde_json::from_str(&raw).context("payload is not valid JSON")?;
    let headers = parse_headers(&args.headers)?;

    let integration = store.get_integration(args.integration)?;

    // Unsupported events are acknowledged and dropped, mirroring what the
    // webhook endpoint does: a provider retrying them forever helps nobody.
    let event_type =
        match MapperRegistry::with_defaults().normalize(integration.provider, &payload, &headers) {
            Ok(event_type) => event_type,
            Err(InquestError::UnrecognizedEvent(detail)) => {
                println!("dropped: unrecognized event ({detail})");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

    let service = EventIngestService::new(
        Arc::clone(&store),
        Producer::new(queue),
        Arc::new(IdGenerator::new(cfg.node_id)),
        chrono::Duration::minutes(cfg.orchestrator.stuck_after_minutes),
    );

    let result = service.ingest(IngestParams {
        integration_id: args.integration,
        external_issue_id: args.issue,
        external_project_id: integration.external_project_id,
        provider: integration.provider,
        issue_title: args.title,
        issue_body: args.body,
        comment_body: args.comment_body,
        discussion_id: args.discussion_id,
        comment_id: args.comment_id,
        triggered_by: args.triggered_by,
        event_type,
        payload,
        trace_id: args.trace_id,
    })?;

    let out = IngestOutput {
        engaged: result.engaged,
        duplicated: result.duplicated,
        enqueued: result.enqueued,
        event_type: event_type.to_string(),
        event_log_id: result.event_log.as_ref().map(|e| e.id),
        issue_id: result.issue.as_ref().map(|i| i.id),
        dedupe_key: result.dedupe_key,
    };

    if json {
        output::print_json(&out)?;
    } else if !out.engaged {
        println!("dropped: self-triggered event");
    } else if out.duplicated {
        println!("duplicate: event already logged (dedupe key {})", out.dedupe_key.as_deref().unwrap_or(""));
    } else {
        println!(
            "ingested {} as event {} on issue {}{}",
            out.event_type,
            out.event_log_id.unwrap_or(0),
            out.issue_id.unwrap_or(0),
            if out.enqueued { ", enqueued" } else { ", issue busy" }
        );
    }
    Ok(())
}

fn read_payload(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn parse_headers(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .with_context(|| format!("header '{pair}' is not in K=V form"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
