use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;

use scanpipe::index::ScanFault;
use scanpipe::server::{Profile, RequestOptions, ServerSettings, WriterConfig};
use scanpipe::{QueryError, State};

#[path = "../common/mod.rs"]
mod common;
use common::{create_test_index, expected_keys, respond, scan_fetch_plan};

fn results(doc: &Value) -> Result<&Vec<Value>> {
    doc["results"].as_array().ok_or_else(|| anyhow!("results is not an array"))
}

/// resultCount and resultSize describe exactly what the results array holds
#[test]
fn test_metrics_match_results() -> Result<()> {
    let index = create_test_index(25);
    let (transport, request) = respond(
        &scan_fetch_plan(&index, None),
        ServerSettings::new(),
        RequestOptions::default(),
    );
    let doc = transport.document()?;
    let results = results(&doc)?;

    let size: usize = results
        .iter()
        .map(|r| serde_json::to_vec(r).map(|v| v.len()))
        .sum::<serde_json::Result<usize>>()?;
    assert_eq!(results.len(), 25);
    assert_eq!(doc["metrics"]["resultCount"], 25);
    assert_eq!(doc["metrics"]["resultSize"], size as u64);
    assert_eq!(request.result_size(), size as u64);
    assert_eq!(doc["status"], "success");
    assert_eq!(doc["requestID"], request.id());
    assert_eq!(transport.status(), Some(200));
    assert!(transport.is_closed());
    Ok(())
}

#[test]
fn test_chunked_scan_warns_once() -> Result<()> {
    let index = create_test_index(30);
    index.script_faults(vec![
        Some(ScanFault::TimeoutAfter(4)),
        Some(ScanFault::TimeoutAfter(4)),
        Some(ScanFault::TimeoutAfter(4)),
    ]);
    let (transport, _) = respond(
        &scan_fetch_plan(&index, None),
        ServerSettings::new(),
        RequestOptions::default(),
    );
    let doc = transport.document()?;

    assert_eq!(results(&doc)?.len(), 30);
    let warnings = doc["warnings"].as_array().ok_or_else(|| anyhow!("no warnings"))?;
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], QueryError::CHUNKED_SCAN);
    assert_eq!(doc["metrics"]["warningCount"], 1);
    assert_eq!(doc["status"], "success");
    Ok(())
}

#[test]
fn test_unrecoverable_timeout_renders_errors() -> Result<()> {
    let index = create_test_index(10);
    index.script_faults(vec![Some(ScanFault::TimeoutAfter(0))]);
    let (transport, _) = respond(
        &scan_fetch_plan(&index, None),
        ServerSettings::new(),
        RequestOptions::default(),
    );
    let doc = transport.document()?;

    assert!(results(&doc)?.is_empty());
    assert_eq!(doc["errors"][0]["code"], QueryError::INDEX_SCAN_TIMEOUT);
    assert_eq!(doc["status"], "errors");
    assert_eq!(doc["metrics"]["errorCount"], 1);
    Ok(())
}

/// A response a little over one buffer is sent in exactly two writes
#[test]
fn test_single_size_flush() -> Result<()> {
    let settings = ServerSettings::new().with_writer(WriterConfig {
        buffer_capacity: 1024,
        flush_interval: Duration::from_secs(60),
        pool_size: 2,
    });
    let index = create_test_index(60);
    let (transport, _) = respond(&scan_fetch_plan(&index, None), settings, RequestOptions::default());

    let recording = transport.recording();
    assert_eq!(recording.writes.len(), 2);
    assert!(recording.writes[0] > 1024);
    assert_eq!(recording.header_writes, 1);
    assert_eq!(recording.content_length, None);
    assert_eq!(results(&transport.document()?)?.len(), 60);
    Ok(())
}

#[test]
fn test_small_response_has_content_length() -> Result<()> {
    let index = create_test_index(3);
    let (transport, _) = respond(
        &scan_fetch_plan(&index, None),
        ServerSettings::new(),
        RequestOptions::default(),
    );
    let recording = transport.recording();
    assert_eq!(recording.writes.len(), 1);
    assert_eq!(recording.content_length, Some(recording.body.len()));
    Ok(())
}

#[test]
fn test_client_hang_up_closes_document() -> Result<()> {
    let index = create_test_index(5_000);
    index.set_entry_delay(Duration::from_micros(200));
    let plan = scan_fetch_plan(&index, None);

    let transport = scanpipe::server::RecordingTransport::new();
    let request = std::sync::Arc::new(scanpipe::Request::new(
        std::sync::Arc::new(ServerSettings::new()),
        RequestOptions::default(),
        Box::new(transport.clone()),
    ));
    let hang_up = {
        let transport = transport.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            transport.hang_up();
        })
    };
    scanpipe::server::execute(&request, &plan, Default::default(), None)?;
    hang_up.join().map_err(|_| anyhow!("hang up thread panicked"))?;

    assert_eq!(request.state(), State::Closed);
    let body = transport.body_string();
    assert!(body.contains("\n],\n\"status\": \"closed\""));
    let doc = transport.document()?;
    assert_eq!(doc["status"], "closed");
    assert_eq!(doc["metrics"]["resultCount"], results(&doc)?.len() as u64);
    assert!(index.entries_produced() < 5_000);
    Ok(())
}

#[test]
fn test_broken_transport_halts_results() -> Result<()> {
    let index = create_test_index(5_000);
    index.set_entry_delay(Duration::from_micros(200));
    let (transport, request) = {
        let transport = scanpipe::server::RecordingTransport::new();
        transport.disconnect();
        let request = std::sync::Arc::new(scanpipe::Request::new(
            std::sync::Arc::new(ServerSettings::new()),
            RequestOptions::default(),
            Box::new(transport.clone()),
        ));
        (transport, request)
    };
    scanpipe::server::execute(&request, &scan_fetch_plan(&index, None), Default::default(), None)?;

    assert_eq!(request.state(), State::Closed);
    assert!(transport.body().is_empty());
    assert!(index.entries_produced() < 5_000);
    Ok(())
}

#[test]
fn test_request_timeout() -> Result<()> {
    let index = create_test_index(5_000);
    index.set_entry_delay(Duration::from_micros(200));
    let options = RequestOptions {
        timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let (transport, request) = respond(&scan_fetch_plan(&index, None), ServerSettings::new(), options);
    let doc = transport.document()?;

    assert_eq!(request.state(), State::Timeout);
    assert_eq!(doc["status"], "timeout");
    assert_eq!(doc["errors"][0]["code"], QueryError::TIMEOUT);
    assert_eq!(doc["errors"][0]["msg"], "Timeout 20ms exceeded");
    Ok(())
}

#[test]
fn test_pretty_profile_with_timings() -> Result<()> {
    let index = create_test_index(8);
    let mut settings = ServerSettings::new();
    settings.pretty = true;
    settings.profile = Profile::Timings;
    let options = RequestOptions {
        client_context_id: Some("batch-7".into()),
        ..Default::default()
    };
    let (transport, _) = respond(&scan_fetch_plan(&index, Some(4)), settings, options);

    let body = transport.body_string();
    assert!(body.starts_with("{\n    \"requestID\": "));
    let doc = transport.document()?;
    let keys: Vec<String> = results(&doc)?
        .iter()
        .map(|r| format!("doc{:05}", r["seq"].as_u64().unwrap_or(u64::MAX)))
        .collect();
    assert_eq!(keys, expected_keys(0..4));
    assert_eq!(doc["clientContextID"], "batch-7");
    assert_eq!(doc["profile"]["phaseCounts"]["primaryScan"], 4);
    assert_eq!(doc["profile"]["phaseOperators"]["fetch"], 1);
    let timings = doc["profile"]["executionTimings"]
        .as_array()
        .ok_or_else(|| anyhow!("no execution timings"))?;
    assert_eq!(timings.len(), 4);
    assert_eq!(timings[0]["#operator"], "PrimaryScan3");
    assert_eq!(timings[3]["#operator"], "Stream");
    Ok(())
}
