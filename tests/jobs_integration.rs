//! End-to-end job tests against mock E-utilities and FDA endpoints.

use std::time::Duration;

use trialscan_core::jobs::{Job, build_client};
use trialscan_core::{
    CancellationToken, PipelineConfig, QueryBuilder, RecordStatus, read_table, write_rows,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn test_config(server: &MockServer) -> PipelineConfig {
    PipelineConfig {
        email: Some("qa@example.org".to_string()),
        eutils_base_url: server.uri(),
        fda_page_url: format!("{}/pmn.cfm", server.uri()),
        ncbi_interval: Duration::from_millis(5),
        page_interval: Duration::from_millis(5),
        max_attempts: 2,
        base_backoff: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

async fn mount_body(server: &MockServer, script: &str, key: &str, value: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(script))
        .and(query_param(key, value))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_literature_job_end_to_end() {
    let server = require_mock_server!();
    let config = test_config(&server);

    let term = QueryBuilder::from_config(&config)
        .build("Impella®", Some("Abiomed"))
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .and(query_param("db", "pubmed"))
        .and(query_param("term", term.expression()))
        .and(query_param("retmax", "1"))
        .and(query_param("retmode", "json"))
        .and(query_param("email", "qa@example.org"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult":{"count":"12","retmax":"1","idlist":["111"]}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    mount_body(
        &server,
        "/esummary.fcgi",
        "id",
        "111",
        r#"{"result":{"uids":["111"],"111":{"uid":"111","sortfirstauthor":"Smith J","title":"Outcomes after support."}}}"#,
    )
    .await;

    let table = read_table(
        "Device,Company\nImpella®,Abiomed\n,Nobody\n".as_bytes(),
        b',',
    )
    .unwrap();
    let job = Job::Literature {
        device_column: "Device".to_string(),
        company_column: Some("Company".to_string()),
    };
    let client = build_client(&config).unwrap();
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline
        .run(table.records, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 2);
    let first = &report.rows[0];
    assert_eq!(first.status, RecordStatus::Found);
    assert_eq!(first.found, 1);
    assert_eq!(first.identifiers, vec!["PMID-111"]);
    assert_eq!(first.joined_text, "PMID-111: Smith J: Outcomes after support.");
    assert_eq!(first.key_fields, vec!["Impella®", "Abiomed"]);

    let second = &report.rows[1];
    assert_eq!(second.status, RecordStatus::NotFound);
    assert_eq!(client.stats().requests(), 2);
}

#[tokio::test]
async fn test_trial_chain_job_end_to_end() {
    let server = require_mock_server!();
    let config = test_config(&server);

    mount_body(
        &server,
        "/pmn.cfm",
        "ID",
        "K111111",
        r#"<html><body><a href=" https://clinicaltrials.gov/study/NCT01234567 ">Trial</a></body></html>"#,
    )
    .await;
    mount_body(
        &server,
        "/pmn.cfm",
        "ID",
        "K222222",
        "<html><body>No clinical data.</body></html>",
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .and(query_param("term", "NCT01234567[si]"))
        .and(query_param("retmax", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"esearchresult":{"count":"2","idlist":["1","2"]}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    mount_body(
        &server,
        "/efetch.fcgi",
        "id",
        "1",
        "<PubmedArticleSet><AbstractText>Alpha
  beta.</AbstractText></PubmedArticleSet>",
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .and(query_param("id", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let table = read_table("ID\nK111111\nK222222\n".as_bytes(), b',').unwrap();
    let job = Job::TrialChain {
        id_column: "ID".to_string(),
    };
    let client = build_client(&config).unwrap();
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline
        .run(table.records, CancellationToken::new())
        .await
        .unwrap();

    let first = &report.rows[0];
    assert_eq!(first.status, RecordStatus::Error);
    assert_eq!(first.found, 0);
    assert_eq!(
        first.identifiers,
        vec![
            "https://clinicaltrials.gov/study/NCT01234567",
            "PMID-1",
            "PMID-2"
        ]
    );
    assert_eq!(first.joined_text, "PMID-1: Alpha beta. │ PMID-2: ERROR: HTTP 500");

    let second = &report.rows[1];
    assert_eq!(second.status, RecordStatus::NotFound);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.not_found, 1);

    let mut out = Vec::new();
    write_rows(&mut out, pipeline.key_columns(), &report.rows, b';').unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("ID;status;found;identifiers;joined_text\n"));
    assert!(text.contains("K222222;not_found;0;;"));
}

#[tokio::test]
async fn test_trial_links_job_builds_url_from_page_text() {
    let server = require_mock_server!();
    let config = PipelineConfig {
        email: None,
        ..test_config(&server)
    };

    mount_body(
        &server,
        "/pmn.cfm",
        "ID",
        "K333333",
        "<html><body><table><tr><td>NCT87654321</td></tr></table></body></html>",
    )
    .await;

    let table = read_table("ID\nK333333\n".as_bytes(), b',').unwrap();
    let job = Job::TrialLinks {
        id_column: "ID".to_string(),
    };
    config.validate(job.needs_contact()).unwrap();
    let client = build_client(&config).unwrap();
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline
        .run(table.records, CancellationToken::new())
        .await
        .unwrap();

    let row = &report.rows[0];
    assert_eq!(row.status, RecordStatus::Found);
    assert_eq!(row.found, 1);
    assert_eq!(
        row.identifiers,
        vec!["https://www.clinicaltrials.gov/study/NCT87654321"]
    );
    assert!(row.joined_text.is_empty());
}

#[tokio::test]
async fn test_trial_abstracts_job_seeds_from_url_column() {
    let server = require_mock_server!();
    let config = test_config(&server);

    mount_body(
        &server,
        "/esearch.fcgi",
        "term",
        "NCT00000042[si]",
        r#"{"esearchresult":{"count":"0","idlist":[]}}"#,
    )
    .await;

    let table = read_table(
        "ID,ctgov_url\nK1,https://clinicaltrials.gov/ct2/show/NCT00000042\nK2,not a trial\n".as_bytes(),
        b',',
    )
    .unwrap();
    let job = Job::TrialAbstracts {
        id_column: "ID".to_string(),
        url_column: "ctgov_url".to_string(),
    };
    let client = build_client(&config).unwrap();
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline
        .run(table.records, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.rows.iter().all(|r| r.status == RecordStatus::NotFound));
    assert_eq!(client.stats().requests(), 1, "K2 has no trial id and sends nothing");
}

#[tokio::test]
async fn test_forbidden_fda_page_stays_with_its_record() {
    let server = require_mock_server!();
    let config = test_config(&server);

    Mock::given(method("GET"))
        .and(path("/pmn.cfm"))
        .and(query_param("ID", "K1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    mount_body(
        &server,
        "/pmn.cfm",
        "ID",
        "K2",
        "<html><body><p>Study NCT12345678</p></body></html>",
    )
    .await;

    let table = read_table("ID\nK1\nK2\nK2\n".as_bytes(), b',').unwrap();
    let job = Job::TrialLinks {
        id_column: "ID".to_string(),
    };
    let cancel = CancellationToken::new();
    let client = build_client(&config)
        .unwrap()
        .with_cancellation(cancel.clone());
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline.run(table.records, cancel.clone()).await.unwrap();

    assert!(!report.cancelled);
    assert!(!cancel.is_cancelled());
    assert_eq!(report.rows[0].status, RecordStatus::Error);
    assert_eq!(report.rows[0].joined_text, "ERROR: HTTP 403");
    for row in &report.rows[1..] {
        assert_eq!(row.status, RecordStatus::Found);
        assert_eq!(
            row.identifiers,
            vec!["https://www.clinicaltrials.gov/study/NCT12345678"]
        );
    }
}

#[tokio::test]
async fn test_rejected_api_key_cancels_the_run() {
    let server = require_mock_server!();
    let config = PipelineConfig {
        concurrency: 1,
        ..test_config(&server)
    };

    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let table = read_table(
        "ID,ctgov_url\nK1,NCT00000001\nK2,NCT00000002\n".as_bytes(),
        b',',
    )
    .unwrap();
    let job = Job::TrialAbstracts {
        id_column: "ID".to_string(),
        url_column: "ctgov_url".to_string(),
    };
    let cancel = CancellationToken::new();
    let client = build_client(&config)
        .unwrap()
        .with_cancellation(cancel.clone());
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline.run(table.records, cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.rows[0].status, RecordStatus::Error);
    assert_eq!(report.rows[0].joined_text, "ERROR: HTTP 401");
    assert_eq!(report.rows[1].status, RecordStatus::Cancelled);
    assert_eq!(client.stats().requests(), 1);
}

#[tokio::test]
async fn test_unreadable_body_is_not_found_and_counted() {
    let server = require_mock_server!();
    let config = test_config(&server);

    mount_body(
        &server,
        "/esearch.fcgi",
        "term",
        "NCT00000042[si]",
        "<html>Service temporarily unavailable</html>",
    )
    .await;

    let table = read_table("ID,ctgov_url\nK1,NCT00000042\n".as_bytes(), b',').unwrap();
    let job = Job::TrialAbstracts {
        id_column: "ID".to_string(),
        url_column: "ctgov_url".to_string(),
    };
    let client = build_client(&config).unwrap();
    let pipeline = job.build_pipeline(&config, &client).unwrap();

    let report = pipeline
        .run(table.records, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows[0].status, RecordStatus::NotFound);
    assert_eq!(client.stats().unreadable(), 1);
    assert_eq!(client.stats().failures(), 0);
}
