//! Integration tests for the pipeline using scripted in-memory stages.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use trialscan_core::pipeline::FieldSeed;
use trialscan_core::{
    CancellationToken, Extraction, ExternalIdentifier, IdentifierKind, InputRecord, LookupResult, LookupStage,
    Pipeline, RecordStatus, UpstreamError,
};

/// Scripted answer for one input.
#[derive(Debug, Clone)]
enum Reply {
    Ids(Vec<&'static str>),
    Text(&'static str),
    Nothing,
    Status(u16),
    Rejected(u16),
}

#[derive(Debug)]
struct ScriptedStage {
    name: &'static str,
    replies: HashMap<String, Reply>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    delay: fn(&str) -> Duration,
}

impl ScriptedStage {
    fn new(name: &'static str, replies: &[(&str, Reply)]) -> Arc<Self> {
        Self::with_delay(name, replies, |_| Duration::ZERO)
    }

    fn with_delay(
        name: &'static str,
        replies: &[(&str, Reply)],
        delay: fn(&str) -> Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: replies
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupStage for ScriptedStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn lookup(&self, input: &str) -> LookupResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(input.to_string());
        let delay = (self.delay)(input);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.replies.get(input).cloned().unwrap_or(Reply::Nothing) {
            Reply::Ids(ids) => LookupResult::from_extraction(Extraction {
                identifiers: ids
                    .into_iter()
                    .map(|id| {
                        let kind = if id.chars().all(|c| c.is_ascii_digit()) {
                            IdentifierKind::Pmid
                        } else {
                            IdentifierKind::TrialUrl
                        };
                        ExternalIdentifier::new(kind, id, self.name, "mock")
                    })
                    .collect(),
                fragments: Vec::new(),
            }),
            Reply::Text(text) => LookupResult::Found(Extraction {
                identifiers: Vec::new(),
                fragments: vec![text.to_string()],
            }),
            Reply::Nothing => LookupResult::NotFound,
            Reply::Status(status) => {
                LookupResult::Error(UpstreamError::http_status("https://mock/x", status))
            }
            Reply::Rejected(status) => LookupResult::Error(UpstreamError::credentials_rejected(
                "https://mock/x",
                status,
            )),
        }
    }
}

fn records(values: &[&str]) -> Vec<InputRecord> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            InputRecord::new(index, vec![("ID".to_string(), (*value).to_string())])
        })
        .collect()
}

fn pipeline(stages: Vec<Arc<dyn LookupStage>>, concurrency: usize) -> Pipeline {
    Pipeline::new(
        Arc::new(FieldSeed::new("ID")),
        stages,
        vec!["ID".to_string()],
        " │ ",
        concurrency,
    )
    .unwrap()
}

fn not_cancelled() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn test_zero_first_stage_ids_skips_later_stages() {
    let search = ScriptedStage::new("search", &[("A", Reply::Nothing)]);
    let abstracts = ScriptedStage::new("abstracts", &[]);
    let pipeline = pipeline(vec![search.clone(), abstracts.clone()], 1);

    let report = pipeline.run(records(&["A"]), not_cancelled()).await.unwrap();

    let row = &report.rows[0];
    assert_eq!(row.status, RecordStatus::NotFound);
    assert_eq!(row.found, 0);
    assert_eq!(row.joined_text, "");
    assert_eq!(search.calls(), 1);
    assert_eq!(abstracts.calls(), 0);
}

#[tokio::test]
async fn test_three_ids_yield_three_tagged_fragments_in_order() {
    let search = ScriptedStage::new("search", &[("A", Reply::Ids(vec!["30", "10", "20"]))]);
    let abstracts = ScriptedStage::new(
        "abstracts",
        &[
            ("10", Reply::Text("ten")),
            ("20", Reply::Text("twenty")),
            ("30", Reply::Text("thirty")),
        ],
    );
    let pipeline = pipeline(vec![search, abstracts], 1);

    let report = pipeline.run(records(&["A"]), not_cancelled()).await.unwrap();

    let row = &report.rows[0];
    assert_eq!(row.status, RecordStatus::Found);
    assert_eq!(row.found, 3);
    assert_eq!(row.identifiers, vec!["PMID-30", "PMID-10", "PMID-20"]);
    assert_eq!(
        row.joined_text,
        "PMID-30: thirty │ PMID-10: ten │ PMID-20: twenty"
    );
}

#[tokio::test]
async fn test_branch_error_keeps_siblings_and_marks_record() {
    let search = ScriptedStage::new("search", &[("A", Reply::Ids(vec!["1", "2", "3"]))]);
    let abstracts = ScriptedStage::new(
        "abstracts",
        &[
            ("1", Reply::Text("one")),
            ("2", Reply::Status(500)),
            ("3", Reply::Text("three")),
        ],
    );
    let pipeline = pipeline(vec![search, abstracts.clone()], 1);

    let report = pipeline.run(records(&["A"]), not_cancelled()).await.unwrap();

    let row = &report.rows[0];
    assert_eq!(row.status, RecordStatus::Error);
    assert_eq!(row.found, 0);
    assert_eq!(
        row.joined_text,
        "PMID-1: one │ PMID-2: ERROR: HTTP 500 │ PMID-3: three"
    );
    assert_eq!(abstracts.calls(), 3);
}

#[tokio::test]
async fn test_record_error_does_not_affect_other_records() {
    let search = ScriptedStage::new(
        "search",
        &[("A", Reply::Status(503)), ("B", Reply::Ids(vec!["7"]))],
    );
    let summary = ScriptedStage::new("summary", &[("7", Reply::Text("Doe A: Title"))]);
    let pipeline = pipeline(vec![search, summary], 2);

    let report = pipeline.run(records(&["A", "B"]), not_cancelled()).await.unwrap();

    assert_eq!(report.rows[0].status, RecordStatus::Error);
    assert_eq!(report.rows[0].joined_text, "ERROR: HTTP 503");
    assert_eq!(report.rows[1].status, RecordStatus::Found);
    assert_eq!(report.rows[1].joined_text, "PMID-7: Doe A: Title");
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.found, 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_output_order_matches_input_under_concurrency() {
    // Earlier records sleep longer, so they finish last.
    let replies: Vec<(String, Reply)> = (0..12)
        .map(|i| {
            let ids: Vec<&'static str> = ["1", "2", "3", "4"].into_iter().take(i % 4).collect();
            (format!("R{i}"), Reply::Ids(ids))
        })
        .collect();
    let replies_ref: Vec<(&str, Reply)> = replies
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    let search = ScriptedStage::with_delay("search", &replies_ref, |input| {
        let index: u64 = input.trim_start_matches('R').parse().unwrap_or(0);
        Duration::from_millis(5 * (12 - index))
    });
    let abstracts = ScriptedStage::new("abstracts", &[("1", Reply::Text("x"))]);
    let pipeline = pipeline(vec![search, abstracts], 4);

    let inputs: Vec<String> = (0..12).map(|i| format!("R{i}")).collect();
    let input_refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
    let report = pipeline
        .run(records(&input_refs), not_cancelled())
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 12);
    for (i, row) in report.rows.iter().enumerate() {
        assert_eq!(row.index, i);
        assert_eq!(row.key_fields, vec![format!("R{i}")]);
        assert_eq!(row.found, i % 4);
    }
}

#[tokio::test]
async fn test_blank_seed_is_not_found_without_requests() {
    let search = ScriptedStage::new("search", &[]);
    let pipeline = pipeline(vec![search.clone()], 1);

    let report = pipeline.run(records(&["  "]), not_cancelled()).await.unwrap();

    assert_eq!(report.rows[0].status, RecordStatus::NotFound);
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn test_pre_cancelled_run_emits_cancelled_rows_for_all_records() {
    let search = ScriptedStage::new("search", &[]);
    let pipeline = pipeline(vec![search.clone()], 2);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = pipeline
        .run(records(&["A", "B", "C"]), cancel)
        .await
        .unwrap();

    assert_eq!(report.rows.len(), 3);
    assert!(report.rows.iter().all(|r| r.status == RecordStatus::Cancelled));
    assert_eq!(report.summary.cancelled, 3);
    assert!(report.cancelled);
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn test_auth_failure_cancels_remaining_records() {
    let search = ScriptedStage::new(
        "search",
        &[
            ("A", Reply::Rejected(401)),
            ("B", Reply::Ids(vec!["1"])),
            ("C", Reply::Ids(vec!["2"])),
        ],
    );
    let pipeline = pipeline(vec![search.clone()], 1);

    let report = pipeline
        .run(records(&["A", "B", "C"]), not_cancelled())
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.rows.len(), 3);
    assert_eq!(report.rows[0].status, RecordStatus::Error);
    assert_eq!(report.rows[0].joined_text, "ERROR: HTTP 401");
    assert_eq!(report.rows[1].status, RecordStatus::Cancelled);
    assert_eq!(report.rows[2].status, RecordStatus::Cancelled);
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn test_forbidden_page_does_not_cancel_other_records() {
    let page = ScriptedStage::new(
        "fda-page",
        &[
            ("K1", Reply::Status(403)),
            ("K2", Reply::Ids(vec!["https://clinicaltrials.gov/study/NCT12345678"])),
        ],
    );
    let pipeline = pipeline(vec![page.clone()], 1);

    let report = pipeline
        .run(records(&["K1", "K2", "K2"]), not_cancelled())
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.rows[0].status, RecordStatus::Error);
    assert_eq!(report.rows[0].joined_text, "ERROR: HTTP 403");
    assert_eq!(report.rows[1].status, RecordStatus::Found);
    assert_eq!(report.rows[2].status, RecordStatus::Found);
    assert_eq!(page.calls(), 3);
}

#[tokio::test]
async fn test_three_stage_chain_tags_by_driving_identifier() {
    let page = ScriptedStage::new("fda-page", &[("K1", Reply::Ids(vec!["URL"]))]);
    let publications = ScriptedStage::new("trial-publications", &[("URL", Reply::Ids(vec!["5", "6"]))]);
    let abstracts = ScriptedStage::new(
        "abstracts",
        &[("5", Reply::Text("five")), ("6", Reply::Text("six"))],
    );
    let pipeline = pipeline(vec![page, publications.clone(), abstracts], 1);

    let report = pipeline.run(records(&["K1"]), not_cancelled()).await.unwrap();

    let row = &report.rows[0];
    assert_eq!(row.status, RecordStatus::Found);
    assert_eq!(row.found, 2);
    assert_eq!(row.identifiers, vec!["URL", "PMID-5", "PMID-6"]);
    assert_eq!(row.joined_text, "PMID-5: five │ PMID-6: six");
    assert_eq!(*publications.seen.lock().unwrap(), vec!["URL".to_string()]);
}

#[test]
fn test_pipeline_rejects_empty_stage_list() {
    let result = Pipeline::new(
        Arc::new(FieldSeed::new("ID")),
        Vec::new(),
        Vec::new(),
        " │ ",
        1,
    );
    assert!(result.is_err());
}
