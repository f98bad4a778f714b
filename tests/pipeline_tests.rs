//! End-to-end pipeline tests: notifications in, files and reports out.
//!
//! The remote service is replaced by an in-memory transport answering by
//! (token, content, first form or field).

use anyhow::Result;
use async_trait::async_trait;
use redcapfs::config::Config;
use redcapfs::error::TransportError;
use redcapfs::router::sentinel_path;
use redcapfs::{
    AppContext, Credentials, DataClient, DirReady, EventKind, EventRouter, ExportReport,
    ExportStatus, Record, Transport,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct FakeRedcap {
    responses: HashMap<(String, String, String), String>,
    requests: Mutex<Vec<Vec<(String, String)>>>,
}

fn param<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

impl FakeRedcap {
    fn respond(mut self, token: &str, content: &str, selector: &str, body: &str) -> Self {
        self.responses.insert(
            (token.to_string(), content.to_string(), selector.to_string()),
            body.to_string(),
        );
        self
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeRedcap {
    async fn post_form(
        &self,
        _url: &str,
        form: &[(String, String)],
    ) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(form.to_vec());
        let token = param(form, "token").unwrap_or_default();
        let content = param(form, "content").unwrap_or_default();
        let selector = param(form, "forms[0]")
            .or_else(|| param(form, "fields[0]"))
            .unwrap_or_default();

        let key = |s: &str| (token.to_string(), content.to_string(), s.to_string());
        self.responses
            .get(&key(selector))
            .or_else(|| self.responses.get(&key("")))
            .cloned()
            .ok_or_else(|| TransportError::Remote(format!("no data for {}", selector)))
    }
}

const METADATA: &str = r#"[
    {"field_name": "id_redcap", "form_name": "enrollment", "field_type": "text"},
    {"field_name": "age", "form_name": "demographics", "field_type": "text"},
    {"field_name": "sex", "form_name": "demographics", "field_type": "radio"}
]"#;

const DEMOGRAPHICS_DICTIONARY: &str = r#"[
    {"field_name": "age", "form_name": "demographics", "field_type": "text"},
    {"field_name": "sex", "form_name": "demographics", "field_type": "radio"}
]"#;

const MAPPING: &str = r#"[
    {"arm_num": 1, "unique_event_name": "baseline_year_1_arm_1", "form": "demographics"},
    {"arm_num": 1, "unique_event_name": "baseline_year_1_arm_1", "form": "enrollment"},
    {"arm_num": 1, "unique_event_name": "1_year_follow_up_y_arm_1", "form": "demographics"}
]"#;

fn site_a() -> FakeRedcap {
    FakeRedcap::default()
        .respond("A", "metadata", "", METADATA)
        .respond("A", "metadata", "demographics", DEMOGRAPHICS_DICTIONARY)
        .respond("A", "formEventMapping", "", MAPPING)
        .respond(
            "A",
            "record",
            "enroll_total",
            r#"[
                {"id_redcap": "P1", "enroll_total___1": "1", "cp_timestamp_v2": "2022-03-04 10:00", "redcap_data_access_group": "ucsd_de"},
                {"id_redcap": "P2", "enroll_total___1": "1", "cp_timestamp_v2": "2022-04-01 09:30", "redcap_data_access_group": "ucsd_de"},
                {"id_redcap": "P9", "enroll_total___1": "0", "cp_timestamp_v2": "2022-03-01 09:30", "redcap_data_access_group": "ucsd_de"}
            ]"#,
        )
        .respond(
            "A",
            "record",
            "demographics",
            r#"[
                {"id_redcap": "P1", "redcap_event_name": "baseline_year_1_arm_1", "age": "10", "sex": "F", "enroll_total___1": "1"},
                {"id_redcap": "P2", "redcap_event_name": "baseline_year_1_arm_1", "age": "11", "sex": "M", "enroll_total___1": "1"},
                {"id_redcap": "P9", "redcap_event_name": "baseline_year_1_arm_1", "age": "12", "sex": "M", "enroll_total___1": "0"}
            ]"#,
        )
        .respond(
            "A",
            "record",
            "age",
            r#"[
                {"id_redcap": "P1", "age": "10", "enroll_total___1": "1"},
                {"id_redcap": "P2", "age": "11", "enroll_total___1": "1"}
            ]"#,
        )
        .respond(
            "A",
            "record",
            "enrollment",
            r#"[{"id_redcap": "P1", "enroll_total___1": "1"}]"#,
        )
}

fn both_sites() -> FakeRedcap {
    site_a()
        .respond(
            "B",
            "record",
            "enroll_total",
            r#"[{"id_redcap": "P3", "enroll_total___1": "1", "cp_timestamp_v2": "2022-03-20 08:00", "redcap_data_access_group": "ohsu_de"}]"#,
        )
        .respond(
            "B",
            "record",
            "demographics",
            r#"[{"id_redcap": "P3", "redcap_event_name": "baseline_year_1_arm_1", "age": "9", "sex": "F", "enroll_total___1": "1"}]"#,
        )
        .respond(
            "B",
            "record",
            "age",
            r#"[{"id_redcap": "P3", "age": "9", "enroll_total___1": "1"}]"#,
        )
}

struct Mount {
    _temp: TempDir,
    root: PathBuf,
    router: EventRouter,
    reports: UnboundedReceiver<ExportReport>,
    transport: Arc<FakeRedcap>,
}

impl Mount {
    async fn new(transport: FakeRedcap, tokens: &[&str], config: Config) -> Result<Self> {
        let temp = TempDir::new()?;
        let root = temp.path().canonicalize()?;
        let transport = Arc::new(transport);
        let credentials = Credentials {
            base_url: "https://redcap.test/api/".to_string(),
            access_tokens: tokens.iter().map(|t| t.to_string()).collect(),
        };
        let client = DataClient::new(transport.clone(), credentials, config.study.clone());
        let ctx = AppContext::load(config, client, root.clone()).await;
        let (router, reports) = EventRouter::new(Arc::new(ctx))?;
        Ok(Self {
            _temp: temp,
            root,
            router,
            reports,
            transport,
        })
    }

    /// Wait for all pipelines and collect their reports.
    async fn settle(&mut self) -> Vec<ExportReport> {
        self.router.shutdown().await;
        let mut out = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            out.push(report);
        }
        out
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

fn read_json(path: &Path) -> Result<Vec<Record>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn ids(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r["id_redcap"].as_str()).collect()
}

fn status_of<'a>(reports: &'a [ExportReport], path: &Path) -> Option<&'a ExportStatus> {
    reports.iter().find(|r| r.target == path).map(|r| &r.status)
}

#[tokio::test]
async fn test_instrument_export_with_data_dictionary() -> Result<()> {
    let mut mount = Mount::new(both_sites(), &["A", "B"], Config::default()).await?;
    let target = mount.path("demographics.csv");

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    let text = fs::read_to_string(&target)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "id_redcap,redcap_event_name,age,sex,enroll_total___1"
    );
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("P1,"));
    assert!(lines[3].starts_with("P3,"));

    let companion = mount.path("demographics_datadictionary.csv");
    let dictionary = fs::read_to_string(&companion)?;
    assert_eq!(dictionary.lines().count(), 3);
    assert!(dictionary.lines().nth(1).unwrap().starts_with("age,"));

    assert_eq!(
        status_of(&reports, &target),
        Some(&ExportStatus::Written { rows: 3 })
    );
    assert!(status_of(&reports, &companion).is_some());
    Ok(())
}

#[tokio::test]
async fn test_measure_filtered_by_site_and_month() -> Result<()> {
    let mut mount = Mount::new(both_sites(), &["A", "B"], Config::default()).await?;
    fs::create_dir_all(mount.path("ucsd/Mar 2022"))?;
    fs::create_dir_all(mount.path("Mar 2022"))?;

    mount
        .router
        .notify(mount.path("ucsd/Mar 2022/age.json"), EventKind::Create);
    mount
        .router
        .notify(mount.path("Mar 2022/age.json"), EventKind::Rename);
    mount.settle().await;

    let site_and_month = read_json(&mount.path("ucsd/Mar 2022/age.json"))?;
    assert_eq!(ids(&site_and_month), vec!["P1"]);

    let month_only = read_json(&mount.path("Mar 2022/age.json"))?;
    assert_eq!(ids(&month_only), vec!["P1", "P3"]);
    Ok(())
}

#[tokio::test]
async fn test_mount_root_names_are_not_filters() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path().join("Mar 2022").join("UCSD");
    fs::create_dir_all(&root)?;
    let root = root.canonicalize()?;

    let transport = Arc::new(both_sites());
    let credentials = Credentials {
        base_url: "https://redcap.test/api/".to_string(),
        access_tokens: vec!["A".to_string(), "B".to_string()],
    };
    let config = Config::default();
    let client = DataClient::new(transport, credentials, config.study.clone());
    let ctx = AppContext::load(config, client, root.clone()).await;
    let (router, _reports) = EventRouter::new(Arc::new(ctx))?;

    router.notify(root.join("age.json"), EventKind::Create);
    router.shutdown().await;

    assert_eq!(read_json(&root.join("age.json"))?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_data_dictionary_reserved_name() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let requests_after_startup = mount.transport.request_count();
    let target = mount.path("DataDictionary.csv");

    mount.router.notify(&target, EventKind::Create);
    mount.settle().await;

    let text = fs::read_to_string(&target)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "field_name,form_name,field_type");
    assert_eq!(lines[1], "id_redcap,enrollment,text");
    assert_eq!(lines.len(), 4);
    assert_eq!(mount.transport.request_count(), requests_after_startup);
    Ok(())
}

#[tokio::test]
async fn test_unknown_name_leaves_sentinel_only() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let target = mount.path("not_a_thing.json");

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    assert!(!target.exists());
    match status_of(&reports, &target) {
        Some(ExportStatus::Failed { error }) => {
            assert!(error.contains("neither an instrument nor a measure"))
        }
        other => panic!("unexpected status {:?}", other),
    }
    let sentinel = fs::read_to_string(sentinel_path(&target))?;
    assert!(sentinel.contains("not_a_thing"));
    Ok(())
}

#[tokio::test]
async fn test_sentinels_can_be_disabled() -> Result<()> {
    let mut config = Config::default();
    config.router.sentinel_files = false;
    let mut mount = Mount::new(site_a(), &["A"], config).await?;
    let target = mount.path("not_a_thing.json");

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    assert!(!reports[0].is_success());
    assert!(!sentinel_path(&target).exists());
    Ok(())
}

#[tokio::test]
async fn test_single_row_csv_is_rejected() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let target = mount.path("enrollment.csv");

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    assert!(!target.exists());
    assert!(matches!(
        status_of(&reports, &target),
        Some(ExportStatus::Failed { .. })
    ));
    assert!(sentinel_path(&target).exists());
    Ok(())
}

#[tokio::test]
async fn test_success_clears_stale_sentinel() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let target = mount.path("age.json");
    fs::write(sentinel_path(&target), "{}")?;

    mount.router.notify(&target, EventKind::Create);
    mount.settle().await;

    assert!(target.exists());
    assert!(!sentinel_path(&target).exists());
    Ok(())
}

#[tokio::test]
async fn test_mkdir_waits_for_acknowledgement() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let dir = mount.path("baseline_year_1_arm_1");

    let (ack, ready) = DirReady::pending();
    mount.router.notify(&dir, EventKind::Mkdir(ready));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!dir.join("demographics.json").exists());
    assert_eq!(mount.router.in_flight(), 1);

    fs::create_dir(&dir)?;
    ack.ack();
    let reports = mount.settle().await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(ExportReport::is_success));
    assert_eq!(ids(&read_json(&dir.join("demographics.json"))?), vec!["P1", "P2"]);
    assert!(dir.join("enrollment.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_mkdir_without_acknowledgement_fails() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let dir = mount.path("1_year_follow_up_y_arm_1");

    let (ack, ready) = DirReady::pending();
    mount.router.notify(&dir, EventKind::Mkdir(ready));
    drop(ack);
    let reports = mount.settle().await;

    assert_eq!(reports.len(), 1);
    match &reports[0].status {
        ExportStatus::Failed { error } => assert!(error.contains("not materialized")),
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_mkdir_for_unmapped_event_does_nothing() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let dir = mount.path("scratch");
    fs::create_dir(&dir)?;

    mount
        .router
        .notify(&dir, EventKind::Mkdir(DirReady::materialized()));
    assert!(mount.settle().await.is_empty());
    assert_eq!(fs::read_dir(&dir)?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_own_writes_do_not_retrigger() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let target = mount.path("age.json");

    mount.router.notify(&target, EventKind::Create);
    mount.settle().await;
    let requests = mount.transport.request_count();

    mount.router.notify(&target, EventKind::Rename);
    assert!(mount.settle().await.is_empty());
    assert_eq!(mount.transport.request_count(), requests);
    Ok(())
}

#[tokio::test]
async fn test_recreate_after_delete_exports_again() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;
    let target = mount.path("age.json");

    mount.router.notify(&target, EventKind::Create);
    assert_eq!(mount.settle().await.len(), 1);
    fs::remove_file(&target)?;

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert_eq!(ids(&read_json(&target)?), vec!["P1"]);
    Ok(())
}

#[tokio::test]
async fn test_parent_components_stay_inside_mount() -> Result<()> {
    let temp = TempDir::new()?;
    let base = temp.path().canonicalize()?;
    let root = base.join("mnt");
    fs::create_dir_all(root.join("ucsd"))?;

    let transport = Arc::new(site_a());
    let credentials = Credentials {
        base_url: "https://redcap.test/api/".to_string(),
        access_tokens: vec!["A".to_string()],
    };
    let config = Config::default();
    let client = DataClient::new(transport, credentials, config.study.clone());
    let ctx = AppContext::load(config, client, root.clone()).await;
    let (router, mut reports) = EventRouter::new(Arc::new(ctx))?;

    router.notify("../age.json", EventKind::Create);
    router.notify("ucsd/../../age.json", EventKind::Rename);
    router.notify(root.join("../age.json"), EventKind::Create);
    router.notify("../outside", EventKind::Mkdir(DirReady::materialized()));
    assert_eq!(router.in_flight(), 0);
    router.shutdown().await;

    assert!(!base.join("age.json").exists());
    assert!(!sentinel_path(&base.join("age.json")).exists());
    assert!(reports.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_ignored_paths() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;

    mount.router.notify(mount.path("notes.txt"), EventKind::Create);
    mount.router.notify(mount.path("age.JSON"), EventKind::Create);
    mount.router.notify(mount.path("age.json.err"), EventKind::Create);
    mount.router.notify("/somewhere/else/age.json", EventKind::Create);
    mount.router.notify(mount.path("age.json"), EventKind::Other);

    assert_eq!(mount.router.in_flight(), 0);
    assert!(mount.settle().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_distinct_targets() -> Result<()> {
    let mut mount = Mount::new(both_sites(), &["A", "B"], Config::default()).await?;
    let names = ["age.json", "demographics.json", "DataDictionary.json", "EventMapping.json"];

    for name in names {
        mount.router.notify(mount.path(name), EventKind::Create);
    }
    let reports = mount.settle().await;

    // demographics also writes its companion
    assert_eq!(reports.len(), names.len() + 1);
    assert!(reports.iter().all(ExportReport::is_success));
    assert_eq!(read_json(&mount.path("age.json"))?.len(), 3);
    assert_eq!(read_json(&mount.path("EventMapping.json"))?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_same_target_last_writer_wins() -> Result<()> {
    let mut mount = Mount::new(both_sites(), &["A", "B"], Config::default()).await?;
    let target = mount.path("age.json");

    for _ in 0..4 {
        mount.router.notify(&target, EventKind::Create);
    }
    let reports = mount.settle().await;

    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(ExportReport::is_success));
    // Whichever rename landed last, the file is one complete export
    assert_eq!(ids(&read_json(&target)?), vec!["P1", "P2", "P3"]);
    let leftovers = fs::read_dir(&mount.root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[tokio::test]
async fn test_startup_files() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A"], Config::default()).await?;

    mount.router.write_startup_files().await;
    let reports = mount.settle().await;

    assert_eq!(reports.len(), 2);
    let dictionary = read_json(&mount.path("DataDictionary.json"))?;
    assert_eq!(dictionary.len(), 3);
    let mapping = read_json(&mount.path("EventMapping.json"))?;
    let keys: Vec<&str> = mapping[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["unique_event_name", "form"]);
    Ok(())
}

#[tokio::test]
async fn test_zero_tokens_exports_empty_json() -> Result<()> {
    let mut mount = Mount::new(FakeRedcap::default(), &[], Config::default()).await?;
    assert_eq!(mount.transport.request_count(), 0);

    mount.router.write_startup_files().await;
    let reports = mount.settle().await;
    assert!(reports.iter().all(ExportReport::is_success));
    assert!(read_json(&mount.path("DataDictionary.json"))?.is_empty());

    // With no metadata every name is unknown
    let mut mount = Mount::new(FakeRedcap::default(), &[], Config::default()).await?;
    mount.router.notify(mount.path("age.json"), EventKind::Create);
    let reports = mount.settle().await;
    assert!(!reports[0].is_success());
    assert_eq!(mount.transport.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_revoked_token_fails_the_export() -> Result<()> {
    let mut mount = Mount::new(site_a(), &["A", "REVOKED"], Config::default()).await?;
    let target = mount.path("age.json");

    mount.router.notify(&target, EventKind::Create);
    let reports = mount.settle().await;

    assert!(!target.exists());
    match status_of(&reports, &target) {
        Some(ExportStatus::Failed { error }) => assert!(error.contains("no data for age")),
        other => panic!("unexpected status {:?}", other),
    }
    Ok(())
}
