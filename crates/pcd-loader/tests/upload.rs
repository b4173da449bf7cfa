//! Dataset uploads against a local stand-in for the instance REST API

use parking_lot::Mutex;
use pcd_loader::{DatasetUploader, InstanceAddress, InstanceClient, LoadError, LoaderSettings};
use pcd_test_utils::write_dataset;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

/// base64 of `Admin:admin`
const BASIC_AUTH: &str = "Basic QWRtaW46YWRtaW4=";
const IMPORT_PAGE: &str = r#"<html><head><meta name="form_token" content="tok42"/></head></html>"#;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Recorded {
    method: &'static str,
    path: String,
    body: String,
}

#[derive(Clone, Copy)]
struct Behaviour {
    import_page: &'static str,
    patient_status: u16,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            import_page: IMPORT_PAGE,
            patient_status: 201,
        }
    }
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn record(log: &Log, method: &'static str, path: impl Into<String>, body: impl Into<String>) {
    log.lock().push(Recorded {
        method,
        path: path.into(),
        body: body.into(),
    });
}

async fn spawn_instance(behaviour: Behaviour) -> (SocketAddr, Log) {
    let log: Log = Arc::default();
    let with_log = {
        let log = log.clone();
        warp::any().map(move || log.clone())
    };
    let auth = warp::header::exact("authorization", BASIC_AUTH);
    let patient_counter = Arc::new(AtomicUsize::new(0));

    let reachable = warp::head().and(warp::path::end()).map(warp::reply);

    let import_page = warp::get()
        .and(warp::path!("import" / "XWiki" / "XWikiPreferences"))
        .and(auth.clone())
        .map(move || warp::reply::html(behaviour.import_page));

    let upload = warp::post()
        .and(warp::path!("upload" / "XWiki" / "XWikiPreferences"))
        .and(auth.clone())
        .and(warp::body::bytes())
        .and(with_log.clone())
        .map(|body: warp::hyper::body::Bytes, log: Log| {
            record(&log, "POST", "/upload", String::from_utf8_lossy(&body));
            warp::reply::with_status(
                warp::reply::with_header(warp::reply(), "Location", "/import/XWiki/XWikiPreferences"),
                StatusCode::FOUND,
            )
        });

    let import = warp::post()
        .and(warp::path!("import" / "XWiki" / "XWikiPreferences"))
        .and(auth.clone())
        .and(warp::query::raw())
        .and(with_log.clone())
        .map(|query: String, log: Log| {
            record(&log, "POST", "/import", query);
            warp::reply()
        });

    let reindex = warp::get()
        .and(warp::path!("rest" / "patients" / "reindex"))
        .and(auth.clone())
        .and(with_log.clone())
        .map(|log: Log| {
            record(&log, "GET", "/rest/patients/reindex", "");
            warp::reply()
        });

    let create_patient = warp::post()
        .and(warp::path!("rest" / "patients"))
        .and(auth.clone())
        .and(warp::body::json())
        .and(with_log.clone())
        .map(move |body: Value, log: Log| {
            record(&log, "POST", "/rest/patients", body.to_string());
            let id = format!("P{:07}", patient_counter.fetch_add(1, Ordering::SeqCst) + 1);
            let status = StatusCode::from_u16(behaviour.patient_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warp::reply::with_status(
                warp::reply::with_header(
                    warp::reply(),
                    "Location",
                    format!("http://localhost:8080/rest/patients/{id}"),
                ),
                status,
            )
        });

    let consents = warp::put()
        .and(warp::path!("rest" / "patients" / String / "consents" / "assign"))
        .and(auth)
        .and(warp::body::json())
        .and(with_log)
        .map(|id: String, body: Value, log: Log| {
            record(&log, "PUT", format!("/rest/patients/{id}/consents/assign"), body.to_string());
            warp::reply()
        });

    let routes = reachable
        .or(import_page)
        .or(upload)
        .or(import)
        .or(reindex)
        .or(create_patient)
        .or(consents);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, log)
}

fn uploader(addr: SocketAddr, datasets: &Path) -> DatasetUploader {
    let settings = LoaderSettings::default().with_datasets_dir(datasets);
    let address = InstanceAddress::new(&addr.to_string(), false, settings.default_port);
    let client = InstanceClient::new(address, &settings).unwrap();
    DatasetUploader::new(client, settings)
}

fn requests(log: &Log, path_prefix: &str) -> Vec<Recorded> {
    log.lock()
        .iter()
        .filter(|r| r.path.starts_with(path_prefix))
        .cloned()
        .collect()
}

#[tokio::test]
async fn uploads_xar_patients_and_reindexes() {
    let root = tempfile::tempdir().unwrap();
    write_dataset(
        root.path(),
        "demo",
        &[
            ("P0000002.json", r#"{"external_id": "second"}"#),
            ("P0000001.json", r#"{"external_id": "first"}"#),
            ("Pbroken.json", "{not json"),
            ("F0000001.json", r#"{"family": true}"#),
        ],
        Some(&["package.xml", "data/P0000100.xml", "data/P0000101.xml"]),
    );
    let (addr, log) = spawn_instance(Behaviour::default()).await;

    let report = uploader(addr, root.path()).upload("demo").await.unwrap();

    assert_eq!(report.xar_pages, vec!["data.P0000100", "data.P0000101"]);
    assert_eq!(report.patients, vec!["P0000001", "P0000002"]);
    assert_eq!(report.invalid_files.len(), 1);
    assert!(report.reindexed);

    let upload = requests(&log, "/upload");
    assert_eq!(upload.len(), 1);
    assert!(upload[0].body.contains("name=\"form_token\""));
    assert!(upload[0].body.contains("tok42"));
    assert!(upload[0].body.contains("filename=\"dataset.xar\""));
    assert!(upload[0]
        .body
        .contains("/import/XWiki/XWikiPreferences?editor=globaladmin&section=Import"));

    let import = requests(&log, "/import");
    assert_eq!(
        import[0].body,
        "editor=globaladmin&section=Import&action=import&name=dataset.xar&historyStrategy=replace\
         &importAsBackup=false&ajax=1&language_data.P0000100:=&pages=data.P0000100:\
         &language_data.P0000101:=&pages=data.P0000101:"
    );

    let created = requests(&log, "/rest/patients");
    let posted: Vec<_> = created.iter().filter(|r| r.method == "POST").collect();
    assert_eq!(posted.len(), 2);
    assert_eq!(
        serde_json::from_str::<Value>(&posted[0].body).unwrap(),
        json!({"external_id": "first"})
    );

    let consents = requests(&log, "/rest/patients/P0000001/consents");
    assert_eq!(
        serde_json::from_str::<Value>(&consents[0].body).unwrap(),
        json!(["real", "genetic", "share_history", "share_images", "matching"])
    );

    let order: Vec<_> = log.lock().iter().map(|r| r.path.clone()).collect();
    assert_eq!(order.first().map(String::as_str), Some("/upload"));
    assert_eq!(order.last().map(String::as_str), Some("/rest/patients/reindex"));
}

#[tokio::test]
async fn dataset_without_xar_skips_import() {
    let root = tempfile::tempdir().unwrap();
    write_dataset(root.path(), "plain", &[("P1.json", "{}")], None);
    let (addr, log) = spawn_instance(Behaviour::default()).await;

    let report = uploader(addr, root.path()).upload("plain").await.unwrap();

    assert!(report.xar_pages.is_empty());
    assert_eq!(report.patients, vec!["P0000001"]);
    assert!(requests(&log, "/upload").is_empty());
    assert!(requests(&log, "/import").is_empty());
}

#[tokio::test]
async fn missing_dataset_fails_before_contacting_instance() {
    let root = tempfile::tempdir().unwrap();
    let (addr, log) = spawn_instance(Behaviour::default()).await;

    let err = uploader(addr, root.path()).upload("absent").await.unwrap_err();

    assert!(matches!(err, LoadError::MissingDataset(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn missing_form_token_stops_upload() {
    let root = tempfile::tempdir().unwrap();
    write_dataset(root.path(), "demo", &[("P1.json", "{}")], Some(&["data/P1.xml"]));
    let behaviour = Behaviour {
        import_page: "<html>login required</html>",
        ..Behaviour::default()
    };
    let (addr, log) = spawn_instance(behaviour).await;

    let err = uploader(addr, root.path()).upload("demo").await.unwrap_err();

    assert!(matches!(err, LoadError::MissingFormToken));
    assert_eq!(err.exit_code(), 6);
    assert!(requests(&log, "/rest/patients").is_empty());
}

#[tokio::test]
async fn rejected_patient_fails_with_status() {
    let root = tempfile::tempdir().unwrap();
    write_dataset(root.path(), "demo", &[("P1.json", "{}")], None);
    let behaviour = Behaviour {
        patient_status: 500,
        ..Behaviour::default()
    };
    let (addr, _log) = spawn_instance(behaviour).await;

    let err = uploader(addr, root.path()).upload("demo").await.unwrap_err();

    match &err {
        LoadError::PatientUpload { status, .. } => assert_eq!(*status, 500),
        other => panic!("expected PatientUpload, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
}
