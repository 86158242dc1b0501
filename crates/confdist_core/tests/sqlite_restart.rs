mod common;

use common::port;
use confdist_core::{ConfigService, CoreConfig, CoreError, Properties, RecordFilter};
use std::path::Path;

fn open(path: &Path) -> ConfigService {
    let config = CoreConfig {
        db_path: Some(path.to_path_buf()),
        ..CoreConfig::default()
    };
    ConfigService::from_config(&config).unwrap()
}

#[test]
fn records_and_factory_groups_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confdist.db");

    let member_identity = {
        let service = open(&path);
        service.update("app.http", port(8080)).unwrap();
        service.set_static_location("app.http", Some("loc-a")).unwrap();
        service.get_or_create("app.pending", None).unwrap();
        let member = service.create_factory_record("pool", None).unwrap();
        service.update_record(&member, port(5432)).unwrap();
        service.create_factory_record("pool", None).unwrap();
        service.flush();
        member.identity().to_string()
    };

    let service = open(&path);
    let http = service.record("app.http").unwrap();
    let visible = http.properties().unwrap();
    assert_eq!(visible.get("port").and_then(|v| v.as_i64()), Some(8080));
    assert_eq!(http.static_location().as_deref(), Some("loc-a"));
    assert!(http.dynamic_location().is_none());
    assert_eq!(http.modification_counter(), 1);

    let pending = service.record("app.pending").unwrap();
    assert!(pending.is_new());
    assert_eq!(pending.modification_counter(), 1);

    let members = service.factory_members("pool").unwrap();
    assert_eq!(members.len(), 1);
    assert!(members.contains(&member_identity));
    let member = service.record(&member_identity).unwrap();
    assert_eq!(member.factory_identity(), Some("pool"));

    let listed: Vec<String> = service
        .list_records(&RecordFilter::all())
        .iter()
        .map(|r| r.identity().to_string())
        .collect();
    assert_eq!(listed, vec!["app.http".to_string(), member_identity]);
}

#[test]
fn deleted_records_stay_deleted_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confdist.db");

    {
        let service = open(&path);
        service.update("app.http", port(1)).unwrap();
        service.update("app.db", port(2)).unwrap();
        service.delete("app.http").unwrap();
    }

    let service = open(&path);
    assert!(service.record("app.http").is_none());
    assert!(service.record("app.db").is_some());
}

#[test]
fn non_finite_numbers_never_reach_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confdist.db");

    {
        let service = open(&path);
        service.update("app.http", port(1)).unwrap();
        let err = service
            .update("app.http", Properties::new().with("ratio", f64::INFINITY))
            .expect_err("infinity cannot be stored");
        assert!(matches!(err, CoreError::InvalidProperty { .. }));
    }

    let service = open(&path);
    let http = service.record("app.http").unwrap();
    let visible = http.properties().unwrap();
    assert_eq!(visible.get("port").and_then(|v| v.as_i64()), Some(1));
    assert!(!visible.contains_key("ratio"));
}

#[test]
fn unreadable_row_is_skipped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confdist.db");

    {
        let service = open(&path);
        service.update("app.http", port(1)).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO config_records (identity, properties) VALUES ('app.bad', '{\"ratio\": null}');",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO config_records (identity, properties) VALUES ('app.garbled', 'not json');",
            [],
        )
        .unwrap();
    }

    let service = open(&path);
    assert!(service.record("app.http").is_some());
    assert!(service.record("app.bad").is_none());
    assert!(service.record("app.garbled").is_none());
}
