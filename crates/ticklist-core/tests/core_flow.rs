use std::fs;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::tempdir;
use ticklist_core::reminder::ReminderScanner;
use ticklist_core::render::HtmlSurface;
use ticklist_core::session::{Event, Session};
use ticklist_core::storage::FileKvStore;
use ticklist_core::store::TaskStore;
use ticklist_core::task::Priority;
use ticklist_core::view::{Filter, project};

#[test]
fn file_store_survives_reopen_and_keeps_storage_shape() {
    let temp = tempdir().expect("tempdir");
    let deadline = NaiveDate::from_ymd_opt(2099, 1, 1).and_then(|d| d.and_hms_opt(10, 0, 0));

    let ids = {
        let kv = FileKvStore::open(temp.path()).expect("open store");
        let mut store = TaskStore::open(kv, "todo.tasks.v2");
        let report = store
            .add("Write report", Priority::High, None)
            .expect("add")
            .expect("id");
        let call = store
            .add("Call Mom", Priority::Low, deadline)
            .expect("add")
            .expect("id");
        store.toggle_complete(&report).expect("toggle");
        (report, call)
    };

    let raw = fs::read_to_string(temp.path().join("todo.tasks.v2.json")).expect("read file");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(json[0]["text"], "Call Mom");
    assert_eq!(json[0]["deadline"], "2099-01-01T10:00");
    assert_eq!(json[1]["priority"], "High");
    assert_eq!(json[1]["deadline"], serde_json::Value::Null);
    assert_eq!(json[1]["completed"], true);

    let kv = FileKvStore::open(temp.path()).expect("reopen store");
    let store = TaskStore::open(kv, "todo.tasks.v2");
    let reopened: Vec<&str> = store.tasks().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(reopened, vec![ids.1.as_str(), ids.0.as_str()]);

    let view = project(store.tasks(), Filter::Completed, "");
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].text, "Write report");
    assert_eq!(view.summary.to_string(), "1 active • 2 total");
}

#[test]
fn corrupt_file_starts_empty_and_is_replaced_on_first_write() {
    let temp = tempdir().expect("tempdir");
    fs::write(temp.path().join("todo.tasks.v2.json"), "[{\"id\":").expect("write corrupt");

    let kv = FileKvStore::open(temp.path()).expect("open store");
    let mut store = TaskStore::open(kv, "todo.tasks.v2");
    assert!(store.tasks().is_empty());

    store.add("fresh", Priority::Low, None).expect("add");
    let raw = fs::read_to_string(temp.path().join("todo.tasks.v2.json")).expect("read file");
    assert!(raw.contains("\"fresh\""));
}

#[test]
fn session_over_file_store_drags_and_persists() {
    let temp = tempdir().expect("tempdir");
    let kv = FileKvStore::open(temp.path()).expect("open store");
    let store = TaskStore::open(kv, "work").with_seed(5);
    let mut session = Session::new(
        store,
        HtmlSurface::new("%Y-%m-%d %H:%M"),
        ReminderScanner::new(Duration::from_secs(60), 5, false),
    );
    session.start().expect("start");

    for text in ["C", "B", "A"] {
        session
            .handle(Event::Add {
                text: text.to_string(),
                priority: Priority::Medium,
                deadline: None,
            })
            .expect("add");
    }
    let c = session.store().tasks()[2].id.clone();

    session.handle(Event::DragStart { id: c }).expect("drag start");
    session.handle(Event::DragTo { index: 0 }).expect("drag");
    session.handle(Event::DragEnd).expect("drag end");

    let kv = FileKvStore::open(temp.path()).expect("reopen");
    let reloaded = TaskStore::open(kv, "work");
    let texts: Vec<&str> = reloaded.tasks().iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["C", "A", "B"]);
}
