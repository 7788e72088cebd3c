use stevedore_lib::engine::{EngineError, ExecuteOptions};
use stevedore_lib::events::PackageEventKind;
use stevedore_lib::operation::Operation;
use stevedore_lib::package::{Package, TYPE_METAPACKAGE};
use tokio_util::sync::CancellationToken;

use super::common::*;

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn post_events_fire_after_the_sub_batch_is_persisted() {
  let harness = Harness::new();
  let ops = vec![install(library("acme/a", "1.0.0")), install(library("acme/b", "1.0.0"))];
  let mut store = harness.store();

  harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap();

  let j = &harness.journal;
  assert_eq!(
    j.matching("event:"),
    strings(&[
      "event:pre-package-install:acme/a",
      "event:pre-package-install:acme/b",
      "event:post-package-install:acme/a",
      "event:post-package-install:acme/b",
    ])
  );
  assert!(j.position("event:pre-package-install:acme/a") < j.position("prepare:acme/a"));
  assert!(j.last_position("persist") < j.position("event:post-package-install:acme/a"));
}

#[tokio::test]
async fn installer_packages_flush_post_events_on_their_own() {
  let harness = Harness::new();
  let ops = vec![
    install(library("acme/a", "1.0.0")),
    install(plugin("acme/plugin")),
    install(library("acme/b", "1.0.0")),
  ];
  let mut store = harness.store();

  harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    harness.journal.matching("event:"),
    strings(&[
      "event:pre-package-install:acme/a",
      "event:post-package-install:acme/a",
      "event:pre-package-install:acme/plugin",
      "event:post-package-install:acme/plugin",
      "event:pre-package-install:acme/b",
      "event:post-package-install:acme/b",
    ])
  );
  // the plugin is active before anything after it is applied
  assert!(harness.journal.position("activate:acme/plugin") < harness.journal.position("prepare:acme/b"));
}

#[tokio::test]
async fn events_carry_the_run_context() {
  let harness = Harness::new();
  let ops = vec![install(metapackage("acme/meta")), install(library("acme/a", "1.0.0"))];
  let mut store = harness.store();
  let options = ExecuteOptions {
    dev_mode: false,
    ..Default::default()
  };

  harness
    .engine()
    .execute(&mut store, &ops, &options, &CancellationToken::new())
    .await
    .unwrap();

  let seen = harness.dispatcher.seen();
  assert_eq!(seen.len(), 4);
  assert!(seen.iter().all(|(_, _, total, dev_mode)| *total == 2 && !dev_mode));
}

#[tokio::test]
async fn event_names_follow_the_operation_kind() {
  let harness = Harness::new();
  let old = Package::new("acme/meta", "1.0.0", TYPE_METAPACKAGE);
  let new = Package::new("acme/meta", "2.0.0", TYPE_METAPACKAGE);
  let gone = metapackage("acme/gone");
  let mut store = RecordingStore::with_packages(harness.journal.clone(), [old.clone(), gone.clone()]);
  let ops = vec![update(old, new), uninstall(gone)];

  harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    harness.journal.matching("event:"),
    strings(&[
      "event:pre-package-update:acme/meta",
      "event:pre-package-uninstall:acme/gone",
      "event:post-package-update:acme/meta",
      "event:post-package-uninstall:acme/gone",
    ])
  );
  assert_eq!(store.describe(), strings(&["acme/meta@2.0.0"]));
}

#[tokio::test]
async fn scripts_off_means_no_events_and_one_persist_per_sub_batch() {
  let harness = Harness::new();
  let ops = vec![install(library("acme/a", "1.0.0")), install(library("acme/b", "1.0.0"))];
  let mut store = harness.store();
  let options = ExecuteOptions {
    run_scripts: false,
    ..Default::default()
  };

  harness
    .engine()
    .execute(&mut store, &ops, &options, &CancellationToken::new())
    .await
    .unwrap();

  assert!(harness.dispatcher.seen().is_empty());
  assert_eq!(store.snapshots(), &[strings(&["acme/a@1.0.0", "acme/b@1.0.0"])]);
}

#[tokio::test]
async fn scripts_on_persists_after_every_operation() {
  let harness = Harness::new();
  let ops = vec![install(library("acme/a", "1.0.0")), install(library("acme/b", "1.0.0"))];
  let mut store = harness.store();

  harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    store.snapshots(),
    &[strings(&["acme/a@1.0.0"]), strings(&["acme/a@1.0.0", "acme/b@1.0.0"])]
  );
}

#[tokio::test]
async fn failing_listener_aborts_the_run() {
  let harness = Harness::new();
  harness.dispatcher.fail_on(PackageEventKind::PreInstall, "acme/b");
  let ops = vec![install(library("acme/a", "1.0.0")), install(library("acme/b", "1.0.0"))];
  let mut store = harness.store();

  let err = harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, EngineError::Event { .. }));
  assert!(!harness.journal.contains("prepare:acme/b"));
  assert_eq!(store.last_persisted().unwrap(), &strings(&["acme/a@1.0.0"]));
}

#[tokio::test]
async fn alias_markers_fire_no_events() {
  let harness = Harness::new();
  let mut alias = library("acme/a", "1.x-dev");
  alias.alias_of = Some("1.0.0".to_string());
  let ops = vec![
    install(library("acme/a", "1.0.0")),
    Operation::MarkAliasInstalled { package: alias },
  ];
  let mut store = harness.store();

  harness
    .engine()
    .execute(&mut store, &ops, &ExecuteOptions::default(), &CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(harness.dispatcher.seen().len(), 2);
  assert_eq!(store.describe(), strings(&["acme/a@1.0.0", "acme/a@1.x-dev"]));
}
