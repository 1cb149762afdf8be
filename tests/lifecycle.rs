//! Plugin lifecycle integration tests

use std::collections::HashMap;

use axum::http::StatusCode;
use omni_plugin_host::package::ScriptBuildQueue;
use omni_plugin_host::{PackageStatus, PluginHost, PluginStatus, RegistryEvent};
use serde_json::json;

mod common;
use common::{RecordingLoader, get, status_of, test_config, test_host, text_endpoint, write_package};

#[tokio::test]
async fn dependency_loaded_first() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let b = write_package(dir.path(), "b", &json!([text_endpoint("b", "B")]));
    let mut a_def = text_endpoint("a", "A");
    a_def["requires"] = json!(["b"]);
    let a = write_package(dir.path(), "a", &json!([a_def]));

    host.add_package(&b).await;
    host.add_package(&a).await;

    assert_eq!(status_of(&host, "a"), Some(PluginStatus::Loaded));
    assert_eq!(status_of(&host, "b"), Some(PluginStatus::Loaded));
    assert!(host.registry().plugins_with_unmet_requirements().is_empty());
}

#[tokio::test]
async fn dependent_waits_for_its_requirement() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let mut a_def = text_endpoint("a", "A");
    a_def["requires"] = json!(["b"]);
    let a = write_package(dir.path(), "a", &json!([a_def]));
    host.add_package(&a).await;

    let plugin = host.registry().plugin("a").unwrap();
    assert_eq!(plugin.status(), PluginStatus::Error);
    assert!(plugin.error_message().unwrap().contains("missing required plugins: b"));
    assert_eq!(host.registry().plugins_with_unmet_requirements(), vec!["a"]);
    assert_eq!(get(&host, "/a").await.0, StatusCode::NOT_FOUND);

    let b = write_package(dir.path(), "b", &json!([text_endpoint("b", "B")]));
    host.add_package(&b).await;

    assert_eq!(status_of(&host, "a"), Some(PluginStatus::Loaded));
    assert_eq!(status_of(&host, "b"), Some(PluginStatus::Loaded));
    assert!(host.registry().plugins_with_unmet_requirements().is_empty());
    assert_eq!(get(&host, "/a").await, (StatusCode::OK, "A".to_string()));
}

#[tokio::test]
async fn chained_requirements_resolve_in_one_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let mut a_def = text_endpoint("a", "A");
    a_def["requires"] = json!(["b"]);
    let mut b_def = text_endpoint("b", "B");
    b_def["requires"] = json!(["c"]);
    let ab = write_package(dir.path(), "ab", &json!([a_def, b_def]));
    host.add_package(&ab).await;
    assert_eq!(host.registry().plugins_with_unmet_requirements().len(), 2);

    let c = write_package(dir.path(), "c", &json!([text_endpoint("c", "C")]));
    host.add_package(&c).await;

    assert_eq!(host.registry().loaded_names(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn requirement_cycle_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let mut a_def = text_endpoint("a", "A");
    a_def["requires"] = json!(["b"]);
    let mut b_def = text_endpoint("b", "B");
    b_def["requires"] = json!(["a"]);
    let pkg = write_package(dir.path(), "cycle", &json!([a_def, b_def]));
    host.add_package(&pkg).await;

    let mut stuck = host.registry().plugins_with_unmet_requirements();
    stuck.sort();
    assert_eq!(stuck, vec!["a", "b"]);
    assert_eq!(status_of(&host, "a"), Some(PluginStatus::Error));
    assert_eq!(status_of(&host, "b"), Some(PluginStatus::Error));
}

#[tokio::test]
async fn loader_arrival_retries_waiting_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(dir.path(), "custom", &json!([{"type": "custom", "name": "c"}]));
    host.add_package(&pkg).await;

    assert_eq!(host.registry().plugins_with_no_loader(), vec!["c"]);
    assert!(
        host.registry()
            .plugin("c")
            .unwrap()
            .error_message()
            .unwrap()
            .contains("no loader registered for type custom")
    );

    let loader = RecordingLoader::new();
    host.registry().register_loader("custom", loader.clone()).await;

    assert_eq!(status_of(&host, "c"), Some(PluginStatus::Loaded));
    assert!(host.registry().plugins_with_no_loader().is_empty());
    assert_eq!(loader.calls(), vec!["load c"]);
}

#[tokio::test]
async fn replacing_a_loader_reloads_its_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let first = RecordingLoader::new();
    host.registry().register_loader("custom", first.clone()).await;
    let pkg = write_package(dir.path(), "custom", &json!([{"type": "custom", "name": "c"}]));
    host.add_package(&pkg).await;
    let id = host.registry().plugin("c").unwrap().id();

    let second = RecordingLoader::new();
    host.registry().register_loader("custom", second.clone()).await;

    assert_eq!(first.calls(), vec!["load c"]);
    assert_eq!(second.calls(), vec!["load c"]);
    assert_eq!(host.registry().plugin("c").unwrap().id(), id);
}

#[tokio::test]
async fn replacing_a_loader_leaves_other_waiting_plugins_parked() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    host.registry().register_loader("custom", RecordingLoader::new()).await;
    let pkg = write_package(
        dir.path(),
        "mixed",
        &json!([{"type": "custom", "name": "c"}, {"type": "ghost", "name": "g"}]),
    );
    host.add_package(&pkg).await;
    let waiting = host.registry().plugin("g").unwrap();
    let message = waiting.error_message();

    let second = RecordingLoader::new();
    host.registry().register_loader("custom", second.clone()).await;

    assert_eq!(second.calls(), vec!["load c"]);
    assert_eq!(host.registry().plugins_with_no_loader(), vec!["g"]);
    assert_eq!(waiting.status(), PluginStatus::Error);
    assert_eq!(waiting.error_message(), message);
}

#[tokio::test]
async fn requirement_dropped_by_update_loads_once() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let loader = RecordingLoader::new();
    host.registry().register_loader("rec", loader.clone()).await;
    let pkg = write_package(
        dir.path(),
        "a",
        &json!([{"type": "rec", "name": "a", "requires": ["b"]}]),
    );
    let package = host.add_package(&pkg).await;
    assert_eq!(host.registry().plugins_with_unmet_requirements(), vec!["a"]);

    write_package(dir.path(), "a", &json!([{"type": "rec", "name": "a"}]));
    package.build().await;
    host.flush().await;

    assert_eq!(loader.count("load a"), 1);
    assert_eq!(status_of(&host, "a"), Some(PluginStatus::Loaded));
    assert!(host.registry().plugins_with_unmet_requirements().is_empty());
}

#[tokio::test]
async fn stale_loader_cannot_unregister_its_replacement() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let first = RecordingLoader::new();
    let first_dyn: std::sync::Arc<dyn omni_plugin_host::Loader> = first;
    host.registry().register_loader("custom", first_dyn.clone()).await;
    host.registry().register_loader("custom", RecordingLoader::new()).await;

    assert!(!host.registry().unregister_loader("custom", &first_dyn));
    assert!(host.registry().loader_types().contains(&"custom".to_string()));
}

#[tokio::test]
async fn type_change_moves_plugin_between_loaders() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let alpha = RecordingLoader::new();
    let beta = RecordingLoader::new();
    host.registry().register_loader("alpha", alpha.clone()).await;
    host.registry().register_loader("beta", beta.clone()).await;

    let pkg = write_package(dir.path(), "x", &json!([{"type": "alpha", "name": "x"}]));
    host.add_package(&pkg).await;
    assert_eq!(alpha.calls(), vec!["load x"]);

    write_package(dir.path(), "x", &json!([{"type": "beta", "name": "x"}]));
    host.package(&pkg).unwrap().build().await;
    host.flush().await;

    assert_eq!(alpha.calls(), vec!["load x", "unload x"]);
    assert_eq!(beta.calls(), vec!["load x"]);
    let plugin = host.registry().plugin("x").unwrap();
    assert_eq!(plugin.plugin_type(), "beta");
    assert_eq!(plugin.status(), PluginStatus::Loaded);
}

#[tokio::test]
async fn type_change_after_failed_reload_unloads_old_loader() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let alpha = RecordingLoader::new();
    host.registry().register_loader("alpha", alpha.clone()).await;
    host.registry().register_loader("beta", RecordingLoader::new()).await;

    let pkg = write_package(dir.path(), "x", &json!([{"type": "alpha", "name": "x"}]));
    host.add_package(&pkg).await;

    // Unmet requirement on reload: error, but alpha still holds the old load
    write_package(
        dir.path(),
        "x",
        &json!([{"type": "alpha", "name": "x", "requires": ["missing"]}]),
    );
    host.package(&pkg).unwrap().build().await;
    host.flush().await;
    assert_eq!(status_of(&host, "x"), Some(PluginStatus::Error));

    write_package(dir.path(), "x", &json!([{"type": "beta", "name": "x"}]));
    host.package(&pkg).unwrap().build().await;
    host.flush().await;

    assert_eq!(alpha.calls(), vec!["load x", "unload x"]);
    assert_eq!(status_of(&host, "x"), Some(PluginStatus::Loaded));
}

#[tokio::test]
async fn duplicate_name_from_another_package_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let one = write_package(dir.path(), "one", &json!([text_endpoint("foo", "one")]));
    let two = write_package(dir.path(), "two", &json!([text_endpoint("foo", "two")]));
    host.add_package(&one).await;
    host.add_package(&two).await;

    let plugins = host.registry().plugins();
    let rejected = plugins
        .iter()
        .find(|p| p.name == "foo" && p.package_path == two)
        .unwrap();
    assert_eq!(rejected.status, PluginStatus::Error);
    assert!(
        rejected
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("duplicate name: foo already loaded from")
    );

    let winner = host.registry().plugin("foo").unwrap();
    assert_eq!(winner.package_path(), one.as_path());
    assert_eq!(winner.status(), PluginStatus::Loaded);
    assert_eq!(get(&host, "/foo").await, (StatusCode::OK, "one".to_string()));
}

#[tokio::test]
async fn rebuilding_unchanged_package_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(dir.path(), "hello", &json!([text_endpoint("hello", "hi")]));
    let package = host.add_package(&pkg).await;
    let id = host.registry().plugin("hello").unwrap().id();

    package.build().await;
    host.flush().await;

    let plugin = host.registry().plugin("hello").unwrap();
    assert_eq!(plugin.id(), id);
    assert_eq!(plugin.status(), PluginStatus::Loaded);
    let endpoints = host
        .pipeline()
        .mounts()
        .into_iter()
        .filter(|m| m.owner.starts_with("endpoint:"))
        .count();
    assert_eq!(endpoints, 1);
    assert_eq!(host.registry().plugins().len(), 1);
}

#[tokio::test]
async fn registry_emits_unload_before_reload() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    host.registry()
        .events()
        .subscribe(move |event: &RegistryEvent| sink.lock().unwrap().push(event.clone()));

    let pkg = write_package(dir.path(), "hello", &json!([text_endpoint("hello", "hi")]));
    let package = host.add_package(&pkg).await;
    package.build().await;
    host.flush().await;

    let name = "hello".to_string();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            RegistryEvent::Loaded { name: name.clone() },
            RegistryEvent::Unload { name: name.clone() },
            RegistryEvent::Loaded { name },
        ]
    );
}

#[tokio::test]
async fn failed_load_marks_plugin_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;
    host.registry()
        .register_loader("custom", RecordingLoader::failing())
        .await;

    let pkg = write_package(dir.path(), "custom", &json!([{"type": "custom", "name": "c"}]));
    host.add_package(&pkg).await;

    let plugin = host.registry().plugin("c").unwrap();
    assert_eq!(plugin.status(), PluginStatus::Error);
    assert_eq!(plugin.error_message().as_deref(), Some("refused"));
    assert!(host.registry().plugins_with_no_loader().is_empty());
}

#[tokio::test]
async fn bad_bootstrap_is_reported_as_bootstrap_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(
        dir.path(),
        "broken",
        &json!([{"type": "endpoint", "name": "broken", "bootstrap": "#nope"}]),
    );
    host.add_package(&pkg).await;

    let plugin = host.registry().plugin("broken").unwrap();
    assert_eq!(plugin.status(), PluginStatus::Error);
    assert!(plugin.error_message().unwrap().starts_with("bootstrap error for plugin broken"));
}

#[tokio::test]
async fn removing_a_package_unloads_its_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let loader = RecordingLoader::new();
    host.registry().register_loader("custom", loader.clone()).await;
    let pkg = write_package(
        dir.path(),
        "both",
        &json!([text_endpoint("hello", "hi"), {"type": "custom", "name": "c"}]),
    );
    host.add_package(&pkg).await;
    assert_eq!(get(&host, "/hello").await.0, StatusCode::OK);

    assert!(host.remove_package(&pkg).await);

    assert!(host.registry().plugins().is_empty());
    assert!(host.registry().packages().is_empty());
    assert_eq!(loader.calls(), vec!["load c", "unload c"]);
    assert_eq!(get(&host, "/hello").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dropping_a_definition_unloads_only_that_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(
        dir.path(),
        "pair",
        &json!([text_endpoint("keep", "k"), text_endpoint("drop", "d")]),
    );
    let package = host.add_package(&pkg).await;

    write_package(dir.path(), "pair", &json!([text_endpoint("keep", "k")]));
    package.build().await;
    host.flush().await;

    assert_eq!(host.registry().loaded_names(), vec!["keep"]);
    assert_eq!(get(&host, "/drop").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(&host, "/keep").await.1, "k");
}

#[tokio::test]
async fn broken_rebuild_keeps_loaded_plugins() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(dir.path(), "hello", &json!([text_endpoint("hello", "hi")]));
    let package = host.add_package(&pkg).await;

    std::fs::write(pkg.join("package.json"), r#"{"name": "hello", "omni": {}}"#).unwrap();
    package.build().await;
    host.flush().await;

    assert_eq!(package.status(), PackageStatus::Error);
    assert!(package.info().error_message.is_some());
    assert_eq!(status_of(&host, "hello"), Some(PluginStatus::Loaded));
    assert_eq!(get(&host, "/hello").await.1, "hi");
}

#[tokio::test]
async fn overrides_win_over_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.overrides = HashMap::from([("hello".to_string(), json!({"text": "overridden"}))]);
    let host = PluginHost::new(config);
    host.init().await;

    let pkg = write_package(dir.path(), "hello", &json!([text_endpoint("hello", "hi")]));
    host.add_package(&pkg).await;

    let plugin = host.registry().plugin("hello").unwrap();
    assert_eq!(
        plugin.config().unwrap(),
        json!({"path": "/hello", "text": "overridden"})
    );
    assert_eq!(get(&host, "/hello").await.1, "overridden");
}

#[tokio::test]
async fn loader_plugin_contributes_a_loader() {
    let dir = tempfile::tempdir().unwrap();
    let host = test_host(dir.path()).await;

    let pkg = write_package(
        dir.path(),
        "routes",
        &json!([
            {"type": "route", "name": "r", "bootstrap": "#text", "defaultConfig": {"text": "via route"}},
            {"type": "loader", "name": "route-loader", "bootstrap": "#endpoints",
             "defaultConfig": {"loaderType": "route"}},
        ]),
    );
    host.add_package(&pkg).await;

    assert!(host.registry().loader_types().contains(&"route".to_string()));
    assert_eq!(status_of(&host, "r"), Some(PluginStatus::Loaded));
    assert_eq!(get(&host, "/r").await, (StatusCode::OK, "via route".to_string()));

    host.remove_package(&pkg).await;
    assert!(!host.registry().loader_types().contains(&"route".to_string()));
    assert_eq!(get(&host, "/r").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn start_scans_roots_and_loads_packages() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), "one", &json!([text_endpoint("one", "1")]));
    write_package(dir.path(), "two", &json!([text_endpoint("two", "2")]));
    std::fs::create_dir_all(dir.path().join("not-a-package")).unwrap();

    let host = PluginHost::new(test_config(dir.path()));
    host.start().await.unwrap();
    host.settle().await;

    assert_eq!(host.registry().packages().len(), 2);
    assert_eq!(host.registry().loaded_names(), vec!["one", "two"]);

    host.shutdown().await;
    assert!(host.registry().plugins().is_empty());
}

#[tokio::test]
async fn build_step_runs_before_plugins_load() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("built");
    std::fs::create_dir_all(&pkg).unwrap();
    let manifest = json!({
        "name": "built",
        "omni": {
            "build": "touch marker",
            "plugins": [text_endpoint("built", "ok")],
        },
    });
    std::fs::write(pkg.join("package.json"), manifest.to_string()).unwrap();

    let host = PluginHost::builder(test_config(dir.path()))
        .build_queue(ScriptBuildQueue::spawn())
        .build();
    host.init().await;
    let package = host.add_package(&pkg).await;

    assert!(pkg.join("marker").exists());
    assert_eq!(package.status(), PackageStatus::Ready);
    assert_eq!(status_of(&host, "built"), Some(PluginStatus::Loaded));
    assert_eq!(get(&host, "/built").await, (StatusCode::OK, "ok".to_string()));
}
