//! Integration tests for platybridge
//!
//! Full background/page round trips: page scripts talk to the background over
//! channels, the background talks to a mock automation server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use platybridge::channel::{Connector, Reply};
use platybridge::platform::{MemoryClipboard, MemoryMenus, MemoryNotifier, Tabs};
use platybridge::{
    ActionArgs, ActionDescriptor, Background, BridgeConfig, FileStorage, Host, MemoryStorage,
    Platform, ReadabilityExtractor, ScriptDescriptor, Storage, TabRegistry,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    background: Arc<Background>,
    connector: Connector,
    tabs: Arc<TabRegistry>,
    menus: Arc<MemoryMenus>,
    notifier: Arc<MemoryNotifier>,
}

async fn harness_with(storage: Arc<dyn Storage>) -> Harness {
    init_tracing();
    let config = BridgeConfig::default();
    let (connector, incoming) = Connector::channel(config.channel_capacity);
    let tabs = Arc::new(TabRegistry::new(
        connector.clone(),
        Arc::new(MemoryClipboard::with_text("https://clip.example/")),
        Arc::new(config.clone()),
    ));
    let menus = Arc::new(MemoryMenus::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let platform = Platform {
        storage,
        menus: menus.clone(),
        tabs: tabs.clone(),
        notifier: notifier.clone(),
        extractor: Arc::new(ReadabilityExtractor::new()),
    };
    let background = Background::start(config, platform, incoming)
        .await
        .expect("Failed to start background");
    Harness {
        background,
        connector,
        tabs,
        menus,
        notifier,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(MemoryStorage::new())).await
}

fn host_for(server: &MockServer) -> Host {
    let address = server.address();
    Host::new(address.ip().to_string(), address.port()).with_name("h1")
}

async fn configure(h: &Harness, server: &MockServer) {
    let mut hosts = BTreeMap::new();
    hosts.insert("h1".to_string(), host_for(server));
    h.background.save_hosts(&hosts).await.expect("Failed to save hosts");
}

async fn save_script(h: &Harness, name: &str, source: Value) {
    let mut scripts = h.background.state().await.scripts;
    scripts.insert(
        name.to_string(),
        ScriptDescriptor::new(name, source.to_string()).on_host("h1"),
    );
    h.background
        .save_scripts(&scripts)
        .await
        .expect("Failed to save scripts");
}

fn respond_output(output: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"response": {"output": output, "errors": []}}))
}

#[tokio::test]
async fn test_run_channel_resolves_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_json(json!({"type": "request", "action": "music.pause", "args": {}})))
        .respond_with(respond_output(json!(42)))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    configure(&h, &server).await;

    let mut port = h.connector.connect("run").await.expect("Failed to connect");
    let reply = port
        .request(json!({"type": "run", "action": {"actionName": "music.pause", "args": {}}, "host": "h1"}))
        .await
        .expect("No reply");
    let reply: Reply = serde_json::from_value(reply).unwrap();
    assert_eq!(reply.into_result(), Ok(json!(42)));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_run_channel_rejects_with_first_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"response": {"output": null, "errors": ["No such action", "other"]}}),
        ))
        .mount(&server)
        .await;

    let h = harness().await;
    let mut port = h.connector.connect("run").await.unwrap();
    let reply = port
        .request(json!({
            "type": "run",
            "action": {"action": "music.nope"},
            "host": serde_json::to_value(host_for(&server)).unwrap()
        }))
        .await
        .unwrap();
    let reply: Reply = serde_json::from_value(reply).unwrap();
    assert_eq!(reply.into_result(), Err("No such action".to_string()));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_error);
}

#[tokio::test]
async fn test_menu_click_substitutes_page_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_json(json!({
            "type": "request",
            "action": "music.mpd.play",
            "args": {"resource": "https://youtube.com/watch?v=1"}
        })))
        .respond_with(respond_output(json!("playing")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    configure(&h, &server).await;
    let mut actions = BTreeMap::new();
    actions.insert(
        "Play".to_string(),
        ActionDescriptor::new("Play", "music.mpd.play")
            .with_args(ActionArgs::Pairs(vec![
                platybridge::ArgPair::new("resource", "$URL$"),
                platybridge::ArgPair::new("volume", ""),
            ]))
            .on_host("h1")
            .in_category("media"),
    );
    h.background.save_actions(&actions).await.unwrap();

    let items: Vec<String> = h.menus.items().into_iter().map(|i| i.id).collect();
    assert!(items.contains(&"//h1//media//Play".to_string()));

    let tab = h
        .tabs
        .open_page("https://youtube.com/watch?v=1", "<html></html>")
        .await;
    let output = h
        .background
        .on_menu_click("//h1//media//Play", Some(tab))
        .await
        .unwrap();
    assert_eq!(output, Some(json!("playing")));
}

#[tokio::test]
async fn test_script_runs_action_through_channels() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_json(json!({
            "type": "request",
            "action": "media.play",
            "args": {"url": "https://example.com/video"}
        })))
        .respond_with(respond_output(json!({"state": "play"})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    configure(&h, &server).await;
    save_script(
        &h,
        "Cast",
        json!([
            {"op": "call", "fn": "getURL", "bind": "url"},
            {"op": "call", "fn": "run", "bind": "out", "args": [
                {"action": "media.play", "args": {"url": "$url"}},
                "$args.host"
            ]},
            {"op": "return", "value": "$out.state"}
        ]),
    )
    .await;

    let tab = h.tabs.open_page("https://example.com/video", "").await;
    let result = h
        .background
        .on_menu_click("//h1//[NONE]//Cast", Some(tab))
        .await
        .unwrap();
    assert_eq!(result, Some(json!("play")));
}

#[tokio::test]
async fn test_script_edits_page_dom() {
    let server = MockServer::start().await;
    let h = harness().await;
    configure(&h, &server).await;
    save_script(
        &h,
        "Title",
        json!([
            {"op": "call", "fn": "getDOM", "bind": "dom"},
            {"op": "call", "fn": "setDOM", "args": [
                {"$concat": ["<html><body><h1>", "$args.title", "</h1></body></html>"]}
            ]},
            {"op": "return", "value": "$dom"}
        ]),
    )
    .await;

    let tab = h.tabs.open_page("https://example.com", "<html>old</html>").await;
    let page = h.tabs.page(tab).await.unwrap();

    let script = h.background.state().await.scripts["Title"].clone();
    let runner = platybridge::ScriptRunner::new(h.tabs.clone(), h.notifier.clone());
    let mut extra = serde_json::Map::new();
    extra.insert("title".into(), json!("Hello"));
    let result = runner
        .run(
            &platybridge::script::ScriptSource::Text(script.source),
            &host_for(&server),
            Some(tab),
            None,
            extra,
        )
        .await
        .unwrap();
    assert_eq!(result, Some(json!("<html>old</html>")));

    // setDOM is fire-and-forget
    for _ in 0..50 {
        if page.html().await != "<html>old</html>" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(page.html().await, "<html><body><h1>Hello</h1></body></html>");
}

#[tokio::test]
async fn test_script_proxy_and_extract() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><head><title>Story</title></head><body><article><p>One two three.</p></article></body></html>",
        ))
        .mount(&server)
        .await;

    let h = harness().await;
    configure(&h, &server).await;
    let url = format!("{}/article", server.uri());
    save_script(
        &h,
        "Read",
        json!([
            {"op": "call", "fn": "http.get", "args": [url.clone()], "bind": "response"},
            {"op": "call", "fn": "parse", "bind": "doc", "args": [
                url, "$response.data", {"contentType": "text"}
            ]},
            {"op": "return", "value": {
                "status": "$response.status",
                "title": "$doc.title",
                "content": "$doc.content",
                "words": "$doc.wordCount"
            }}
        ]),
    )
    .await;

    let tab = h.tabs.open_page("https://example.com", "").await;
    let result = h
        .background
        .on_menu_click("//h1//[NONE]//Read", Some(tab))
        .await
        .unwrap();
    assert_eq!(
        result,
        Some(json!({"status": 200, "title": "Story", "content": "One two three.", "words": 3}))
    );
}

#[tokio::test]
async fn test_script_failure_notifies() {
    let server = MockServer::start().await;
    let h = harness().await;
    configure(&h, &server).await;
    save_script(
        &h,
        "Broken",
        json!([{"op": "fail", "message": {"$concat": ["cannot handle ", "$args.target"]}}]),
    )
    .await;

    let tab = h.tabs.open_page("https://example.com", "").await;
    h.tabs
        .page(tab)
        .await
        .unwrap()
        .on_context_menu("<p>x</p>")
        .await;

    let err = h
        .background
        .on_menu_click("//h1//[NONE]//Broken", Some(tab))
        .await
        .unwrap_err();
    assert_eq!(err.reply_message(), "cannot handle <p>x</p>");

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message, "cannot handle <p>x</p>");
}

#[tokio::test]
async fn test_script_notify_and_clipboard() {
    let server = MockServer::start().await;
    let h = harness().await;
    configure(&h, &server).await;
    save_script(
        &h,
        "Clip",
        json!([
            {"op": "call", "fn": "getClipboard", "bind": "clip"},
            {"op": "call", "fn": "notify", "args": [{"$concat": ["Copied ", "$clip"]}]},
            {"op": "call", "fn": "openTab", "args": ["$clip"]}
        ]),
    )
    .await;

    let tab = h.tabs.open_page("https://example.com", "").await;
    h.background
        .on_menu_click("//h1//[NONE]//Clip", Some(tab))
        .await
        .unwrap();

    for _ in 0..50 {
        if !h.notifier.sent().is_empty() && h.tabs.active_tab().await != Some(tab) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "platypush");
    assert_eq!(sent[0].message, "Copied https://clip.example/");
    assert!(!sent[0].is_error);

    let opened = h.tabs.active_tab().await.unwrap();
    assert_ne!(opened, tab);
    let page = h.tabs.page(opened).await.unwrap();
    assert_eq!(page.url().await, "https://clip.example/");
}

#[tokio::test]
async fn test_unknown_channel_is_dropped() {
    let h = harness().await;
    let mut port = h.connector.connect("clipboard").await.unwrap();
    assert!(port.request(json!({"type": "get"})).await.is_err());

    // the router keeps serving other channels
    let tab = h.tabs.open_page("https://example.com/", "").await;
    let mut port = h.connector.for_tab(tab).connect("url").await.unwrap();
    let reply: Reply = serde_json::from_value(port.request(json!({"type": "get"})).await.unwrap())
        .unwrap();
    assert_eq!(reply.into_result(), Ok(json!("https://example.com/")));
}

#[tokio::test]
async fn test_unknown_message_type_is_ignored() {
    let h = harness().await;
    let tab = h.tabs.open_page("https://example.com/", "<html></html>").await;
    let mut port = h.connector.for_tab(tab).connect("dom").await.unwrap();

    port.post(json!({"type": "bogus", "id": 7})).await.unwrap();
    let stray = tokio::time::timeout(Duration::from_millis(100), port.recv()).await;
    assert!(stray.is_err(), "unexpected reply: {:?}", stray);

    // the same port keeps serving
    let reply: Reply = serde_json::from_value(port.request(json!({"type": "get"})).await.unwrap())
        .unwrap();
    assert_eq!(reply.into_result(), Ok(json!("<html></html>")));
}

#[tokio::test]
async fn test_url_set_navigates_tab() {
    let h = harness().await;
    let tab = h.tabs.open_page("https://example.com/", "<html></html>").await;
    let mut port = h.connector.for_tab(tab).connect("url").await.unwrap();

    port.post(json!({"type": "set", "url": "https://other.org/"}))
        .await
        .unwrap();
    // per-port delivery is ordered, so the set has landed before this get
    let reply: Reply = serde_json::from_value(port.request(json!({"type": "get"})).await.unwrap())
        .unwrap();
    assert_eq!(reply.into_result(), Ok(json!("https://other.org/")));

    let page = h.tabs.page(tab).await.unwrap();
    assert_eq!(page.url().await, "https://other.org/");
    assert_eq!(page.target_element().await, None);

    // invalid URLs are dropped without navigating
    port.post(json!({"type": "set", "url": "not a url"})).await.unwrap();
    let reply: Reply = serde_json::from_value(port.request(json!({"type": "get"})).await.unwrap())
        .unwrap();
    assert_eq!(reply.into_result(), Ok(json!("https://other.org/")));
}

#[tokio::test]
async fn test_shortcut_rebinding_dispatches_new_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_json(json!({"type": "request", "action": "b.run", "args": {}})))
        .respond_with(respond_output(json!("B")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness().await;
    configure(&h, &server).await;
    let mut actions = BTreeMap::new();
    actions.insert("A".to_string(), ActionDescriptor::new("A", "a.run").on_host("h1"));
    actions.insert("B".to_string(), ActionDescriptor::new("B", "b.run").on_host("h1"));
    h.background.save_actions(&actions).await.unwrap();

    h.background.bind_command("Ctrl+Shift+1", "A").await.unwrap();
    h.background.bind_command("Ctrl+Shift+1", "B").await.unwrap();

    let commands = h.background.state().await.commands;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands.target("Ctrl+Shift+1"), Some("B"));

    assert_eq!(
        h.background.on_command("Ctrl+Shift+1").await.unwrap(),
        Some(json!("B"))
    );
}

#[tokio::test]
async fn test_file_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("storage.json");
    let server = MockServer::start().await;

    {
        let storage = Arc::new(FileStorage::open(&file).await.unwrap());
        let h = harness_with(storage).await;
        configure(&h, &server).await;
        save_script(&h, "Noop", json!([])).await;
        h.background.bind_command("Ctrl+1", "Noop").await.unwrap();
    }

    let storage = Arc::new(FileStorage::open(&file).await.unwrap());
    let h = harness_with(storage).await;
    let state = h.background.state().await;
    assert!(state.host("h1").is_some());
    assert!(state.scripts.contains_key("Noop"));
    assert_eq!(state.commands.target("Ctrl+1"), Some("Noop"));
    assert_eq!(h.menus.items().len(), 3);
}
