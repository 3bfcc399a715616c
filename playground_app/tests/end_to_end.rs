use std::rc::Rc;

use playground_app::{
    ManualTimers, MemoryConsole, MemoryDom, MemoryNetwork, MonospaceLayout, PlaygroundApp,
    PlaygroundConfig, TimerKind,
};
use playground_core::{ManualClock, Selection};
use playground_runtime::{
    DomHost, HostContext, LogLevel, NetworkHost, NodeId, RunError, RunStatus, TimelineKind,
};

struct Hosts {
    console: Rc<MemoryConsole>,
    network: Rc<MemoryNetwork>,
    dom: Rc<MemoryDom>,
    timers: Rc<ManualTimers>,
}

fn playground() -> (PlaygroundApp, Hosts, ManualClock) {
    let hosts = Hosts {
        console: Rc::new(MemoryConsole::new()),
        network: Rc::new(MemoryNetwork::new()),
        dom: Rc::new(MemoryDom::new()),
        timers: Rc::new(ManualTimers::new()),
    };
    let host = HostContext::new()
        .with_console(hosts.console.clone())
        .with_network(hosts.network.clone())
        .with_dom(hosts.dom.clone())
        .with_timers(hosts.timers.clone());
    let clock = ManualClock::new();
    let app = PlaygroundApp::new(
        PlaygroundConfig::default(),
        Box::new(MonospaceLayout::default()),
        host,
        Rc::new(clock.clone()),
        None,
    );
    (app, hosts, clock)
}

#[tokio::test(flavor = "current_thread")]
async fn test_counting_loop_logs_three_times() {
    let (mut app, hosts, _) = playground();
    app.load_text("for(let i=0;i<3;i++){ console.log(i) }");

    let report = app.run().await;
    assert_eq!(report.status, RunStatus::Succeeded);
    let snapshot = report.snapshot.clone().unwrap();
    assert_eq!(snapshot.log_count(LogLevel::Log), 3);
    assert_eq!(snapshot.dom_mutations, 0);
    assert!(!snapshot.failed);
    assert!(snapshot.duration >= 0.0);
    assert_eq!(snapshot.memory.start, 0);

    let messages: Vec<&str> = app.console().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["0", "1", "2"]);
    assert_eq!(hosts.console.lines().len(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn test_infinite_loop_is_rejected_before_running() {
    let (mut app, hosts, _) = playground();
    app.load_text("while(true){}");

    let report = app.run().await;
    assert_eq!(report.status, RunStatus::Rejected);
    assert!(report.snapshot.is_none());
    assert!(matches!(report.error, Some(RunError::Rejected(_))));

    assert_eq!(app.console().len(), 1);
    assert_eq!(app.console()[0].level, LogLevel::Error);
    assert!(app.console()[0].message.contains("infinite loop"));
    assert!(hosts.console.lines().is_empty());

    let metrics = app.metrics();
    assert!(metrics.run.is_none());
    assert_eq!(metrics.session.session_runs, 0);
    assert_eq!(metrics.session.session_ui_actions.get("run"), Some(&1));
    assert!(app.last_execution_time().is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn test_rejection_leaves_previous_run_untouched() {
    let (mut app, _, _) = playground();
    app.load_text("console.log('first');");
    app.run().await;
    app.load_text("for(;;){ console.log('again') }");
    app.run().await;

    let run = app.metrics().run.unwrap();
    let completions = run
        .timeline
        .iter()
        .filter(|e| e.kind == TimelineKind::RunComplete)
        .count();
    assert_eq!(completions, 1);
    assert_eq!(run.log_count(LogLevel::Log), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn test_fetch_then_throw_restores_network() {
    let (mut app, hosts, _) = playground();
    hosts.network.route("/x", "ok");
    let network: Rc<dyn NetworkHost> = hosts.network.clone();
    app.load_text("await fetch('/x');\nthrow new Error('boom');");

    let report = app.run().await;
    assert_eq!(report.status, RunStatus::Failed);
    let snapshot = report.snapshot.clone().unwrap();
    assert_eq!(snapshot.network.total, 1);
    assert_eq!(snapshot.network.fetch, 1);
    assert_eq!(snapshot.errors, 1);
    assert!(snapshot.failed);

    assert!(Rc::ptr_eq(&app.host().network().unwrap(), &network));
    assert_eq!(hosts.network.requests().len(), 1);
    assert_eq!(app.console().last().unwrap().message, "Error: boom (line 2)");
}

#[tokio::test(flavor = "current_thread")]
async fn test_xhr_open_and_send_are_on_the_timeline() {
    let (mut app, hosts, _) = playground();
    hosts.network.route("/api", "pong");
    app.load_text(
        r#"
const xhr = new XMLHttpRequest();
xhr.open('get', '/api');
xhr.onload = () => console.log(xhr.responseText);
xhr.send();
"#,
    );

    let report = app.run().await;
    assert_eq!(report.status, RunStatus::Succeeded);
    let snapshot = report.snapshot.clone().unwrap();
    assert_eq!(snapshot.network.total, 1);
    assert_eq!(snapshot.network.xhr, 1);
    let details: Vec<&str> = snapshot
        .timeline
        .iter()
        .filter(|e| e.kind == TimelineKind::Network)
        .map(|e| e.detail.as_str())
        .collect();
    assert_eq!(details, vec!["xhr open GET /api", "xhr /api"]);
    assert_eq!(app.console()[0].message, "pong");
}

#[tokio::test(flavor = "current_thread")]
async fn test_dom_and_timer_activity_is_counted() {
    let (mut app, hosts, _) = playground();
    app.load_text(
        r#"
const a = document.createElement('div');
const b = document.createElement('span');
document.body.appendChild(a);
document.body.insertBefore(b, a);
document.body.removeChild(a);
setTimeout(() => console.log('later'), 100);
requestAnimationFrame(() => {});
"#,
    );

    let report = app.run().await;
    assert_eq!(report.status, RunStatus::Succeeded);
    let snapshot = report.snapshot.clone().unwrap();
    assert_eq!(snapshot.dom_mutations, 3);
    assert_eq!(snapshot.async_ops.timeout, 1);
    assert_eq!(snapshot.async_ops.raf, 1);

    assert_eq!(hosts.dom.children(hosts.dom.document_body()), vec![NodeId(2)]);
    let kinds: Vec<TimerKind> = hosts
        .timers
        .pending()
        .into_iter()
        .map(|(_, kind, _)| kind)
        .collect();
    assert_eq!(kinds, vec![TimerKind::Timeout, TimerKind::AnimationFrame]);
    assert!(app.console().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn test_editing_session_around_a_run() {
    let (mut app, _, clock) = playground();
    app.focus(true);
    app.paste("const n = 2;\nconsole.log(n * 21);");
    assert_eq!(app.views().highlight_count(), 1);

    clock.advance(20.0);
    app.animation_frame();
    assert_eq!(app.views().gutter_line_count(), 2);
    assert_eq!(app.cursor_metrics().line, 2);

    app.set_selection(Selection::new(0));
    let report = app.run().await;
    assert!(report.succeeded());
    assert_eq!(app.console()[0].message, "42");

    clock.advance(20.0);
    app.animation_frame();
    let metrics = app.cursor_metrics();
    assert_eq!((metrics.line, metrics.column), (1, 1));
    assert_eq!(app.pending_sync(), 0);

    app.clear();
    assert!(app.console().is_empty());
    assert_eq!(app.text(), "");
}
