mod common;

use std::sync::{Arc, Mutex};

use common::{eventually, manager, manager_with_refresher, session, within, FakeHub, FakeRefresher};
use realmsync_client::{ClientError, ConnectionStatus, TransportError, TransportEvent, TransportState};
use realmsync_shared::{methods, targets, ErrorCode, Notice};
use serde_json::json;

#[tokio::test]
async fn connect_joins_the_session() {
    let hub = FakeHub::default();
    let manager = manager(&hub);

    manager.connect(session("ABCD", "token")).await.unwrap();

    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.store().connection_status(), ConnectionStatus::Connected);
    let transport = hub.last();
    assert_eq!(transport.config.credential, "token");
    assert_eq!(transport.config.client_id, "client-1");

    let invocations = transport.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, methods::JOIN_SESSION);
    assert_eq!(invocations[0].1[0]["sessionCode"], "ABCD");
    assert!(invocations[0].1[0]["commandId"].is_string());
}

#[tokio::test]
async fn status_moves_through_connecting() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = seen.clone();
        manager.on_status(move |status| seen.lock().unwrap().push(*status))
    };

    manager.connect(session("ABCD", "token")).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );
}

#[tokio::test]
async fn identical_connect_is_a_no_op() {
    let hub = FakeHub::default();
    let manager = manager(&hub);

    manager.connect(session("ABCD", "token")).await.unwrap();
    manager.connect(session("ABCD", "token")).await.unwrap();

    assert_eq!(hub.build_count(), 1);
}

#[tokio::test]
async fn concurrent_connects_build_one_transport() {
    let hub = FakeHub::default();
    let gate = hub.gate_next();
    let manager = manager(&hub);

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("ABCD", "token")).await })
    };
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("ABCD", "token")).await })
    };

    eventually(|| hub.build_count() == 1).await;
    tokio::task::yield_now().await;
    gate.send_replace(true);

    within(first).await.unwrap().unwrap();
    within(second).await.unwrap().unwrap();
    assert_eq!(hub.build_count(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn connecting_elsewhere_tears_down_the_old_transport() {
    let hub = FakeHub::default();
    let manager = manager(&hub);

    manager.connect(session("AAAA", "token")).await.unwrap();
    manager.connect(session("BBBB", "token")).await.unwrap();

    let old = hub.transport(0);
    assert_eq!(old.stop_count(), 1);
    assert_eq!(old.listener_count(), 0);
    assert_eq!(hub.build_count(), 2);
    assert_eq!(manager.session().unwrap().session_code, "BBBB");
}

#[tokio::test]
async fn stale_start_is_discarded() {
    let hub = FakeHub::default();
    let gate = hub.gate_next();
    let manager = manager(&hub);

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("AAAA", "token")).await })
    };
    eventually(|| hub.build_count() == 1).await;

    manager.connect(session("BBBB", "token")).await.unwrap();
    gate.send_replace(true);

    let result = within(first).await.unwrap();
    assert!(matches!(result, Err(ClientError::Superseded)));
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.session().unwrap().session_code, "BBBB");
    assert!(hub.transport(0).stop_count() >= 1);
    assert_eq!(hub.transport(0).invoked(methods::JOIN_SESSION), 0);
}

#[tokio::test]
async fn disconnect_cancels_a_pending_start() {
    let hub = FakeHub::default();
    let gate = hub.gate_next();
    let manager = manager(&hub);

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("AAAA", "token")).await })
    };
    eventually(|| hub.build_count() == 1).await;

    manager.disconnect().await;
    gate.send_replace(true);

    let result = within(pending).await.unwrap();
    assert!(matches!(result, Err(ClientError::Superseded)));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(hub.build_count(), 1);
    assert!(hub.transport(0).stop_count() >= 1);
    assert_eq!(hub.transport(0).invoked(methods::JOIN_SESSION), 0);
}

#[tokio::test]
async fn disconnect_when_idle_is_safe() {
    let hub = FakeHub::default();
    let manager = manager(&hub);

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(hub.build_count(), 0);
}

#[tokio::test]
async fn disconnect_stops_and_unregisters() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    manager.connect(session("ABCD", "token")).await.unwrap();
    let transport = hub.last();
    assert_eq!(transport.listener_count(), 1);

    manager.disconnect().await;

    assert_eq!(transport.stop_count(), 1);
    assert_eq!(transport.listener_count(), 0);
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    // Events from the torn-down transport are ignored
    transport.emit(TransportEvent::Reconnecting(None));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn rejected_credential_is_refreshed_once() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Unauthorized("token expired".into())));
    let refresher = FakeRefresher::new(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());

    manager.connect(session("ABCD", "token")).await.unwrap();

    assert_eq!(refresher.call_count(), 1);
    let request = refresher.calls.lock().unwrap()[0].clone();
    assert_eq!(request.session_code, "ABCD");
    assert_eq!(request.client_id, "client-1");
    assert_eq!(request.current_credential, "token");

    assert_eq!(hub.build_count(), 2);
    assert_eq!(hub.transport(1).config.credential, "new-token");
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.session().unwrap().credential, "new-token");
    assert!(manager.store().state().last_error.is_none());
}

#[tokio::test]
async fn second_rejection_is_terminal() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Unauthorized("token expired".into())));
    hub.script_start(Err(TransportError::Unauthorized("still expired".into())));
    let refresher = FakeRefresher::new(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());

    let result = manager.connect(session("ABCD", "token")).await;

    assert!(matches!(result, Err(ClientError::Connection(ref e)) if e.code == ErrorCode::ConnectionFailed));
    assert_eq!(refresher.call_count(), 1);
    assert_eq!(hub.build_count(), 2);
    assert_eq!(manager.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn refresh_without_token_reports_auth_refresh_failed() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Handshake {
        status: 401,
        message: "Unauthorized".into(),
    }));
    let refresher = FakeRefresher::new(Ok(None));
    let manager = manager_with_refresher(&hub, refresher.clone());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let errors = errors.clone();
        manager.on_error(move |e| errors.lock().unwrap().push(e.clone()))
    };

    let result = manager.connect(session("ABCD", "token")).await;

    assert!(result.is_err());
    assert_eq!(hub.build_count(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Error);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::AuthRefreshFailed);
    assert_eq!(
        manager.store().state().last_error.map(|e| e.code),
        Some(ErrorCode::AuthRefreshFailed)
    );
}

#[tokio::test]
async fn refresher_error_reports_auth_refresh_failed() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Unauthorized("401".into())));
    let refresher = FakeRefresher::new(Err(ClientError::Storage("disk full".into())));
    let manager = manager_with_refresher(&hub, refresher);

    let result = manager.connect(session("ABCD", "token")).await;

    assert!(matches!(result, Err(ClientError::Connection(ref e)) if e.code == ErrorCode::AuthRefreshFailed));
    assert_eq!(manager.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn other_failures_skip_refresh() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Handshake {
        status: 502,
        message: "bad gateway".into(),
    }));
    let refresher = FakeRefresher::new(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());

    let result = manager.connect(session("ABCD", "token")).await;

    assert!(matches!(result, Err(ClientError::Connection(ref e)) if e.code == ErrorCode::ConnectionFailed));
    assert_eq!(refresher.call_count(), 0);
    assert_eq!(hub.build_count(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn unauthorized_close_refreshes_and_reconnects() {
    let hub = FakeHub::default();
    let refresher = FakeRefresher::new(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());
    manager.connect(session("ABCD", "token")).await.unwrap();

    hub.transport(0)
        .emit(TransportEvent::Closed(Some(TransportError::Closed("token expired".into()))));

    eventually(|| hub.build_count() == 2 && manager.status() == ConnectionStatus::Connected).await;
    assert_eq!(refresher.call_count(), 1);
    assert_eq!(hub.transport(1).config.credential, "new-token");
    assert_eq!(hub.transport(1).invoked(methods::JOIN_SESSION), 1);
    assert_eq!(hub.transport(0).listener_count(), 0);
}

#[tokio::test]
async fn status_leaves_connected_while_refreshing_after_close() {
    let hub = FakeHub::default();
    let (refresher, gate) = FakeRefresher::gated(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());
    manager.connect(session("ABCD", "token")).await.unwrap();

    hub.transport(0).emit(TransportEvent::Closed(Some(TransportError::Unauthorized(
        "token expired".into(),
    ))));

    eventually(|| refresher.call_count() == 1).await;
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

    gate.send_replace(true);
    eventually(|| hub.build_count() == 2 && manager.status() == ConnectionStatus::Connected).await;
}

#[tokio::test]
async fn one_refresh_at_a_time_per_connection() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Unauthorized("token expired".into())));
    let (refresher, gate) = FakeRefresher::gated(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("ABCD", "token")).await })
    };
    eventually(|| refresher.call_count() == 1).await;

    // a second rejection for the same connection while the first refresh runs
    hub.transport(0).emit(TransportEvent::Closed(Some(TransportError::Unauthorized(
        "token expired".into(),
    ))));
    eventually(|| hub.transport(0).stop_count() >= 1).await;
    assert_eq!(refresher.call_count(), 1);

    gate.send_replace(true);
    within(connecting).await.unwrap().unwrap();
    assert_eq!(refresher.call_count(), 1);
    assert_eq!(hub.build_count(), 2);
    assert_eq!(hub.transport(1).config.credential, "new-token");
    assert_eq!(manager.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn replaced_refresh_does_not_block_the_new_session() {
    let hub = FakeHub::default();
    hub.script_start(Err(TransportError::Unauthorized("expired A".into())));
    hub.script_start(Err(TransportError::Unauthorized("expired B".into())));
    let (refresher, gate) = FakeRefresher::gated(Ok(None));
    let manager = manager_with_refresher(&hub, refresher.clone());

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("AAAA", "token-a")).await })
    };
    eventually(|| refresher.call_count() == 1).await;

    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(session("BBBB", "token-b")).await })
    };
    eventually(|| refresher.call_count() == 2).await;
    assert_eq!(refresher.calls.lock().unwrap()[1].session_code, "BBBB");

    gate.send_replace(true);
    assert!(matches!(within(first).await.unwrap(), Err(ClientError::Superseded)));
    let result = within(second).await.unwrap();
    assert!(matches!(result, Err(ClientError::Connection(ref e)) if e.code == ErrorCode::AuthRefreshFailed));

    assert_eq!(hub.build_count(), 2);
    assert_eq!(manager.status(), ConnectionStatus::Error);
    assert_eq!(
        manager.store().state().last_error.map(|e| e.code),
        Some(ErrorCode::AuthRefreshFailed)
    );
    assert!(hub.transport(1).stop_count() >= 1);
}

#[tokio::test]
async fn error_close_is_terminal() {
    let hub = FakeHub::default();
    let refresher = FakeRefresher::new(Ok(Some("new-token".to_string())));
    let manager = manager_with_refresher(&hub, refresher.clone());
    manager.connect(session("ABCD", "token")).await.unwrap();

    hub.transport(0).emit(TransportEvent::Closed(Some(TransportError::Closed(
        "retries exhausted".into(),
    ))));

    eventually(|| manager.status() == ConnectionStatus::Error).await;
    assert_eq!(refresher.call_count(), 0);
    assert_eq!(hub.build_count(), 1);
    assert_eq!(
        manager.store().state().last_error.map(|e| e.code),
        Some(ErrorCode::ConnectionClosed)
    );
}

#[tokio::test]
async fn reconnect_requests_one_full_snapshot() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    manager.connect(session("ABCD", "token")).await.unwrap();
    let transport = hub.last();

    transport.emit(TransportEvent::Reconnecting(Some(TransportError::Closed("reset".into()))));
    assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

    transport.emit(TransportEvent::Reconnected);
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    eventually(|| transport.invoked(methods::REQUEST_FULL_SNAPSHOT) == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(transport.invoked(methods::REQUEST_FULL_SNAPSHOT), 1);
    assert!(manager.store().state().resync_pending);
}

#[tokio::test]
async fn snapshot_request_falls_back_to_join() {
    let hub = FakeHub::default();
    hub.reject_method(methods::REQUEST_FULL_SNAPSHOT);
    let manager = manager(&hub);
    manager.connect(session("ABCD", "token")).await.unwrap();

    manager.request_full_snapshot().await.unwrap();

    let transport = hub.last();
    assert_eq!(transport.invoked(methods::REQUEST_FULL_SNAPSHOT), 1);
    assert_eq!(transport.invoked(methods::JOIN_SESSION), 2);
}

#[tokio::test]
async fn commands_fail_fast_when_not_connected() {
    let hub = FakeHub::default();
    let manager = manager(&hub);

    assert!(matches!(manager.cast_vote("5").await, Err(ClientError::NotConnected)));
    assert!(matches!(manager.request_full_snapshot().await, Err(ClientError::NotConnected)));

    manager.connect(session("ABCD", "token")).await.unwrap();
    let transport = hub.last();
    transport.set_state(TransportState::Reconnecting);

    assert!(matches!(manager.reveal_votes().await, Err(ClientError::NotConnected)));
    assert_eq!(transport.invoked(methods::REVEAL_VOTES), 0);
}

#[tokio::test]
async fn typed_commands_carry_payload_and_correlation_id() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    manager.connect(session("ABCD", "token")).await.unwrap();

    manager.cast_vote("8").await.unwrap();
    manager.start_encounter("q-1").await.unwrap();
    manager
        .reorder_quests(vec!["q-2".into(), "q-1".into()])
        .await
        .unwrap();

    let invocations = hub.last().invocations();
    let (name, args) = &invocations[1];
    assert_eq!(name, methods::SELECT_VOTE);
    assert_eq!(args[0]["value"], "8");
    assert!(args[0]["commandId"].is_string());
    assert_eq!(invocations[2].1[0]["questId"], "q-1");
    assert_eq!(invocations[3].1[0]["questIds"], json!(["q-2", "q-1"]));
    assert_ne!(invocations[1].1[0]["commandId"], invocations[2].1[0]["commandId"]);
}

#[tokio::test]
async fn pushed_payloads_reach_store_and_notices() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    let notices: Arc<Mutex<Vec<Notice>>> = Arc::default();
    let _sub = {
        let notices = notices.clone();
        manager.on_notice(move |n| notices.lock().unwrap().push(n.clone()))
    };
    manager.connect(session("ABCD", "token")).await.unwrap();
    let transport = hub.last();

    transport.emit(TransportEvent::Payload {
        target: targets::SNAPSHOT.to_string(),
        arguments: vec![json!({
            "revision": 4,
            "partyRoster": [{ "id": "p1", "displayName": "Ada" }],
            "questLog": [],
        })],
    });
    transport.emit(TransportEvent::Payload {
        target: targets::NOTICE.to_string(),
        arguments: vec![json!("The GM paused the session")],
    });

    let state = manager.store().state();
    assert_eq!(state.revision, Some(4));
    assert_eq!(state.presence.len(), 1);
    assert_eq!(notices.lock().unwrap()[0].message, "The GM paused the session");
}

#[tokio::test]
async fn switch_session_keeps_client_id_and_clears_state() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    manager.connect(session("AAAA", "token-a")).await.unwrap();
    hub.last().emit(TransportEvent::Payload {
        target: targets::SNAPSHOT.to_string(),
        arguments: vec![json!({ "revision": 9 })],
    });
    assert_eq!(manager.store().revision(), Some(9));

    manager.switch_session("BBBB", "token-b").await.unwrap();

    assert_eq!(hub.build_count(), 2);
    let transport = hub.last();
    assert_eq!(transport.config.client_id, "client-1");
    assert_eq!(transport.config.credential, "token-b");
    assert_eq!(manager.store().revision(), None);
    assert_eq!(manager.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn switch_session_needs_a_prior_session() {
    let hub = FakeHub::default();
    let manager = manager(&hub);
    assert!(matches!(
        manager.switch_session("BBBB", "token").await,
        Err(ClientError::NoSession)
    ));
}
