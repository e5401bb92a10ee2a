//! The device client over real HTTP: the router is served on an ephemeral
//! port and driven through [`HttpSessionApi`], including the event stream.

use chrono::{Duration as TokenTtl, Utc};
use focus_sync::client::{
    ClientConfig, ClientError, FinalizeOutcome, FocusClient, HttpSessionApi, Reconciled,
    SessionApi,
};
use focus_sync::models::EndSessionRequest;
use focus_sync::repositories::MemoryStore;
use focus_sync::{create_app, AppState, Config};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

struct Server {
    addr: SocketAddr,
    state: AppState,
    store: Arc<MemoryStore>,
}

impl Server {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            stream_interval: Duration::from_millis(100),
            ..Config::default()
        };
        let state = AppState::new(store.clone(), store.clone(), &config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_app(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        Self { addr, state, store }
    }

    fn api(&self, user: Uuid) -> HttpSessionApi {
        let token = self
            .state
            .jwt_secret()
            .issue(user, TokenTtl::hours(1))
            .unwrap();
        HttpSessionApi::new(format!("http://{}", self.addr), token).unwrap()
    }

    /// Two online friends and the session the leader created for them.
    async fn paired(&self) -> (Uuid, Uuid, Uuid) {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        self.store.add_friendship(a, b).await;
        let presence = self.state.presence_service();
        presence.record_heartbeat(a).await.unwrap();
        presence.record_heartbeat(b).await.unwrap();
        self.state.coordinator().run_for(a).await.unwrap();
        self.state.coordinator().run_for(b).await.unwrap();
        let sessions = self.store.all_sessions().await;
        assert_eq!(sessions.len(), 1);
        (a, b, sessions[0].id)
    }
}

fn quick() -> ClientConfig {
    ClientConfig {
        pause_debounce: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn client_pauses_and_finalizes_over_http() {
    let server = Server::start().await;
    let (a, b, session_id) = server.paired().await;

    let sessions = server.api(b).active_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, session_id);

    let client = FocusClient::new(server.api(a), a, quick());
    assert_eq!(client.reconcile_now().await.unwrap(), Reconciled::Entered(session_id));

    client.set_picked_up(true).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = server
        .state
        .pause_aggregator()
        .aggregate_status(session_id)
        .await
        .unwrap();
    assert!(status.is_paused);

    let outcome = client.end().await.unwrap();
    assert!(matches!(
        outcome,
        FinalizeOutcome::Recorded { session_id: Some(id), attempts: 1, .. } if id == session_id
    ));

    let err = server
        .api(b)
        .end_session(session_id, EndSessionRequest { end_time: Utc::now(), minutes: 5 })
        .await
        .unwrap_err();
    assert!(err.is_already_ended());
    assert!(matches!(err, ClientError::Api { status: 400, .. }));

    let sessions = server.api(b).active_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].status.is_active());
}

#[tokio::test]
async fn session_feed_delivers_snapshots() {
    let server = Server::start().await;
    let (a, _, session_id) = server.paired().await;

    let feed = server.api(a).session_feed().await.unwrap();
    let mut feed = Box::pin(feed);
    let sessions = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("a snapshot within one stream interval")
        .expect("feed still open");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, session_id);
    assert!(sessions[0].status.is_active());
}

#[tokio::test]
async fn manual_session_is_created_finalized_over_http() {
    let server = Server::start().await;
    let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());

    let client = FocusClient::new(server.api(me), me, quick());
    client.start_manual(&[peer]).await.unwrap();
    let outcome = client.end().await.unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Recorded { attempts: 1, .. }));

    let sessions = server.store.all_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].status.is_active());
}

#[tokio::test]
async fn bad_token_is_rejected() {
    let server = Server::start().await;
    let api = HttpSessionApi::new(format!("http://{}", server.addr), "not-a-token").unwrap();

    let err = api.active_sessions().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Api { status: 401, ref code, .. } if code == "unauthorized"
    ));
    assert!(api.session_feed().await.is_err());
}
