#![allow(dead_code)]

use activity_client_core::agent::{ActivitiesApi, AuthApi};
use activity_client_core::db::Database;
use activity_client_core::errors::{AppError, AppResult};
use activity_client_core::live::{HubConnection, HubLink, HubState, HubTransport, InboundFrame, TokenFactory};
use activity_client_core::models::{ActivitiesEnvelope, ActivityDto, Attendee, ClientSettings, Viewer};
use activity_client_core::query::ListQuery;
use activity_client_core::store::StoreEvent;
use activity_client_core::ClientCore;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

pub const VIEWER: &str = "bob";

pub fn viewer() -> Viewer {
    Viewer {
        username: VIEWER.to_string(),
        display_name: "Bob".to_string(),
        image: Some("https://img/bob.png".to_string()),
    }
}

pub fn attendee(username: &str, is_host: bool) -> Attendee {
    Attendee {
        username: username.to_string(),
        display_name: username.to_uppercase(),
        image: None,
        is_host,
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap()
}

pub fn dto(id: &str, date: DateTime<Utc>, attendees: Vec<Attendee>) -> ActivityDto {
    ActivityDto {
        id: id.to_string(),
        title: format!("Activity {}", id),
        description: "description".to_string(),
        category: "music".to_string(),
        date,
        city: "Berlin".to_string(),
        venue: "Club".to_string(),
        attendees,
        comments: Vec::new(),
    }
}

pub fn jwt_expiring_at(at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"nameid":"bob","exp":{}}}"#, at.timestamp()));
    format!("{}.{}.sig", header, payload)
}

/// Lets a test observe state while a fake call is suspended.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }

    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(2), self.entered.notified())
            .await
            .expect("gated call entered");
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub server: Mutex<Vec<ActivityDto>>,
    pub list_queries: Mutex<Vec<ListQuery>>,
    pub calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

impl FakeApi {
    pub fn with(activities: Vec<ActivityDto>) -> Arc<Self> {
        let api = Self::default();
        *api.server.lock().unwrap() = activities;
        Arc::new(api)
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn gate(&self, op: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(op, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, op: &'static str, subject: &str) -> AppResult<()> {
        self.calls.lock().unwrap().push(format!("{}:{}", op, subject));
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(AppError::ValidationRejected(format!("{} rejected", op)));
        }
        Ok(())
    }
}

fn matches_filters(activity: &ActivityDto, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(name, value)| match name.as_str() {
        "isGoing" => activity.attendees.iter().any(|a| a.username == VIEWER) == (value == "true"),
        "isHost" => activity.attendees.iter().any(|a| a.username == VIEWER && a.is_host) == (value == "true"),
        _ => true,
    })
}

#[async_trait]
impl ActivitiesApi for FakeApi {
    async fn list(&self, query: &ListQuery) -> AppResult<ActivitiesEnvelope> {
        self.list_queries.lock().unwrap().push(query.clone());
        self.enter("list", &query.offset.to_string()).await?;
        let matching = self
            .server
            .lock()
            .unwrap()
            .iter()
            .filter(|activity| matches_filters(activity, &query.filters))
            .cloned()
            .collect::<Vec<_>>();
        let activities = matching
            .iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(ActivitiesEnvelope {
            activities,
            activity_count: matching.len() as u64,
        })
    }

    async fn details(&self, id: &str) -> AppResult<ActivityDto> {
        self.enter("details", id).await?;
        self.server
            .lock()
            .unwrap()
            .iter()
            .find(|activity| activity.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("activity {}", id)))
    }

    async fn create(&self, activity: &ActivityDto) -> AppResult<()> {
        self.enter("create", &activity.id).await?;
        self.server.lock().unwrap().push(activity.clone());
        Ok(())
    }

    async fn update(&self, activity: &ActivityDto) -> AppResult<()> {
        self.enter("update", &activity.id).await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.enter("delete", id).await
    }

    async fn attend(&self, id: &str) -> AppResult<()> {
        self.enter("attend", id).await
    }

    async fn unattend(&self, id: &str) -> AppResult<()> {
        self.enter("unattend", id).await
    }
}

#[derive(Default)]
pub struct FakeAuth {
    pub refreshes: AtomicUsize,
}

#[async_trait]
impl AuthApi for FakeAuth {
    async fn refresh_token(&self, _access_token: &str, _refresh_token: &str) -> AppResult<String> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("refreshed-token-{}", n))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: String,
    pub args: Vec<serde_json::Value>,
    pub token: Option<String>,
}

#[derive(Default)]
pub struct FakeHub {
    pub invocations: Arc<Mutex<Vec<Invocation>>>,
    pub stops: Arc<AtomicUsize>,
    pub connects: AtomicUsize,
    pub failing_methods: Arc<Mutex<HashSet<String>>>,
    senders: Mutex<Vec<mpsc::Sender<InboundFrame>>>,
    stalled: AtomicBool,
}

impl FakeHub {
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Links handed out from now on stay in `Connecting`.
    pub fn stall_connections(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn fail_method(&self, method: &str) {
        self.failing_methods.lock().unwrap().insert(method.to_string());
    }

    pub async fn push(&self, event: &str, payload: serde_json::Value) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("an open connection");
        sender
            .send(InboundFrame {
                event: event.to_string(),
                payload,
            })
            .await
            .expect("dispatcher alive");
    }
}

struct FakeConnection {
    token_factory: TokenFactory,
    state: Mutex<HubState>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    stops: Arc<AtomicUsize>,
    failing_methods: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl HubConnection for FakeConnection {
    fn state(&self) -> HubState {
        *self.state.lock().unwrap()
    }

    async fn invoke(&self, method: &str, args: Vec<serde_json::Value>) -> anyhow::Result<()> {
        let token = (self.token_factory)().await;
        self.invocations.lock().unwrap().push(Invocation {
            method: method.to_string(),
            args,
            token: token.clone(),
        });
        if token.is_none() {
            anyhow::bail!("401 unauthorized");
        }
        if self.failing_methods.lock().unwrap().contains(method) {
            anyhow::bail!("hub method {} failed", method);
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        *self.state.lock().unwrap() = HubState::Disconnected;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    async fn connect(&self, _url: &str, token_factory: TokenFactory) -> anyhow::Result<HubLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (sender, inbound) = mpsc::channel(16);
        self.senders.lock().unwrap().push(sender);
        let state = if self.stalled.load(Ordering::SeqCst) {
            HubState::Connecting
        } else {
            HubState::Connected
        };
        Ok(HubLink {
            connection: Arc::new(FakeConnection {
                token_factory,
                state: Mutex::new(state),
                invocations: self.invocations.clone(),
                stops: self.stops.clone(),
                failing_methods: self.failing_methods.clone(),
            }),
            inbound,
        })
    }
}

pub struct Harness {
    pub core: ClientCore,
    pub api: Arc<FakeApi>,
    pub auth: Arc<FakeAuth>,
    pub hub: Arc<FakeHub>,
    _dir: tempfile::TempDir,
}

pub fn harness_with(activities: Vec<ActivityDto>, settings: ClientSettings) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::new(&dir.path().join("client.sqlite")).expect("db"));
    let api = FakeApi::with(activities);
    let auth = Arc::new(FakeAuth::default());
    let hub = Arc::new(FakeHub::default());
    let core = ClientCore::with_collaborators(
        db.clone(),
        db,
        settings,
        api.clone(),
        auth.clone(),
        hub.clone(),
        viewer(),
    );
    Harness {
        core,
        api,
        auth,
        hub,
        _dir: dir,
    }
}

pub fn harness(activities: Vec<ActivityDto>) -> Harness {
    harness_with(activities, ClientSettings::default())
}

pub fn signed_in(activities: Vec<ActivityDto>, settings: ClientSettings) -> Harness {
    let harness = harness_with(activities, settings);
    let token = jwt_expiring_at(Utc::now() + chrono::Duration::hours(1));
    harness.core.sign_in(&token, "refresh-1").expect("sign in");
    harness
}

pub async fn next_event<F>(events: &mut broadcast::Receiver<StoreEvent>, matches: F) -> StoreEvent
where
    F: Fn(&StoreEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected store event")
}

pub fn drain(events: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
