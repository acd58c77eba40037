use crate::agent::ActivitiesApi;
use crate::errors::AppResult;
use crate::models::{Activity, ActivityGroup, BusyFlags, Comment, ConnectionState, Notice, Viewer};
use crate::query::{PageState, Predicate, PredicateValue, QueryState};
use crate::registry::ActivityRegistry;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notifications published by the store. Consumers subscribe instead
/// of tracking fields implicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    PredicateChanged(Predicate),
    ActivitiesReloaded,
    ActivityChanged { activity_id: String },
    ActivityRemoved { activity_id: String },
    SelectionChanged { activity_id: Option<String> },
    FlagsChanged(BusyFlags),
    Notice(Notice),
    Navigate { activity_id: String },
    ConnectionChanged(ConnectionState),
}

pub(crate) struct StoreState {
    pub(crate) registry: ActivityRegistry,
    pub(crate) query: QueryState,
    pub(crate) selected: Option<String>,
    pub(crate) selection_token: u64,
    pub(crate) fetches_in_flight: usize,
    pub(crate) flags: BusyFlags,
}

impl StoreState {
    fn begin_fetch(&mut self) {
        self.fetches_in_flight += 1;
        self.flags.loading_initial = true;
    }

    fn end_fetch(&mut self) {
        self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
        self.flags.loading_initial = self.fetches_in_flight > 0;
    }

    fn select(&mut self, id: Option<String>) {
        self.selected = id;
        self.selection_token += 1;
    }
}

/// Owns the activity cache, the query cursor, the selection and busy flags.
/// Cloning shares the same underlying state.
#[derive(Clone)]
pub struct ActivityStore {
    pub(crate) api: Arc<dyn ActivitiesApi>,
    pub(crate) viewer: Viewer,
    state: Arc<Mutex<StoreState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl ActivityStore {
    pub fn new(api: Arc<dyn ActivitiesApi>, viewer: Viewer, page_size: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            viewer,
            state: Arc::new(Mutex::new(StoreState {
                registry: ActivityRegistry::new(),
                query: QueryState::new(page_size),
                selected: None,
                selection_token: 0,
                fetches_in_flight: 0,
                flags: BusyFlags::default(),
            })),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    pub async fn flags(&self) -> BusyFlags {
        self.lock().await.flags.clone()
    }

    pub async fn predicate(&self) -> Predicate {
        self.lock().await.query.predicate().clone()
    }

    pub async fn page_state(&self) -> PageState {
        self.lock().await.query.page()
    }

    pub async fn total_pages(&self) -> u64 {
        self.lock().await.query.page().total_pages()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.registry.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lock().await.registry.is_empty()
    }

    /// Copy of the cached record, if any.
    pub async fn get(&self, id: &str) -> Option<Activity> {
        self.lock().await.registry.get(id).cloned()
    }

    pub async fn activities(&self) -> Vec<Activity> {
        self.lock().await.registry.values().cloned().collect()
    }

    pub async fn grouped_by_date(&self) -> Vec<ActivityGroup> {
        self.lock().await.registry.grouped_by_date()
    }

    pub async fn selected_id(&self) -> Option<String> {
        self.lock().await.selected.clone()
    }

    /// Current data of the selected activity, looked up by id.
    pub async fn selected(&self) -> Option<Activity> {
        let state = self.lock().await;
        state
            .selected
            .as_deref()
            .and_then(|id| state.registry.get(id))
            .cloned()
    }

    /// Selects a cached activity. Selecting an unknown id clears the selection.
    pub async fn select(&self, id: &str) -> bool {
        let selected = {
            let mut state = self.lock().await;
            let selected = state.registry.contains(id).then(|| id.to_string());
            state.select(selected.clone());
            selected
        };
        let found = selected.is_some();
        self.emit(StoreEvent::SelectionChanged { activity_id: selected });
        found
    }

    pub async fn clear_selection(&self) {
        self.lock().await.select(None);
        self.emit(StoreEvent::SelectionChanged { activity_id: None });
    }

    /// Replaces the filter set, resets paging, empties the cache and reloads.
    /// The selection is cleared along with the cache it pointed into.
    pub async fn set_predicate(&self, name: &str, value: PredicateValue) {
        let (predicate, deselected) = {
            let mut state = self.lock().await;
            state.query.set_predicate(name, value);
            state.registry.clear();
            let deselected = state.selected.is_some();
            state.select(None);
            (state.query.predicate().clone(), deselected)
        };
        tracing::debug!(predicate = ?predicate, "predicate changed, reloading activities");
        self.emit(StoreEvent::PredicateChanged(predicate));
        if deselected {
            self.emit(StoreEvent::SelectionChanged { activity_id: None });
        }
        self.emit(StoreEvent::ActivitiesReloaded);
        self.load_activities().await;
    }

    pub async fn set_page(&self, page: u32) {
        self.lock().await.query.set_page(page);
    }

    /// Advances the cursor and merges the next page. Returns false when the
    /// last known page was already loaded.
    pub async fn load_next_page(&self) -> bool {
        {
            let mut state = self.lock().await;
            let page = state.query.page();
            if !page.has_next_page() {
                return false;
            }
            state.query.set_page(page.page + 1);
        }
        self.load_activities().await;
        true
    }

    /// Fetches the current page and upserts the results. Failures only clear
    /// the loading flag.
    pub async fn load_activities(&self) {
        let (query, generation, flags) = {
            let mut state = self.lock().await;
            state.begin_fetch();
            (state.query.list_query(), state.query.generation(), state.flags.clone())
        };
        self.emit(StoreEvent::FlagsChanged(flags));

        let result = self.api.list(&query).await;

        let (flags, reloaded) = {
            let mut state = self.lock().await;
            let reloaded = if state.query.generation() != generation {
                tracing::debug!(offset = query.offset, "discarding activities fetched under a stale predicate");
                false
            } else {
                match result {
                    Ok(envelope) => {
                        for dto in envelope.activities {
                            state.registry.upsert(Activity::from_dto(dto, &self.viewer));
                        }
                        state.query.record_total(envelope.activity_count);
                        true
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, offset = query.offset, "failed to load activities");
                        false
                    }
                }
            };
            state.end_fetch();
            (state.flags.clone(), reloaded)
        };

        if reloaded {
            self.emit(StoreEvent::ActivitiesReloaded);
        }
        self.emit(StoreEvent::FlagsChanged(flags));
    }

    /// Selects `id` and returns a copy of it, fetching on a cache miss.
    /// Returns `Ok(None)` when the selection moved on before the fetch
    /// completed; the result is then discarded.
    pub async fn load_activity(&self, id: &str) -> AppResult<Option<Activity>> {
        let token = {
            let mut state = self.lock().await;
            if let Some(cached) = state.registry.get(id).cloned() {
                state.select(Some(id.to_string()));
                drop(state);
                self.emit(StoreEvent::SelectionChanged {
                    activity_id: Some(id.to_string()),
                });
                return Ok(Some(cached));
            }
            state.selection_token += 1;
            state.begin_fetch();
            state.selection_token
        };
        self.emit(StoreEvent::FlagsChanged(self.flags().await));

        let result = self.api.details(id).await;

        let (outcome, flags) = {
            let mut state = self.lock().await;
            state.end_fetch();
            let flags = state.flags.clone();
            let outcome = match result {
                Ok(_) if state.selection_token != token => {
                    tracing::debug!(activity_id = %id, "selection changed during fetch, discarding result");
                    Ok(None)
                }
                Ok(dto) => {
                    let activity = Activity::from_dto(dto, &self.viewer);
                    state.registry.upsert(activity.clone());
                    state.select(Some(activity.id.clone()));
                    Ok(Some(activity))
                }
                Err(error) => {
                    tracing::warn!(activity_id = %id, error = %error, "failed to load activity");
                    Err(error)
                }
            };
            (outcome, flags)
        };

        if let Ok(Some(activity)) = &outcome {
            self.emit(StoreEvent::ActivityChanged {
                activity_id: activity.id.clone(),
            });
            self.emit(StoreEvent::SelectionChanged {
                activity_id: Some(activity.id.clone()),
            });
        }
        self.emit(StoreEvent::FlagsChanged(flags));
        outcome
    }

    /// Appends an inbound comment to whatever is selected right now.
    pub(crate) async fn append_comment_to_selected(&self, comment: Comment) -> Option<String> {
        let appended = {
            let mut state = self.lock().await;
            let selected = state.selected.clone()?;
            state
                .registry
                .append_comment(&selected, comment)
                .then_some(selected)
        };
        if let Some(activity_id) = &appended {
            self.emit(StoreEvent::ActivityChanged {
                activity_id: activity_id.clone(),
            });
        }
        appended
    }

    pub(crate) async fn append_comment(&self, activity_id: &str, comment: Comment) -> bool {
        let appended = self.lock().await.registry.append_comment(activity_id, comment);
        if appended {
            self.emit(StoreEvent::ActivityChanged {
                activity_id: activity_id.to_string(),
            });
        }
        appended
    }
}
