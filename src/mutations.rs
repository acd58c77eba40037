//! Write-through mutations. Local state changes only after the remote call
//! succeeds; failures raise a single notice and leave the cache untouched.

use crate::errors::{AppError, AppResult};
use crate::models::{Activity, Attendee, Notice};
use crate::store::{ActivityStore, StoreEvent};

impl ActivityStore {
    async fn set_submitting(&self, submitting: bool, target: Option<String>) {
        let flags = {
            let mut state = self.lock().await;
            state.flags.submitting = submitting;
            state.flags.target = target;
            state.flags.clone()
        };
        self.emit(StoreEvent::FlagsChanged(flags));
    }

    async fn set_loading(&self, loading: bool) {
        let flags = {
            let mut state = self.lock().await;
            state.flags.loading = loading;
            state.flags.clone()
        };
        self.emit(StoreEvent::FlagsChanged(flags));
    }

    fn report_failure(&self, message: &str, error: &AppError) {
        tracing::warn!(error = %error, code = error.code(), "{}", message);
        self.emit(StoreEvent::Notice(Notice::error(message)));
    }

    /// Creates `activity` remotely, then caches it with the viewer as host
    /// and requests navigation to it.
    pub async fn create(&self, activity: Activity) -> AppResult<()> {
        self.set_submitting(true, None).await;

        let result = self.api.create(&activity.to_dto()).await;
        match &result {
            Ok(()) => {
                let mut created = activity;
                let mut host = Attendee::from_viewer(&self.viewer);
                host.is_host = true;
                created.attendees = vec![host];
                created.comments = Vec::new();
                created.is_host = true;
                created.main_image = self.viewer.image.clone();
                let activity_id = created.id.clone();

                self.lock().await.registry.upsert(created);
                tracing::info!(activity_id = %activity_id, "activity created");
                self.emit(StoreEvent::ActivityChanged {
                    activity_id: activity_id.clone(),
                });
                self.emit(StoreEvent::Navigate { activity_id });
            }
            Err(error) => self.report_failure("Problem submitting data", error),
        }

        self.set_submitting(false, None).await;
        result
    }

    /// Updates `activity` remotely, then overwrites the cached copy and
    /// selects it.
    pub async fn update(&self, activity: Activity) -> AppResult<()> {
        self.set_submitting(true, None).await;

        let result = self.api.update(&activity.to_dto()).await;
        match &result {
            Ok(()) => {
                let activity_id = activity.id.clone();
                {
                    let mut state = self.lock().await;
                    state.registry.upsert(activity);
                    state.selected = Some(activity_id.clone());
                    state.selection_token += 1;
                }
                self.emit(StoreEvent::ActivityChanged {
                    activity_id: activity_id.clone(),
                });
                self.emit(StoreEvent::SelectionChanged {
                    activity_id: Some(activity_id.clone()),
                });
                self.emit(StoreEvent::Navigate { activity_id });
            }
            Err(error) => self.report_failure("Problem submitting data", error),
        }

        self.set_submitting(false, None).await;
        result
    }

    /// Deletes `id` remotely and evicts it. `target` names the control that
    /// triggered the delete so only that control shows a busy indicator.
    pub async fn delete(&self, target: &str, id: &str) -> AppResult<()> {
        self.set_submitting(true, Some(target.to_string())).await;

        let result = self.api.delete(id).await;
        match &result {
            Ok(()) => {
                {
                    let mut state = self.lock().await;
                    state.registry.remove(id);
                    if state.selected.as_deref() == Some(id) {
                        state.selected = None;
                        state.selection_token += 1;
                    }
                }
                tracing::info!(activity_id = %id, "activity deleted");
                self.emit(StoreEvent::ActivityRemoved {
                    activity_id: id.to_string(),
                });
            }
            Err(error) => self.report_failure("Problem deleting activity", error),
        }

        self.set_submitting(false, None).await;
        result
    }

    /// Id of the selected activity, which must still be cached.
    async fn require_selected(&self) -> AppResult<String> {
        let state = self.lock().await;
        match state.selected.as_deref() {
            Some(id) if state.registry.contains(id) => Ok(id.to_string()),
            Some(id) => Err(AppError::NotFound(format!("selected activity {} is not cached", id))),
            None => Err(AppError::Precondition("no activity selected".to_string())),
        }
    }

    async fn apply_to_cached<F>(&self, activity_id: &str, apply: F) -> AppResult<()>
    where
        F: FnOnce(&mut Activity),
    {
        let applied = match self.lock().await.registry.get_mut(activity_id) {
            Some(activity) => {
                apply(activity);
                true
            }
            None => false,
        };
        if !applied {
            return Err(AppError::NotFound(format!(
                "activity {} was evicted before the change could be applied",
                activity_id
            )));
        }
        self.emit(StoreEvent::ActivityChanged {
            activity_id: activity_id.to_string(),
        });
        Ok(())
    }

    /// Signs the viewer up for the selected activity.
    pub async fn attend(&self) -> AppResult<()> {
        const FAILURE: &str = "Problem signing up to activity";
        let activity_id = match self.require_selected().await {
            Ok(activity_id) => activity_id,
            Err(error @ AppError::NotFound(_)) => {
                self.report_failure(FAILURE, &error);
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        self.set_loading(true).await;

        let result = match self.api.attend(&activity_id).await {
            Ok(()) => {
                let viewer = &self.viewer;
                self.apply_to_cached(&activity_id, |activity| {
                    if !activity
                        .attendees
                        .iter()
                        .any(|attendee| attendee.username == viewer.username)
                    {
                        activity.attendees.push(Attendee::from_viewer(viewer));
                    }
                    activity.is_going = true;
                })
                .await
            }
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            self.report_failure(FAILURE, error);
        }

        self.set_loading(false).await;
        result
    }

    /// Removes the viewer from the selected activity's attendees.
    pub async fn cancel_attendance(&self) -> AppResult<()> {
        const FAILURE: &str = "Problem cancelling attendance";
        let activity_id = match self.require_selected().await {
            Ok(activity_id) => activity_id,
            Err(error @ AppError::NotFound(_)) => {
                self.report_failure(FAILURE, &error);
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        self.set_loading(true).await;

        let result = match self.api.unattend(&activity_id).await {
            Ok(()) => {
                let username = self.viewer.username.as_str();
                self.apply_to_cached(&activity_id, |activity| {
                    activity.attendees.retain(|attendee| attendee.username != username);
                    activity.is_going = false;
                })
                .await
            }
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            self.report_failure(FAILURE, error);
        }

        self.set_loading(false).await;
        result
    }
}
