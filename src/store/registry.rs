//! Recorder registry
//!
//! Owns the show aggregate. Every mutation goes through a method here and runs
//! inside one write-lock section, so readers never observe a half-applied update.
//! User mutations bump the persistence revision; device refreshes only touch
//! device-derived fields and are published by the reconciler once per pass.

use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, watch};
use uuid::Uuid;

use crate::config::{GatewaySettings, HubSettings};
use crate::device::DeviceStatus;
use crate::error::RegistryError;
use crate::messages::{RegistryEvent, TakeAnnouncement, TriggerTarget};
use crate::model::{
    AppState, Clip, DateFormat, FleetMetrics, Recorder, Take, TemplateKind, TemplateToggles,
};
use crate::template::{generate, sanitize};

const EVENT_CAPACITY: usize = 256;

/// Both sides of an explicit recorder update.
#[derive(Debug, Clone)]
pub struct RecorderUpdate {
    pub previous: Recorder,
    pub current: Recorder,
}

pub struct Registry {
    state: RwLock<AppState>,
    snapshots: watch::Sender<Arc<AppState>>,
    revisions: watch::Sender<u64>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    pub fn new(state: AppState) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(state.clone()));
        let (revisions, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(state),
            snapshots,
            revisions,
            events,
        }
    }

    /// Latest published aggregate, for the UI layer.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<AppState>> {
        self.snapshots.subscribe()
    }

    /// Ticks once per user mutation; the persister writes on change.
    pub fn subscribe_revisions(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> AppState {
        self.state.read().await.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn recorder(&self, id: &str) -> Option<Recorder> {
        self.read(|state| state.recorder(id).cloned()).await
    }

    pub async fn current_take(&self, id: &str) -> Option<String> {
        self.read(|state| state.current_takes.get(id).cloned()).await
    }

    pub async fn metrics(&self) -> FleetMetrics {
        self.read(AppState::metrics).await
    }

    /// Push the current aggregate to snapshot subscribers without persisting.
    pub async fn publish(&self) {
        let state = self.state.read().await;
        self.snapshots.send_replace(Arc::new(state.clone()));
    }

    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut AppState) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let mut state = self.state.write().await;
        let out = f(&mut state)?;
        self.snapshots.send_replace(Arc::new(state.clone()));
        self.revisions.send_modify(|revision| *revision += 1);
        Ok(out)
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn add_recorder(&self, mut recorder: Recorder) -> Result<Recorder, RegistryError> {
        recorder.shot_number = recorder.shot_number.max(1);
        recorder.take_number = recorder.take_number.max(1);

        let added = self
            .mutate(|state| {
                if state.recorder(&recorder.id).is_some() {
                    return Err(RegistryError::DuplicateId(recorder.id.clone()));
                }
                check_collision(state, &recorder.id, recorder.display_name())?;
                state.recorders.push(recorder.clone());
                Ok(recorder)
            })
            .await?;

        tracing::info!(
            recorder = %added.id,
            name = %added.display_name(),
            address = %added.address,
            "Recorder added"
        );
        Ok(added)
    }

    /// Apply the user-editable fields of `update` to the recorder with the same id.
    ///
    /// Device-derived fields (online, transport, timecode, clips) are left alone.
    /// Changing the shot number resets the take number.
    pub async fn update_recorder(&self, update: Recorder) -> Result<RecorderUpdate, RegistryError> {
        let result = self
            .mutate(|state| {
                if TemplateKind::from_id(&update.selected_template).is_none() {
                    return Err(RegistryError::UnknownTemplate(update.selected_template.clone()));
                }
                check_collision(state, &update.id, update.display_name())?;

                let current = state
                    .recorder_mut(&update.id)
                    .ok_or_else(|| RegistryError::RecorderNotFound(update.id.clone()))?;
                let previous = current.clone();

                current.name = update.name;
                current.address = update.address;
                current.enabled = update.enabled;
                current.shot_number = update.shot_number.max(1);
                current.take_number = if current.shot_number != previous.shot_number {
                    1
                } else {
                    update.take_number.max(1)
                };
                current.selected_template = update.selected_template;
                current.custom_text = update.custom_text;
                current.include_show = update.include_show;
                current.include_date = update.include_date;
                current.include_shot_take = update.include_shot_take;
                current.include_custom = update.include_custom;
                current.codec = update.codec;

                Ok(RecorderUpdate {
                    previous,
                    current: current.clone(),
                })
            })
            .await?;

        tracing::info!(recorder = %result.current.id, "Recorder updated");
        Ok(result)
    }

    /// Remove a recorder and its current take. History keeps its takes.
    pub async fn remove_recorder(&self, id: &str) -> Result<Recorder, RegistryError> {
        let removed = self
            .mutate(|state| {
                let index = state
                    .recorders
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or_else(|| RegistryError::RecorderNotFound(id.to_string()))?;
                state.current_takes.remove(id);
                Ok(state.recorders.remove(index))
            })
            .await?;

        tracing::info!(recorder = %id, "Recorder removed");
        Ok(removed)
    }

    /// Make `take_name` the recorder's current take and record it in history.
    pub async fn commit_take(
        &self,
        id: &str,
        take_name: &str,
    ) -> Result<TakeAnnouncement, RegistryError> {
        let announcement = self.mutate(|state| commit(state, id, take_name)).await?;
        tracing::info!(recorder = %id, take = %take_name, "Take committed");
        self.emit(RegistryEvent::TakeCommitted(announcement.clone()));
        Ok(announcement)
    }

    /// Generate a take name from the recorder's template and commit it.
    pub async fn trigger_take(&self, id: &str) -> Result<TakeAnnouncement, RegistryError> {
        let announcement = self.mutate(|state| generate_and_commit(state, id)).await?;
        tracing::info!(recorder = %id, take = %announcement.take_name, "Take triggered");
        self.emit(RegistryEvent::TakeCommitted(announcement.clone()));
        self.emit(RegistryEvent::Triggered(TriggerTarget::Recorder(id.to_string())));
        Ok(announcement)
    }

    /// Trigger every enabled recorder, then notify once for the whole fleet.
    pub async fn trigger_all(&self) -> Vec<TakeAnnouncement> {
        let result = self
            .mutate(|state| {
                let ids: Vec<String> = state
                    .recorders
                    .iter()
                    .filter(|r| r.enabled)
                    .map(|r| r.id.clone())
                    .collect();
                ids.iter()
                    .map(|id| generate_and_commit(state, id))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await;

        // Ids come from the same lock section, so commits cannot miss
        let announcements = result.unwrap_or_default();
        tracing::info!(recorders = announcements.len(), "Triggered all enabled recorders");
        for announcement in &announcements {
            self.emit(RegistryEvent::TakeCommitted(announcement.clone()));
        }
        self.emit(RegistryEvent::Triggered(TriggerTarget::All));
        announcements
    }

    /// Trigger the recorder whose sanitized name matches `token`, creating one if none does.
    ///
    /// Returns the announcement and whether the recorder was discovered by this call.
    pub async fn trigger_by_token(
        &self,
        token: &str,
    ) -> Result<(TakeAnnouncement, bool), RegistryError> {
        let (announcement, discovered) = self
            .mutate(|state| {
                let (id, discovered) = match state.find_by_sanitized(token) {
                    Some(recorder) => (recorder.id.clone(), false),
                    None => {
                        let recorder = discovered_recorder(token);
                        if state.recorder(&recorder.id).is_some() {
                            (recorder.id, false)
                        } else {
                            let id = recorder.id.clone();
                            state.recorders.push(recorder);
                            (id, true)
                        }
                    }
                };
                Ok((generate_and_commit(state, &id)?, discovered))
            })
            .await?;

        if discovered {
            tracing::info!(
                recorder = %announcement.recorder_id,
                token = %token,
                "Recorder discovered from show-control trigger"
            );
        }
        tracing::info!(
            recorder = %announcement.recorder_id,
            take = %announcement.take_name,
            "Take triggered"
        );
        self.emit(RegistryEvent::TakeCommitted(announcement.clone()));
        self.emit(RegistryEvent::Triggered(TriggerTarget::Recorder(
            announcement.recorder_id.clone(),
        )));
        Ok((announcement, discovered))
    }

    /// Set the shot number (clamped to 1). A changed shot resets the take to 1.
    pub async fn set_shot_number(&self, id: &str, shot: u32) -> Result<(u32, u32), RegistryError> {
        self.mutate(|state| {
            let recorder = find_mut(state, id)?;
            let shot = shot.max(1);
            if recorder.shot_number != shot {
                recorder.shot_number = shot;
                recorder.take_number = 1;
            }
            Ok((recorder.shot_number, recorder.take_number))
        })
        .await
    }

    pub async fn set_take_number(&self, id: &str, take: u32) -> Result<u32, RegistryError> {
        self.mutate(|state| {
            let recorder = find_mut(state, id)?;
            recorder.take_number = take.max(1);
            Ok(recorder.take_number)
        })
        .await
    }

    /// Advance to the next shot, starting again at take 1.
    pub async fn increment_shot(&self, id: &str) -> Result<(u32, u32), RegistryError> {
        let numbers = self
            .mutate(|state| {
                let recorder = find_mut(state, id)?;
                recorder.shot_number = recorder.shot_number.saturating_add(1).max(1);
                recorder.take_number = 1;
                Ok((recorder.shot_number, recorder.take_number))
            })
            .await?;
        tracing::info!(recorder = %id, shot = numbers.0, "Shot incremented");
        Ok(numbers)
    }

    pub async fn increment_take(&self, id: &str) -> Result<u32, RegistryError> {
        let take = self
            .mutate(|state| {
                let recorder = find_mut(state, id)?;
                recorder.take_number = recorder.take_number.saturating_add(1).max(1);
                Ok(recorder.take_number)
            })
            .await?;
        tracing::info!(recorder = %id, take = take, "Take incremented");
        Ok(take)
    }

    pub async fn set_template_toggles(
        &self,
        id: &str,
        toggles: TemplateToggles,
    ) -> Result<(), RegistryError> {
        self.mutate(|state| {
            let recorder = find_mut(state, id)?;
            recorder.include_show = toggles.include_show;
            recorder.include_date = toggles.include_date;
            recorder.include_shot_take = toggles.include_shot_take;
            recorder.include_custom = toggles.include_custom;
            Ok(())
        })
        .await
    }

    pub async fn set_selected_template(
        &self,
        id: &str,
        template_id: &str,
    ) -> Result<(), RegistryError> {
        if TemplateKind::from_id(template_id).is_none() {
            return Err(RegistryError::UnknownTemplate(template_id.to_string()));
        }
        self.mutate(|state| {
            find_mut(state, id)?.selected_template = template_id.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_custom_text(&self, id: &str, text: &str) -> Result<(), RegistryError> {
        self.mutate(|state| {
            find_mut(state, id)?.custom_text = text.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_show_name(&self, name: &str) {
        let _ = self
            .mutate(|state| {
                state.show_name = name.to_string();
                Ok(())
            })
            .await;
    }

    pub async fn set_date_format(&self, format: DateFormat) {
        let _ = self
            .mutate(|state| {
                state.date_format = format;
                Ok(())
            })
            .await;
    }

    pub async fn set_gateway_settings(
        &self,
        settings: GatewaySettings,
    ) -> Result<GatewaySettings, RegistryError> {
        settings.validate().map_err(RegistryError::InvalidSettings)?;
        self.mutate(|state| {
            state.gateway = settings.clone();
            Ok(settings)
        })
        .await
    }

    /// Store hub settings, keeping the persisted node id when the update has none.
    pub async fn set_hub_settings(
        &self,
        mut settings: HubSettings,
    ) -> Result<HubSettings, RegistryError> {
        settings.validate().map_err(RegistryError::InvalidSettings)?;
        self.mutate(|state| {
            if settings.node_id.as_deref().is_none_or(str::is_empty) {
                settings.node_id = state.hub.node_id.clone();
            }
            settings.ensure_node_id();
            state.hub = settings.clone();
            Ok(settings)
        })
        .await
    }

    pub async fn set_clips(&self, id: &str, clips: Vec<Clip>) -> Result<(), RegistryError> {
        self.mutate(|state| {
            find_mut(state, id)?.clips = clips;
            Ok(())
        })
        .await
    }

    /// Fold one refresh result into the device-derived fields.
    ///
    /// Returns false when the recorder is gone. Not persisted and not published;
    /// callers publish once their batch is done.
    pub async fn apply_device_status(&self, id: &str, status: DeviceStatus) -> bool {
        let mut state = self.state.write().await;
        let Some(recorder) = state.recorder_mut(id) else {
            return false;
        };

        recorder.online = status.online;
        recorder.last_checked = Some(now_millis());
        if status.online {
            if let Some(codec) = status.codec {
                recorder.codec = Some(codec);
            }
            if let Some(transport) = status.transport.status {
                recorder.transport_status = Some(transport);
            }
            if let Some(timecode) = status.transport.timecode {
                recorder.timecode = Some(timecode);
            }
        } else {
            recorder.transport_status = None;
            recorder.timecode = None;
        }
        true
    }

    /// Start a new show: recorders, takes, history and show name are cleared.
    pub async fn new_show(&self) {
        let _ = self
            .mutate(|state| {
                *state = AppState {
                    templates: std::mem::take(&mut state.templates),
                    date_format: state.date_format,
                    gateway: state.gateway.clone(),
                    hub: state.hub.clone(),
                    ..AppState::default()
                };
                Ok(())
            })
            .await;
        tracing::info!("New show started");
    }

    /// Replace the whole aggregate (show import).
    pub async fn replace(&self, new_state: AppState) {
        let recorders = new_state.recorders.len();
        let _ = self
            .mutate(|state| {
                *state = new_state;
                Ok(())
            })
            .await;
        tracing::info!(recorders = recorders, "Show state replaced");
    }

    /// Announce one recorder's current take (or the name it would get now).
    pub async fn announce(&self, id: &str) -> Result<(), RegistryError> {
        let announcement = self
            .read(|state| {
                state
                    .recorder(id)
                    .map(|recorder| current_announcement(state, recorder))
            })
            .await
            .ok_or_else(|| RegistryError::RecorderNotFound(id.to_string()))?;
        self.emit(RegistryEvent::RecorderAnnounced(announcement));
        Ok(())
    }

    /// Current take of every recorder, for periodic announcements.
    pub async fn announcements(&self) -> Vec<TakeAnnouncement> {
        self.read(|state| {
            state
                .recorders
                .iter()
                .map(|recorder| current_announcement(state, recorder))
                .collect()
        })
        .await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn find_mut<'a>(state: &'a mut AppState, id: &str) -> Result<&'a mut Recorder, RegistryError> {
    state
        .recorder_mut(id)
        .ok_or_else(|| RegistryError::RecorderNotFound(id.to_string()))
}

fn check_collision(state: &AppState, id: &str, name: &str) -> Result<(), RegistryError> {
    let key = sanitize(name);
    match state
        .recorders
        .iter()
        .find(|r| r.id != id && r.sanitized_name() == key)
    {
        Some(existing) => Err(RegistryError::NameCollision {
            name: name.to_string(),
            existing: existing.display_name().to_string(),
        }),
        None => Ok(()),
    }
}

fn discovered_recorder(token: &str) -> Recorder {
    Recorder::new(token.to_lowercase(), token.replace('_', "-"), "")
}

fn announcement(recorder: &Recorder, take_name: &str) -> TakeAnnouncement {
    TakeAnnouncement {
        recorder_id: recorder.id.clone(),
        display_name: recorder.display_name().to_string(),
        take_name: take_name.to_string(),
        shot_number: recorder.shot_number.max(1),
        take_number: recorder.take_number.max(1),
    }
}

fn current_announcement(state: &AppState, recorder: &Recorder) -> TakeAnnouncement {
    let take_name = match state.current_takes.get(&recorder.id) {
        Some(name) => name.clone(),
        None => generate(recorder, &state.show_name, state.date_format),
    };
    announcement(recorder, &take_name)
}

fn generate_and_commit(state: &mut AppState, id: &str) -> Result<TakeAnnouncement, RegistryError> {
    let recorder = state
        .recorder(id)
        .ok_or_else(|| RegistryError::RecorderNotFound(id.to_string()))?;
    let take_name = generate(recorder, &state.show_name, state.date_format);
    commit(state, id, &take_name)?;

    let recorder = find_mut(state, id)?;
    if recorder.template_kind() == Some(TemplateKind::Take) {
        recorder.take_number = recorder.take_number.saturating_add(1).max(1);
    }
    Ok(announcement(recorder, &take_name))
}

/// Current take and history entry in one step. Numbers are left alone.
fn commit(state: &mut AppState, id: &str, take_name: &str) -> Result<TakeAnnouncement, RegistryError> {
    if state.recorder(id).is_none() {
        return Err(RegistryError::RecorderNotFound(id.to_string()));
    }

    state
        .current_takes
        .insert(id.to_string(), take_name.to_string());
    state.push_history(Take {
        id: Uuid::new_v4().to_string(),
        name: take_name.to_string(),
        timestamp: now_millis(),
        recorder_id: Some(id.to_string()),
        metadata: None,
    });

    let recorder = find_mut(state, id)?;
    Ok(announcement(recorder, take_name))
}
