//! Operations requested by the UI layer and the monitoring hub
//!
//! Registry mutations and deck commands are combined here so every caller gets the
//! same behavior: adding a recorder checks it and announces it, address changes
//! re-check it, and a codec change is pushed to a deck that is online.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::device::protocol::{is_line_safe, is_timecode};
use crate::device::{DeckConnector, DeviceStatus, TransportCommand, VideoInput};
use crate::error::{OpError, RegistryError};
use crate::messages::TakeAnnouncement;
use crate::model::{Clip, DateFormat, FleetMetrics, Recorder, TemplateToggles};
use crate::services::hub::{HubBackend, HubCommand};
use crate::store::Registry;
use crate::template;

pub struct Operations {
    registry: Arc<Registry>,
    decks: DeckConnector,
}

impl Operations {
    pub fn new(registry: Arc<Registry>, decks: DeckConnector) -> Self {
        Self { registry, decks }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn recorder(&self, id: &str) -> Result<Recorder, OpError> {
        self.registry
            .recorder(id)
            .await
            .ok_or_else(|| RegistryError::RecorderNotFound(id.to_string()).into())
    }

    /// Check reachability right away instead of waiting for the next status pass.
    async fn check_online(&self, recorder: &Recorder) -> bool {
        let online = self.decks.client(&recorder.address).check_online().await;
        let status = if online {
            DeviceStatus::online()
        } else {
            DeviceStatus::offline()
        };
        self.registry.apply_device_status(&recorder.id, status).await;
        self.registry.publish().await;
        online
    }

    pub async fn add_recorder(&self, mut recorder: Recorder) -> Result<Recorder, OpError> {
        if recorder.id.is_empty() {
            recorder.id = Uuid::new_v4().to_string();
        }
        let added = self.registry.add_recorder(recorder).await?;
        self.check_online(&added).await;
        self.registry.announce(&added.id).await?;
        self.recorder(&added.id).await
    }

    pub async fn update_recorder(&self, update: Recorder) -> Result<Recorder, OpError> {
        let change = self.registry.update_recorder(update).await?;
        let id = change.current.id.clone();

        if change.previous.address != change.current.address {
            tracing::info!(
                recorder = %id,
                address = %change.current.address,
                "Recorder address changed"
            );
            self.check_online(&change.current).await;
        }

        if change.previous.codec != change.current.codec {
            let current = self.recorder(&id).await?;
            if let (true, Some(codec)) = (current.online, current.codec.as_deref()) {
                if self.decks.client(&current.address).set_codec(codec).await {
                    tracing::info!(recorder = %id, codec = %codec, "Codec pushed to deck");
                } else {
                    tracing::warn!(recorder = %id, codec = %codec, "Failed to push codec to deck");
                }
            }
        }

        self.recorder(&id).await
    }

    pub async fn remove_recorder(&self, id: &str) -> Result<Recorder, OpError> {
        Ok(self.registry.remove_recorder(id).await?)
    }

    /// Commit a take name typed by the operator.
    pub async fn set_take_name(&self, id: &str, take_name: &str) -> Result<TakeAnnouncement, OpError> {
        let take_name = validated_take_name(take_name)?;
        Ok(self.registry.commit_take(id, take_name).await?)
    }

    pub async fn trigger_take(&self, id: &str) -> Result<TakeAnnouncement, OpError> {
        Ok(self.registry.trigger_take(id).await?)
    }

    pub async fn trigger_all(&self) -> Vec<TakeAnnouncement> {
        self.registry.trigger_all().await
    }

    /// Name the deck's next recording after the current take, or a freshly generated one.
    pub async fn push_take_to_deck(&self, id: &str) -> Result<String, OpError> {
        let recorder = self.recorder(id).await?;
        let take_name = match self.registry.current_take(id).await {
            Some(name) => name,
            None => {
                let (show_name, date_format) = self
                    .registry
                    .read(|state| (state.show_name.clone(), state.date_format))
                    .await;
                template::generate(&recorder, &show_name, date_format)
            }
        };

        if !self.decks.client(&recorder.address).set_take_filename(&take_name).await {
            return Err(OpError::deck("Failed to set take name on deck"));
        }
        tracing::info!(recorder = %id, take = %take_name, "Take name pushed to deck");
        Ok(take_name)
    }

    pub async fn set_show_name(&self, name: &str) {
        self.registry.set_show_name(name).await;
    }

    pub async fn set_date_format(&self, format: DateFormat) {
        self.registry.set_date_format(format).await;
    }

    /// Today's date in the selected format.
    pub async fn formatted_date(&self) -> String {
        let format = self.registry.read(|state| state.date_format).await;
        template::formatted_date(format)
    }

    pub async fn set_shot_number(&self, id: &str, shot: u32) -> Result<(u32, u32), OpError> {
        Ok(self.registry.set_shot_number(id, shot).await?)
    }

    pub async fn set_take_number(&self, id: &str, take: u32) -> Result<u32, OpError> {
        Ok(self.registry.set_take_number(id, take).await?)
    }

    pub async fn increment_shot(&self, id: &str) -> Result<(u32, u32), OpError> {
        Ok(self.registry.increment_shot(id).await?)
    }

    pub async fn increment_take(&self, id: &str) -> Result<u32, OpError> {
        Ok(self.registry.increment_take(id).await?)
    }

    pub async fn set_template_toggles(&self, id: &str, toggles: TemplateToggles) -> Result<(), OpError> {
        Ok(self.registry.set_template_toggles(id, toggles).await?)
    }

    pub async fn set_selected_template(&self, id: &str, template_id: &str) -> Result<(), OpError> {
        Ok(self.registry.set_selected_template(id, template_id).await?)
    }

    pub async fn set_custom_text(&self, id: &str, text: &str) -> Result<(), OpError> {
        Ok(self.registry.set_custom_text(id, text).await?)
    }

    async fn transport(&self, id: &str, command: TransportCommand) -> Result<(), OpError> {
        let recorder = self.recorder(id).await?;
        if !self.decks.client(&recorder.address).transport(&command).await {
            return Err(OpError::deck(format!("Failed to send {} command", command.label())));
        }
        tracing::info!(recorder = %id, command = command.label(), "Transport command sent");
        Ok(())
    }

    pub async fn play(&self, id: &str) -> Result<(), OpError> {
        self.transport(id, TransportCommand::Play).await
    }

    pub async fn stop(&self, id: &str) -> Result<(), OpError> {
        self.transport(id, TransportCommand::Stop).await
    }

    pub async fn record(&self, id: &str) -> Result<(), OpError> {
        self.transport(id, TransportCommand::Record).await
    }

    pub async fn previous_clip(&self, id: &str) -> Result<(), OpError> {
        self.transport(id, TransportCommand::PreviousClip).await
    }

    pub async fn next_clip(&self, id: &str) -> Result<(), OpError> {
        self.transport(id, TransportCommand::NextClip).await
    }

    pub async fn goto_clip(&self, id: &str, clip: u32) -> Result<(), OpError> {
        self.transport(id, TransportCommand::GotoClip(clip)).await
    }

    pub async fn play_clip(&self, id: &str, clip: u32) -> Result<(), OpError> {
        self.transport(id, TransportCommand::PlayClip(clip)).await
    }

    pub async fn goto_timecode(&self, id: &str, timecode: &str) -> Result<(), OpError> {
        if !is_timecode(timecode) {
            return Err(OpError::Invalid {
                field: "timecode",
                reason: format!("expected HH:MM:SS:FF, got '{}'", timecode),
            });
        }
        self.transport(id, TransportCommand::GotoTimecode(timecode.to_string()))
            .await
    }

    pub async fn set_video_input(&self, id: &str, input: VideoInput) -> Result<(), OpError> {
        let recorder = self.recorder(id).await?;
        if !self.decks.client(&recorder.address).set_video_input(input).await {
            return Err(OpError::deck("Failed to set video input"));
        }
        tracing::info!(recorder = %id, input = %input, "Video input set");
        Ok(())
    }

    /// Fetch the deck's clip list and keep it on the recorder.
    pub async fn get_clips(&self, id: &str) -> Result<Vec<Clip>, OpError> {
        let recorder = self.recorder(id).await?;
        let clips = self.decks.client(&recorder.address).list_clips().await;
        self.registry.set_clips(id, clips.clone()).await?;
        tracing::debug!(recorder = %id, clips = clips.len(), "Clip list updated");
        Ok(clips)
    }

    pub async fn metrics(&self) -> FleetMetrics {
        self.registry.metrics().await
    }
}

#[async_trait]
impl HubBackend for Operations {
    async fn execute(&self, command: HubCommand) -> Result<Value, OpError> {
        tracing::debug!(command = command.name(), "Executing hub command");
        match command {
            HubCommand::SetTakeName {
                recorder_id,
                take_name,
            } => {
                let take_name = validated_take_name(&take_name)?.to_string();
                let recorder = self.recorder(&recorder_id).await?;
                if recorder.online
                    && !self
                        .decks
                        .client(&recorder.address)
                        .set_take_filename(&take_name)
                        .await
                {
                    return Err(OpError::deck("Failed to set take name on deck"));
                }
                self.registry.commit_take(&recorder_id, &take_name).await?;
                Ok(json!({
                    "success": true,
                    "recorderId": recorder_id,
                    "takeName": take_name,
                }))
            }
            HubCommand::IncrementTake { recorder_id } => {
                let take = self.increment_take(&recorder_id).await?;
                Ok(json!({ "recorderId": recorder_id, "takeNumber": take }))
            }
            HubCommand::IncrementShot { recorder_id } => {
                let (shot, take) = self.increment_shot(&recorder_id).await?;
                Ok(json!({ "recorderId": recorder_id, "shotNumber": shot, "takeNumber": take }))
            }
            HubCommand::StartRecording { recorder_id } => {
                self.record(&recorder_id).await?;
                Ok(json!({ "success": true, "recorderId": recorder_id }))
            }
            HubCommand::StopRecording { recorder_id } => {
                self.stop(&recorder_id).await?;
                Ok(json!({ "success": true, "recorderId": recorder_id }))
            }
            HubCommand::GetRecorders => {
                let recorders = self
                    .registry
                    .read(|state| {
                        state
                            .recorders
                            .iter()
                            .map(|r| {
                                json!({
                                    "id": r.id,
                                    "name": r.name,
                                    "ipAddress": r.address,
                                    "online": r.online,
                                    "transportStatus": r.transport_status,
                                    "diskSpaceGB": r.disk_space_gb,
                                })
                            })
                            .collect::<Vec<_>>()
                    })
                    .await;
                Ok(Value::Array(recorders))
            }
            HubCommand::GetStatus => {
                let metrics = self.metrics().await;
                Ok(json!({
                    "recorders": metrics.recorders_total,
                    "online": metrics.recorders_online,
                    "recording": metrics.recorders_recording,
                }))
            }
        }
    }

    async fn metrics(&self) -> FleetMetrics {
        self.registry.metrics().await
    }
}

/// Trimmed take name, or why it cannot be used as a deck filename.
fn validated_take_name(take_name: &str) -> Result<&str, OpError> {
    let take_name = take_name.trim();
    if take_name.is_empty() {
        return Err(OpError::Invalid {
            field: "take name",
            reason: "must not be empty".to_string(),
        });
    }
    if !is_line_safe(take_name) {
        return Err(OpError::Invalid {
            field: "take name",
            reason: "must not contain control characters".to_string(),
        });
    }
    Ok(take_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FakeDeck;
    use crate::messages::RegistryEvent;
    use crate::model::{AppState, TransportStatus};
    use std::time::Duration;

    fn operations(port: u16, recorders: Vec<Recorder>) -> Operations {
        let registry = Arc::new(Registry::new(AppState {
            recorders,
            show_name: "DEMO".to_string(),
            ..AppState::default()
        }));
        Operations::new(
            registry,
            DeckConnector::new(port, Duration::from_millis(500), Duration::from_millis(500)),
        )
    }

    fn online(id: &str, name: &str) -> Recorder {
        Recorder {
            online: true,
            ..Recorder::new(id, name, "127.0.0.1")
        }
    }

    #[tokio::test]
    async fn test_add_recorder_checks_online_and_announces() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, Vec::new());
        let mut events = ops.registry().subscribe();

        let added = ops
            .add_recorder(Recorder::new("", "HYPER-41", "127.0.0.1"))
            .await
            .unwrap();
        assert!(!added.id.is_empty());
        assert!(added.online);
        assert!(added.last_checked.is_some());

        match events.recv().await.unwrap() {
            RegistryEvent::RecorderAnnounced(announcement) => {
                assert_eq!(announcement.recorder_id, added.id);
                assert_eq!(announcement.display_name, "HYPER-41");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_recorder_rejects_name_collision() {
        let ops = operations(1, vec![Recorder::new("a", "HYPER-41", "")]);
        let err = ops
            .add_recorder(Recorder::new("b", "HYPER_41", ""))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OpError::Registry(RegistryError::NameCollision { .. })
        ));
    }

    #[tokio::test]
    async fn test_address_change_rechecks_online() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![Recorder::new("r1", "A", "")]);

        let updated = ops
            .update_recorder(Recorder::new("r1", "A", "127.0.0.1"))
            .await
            .unwrap();
        assert!(updated.online);
    }

    #[tokio::test]
    async fn test_codec_change_is_pushed_to_online_deck() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let mut update = online("r1", "A");
        update.codec = Some("ProRes422HQ".to_string());
        ops.update_recorder(update).await.unwrap();

        assert_eq!(
            deck.received(),
            vec!["configuration: file format: QuickTimeProResHQ"]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let deck = FakeDeck::start(vec![("record", "102 unsupported\r\n")]).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        assert_eq!(
            ops.record("r1").await,
            Err(OpError::deck("Failed to send record command"))
        );
        ops.play("r1").await.unwrap();
        ops.next_clip("r1").await.unwrap();
        assert_eq!(deck.received(), vec!["record", "play", "goto: clip id: +1"]);
    }

    #[tokio::test]
    async fn test_goto_timecode_validates_before_sending() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let err = ops.goto_timecode("r1", "1:2:3").await.unwrap_err();
        assert!(matches!(err, OpError::Invalid { field: "timecode", .. }));
        assert!(deck.received().is_empty());

        ops.goto_timecode("r1", "00:01:02:03").await.unwrap();
        assert_eq!(deck.received(), vec!["goto: timecode: 00:01:02:03"]);
    }

    #[tokio::test]
    async fn test_get_clips_stores_list() {
        let deck = FakeDeck::start(vec![(
            "clips get",
            "205 clips info:\r\nclip count: 1\r\n1: A001.mov 00:00:42:00\r\n\r\n",
        )])
        .await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let clips = ops.get_clips("r1").await.unwrap();
        assert_eq!(clips.len(), 1);
        let stored = ops.registry().recorder("r1").await.unwrap();
        assert_eq!(stored.clips, clips);
    }

    #[tokio::test]
    async fn test_push_take_uses_current_take() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);
        ops.set_take_name("r1", "INTERVIEW_T03").await.unwrap();

        let pushed = ops.push_take_to_deck("r1").await.unwrap();
        assert_eq!(pushed, "INTERVIEW_T03");
        assert_eq!(
            deck.received(),
            vec!["disk select: slot id: 1", "disk select: video filename: INTERVIEW_T03"]
        );
    }

    #[tokio::test]
    async fn test_empty_take_name_is_rejected() {
        let ops = operations(1, vec![Recorder::new("r1", "A", "")]);
        assert!(matches!(
            ops.set_take_name("r1", "  ").await,
            Err(OpError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_hub_set_take_name_pushes_to_online_deck() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let result = ops
            .execute(HubCommand::SetTakeName {
                recorder_id: "r1".to_string(),
                take_name: "DEMO_T01".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["takeName"], "DEMO_T01");
        assert_eq!(deck.received().len(), 2);
        assert_eq!(
            ops.registry().current_take("r1").await.as_deref(),
            Some("DEMO_T01")
        );
    }

    #[tokio::test]
    async fn test_hub_set_take_name_skips_offline_deck() {
        let ops = operations(1, vec![Recorder::new("r1", "A", "")]);
        ops.execute(HubCommand::SetTakeName {
            recorder_id: "r1".to_string(),
            take_name: "DEMO_T01".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            ops.registry().current_take("r1").await.as_deref(),
            Some("DEMO_T01")
        );
    }

    #[tokio::test]
    async fn test_hub_rejected_deck_leaves_take_uncommitted() {
        let deck = FakeDeck::start(vec![("disk select: slot", "120 slot not selected\r\n")]).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let err = ops
            .execute(HubCommand::SetTakeName {
                recorder_id: "r1".to_string(),
                take_name: "DEMO_T01".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, OpError::deck("Failed to set take name on deck"));
        assert!(ops.registry().current_take("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_take_name_with_newline_never_reaches_deck() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let err = ops
            .execute(HubCommand::SetTakeName {
                recorder_id: "r1".to_string(),
                take_name: "SHOW\nrecord".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Invalid { field: "take name", .. }));
        assert!(matches!(
            ops.set_take_name("r1", "SHOW\r\nstop").await,
            Err(OpError::Invalid { .. })
        ));

        assert!(deck.received().is_empty());
        assert!(ops.registry().current_take("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_generated_name_with_control_characters_is_not_pushed() {
        let deck = FakeDeck::start(Vec::new()).await;
        let mut recorder = online("r1", "A");
        recorder.selected_template = "3".to_string();
        recorder.custom_text = "X\nrecord".to_string();
        let ops = operations(deck.port, vec![recorder]);

        assert_eq!(
            ops.push_take_to_deck("r1").await,
            Err(OpError::deck("Failed to set take name on deck"))
        );
        assert!(deck.received().is_empty());
    }

    #[tokio::test]
    async fn test_hub_take_name_is_trimmed_before_push() {
        let deck = FakeDeck::start(Vec::new()).await;
        let ops = operations(deck.port, vec![online("r1", "A")]);

        let result = ops
            .execute(HubCommand::SetTakeName {
                recorder_id: "r1".to_string(),
                take_name: "  DEMO_T02 ".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["takeName"], "DEMO_T02");
        assert_eq!(
            deck.received(),
            vec!["disk select: slot id: 1", "disk select: video filename: DEMO_T02"]
        );
        assert_eq!(
            ops.registry().current_take("r1").await.as_deref(),
            Some("DEMO_T02")
        );

        let err = ops
            .execute(HubCommand::SetTakeName {
                recorder_id: "r1".to_string(),
                take_name: "   ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Invalid { .. }));
        assert_eq!(deck.received().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_take_name_keeps_take_number() {
        let mut recorder = Recorder::new("r1", "A", "");
        recorder.selected_template = "2".to_string();
        let ops = operations(1, vec![recorder]);

        ops.set_take_name("r1", "TYPED_NAME").await.unwrap();
        assert_eq!(ops.registry().recorder("r1").await.unwrap().take_number, 1);
    }

    #[tokio::test]
    async fn test_hub_unknown_recorder() {
        let ops = operations(1, Vec::new());
        let err = ops
            .execute(HubCommand::IncrementShot {
                recorder_id: "ghost".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Recorder not found: ghost");
    }

    #[tokio::test]
    async fn test_hub_increment_and_status() {
        let mut recording = online("r2", "B");
        recording.transport_status = Some(TransportStatus::Record);
        let ops = operations(1, vec![Recorder::new("r1", "A", ""), recording]);

        let result = ops
            .execute(HubCommand::IncrementTake {
                recorder_id: "r1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result["takeNumber"], 2);

        let status = ops.execute(HubCommand::GetStatus).await.unwrap();
        assert_eq!(status, json!({"recorders": 2, "online": 1, "recording": 1}));

        let recorders = ops.execute(HubCommand::GetRecorders).await.unwrap();
        assert_eq!(recorders[1]["ipAddress"], "127.0.0.1");
        assert_eq!(recorders[1]["transportStatus"], "record");
        assert_eq!(recorders[0]["transportStatus"], Value::Null);
    }
}
