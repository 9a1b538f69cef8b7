//! Voice-channel connection choreography: the `connect()` protocol and
//! translation of gateway voice-state updates into player state changes,
//! including stage-channel speaker promotion and demotion.

use super::{MoveBehavior, Player, PlayerError, PlayerEvent, PlayerState};
use crate::adapter::{Permissions, VoiceStateUpdate};
use crate::manager::Manager;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

const REQUIRED_PERMISSIONS: Permissions =
    Permissions::VIEW_CHANNEL.union(Permissions::CONNECT).union(Permissions::SPEAK);

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

impl Player {
    /// Connect to this player's voice channel.
    ///
    /// Must be called from [`PlayerState::Disconnected`], else fails with
    /// [`PlayerError::StateConflict`]. Checks that the bot has permission
    /// to view, join, and speak in the channel (and, for a stage channel,
    /// to either become a speaker or request to speak); sends an
    /// opcode-4 voice state update through the adapter; then waits for a
    /// matching VOICE_STATE_UPDATE to arrive via [`Player::handle_move`],
    /// up to `connection_timeout_ms`.
    pub async fn connect(&self, manager: &Manager) -> Result<(), PlayerError> {
        let actual = self.state();
        if actual != PlayerState::Disconnected {
            return Err(PlayerError::StateConflict { actual });
        }
        if self.0.connecting.swap(true, Ordering::AcqRel) {
            return Err(PlayerError::AlreadyConnecting);
        }

        let result = self.connect_inner(manager).await;
        self.0.connecting.store(false, Ordering::Release);
        result
    }

    async fn connect_inner(&self, manager: &Manager) -> Result<(), PlayerError> {
        let guild_id = self.0.guild_id.clone();
        let channel_id = self.voice_channel_id();
        let adapter = manager.adapter();

        let perms = adapter.has_perms(&guild_id, Some(&channel_id)).await?;
        if !perms.contains(REQUIRED_PERMISSIONS) {
            return Err(PlayerError::MissingPermissions);
        }

        let is_stage = adapter.is_stage(&guild_id, &channel_id).await?;
        if is_stage && !perms.intersects(Permissions::MUTE_MEMBERS | Permissions::REQUEST_TO_SPEAK) {
            return Err(PlayerError::MissingPermissions);
        }
        self.0.is_stage.store(is_stage, Ordering::Release);

        adapter.update_voice_state(&guild_id, Some(&channel_id), false, self.0.options.self_deafen).await?;

        let voice_connected = self.0.voice_connected.notified();
        let destroyed = self.0.destroyed.notified();
        tokio::pin!(voice_connected, destroyed);
        let timeout = tokio::time::sleep(Duration::from_millis(self.0.options.connection_timeout_ms));
        tokio::pin!(timeout);

        tokio::select! {
            () = &mut voice_connected => {}
            () = &mut destroyed => return Err(PlayerError::ConnectionTimeout),
            () = &mut timeout => return Err(PlayerError::ConnectionTimeout),
        }

        if is_stage {
            self.become_stage_speaker_or_listener(manager).await?;
        }

        Ok(())
    }

    async fn become_stage_speaker_or_listener(&self, manager: &Manager) -> Result<(), PlayerError> {
        let guild_id = self.0.guild_id.clone();
        let channel_id = self.voice_channel_id();
        let adapter = manager.adapter();
        let perms = adapter.has_perms(&guild_id, Some(&channel_id)).await?;

        if self.0.options.become_speaker && perms.contains(Permissions::MUTE_MEMBERS) {
            adapter.modify_current_user_voice_state(&guild_id, &channel_id, Some(false), None).await?;
            self.0.is_speaker.store(true, Ordering::Release);
        } else {
            adapter.modify_current_user_voice_state(&guild_id, &channel_id, None, Some(now_rfc3339())).await?;
            self.0.is_speaker.store(false, Ordering::Release);
        }

        Ok(())
    }

    /// Apply a VOICE_STATE_UPDATE concerning this bot in this guild.
    ///
    /// Drives the [`Player::connect`] handshake, detects the player being
    /// dragged to another channel or disconnected out from under it, and
    /// runs stage speaker/listener choreography when `suppress` changes.
    pub(crate) async fn handle_move(&self, update: VoiceStateUpdate, manager: &Manager) {
        let state = self.state();

        if state == PlayerState::Disconnected {
            if update.channel_id.as_ref() == Some(&self.voice_channel_id()) {
                self.set_state(PlayerState::Connected);
                self.0.voice_connected.notify_one();
                self.emit(PlayerEvent::VoiceConnected);
            } else {
                self.destroy(Some("connected to incorrect channel".to_owned()), manager).await;
            }
            return;
        }

        if state < PlayerState::Connected {
            return;
        }

        let Some(new_channel_id) = update.channel_id.clone() else {
            self.destroy(Some("disconnected from voice channel".to_owned()), manager).await;
            return;
        };

        if new_channel_id != self.voice_channel_id() {
            *self.0.voice_channel_id.write().expect("voice_channel_id lock poisoned") = new_channel_id.clone();
            self.emit(PlayerEvent::VoiceMoved { channel_id: new_channel_id.clone() });

            let adapter = manager.adapter();
            let perms = match adapter.has_perms(&self.0.guild_id, Some(&new_channel_id)).await {
                Ok(perms) => perms,
                Err(source) => {
                    warn!(guild_id = %self.0.guild_id, %source, "failed to re-query permissions after voice move");
                    Permissions::empty()
                }
            };
            let is_stage = adapter.is_stage(&self.0.guild_id, &new_channel_id).await.unwrap_or(false);

            let missing_base = !perms.contains(REQUIRED_PERMISSIONS);
            let missing_stage = is_stage && !perms.intersects(Permissions::MUTE_MEMBERS | Permissions::REQUEST_TO_SPEAK);
            if missing_base || missing_stage {
                self.destroy(Some("missing permissions in new voice channel".to_owned()), manager).await;
                return;
            }
            self.0.is_stage.store(is_stage, Ordering::Release);

            match self.0.options.move_behavior {
                MoveBehavior::Destroy => {
                    self.destroy(Some("moved to a different voice channel".to_owned()), manager).await;
                    return;
                }
                MoveBehavior::Pause => match self.state() {
                    PlayerState::Playing => {
                        if let Err(source) = self.pause().await {
                            warn!(guild_id = %self.0.guild_id, %source, "failed to pause after voice move");
                        }
                    }
                    PlayerState::Paused => {
                        if let Err(source) = self.resume().await {
                            warn!(guild_id = %self.0.guild_id, %source, "failed to resume after voice move back");
                        }
                    }
                    PlayerState::Disconnected | PlayerState::Connected => {}
                },
            }
        }

        if self.is_stage() {
            self.handle_stage_suppress(update.suppress, manager).await;
        }
    }

    async fn handle_stage_suppress(&self, suppress: bool, manager: &Manager) {
        let was_speaker = self.is_speaker();

        if suppress && was_speaker {
            self.0.is_speaker.store(false, Ordering::Release);
            if self.state() == PlayerState::Playing {
                if let Err(source) = self.pause().await {
                    debug!(guild_id = %self.0.guild_id, %source, "failed to pause after stage demotion");
                }
            }

            let guild_id = self.0.guild_id.clone();
            let channel_id = self.voice_channel_id();
            let adapter = manager.adapter();
            let perms = adapter.has_perms(&guild_id, Some(&channel_id)).await.unwrap_or_else(|_| Permissions::empty());

            if self.0.options.become_speaker && perms.contains(Permissions::MUTE_MEMBERS) {
                match adapter.modify_current_user_voice_state(&guild_id, &channel_id, Some(false), None).await {
                    Ok(()) => {
                        self.0.is_speaker.store(true, Ordering::Release);
                        if self.state() == PlayerState::Paused {
                            if let Err(source) = self.resume().await {
                                debug!(guild_id = %self.0.guild_id, %source, "failed to resume after stage promotion");
                            }
                        }
                    }
                    Err(source) => {
                        warn!(guild_id = %guild_id, %source, "failed to promote back to stage speaker");
                    }
                }
            } else if perms.contains(Permissions::REQUEST_TO_SPEAK) {
                if let Err(source) =
                    adapter.modify_current_user_voice_state(&guild_id, &channel_id, None, Some(now_rfc3339())).await
                {
                    debug!(guild_id = %guild_id, %source, "failed to request to speak after demotion");
                }
            } else if self.0.options.stage_move_behavior == MoveBehavior::Destroy {
                self.destroy(Some("demoted to stage audience with no way to recover".to_owned()), manager).await;
            }
        } else if !suppress && !was_speaker {
            self.0.is_speaker.store(true, Ordering::Release);
            if self.state() == PlayerState::Paused {
                if let Err(source) = self.resume().await {
                    debug!(guild_id = %self.0.guild_id, %source, "failed to resume after stage promotion");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::adapter::Permissions;

    #[test]
    fn required_permissions_cover_view_connect_speak() {
        let required = super::REQUIRED_PERMISSIONS;
        assert!(required.contains(Permissions::VIEW_CHANNEL));
        assert!(required.contains(Permissions::CONNECT));
        assert!(required.contains(Permissions::SPEAK));
        assert!(!required.contains(Permissions::MUTE_MEMBERS));
    }
}
