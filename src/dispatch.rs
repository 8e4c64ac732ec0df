use crate::config::RunConfig;
use crate::core::{
    Activity, Category, HistoryError, Participant, ParticipantId, RunError, RunRecord,
};
use crate::leaderboard::{Leaderboard, LeaderboardReport, Standing, Window};
use crate::registry::{RunRegistry, RunView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// One command issued by a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub invoker: Participant,
    pub action: Action,
}

impl Invocation {
    pub fn new(invoker: Participant, action: Action) -> Self {
        Self { invoker, action }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Host {
        category: Category,
        activity: Activity,
        name: String,
        #[serde(default)]
        secret: String,
    },
    End,
    Join {
        host: ParticipantId,
    },
    Leave,
    Add {
        player: Participant,
    },
    Kick {
        player: ParticipantId,
    },
    ChangeHost {
        new_host: Participant,
    },
    Rename {
        name: String,
        #[serde(default)]
        secret: String,
    },
    NextGame,
    /// Message everyone in the invoker's run.
    Broadcast {
        message: String,
    },
    /// Re-announce the invoker's run in its realm.
    Advertise,
    Runs,
    TopHosts {
        window: Window,
    },
    TopParticipants {
        window: Window,
    },
    Leaderboard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Started {
        run: RunRecord,
        /// Channel the announcement goes to, when one is configured.
        realm: Option<u64>,
    },
    Ended {
        run: RunRecord,
    },
    Joined {
        run: RunRecord,
        spots_left: usize,
    },
    Left {
        run: RunRecord,
    },
    Kicked {
        run: RunRecord,
        player: ParticipantId,
    },
    HostChanged {
        run: RunRecord,
        previous_host: ParticipantId,
    },
    Renamed {
        run: RunRecord,
    },
    NextGame {
        name: String,
    },
    Broadcast {
        /// Attendees in join order, then the host.
        recipients: Vec<Participant>,
        message: String,
    },
    Advertised {
        run: RunRecord,
        realm: Option<u64>,
        spots_left: usize,
    },
    Runs {
        runs: Vec<RunView>,
    },
    Standings {
        window: Window,
        standings: Vec<Standing>,
    },
    Leaderboard {
        report: LeaderboardReport,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Routes invocations to the registry and the leaderboard.
#[derive(Clone)]
pub struct Dispatcher {
    registry: RunRegistry,
    leaderboard: Leaderboard,
    realms: HashMap<Category, u64>,
}

impl Dispatcher {
    pub fn new(registry: RunRegistry, leaderboard: Leaderboard, config: &RunConfig) -> Self {
        Self {
            registry,
            leaderboard,
            realms: config.realms.clone(),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    pub async fn handle(&self, invocation: Invocation) -> Result<Reply, DispatchError> {
        let Invocation { invoker, action } = invocation;
        debug!(invoker = %invoker.id, ?action, "dispatching");

        let reply = match action {
            Action::Host {
                category,
                activity,
                name,
                secret,
            } => {
                let run = self
                    .registry
                    .start(invoker, category, activity, name.trim(), secret.trim())
                    .await?;
                let realm = self.realms.get(&category).copied();
                Reply::Started { run, realm }
            }
            Action::End => Reply::Ended {
                run: self.registry.end(invoker.id).await?,
            },
            Action::Join { host } => {
                let receipt = self.registry.join(host, invoker).await?;
                Reply::Joined {
                    run: receipt.run,
                    spots_left: receipt.spots_left,
                }
            }
            Action::Leave => {
                let host = self
                    .registry
                    .host_of(invoker.id)
                    .await
                    .ok_or(RunError::NotPresent)?;
                Reply::Left {
                    run: self.registry.leave(host, invoker.id).await?,
                }
            }
            Action::Add { player } => {
                let receipt = self.registry.add(invoker.id, player).await?;
                Reply::Joined {
                    run: receipt.run,
                    spots_left: receipt.spots_left,
                }
            }
            Action::Kick { player } => Reply::Kicked {
                run: self.registry.kick(invoker.id, player).await?,
                player,
            },
            Action::ChangeHost { new_host } => Reply::HostChanged {
                run: self.registry.transfer_ownership(invoker.id, new_host).await?,
                previous_host: invoker.id,
            },
            Action::Rename { name, secret } => Reply::Renamed {
                run: self
                    .registry
                    .rename(invoker.id, name.trim(), secret.trim())
                    .await?,
            },
            Action::NextGame => {
                // Attendees may move their run on too.
                let host = self
                    .registry
                    .host_of(invoker.id)
                    .await
                    .ok_or(RunError::NotFound)?;
                Reply::NextGame {
                    name: self.registry.advance_name(host).await?,
                }
            }
            Action::Broadcast { message } => {
                let run = self
                    .registry
                    .find_run_of(invoker.id)
                    .await
                    .ok_or(RunError::NotPresent)?;
                let mut recipients = run.attendees;
                recipients.push(run.host);
                Reply::Broadcast {
                    recipients,
                    message,
                }
            }
            Action::Advertise => {
                let run = self
                    .registry
                    .find_run_of(invoker.id)
                    .await
                    .ok_or(RunError::NotPresent)?;
                let realm = self.realms.get(&run.category).copied();
                let spots_left = run.spots_left(self.registry.capacity());
                Reply::Advertised {
                    run,
                    realm,
                    spots_left,
                }
            }
            Action::Runs => Reply::Runs {
                runs: self.registry.view_for(Some(invoker.id)).await,
            },
            Action::TopHosts { window } => Reply::Standings {
                window,
                standings: self.leaderboard.top_hosts(window).await?,
            },
            Action::TopParticipants { window } => Reply::Standings {
                window,
                standings: self.leaderboard.top_participants(window).await?,
            },
            Action::Leaderboard => Reply::Leaderboard {
                report: self.leaderboard.report().await?,
            },
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HistoryLog, HistoryStore};
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let config = RunConfig::new().realm(Category::Ladder, 77);
        let history: Arc<dyn HistoryLog> = Arc::new(HistoryStore::in_memory());
        let registry = RunRegistry::new(&config, Arc::clone(&history));
        Dispatcher::new(registry, Leaderboard::new(history), &config)
    }

    fn host_action(name: &str) -> Action {
        Action::Host {
            category: Category::Ladder,
            activity: Activity::Baal,
            name: name.to_string(),
            secret: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_host_reply_carries_realm() {
        let dispatcher = dispatcher();
        let reply = dispatcher
            .handle(Invocation::new(Participant::new(1, "host"), host_action(" Baal-1 ")))
            .await
            .unwrap();

        match reply {
            Reply::Started { run, realm } => {
                assert_eq!(run.display_name, "Baal-1");
                assert_eq!(realm, Some(77));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attendee_can_advance_game() {
        let dispatcher = dispatcher();
        let host = Participant::new(1, "host");
        let guest = Participant::new(2, "guest");
        dispatcher
            .handle(Invocation::new(host.clone(), host_action("Baal-1")))
            .await
            .unwrap();
        dispatcher
            .handle(Invocation::new(guest.clone(), Action::Join { host: host.id }))
            .await
            .unwrap();

        let reply = dispatcher
            .handle(Invocation::new(guest, Action::NextGame))
            .await
            .unwrap();
        assert!(matches!(reply, Reply::NextGame { name } if name == "Baal-2"));
    }

    #[tokio::test]
    async fn test_leave_outside_any_run() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .handle(Invocation::new(Participant::new(5, "nobody"), Action::Leave))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Run(RunError::NotPresent)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_whole_run() {
        let dispatcher = dispatcher();
        let host = Participant::new(1, "host");
        dispatcher
            .handle(Invocation::new(host.clone(), host_action("Baal-1")))
            .await
            .unwrap();
        for id in [2, 3] {
            dispatcher
                .handle(Invocation::new(
                    Participant::new(id, format!("guest{}", id)),
                    Action::Join { host: host.id },
                ))
                .await
                .unwrap();
        }

        let reply = dispatcher
            .handle(Invocation::new(
                Participant::new(3, "guest3"),
                Action::Broadcast {
                    message: "last game".to_string(),
                },
            ))
            .await
            .unwrap();
        match reply {
            Reply::Broadcast {
                recipients,
                message,
            } => {
                let ids: Vec<u64> = recipients.iter().map(|p| p.id.0).collect();
                assert_eq!(ids, vec![2, 3, 1]);
                assert_eq!(message, "last game");
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let err = dispatcher
            .handle(Invocation::new(
                Participant::new(9, "outsider"),
                Action::Broadcast {
                    message: "hi".to_string(),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Run(RunError::NotPresent)));
    }

    #[tokio::test]
    async fn test_advertise_uses_run_realm() {
        let dispatcher = dispatcher();
        let host = Participant::new(1, "host");
        dispatcher
            .handle(Invocation::new(host.clone(), host_action("Baal-1")))
            .await
            .unwrap();
        dispatcher
            .handle(Invocation::new(Participant::new(2, "guest"), Action::Join { host: host.id }))
            .await
            .unwrap();

        let reply = dispatcher
            .handle(Invocation::new(Participant::new(2, "guest"), Action::Advertise))
            .await
            .unwrap();
        match reply {
            Reply::Advertised {
                run,
                realm,
                spots_left,
            } => {
                assert_eq!(run.host.id, host.id);
                assert_eq!(realm, Some(77));
                assert_eq!(spots_left, 5);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let err = dispatcher
            .handle(Invocation::new(Participant::new(9, "outsider"), Action::Advertise))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Run(RunError::NotPresent)));
    }

    #[test]
    fn test_action_json_shape() {
        let invocation: Invocation = serde_json::from_str(
            r#"{
                "invoker": { "id": 3, "name": "c" },
                "action": { "type": "top_hosts", "window": "last30_days" }
            }"#,
        )
        .unwrap();
        assert!(matches!(
            invocation.action,
            Action::TopHosts {
                window: Window::Last30Days
            }
        ));
    }
}
