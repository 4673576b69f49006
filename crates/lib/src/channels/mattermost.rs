//! Mattermost channel: REST API v4 for session bootstrap and posting, WebSocket for events.

use crate::channels::inbound::{EventKind, InboundMessage};
use crate::channels::outbound::{ChannelError, OutboundReply, ReplySink};
use crate::config::ResolvedMattermost;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY_SECS: u64 = 2;

/// The bot account as returned by login.
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct Team {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Ping {
    #[serde(default)]
    status: String,
}

/// WebSocket event envelope. Replies to our own actions have no `event` and are skipped.
#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: WsEventData,
    #[serde(default)]
    broadcast: WsBroadcast,
}

#[derive(Debug, Default, Deserialize)]
struct WsEventData {
    /// JSON-encoded post (a string inside the JSON event).
    #[serde(default)]
    post: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WsBroadcast {
    #[serde(default)]
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    message: String,
}

/// Turn one WebSocket text frame into an inbound message.
///
/// Every named event is returned so the dispatcher can filter on kind and channel;
/// frames without an event name, and `posted` events with an unreadable post, yield None.
pub fn parse_event(frame: &str) -> Option<InboundMessage> {
    let ev: WsEvent = serde_json::from_str(frame).ok()?;
    let name = ev.event?;
    let kind = EventKind::from_name(&name);
    if kind != EventKind::Posted {
        return Some(InboundMessage {
            text: String::new(),
            author_id: String::new(),
            channel_id: ev.broadcast.channel_id,
            message_id: String::new(),
            event_kind: kind,
        });
    }
    let post: Post = match serde_json::from_str(ev.data.post.as_deref()?) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("mattermost: unreadable post in posted event: {}", e);
            return None;
        }
    };
    let channel_id = if ev.broadcast.channel_id.is_empty() {
        post.channel_id
    } else {
        ev.broadcast.channel_id
    };
    Some(InboundMessage {
        text: post.message,
        author_id: post.user_id,
        channel_id,
        message_id: post.id,
        event_kind: EventKind::Posted,
    })
}

fn websocket_url(base_url: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/api/v4/websocket", ws_base)
}

async fn check(res: reqwest::Response, endpoint: &str) -> Result<reqwest::Response, ChannelError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ChannelError::Status {
        endpoint: endpoint.to_string(),
        status,
        body,
    })
}

/// Logged-in connection to one monitored channel.
pub struct MattermostChannel {
    base_url: String,
    token: String,
    bot_user: MattermostUser,
    channel_id: String,
    client: reqwest::Client,
}

impl MattermostChannel {
    /// Ping the server, log in, find the team, and find or create the monitored channel.
    pub async fn connect(cfg: &ResolvedMattermost) -> Result<Self, ChannelError> {
        let client = reqwest::Client::new();
        let base_url = cfg.host.clone();

        let res = client
            .get(format!("{}/api/v4/system/ping", base_url))
            .send()
            .await?;
        let ping: Ping = check(res, "ping").await?.json().await?;
        log::info!("mattermost server detected, status {}", ping.status);

        let res = client
            .post(format!("{}/api/v4/users/login", base_url))
            .json(&serde_json::json!({
                "login_id": cfg.user_login,
                "password": cfg.user_password,
            }))
            .send()
            .await?;
        let res = check(res, "login").await?;
        let token = res
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(ChannelError::MissingToken)?;
        let bot_user: MattermostUser = res.json().await?;
        log::info!("logged in as {} ({})", bot_user.username, bot_user.id);

        let mut channel = Self {
            base_url,
            token,
            bot_user,
            channel_id: String::new(),
            client,
        };
        let team: Team = channel
            .get_json(&format!("/api/v4/teams/name/{}", cfg.team_name), "get team")
            .await?;
        channel.channel_id = channel
            .find_or_create_channel(&team.id, &cfg.channel_name, &cfg.channel_display_name)
            .await?;
        Ok(channel)
    }

    pub fn bot_user_id(&self) -> &str {
        &self.bot_user.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        endpoint: &str,
    ) -> Result<T, ChannelError> {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check(res, endpoint).await?.json().await?)
    }

    async fn find_or_create_channel(
        &self,
        team_id: &str,
        name: &str,
        display_name: &str,
    ) -> Result<String, ChannelError> {
        let path = format!("/api/v4/teams/{}/channels/name/{}", team_id, name);
        match self.get_json::<Channel>(&path, "get channel").await {
            Ok(c) => return Ok(c.id),
            Err(ChannelError::Status { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }
        let res = self
            .client
            .post(format!("{}/api/v4/channels", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "team_id": team_id,
                "name": name,
                "display_name": display_name,
                "purpose": "kubectl commands for the cluster",
                "type": "O",
            }))
            .send()
            .await?;
        let created: Channel = check(res, "create channel").await?.json().await?;
        log::info!("created channel {} ({})", name, created.id);
        Ok(created.id)
    }

    /// Post a message in the monitored channel, optionally threaded under `root_id`.
    pub async fn create_post(&self, message: &str, root_id: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "channel_id": self.channel_id,
            "message": message,
        });
        if let Some(root) = root_id {
            body["root_id"] = serde_json::Value::String(root.to_string());
        }
        let res = self
            .client
            .post(format!("{}/api/v4/posts", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        check(res, "create post").await?;
        Ok(())
    }

    /// Start the WebSocket event loop and forward events to the dispatcher until `shutdown` flips.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        log::info!("mattermost channel: starting websocket event loop");
        tokio::spawn(async move {
            run_event_loop(self, inbound_tx, shutdown).await;
        })
    }

    /// One WebSocket session. Returns Ok(false) when the loop should end for good.
    async fn stream_events(
        &self,
        inbound_tx: &mpsc::Sender<InboundMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, ChannelError> {
        let url = websocket_url(&self.base_url);
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let auth = serde_json::json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": self.token },
        });
        ws.send(Message::Text(auth.to_string())).await?;
        log::info!("mattermost websocket connected");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    return Ok(false);
                }
                frame = ws.next() => {
                    let Some(frame) = frame else { return Ok(true) };
                    let Message::Text(text) = frame? else { continue };
                    let Some(inbound) = parse_event(&text) else { continue };
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("mattermost: inbound channel closed, stopping loop");
                        return Ok(false);
                    }
                }
            }
        }
    }
}

async fn run_event_loop(
    channel: Arc<MattermostChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match channel.stream_events(&inbound_tx, &mut shutdown).await {
            Ok(false) => break,
            Ok(true) => log::info!("mattermost websocket closed by server, reconnecting"),
            Err(e) => {
                log::warn!("mattermost websocket error: {}", e);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                }
            }
        }
    }
    log::info!("mattermost channel: event loop stopped");
}

#[async_trait]
impl ReplySink for MattermostChannel {
    async fn send_reply(&self, reply: &OutboundReply) -> Result<(), ChannelError> {
        self.create_post(&reply.text, Some(&reply.in_reply_to)).await
    }
}
