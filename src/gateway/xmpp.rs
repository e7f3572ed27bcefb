//! XMPP binding for [`GatewaySession`], built on `tokio-xmpp`.
//!
//! Each `connect` spawns one task that owns the client: it pumps stream
//! events into normalized [`SessionEvent`]s and services outbound commands
//! over a channel, replying through oneshots so callers observe send
//! results. The task ends when the stream drops or a disconnect command
//! arrives; reconnecting builds a fresh client.

use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_xmpp::jid::Jid;
use tokio_xmpp::minidom::Element;
use tokio_xmpp::parsers::iq::Iq;
use tokio_xmpp::parsers::message::{Body, Message, MessageType};
use tokio_xmpp::parsers::presence::{Presence, Type as PresenceType};
use tokio_xmpp::parsers::roster::Roster;
use tokio_xmpp::starttls::StartTlsAsyncClient as Client;
use tokio_xmpp::Event;
use tracing::{debug, info, warn};

use super::{GatewaySession, SessionError, SessionEvent};

/// Buffer size for the normalized event channel.
const EVENT_BUFFER: usize = 64;

/// Buffer size for the per-connection command channel.
const COMMAND_BUFFER: usize = 16;

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Send { to: String, body: String, reply: Reply },
    Announce { gateway_domain: String, reply: Reply },
    AcceptSubscription { peer: String, reply: Reply },
    Disconnect,
}

/// [`GatewaySession`] implementation over a real XMPP stream.
pub struct XmppSession {
    jid: String,
    password: String,
    events: mpsc::Sender<SessionEvent>,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
}

impl XmppSession {
    /// Create a session for the given account and the receiver its
    /// normalized events arrive on.
    pub fn new(jid: String, password: String) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                jid,
                password,
                events,
                commands: Mutex::new(None),
            },
            events_rx,
        )
    }

    fn current_commands(&self) -> Option<mpsc::Sender<Command>> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn dispatch(
        &self,
        build: impl FnOnce(Reply) -> Command + Send,
    ) -> Result<(), SessionError> {
        let commands = self.current_commands().ok_or(SessionError::NotConnected)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }
}

#[async_trait::async_trait]
impl GatewaySession for XmppSession {
    async fn connect(&self) -> Result<(), SessionError> {
        let jid = Jid::new(&self.jid).map_err(|_| SessionError::Address(self.jid.clone()))?;
        let client = Client::new(jid, self.password.clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        *self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(command_tx);

        tokio::spawn(client_task(client, command_rx, self.events.clone()));
        Ok(())
    }

    async fn disconnect(&self) {
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(commands) = commands {
            let _ = commands.send(Command::Disconnect).await;
        }
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<(), SessionError> {
        let (to, body) = (to.to_owned(), body.to_owned());
        self.dispatch(|reply| Command::Send { to, body, reply }).await
    }

    async fn announce(&self, gateway_domain: &str) -> Result<(), SessionError> {
        let gateway_domain = gateway_domain.to_owned();
        self.dispatch(|reply| Command::Announce {
            gateway_domain,
            reply,
        })
        .await
    }

    async fn accept_subscription(&self, peer: &str) -> Result<(), SessionError> {
        let peer = peer.to_owned();
        self.dispatch(|reply| Command::AcceptSubscription { peer, reply })
            .await
    }
}

/// Per-connection task owning the client.
async fn client_task(
    mut client: Client,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
) {
    loop {
        tokio::select! {
            event = client.next() => match event {
                Some(Event::Online { bound_jid, .. }) => {
                    info!(jid = %bound_jid, "session established");
                    if events.send(SessionEvent::SessionStart).await.is_err() {
                        break;
                    }
                }
                Some(Event::Stanza(stanza)) => {
                    if let Some(normalized) = normalize_stanza(stanza) {
                        if events.send(normalized).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Event::Disconnected(e)) => {
                    warn!(error = %e, "stream disconnected");
                    let _ = events.send(SessionEvent::Disconnected).await;
                    break;
                }
                None => {
                    let _ = events.send(SessionEvent::Disconnected).await;
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send { to, body, reply }) => {
                    let _ = reply.send(send_chat(&mut client, &to, &body).await);
                }
                Some(Command::Announce { gateway_domain, reply }) => {
                    let _ = reply.send(announce(&mut client, &gateway_domain).await);
                }
                Some(Command::AcceptSubscription { peer, reply }) => {
                    let _ = reply.send(send_subscribed(&mut client, &peer).await);
                }
                Some(Command::Disconnect) | None => {
                    debug!("closing stream");
                    let _ = client.send_end().await;
                    let _ = events.send(SessionEvent::Disconnected).await;
                    break;
                }
            },
        }
    }
}

/// Map a raw stanza to a normalized event, if it carries one.
fn normalize_stanza(stanza: Element) -> Option<SessionEvent> {
    if let Ok(message) = Message::try_from(stanza.clone()) {
        let from = message.from?.to_string();
        let body = message
            .bodies
            .get("")
            .or_else(|| message.bodies.values().next())?
            .0
            .clone();
        return Some(SessionEvent::Message { from, body });
    }

    if let Ok(presence) = Presence::try_from(stanza) {
        if presence.type_ == PresenceType::Subscribe {
            let from = presence.from?.to_string();
            return Some(SessionEvent::SubscriptionRequest { from });
        }
    }

    None
}

async fn send_chat(client: &mut Client, to: &str, body: &str) -> Result<(), SessionError> {
    let to = Jid::new(to).map_err(|_| SessionError::Address(to.to_owned()))?;
    let mut message = Message::new(Some(to));
    message.type_ = MessageType::Chat;
    message.bodies.insert(String::new(), Body(body.to_owned()));
    send(client, message.into()).await
}

async fn announce(client: &mut Client, gateway_domain: &str) -> Result<(), SessionError> {
    let roster = Iq::from_get(
        "roster",
        Roster {
            ver: None,
            items: Vec::new(),
        },
    );
    send(client, roster.into()).await?;
    send(client, Presence::new(PresenceType::None).into()).await?;
    send_subscribed(client, gateway_domain).await
}

async fn send_subscribed(client: &mut Client, peer: &str) -> Result<(), SessionError> {
    let peer = Jid::new(peer).map_err(|_| SessionError::Address(peer.to_owned()))?;
    let presence = Presence::new(PresenceType::Subscribed).with_to(peer);
    send(client, presence.into()).await
}

async fn send(client: &mut Client, stanza: Element) -> Result<(), SessionError> {
    client
        .send_stanza(stanza)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}
