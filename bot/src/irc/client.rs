use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};

use crate::config::TwitchSection;
use crate::engine::capabilities::ChatNetwork;
use crate::engine::events::ChatNetworkEvent;
use crate::error::{ConnectionError, JoinError};

use super::parser::IrcMessage;
use super::throttle::JoinThrottle;
use super::translate::{canonical_channel, translate};

/// Maximum bytes per line. Tagged Twitch lines run well past RFC 2812's 512.
const MAX_LINE_LENGTH: usize = 8192;
/// How long the server has to send 001 after we register.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Inbound events buffered ahead of the router.
const EVENT_QUEUE: usize = 4096;
/// Password Twitch accepts for anonymous `justinfan` logins.
const ANONYMOUS_PASS: &str = "SCHMOOPIIE";
const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands twitch.tv/membership";
/// NOTICE ids that mean a JOIN was refused.
const JOIN_REFUSALS: &[&str] = &[
    "msg_channel_suspended",
    "msg_channel_blocked",
    "msg_banned",
    "msg_room_not_found",
    "tos_ban",
];

type PendingJoins = Arc<DashMap<String, oneshot::Sender<Result<(), JoinError>>>>;
type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Twitch IRC implementation of the chat network.
pub struct TwitchClient {
    settings: TwitchSection,
    nick: String,
    pass: String,
    outbound: Outbound,
    pending: PendingJoins,
    throttle: JoinThrottle,
}

impl TwitchClient {
    pub fn new(settings: &TwitchSection) -> Self {
        let (nick, pass) = match (&settings.username, &settings.oauth_token) {
            (Some(user), Some(token)) => {
                let token = if token.starts_with("oauth:") {
                    token.clone()
                } else {
                    format!("oauth:{token}")
                };
                (user.to_lowercase(), token)
            }
            _ => {
                let n: u32 = rand::thread_rng().gen_range(10_000..100_000);
                (format!("justinfan{n}"), ANONYMOUS_PASS.to_string())
            }
        };

        Self {
            throttle: JoinThrottle::new(
                settings.joins_per_window,
                Duration::from_secs(settings.join_window_secs),
            ),
            settings: settings.clone(),
            nick,
            pass,
            outbound: Arc::new(Mutex::new(None)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Login nick; self-join detection compares against this.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    async fn start<S>(
        &self,
        stream: S,
    ) -> Result<mpsc::Receiver<ChatNetworkEvent>, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                let data = format!("{}\r\n", line);
                if writer.write_all(data.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        send(&out_tx, IrcMessage::command("CAP", vec!["REQ".into(), CAPABILITIES.into()]));
        send(&out_tx, IrcMessage::command("PASS", vec![self.pass.clone()]));
        send(&out_tx, IrcMessage::command("NICK", vec![self.nick.clone()]));

        tokio::time::timeout(REGISTRATION_TIMEOUT, await_welcome(&mut reader, &out_tx))
            .await
            .map_err(|_| ConnectionError::RegistrationTimeout(REGISTRATION_TIMEOUT.as_secs()))??;
        info!(nick = %self.nick, "registered with chat network");

        *self.outbound.lock().await = Some(out_tx.clone());

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let session = ReadSession {
            nick: self.nick.clone(),
            out: out_tx,
            events: event_tx,
            pending: self.pending.clone(),
            outbound: self.outbound.clone(),
        };
        tokio::spawn(session.run(reader));

        Ok(event_rx)
    }
}

#[async_trait]
impl ChatNetwork for TwitchClient {
    async fn connect(&self) -> Result<mpsc::Receiver<ChatNetworkEvent>, ConnectionError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let io_err = |source| ConnectionError::Io {
            addr: addr.clone(),
            source,
        };

        let tcp = TcpStream::connect(&addr).await.map_err(io_err)?;
        info!(%addr, tls = self.settings.tls, "connecting to chat network");

        match self.settings.ca_file.as_deref().filter(|_| self.settings.tls) {
            Some(ca_file) => {
                let connector = tls_connector(ca_file)?;
                let domain = ServerName::try_from(self.settings.host.clone())
                    .map_err(|e| ConnectionError::Tls(e.to_string()))?;
                let stream = connector.connect(domain, tcp).await.map_err(io_err)?;
                self.start(stream).await
            }
            None => self.start(tcp).await,
        }
    }

    async fn join(&self, channel: &str) -> Result<(), JoinError> {
        let channel = canonical_channel(channel);
        let Some(out) = self.outbound.lock().await.clone() else {
            return Err(JoinError::NotConnected);
        };

        self.throttle.acquire().await;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(channel.clone(), tx);
        let line = IrcMessage::command("JOIN", vec![format!("#{channel}")]).format();
        if out.send(line).is_err() {
            self.pending.remove(&channel);
            return Err(JoinError::NotConnected);
        }
        debug!(%channel, "JOIN sent");

        let timeout = self.settings.join_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(JoinError::Disconnected),
            Err(_) => {
                self.pending.remove(&channel);
                Err(JoinError::Timeout(timeout.as_secs()))
            }
        }
    }
}

/// Reader half of a registered connection.
struct ReadSession {
    nick: String,
    out: mpsc::UnboundedSender<String>,
    events: mpsc::Sender<ChatNetworkEvent>,
    pending: PendingJoins,
    outbound: Outbound,
}

impl ReadSession {
    async fn run<R: AsyncRead + Unpin>(self, mut reader: BufReader<R>) {
        let mut line_buf = String::new();

        loop {
            match read_bounded_line(&mut reader, &mut line_buf).await {
                Ok(0) => {
                    info!("chat network closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!("dropping oversized line");
                    line_buf.clear();
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "chat network read failed");
                    break;
                }
            }

            let line = line_buf.trim_end().to_string();
            line_buf.clear();

            let Ok(msg) = IrcMessage::parse(&line) else {
                continue;
            };

            match msg.command.as_str() {
                "PING" => {
                    send(&self.out, IrcMessage::command("PONG", msg.params.clone()));
                    continue;
                }
                "RECONNECT" => {
                    warn!("chat network requested a reconnect");
                    break;
                }
                "NOTICE" => self.resolve_refusal(&msg),
                _ => {}
            }

            let Some(event) = translate(&msg, &self.nick) else {
                continue;
            };
            let confirmed = match &event {
                ChatNetworkEvent::Join {
                    channel,
                    is_self: true,
                    ..
                } => Some(channel.clone()),
                _ => None,
            };
            if self.events.send(event).await.is_err() {
                break;
            }
            if let Some(channel) = confirmed
                && let Some((_, waiter)) = self.pending.remove(&channel)
            {
                let _ = waiter.send(Ok(()));
            }
        }

        // Joins still waiting will see their sender dropped.
        self.outbound.lock().await.take();
        self.pending.clear();
    }

    fn resolve_refusal(&self, msg: &IrcMessage) {
        let Some(notice_id) = msg.tag("msg-id") else {
            return;
        };
        if !JOIN_REFUSALS.contains(&notice_id) {
            return;
        }
        let Some(raw_channel) = msg.param(0) else {
            return;
        };
        let channel = canonical_channel(raw_channel);
        if let Some((_, waiter)) = self.pending.remove(&channel) {
            let _ = waiter.send(Err(JoinError::Rejected {
                notice_id: notice_id.to_string(),
                text: msg.param(1).unwrap_or_default().to_string(),
            }));
        }
    }
}

/// Read until the 001 welcome, answering PINGs on the way.
async fn await_welcome<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    out: &mpsc::UnboundedSender<String>,
) -> Result<(), ConnectionError> {
    let mut line_buf = String::new();
    loop {
        match read_bounded_line(reader, &mut line_buf).await {
            Ok(0) => return Err(ConnectionError::Closed),
            Ok(_) => {}
            Err(source) => {
                return Err(ConnectionError::Io {
                    addr: "registration".into(),
                    source,
                });
            }
        }
        let line = line_buf.trim_end().to_string();
        line_buf.clear();

        let Ok(msg) = IrcMessage::parse(&line) else {
            continue;
        };
        match msg.command.as_str() {
            "001" => return Ok(()),
            "PING" => send(out, IrcMessage::command("PONG", msg.params.clone())),
            "NOTICE" => {
                let text = msg.param(1).unwrap_or_default();
                if text.contains("authentication failed") || text.contains("Improperly formatted auth")
                {
                    return Err(ConnectionError::Authentication(text.to_string()));
                }
            }
            _ => {}
        }
    }
}

fn send(out: &mpsc::UnboundedSender<String>, msg: IrcMessage) {
    let _ = out.send(msg.format());
}

fn tls_connector(ca_file: &str) -> Result<TlsConnector, ConnectionError> {
    let file = std::fs::File::open(ca_file)
        .map_err(|e| ConnectionError::Tls(format!("failed to open {ca_file}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ConnectionError::Tls(format!("bad PEM in {ca_file}: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(ConnectionError::Tls(format!("no certificates found in {ca_file}")));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Read one line into `buf`, capped at MAX_LINE_LENGTH bytes.
/// Returns Ok(0) on EOF. An oversized line is consumed through its newline
/// and reported as InvalidData so the next read starts clean.
async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut String,
) -> std::io::Result<usize> {
    let mut line = Vec::new();
    let mut oversized = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.map_or(available.len(), |pos| pos + 1);
        if !oversized && line.len() + take <= MAX_LINE_LENGTH {
            line.extend_from_slice(&available[..take]);
        } else {
            oversized = true;
        }
        reader.consume(take);
        if newline.is_some() {
            break;
        }
    }

    if oversized {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line exceeds maximum length",
        ));
    }
    buf.push_str(&String::from_utf8_lossy(&line));
    Ok(line.len())
}
