use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::TransportInfo;
use super::protocol::{
    self, CLIPS_INFO, Codec, DEFAULT_PORT, Line, SUCCESS, TransportCommand, VideoInput,
    is_line_safe,
};
use crate::model::{Clip, TransportStatus};

const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Owned copy of a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn opens_block(&self) -> bool {
        self.text.ends_with(':')
    }
}

/// One short-lived control connection.
struct Session {
    stream: BufReader<TcpStream>,
    line: String,
}

impl Session {
    async fn open(address: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((address, port)).await?;
        Ok(Self {
            stream: BufReader::new(stream),
            line: String::new(),
        })
    }

    async fn send(&mut self, command: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }

    /// Read one raw line; `None` at end of stream.
    async fn next_line(&mut self) -> io::Result<Option<&str>> {
        self.line.clear();
        if self.stream.read_line(&mut self.line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.as_str()))
    }

    /// Skip notifications and stray lines until the reply to our command.
    async fn reply(&mut self) -> io::Result<Reply> {
        loop {
            let Some(raw) = self.next_line().await? else {
                return Err(io::ErrorKind::UnexpectedEof.into());
            };
            if let Line::Status(status) = protocol::parse_line(raw) {
                if status.is_notification() {
                    continue;
                }
                return Ok(Reply {
                    code: status.code,
                    text: status.text.to_string(),
                });
            }
        }
    }

    /// Feed every `key: value` line of the open block to `field` until the closing blank line.
    async fn read_block(&mut self, mut field: impl FnMut(&str, &str)) -> io::Result<()> {
        loop {
            let Some(raw) = self.next_line().await? else {
                return Ok(());
            };
            match protocol::parse_line(raw) {
                Line::Blank => return Ok(()),
                Line::Field { key, value } => field(key, value),
                Line::Status(_) | Line::Other(_) => {}
            }
        }
    }
}

/// Text-protocol client for one recording deck.
///
/// Every operation opens its own connection and is bounded by a timeout; failures
/// resolve to `false`, `None` or an empty list instead of an error.
#[derive(Debug, Clone)]
pub struct DeckClient {
    address: String,
    port: u16,
    control_timeout: Duration,
    list_timeout: Duration,
}

impl DeckClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeouts(mut self, control: Duration, list: Duration) -> Self {
        self.control_timeout = control;
        self.list_timeout = list;
        self
    }

    async fn open(&self) -> io::Result<Session> {
        if self.address.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no address"));
        }
        Session::open(&self.address, self.port).await
    }

    pub async fn check_online(&self) -> bool {
        match timeout(self.control_timeout, self.open()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address, error = %e, "Deck unreachable");
                false
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Deck connect timed out");
                false
            }
        }
    }

    /// Send lines one after another; true when every one is answered with `200`.
    async fn run(&self, commands: &[String]) -> bool {
        let exchange = async {
            let mut session = self.open().await?;
            for command in commands {
                session.send(command).await?;
                let reply = session.reply().await?;
                if reply.code != SUCCESS {
                    tracing::warn!(
                        address = %self.address,
                        command = %command,
                        code = reply.code,
                        reply = %reply.text,
                        "Deck rejected command"
                    );
                    return Ok(false);
                }
            }
            Ok::<_, io::Error>(true)
        };

        match timeout(self.control_timeout, exchange).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::warn!(address = %self.address, error = %e, "Deck command failed");
                false
            }
            Err(_) => {
                tracing::warn!(address = %self.address, "Deck command timed out");
                false
            }
        }
    }

    pub async fn send_transport_command(&self, command: &str) -> bool {
        self.run(&[command.to_string()]).await
    }

    pub async fn transport(&self, command: &TransportCommand) -> bool {
        self.send_transport_command(&command.line()).await
    }

    pub async fn set_codec(&self, name: &str) -> bool {
        let Some(codec) = Codec::from_name(name) else {
            tracing::warn!(codec = %name, "Unknown codec");
            return false;
        };
        self.run(&[format!("configuration: file format: {}", codec.device_token())])
            .await
    }

    pub async fn set_video_input(&self, input: VideoInput) -> bool {
        self.run(&[format!("configuration: video input: {}", input)])
            .await
    }

    /// Select slot 1 and name the next recording. The two commands are not atomic.
    pub async fn set_take_filename(&self, name: &str) -> bool {
        if !is_line_safe(name) {
            tracing::warn!(address = %self.address, "Refusing take name with control characters");
            return false;
        }
        self.run(&[
            "disk select: slot id: 1".to_string(),
            format!("disk select: video filename: {}", name),
        ])
        .await
    }

    /// Friendly codec name for known formats, the raw device token otherwise.
    pub async fn query_codec(&self) -> Option<String> {
        let exchange = async {
            let mut session = self.open().await?;
            session.send("configuration").await?;
            let reply = session.reply().await?;
            let mut token = None;
            if reply.opens_block() {
                session
                    .read_block(|key, value| {
                        if key == "file format" {
                            token = Some(value.to_string());
                        }
                    })
                    .await?;
            }
            Ok::<_, io::Error>(token)
        };

        match timeout(self.control_timeout, exchange).await {
            Ok(Ok(token)) => token.map(|token| match Codec::from_device_token(&token) {
                Some(codec) => codec.name().to_string(),
                None => token,
            }),
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address, error = %e, "Codec query failed");
                None
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Codec query timed out");
                None
            }
        }
    }

    /// Transport status and display timecode; whatever arrived before a timeout is kept.
    pub async fn query_transport_info(&self) -> TransportInfo {
        let mut info = TransportInfo::default();
        let exchange = async {
            let mut session = self.open().await?;
            session.send("transport info").await?;
            let reply = session.reply().await?;
            if reply.opens_block() {
                session
                    .read_block(|key, value| match key {
                        "status" => info.status = TransportStatus::parse(value),
                        "display timecode" if protocol::is_timecode(value) => {
                            info.timecode = Some(value.to_string())
                        }
                        _ => {}
                    })
                    .await?;
            }
            Ok::<_, io::Error>(())
        };

        match timeout(self.control_timeout, exchange).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address, error = %e, "Transport query failed");
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Transport query timed out");
            }
        }
        info
    }

    /// Clips on the selected disk, in deck order. Empty on failure or timeout.
    pub async fn list_clips(&self) -> Vec<Clip> {
        let exchange = async {
            let mut session = self.open().await?;
            session.send("clips get").await?;
            let reply = session.reply().await?;
            let mut clips = Vec::new();
            if reply.code == CLIPS_INFO {
                session
                    .read_block(|key, value| {
                        if let Some(clip) = protocol::parse_clip(key, value) {
                            clips.push(clip);
                        }
                    })
                    .await?;
            }
            Ok::<_, io::Error>(clips)
        };

        match timeout(self.list_timeout, exchange).await {
            Ok(Ok(clips)) => clips,
            Ok(Err(e)) => {
                tracing::warn!(address = %self.address, error = %e, "Clip listing failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(address = %self.address, "Clip listing timed out");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Scripted deck on a loopback port. Each command line is answered by the
    /// first matching `(prefix, reply)` rule; unmatched commands get `200 ok`.
    pub struct FakeDeck {
        pub port: u16,
        pub received: Arc<Mutex<Vec<String>>>,
    }

    impl FakeDeck {
        pub async fn start(rules: Vec<(&'static str, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let received = Arc::new(Mutex::new(Vec::new()));
            let log = received.clone();

            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let rules = rules.clone();
                    let log = log.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let _ = write
                            .write_all(b"500 connection info:\r\nprotocol version: 1.11\r\nmodel: Fake\r\n\r\n")
                            .await;
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            log.lock().unwrap().push(line.clone());
                            let reply = rules
                                .iter()
                                .find(|(prefix, _)| line.starts_with(prefix))
                                .map(|(_, reply)| *reply)
                                .unwrap_or("200 ok\r\n");
                            if reply.is_empty() {
                                continue;
                            }
                            if write.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            });

            Self { port, received }
        }

        pub fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDeck;
    use super::*;

    fn client(port: u16) -> DeckClient {
        DeckClient::new("127.0.0.1")
            .with_port(port)
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_check_online() {
        let deck = FakeDeck::start(Vec::new()).await;
        assert!(client(deck.port).check_online().await);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!client(closed_port).check_online().await);
        assert!(!DeckClient::new("").check_online().await);
    }

    #[tokio::test]
    async fn test_query_codec_maps_known_token() {
        let deck = FakeDeck::start(vec![(
            "configuration",
            "211 configuration:\r\nvideo input: SDI\r\nfile format: QuickTimeProResHQ\r\n\r\n",
        )])
        .await;
        assert_eq!(
            client(deck.port).query_codec().await.as_deref(),
            Some("ProRes422HQ")
        );
    }

    #[tokio::test]
    async fn test_query_codec_passes_unknown_token() {
        let deck = FakeDeck::start(vec![(
            "configuration",
            "211 configuration:\r\nfile format: QuickTimeUncompressed\r\n\r\n",
        )])
        .await;
        assert_eq!(
            client(deck.port).query_codec().await.as_deref(),
            Some("QuickTimeUncompressed")
        );
    }

    #[tokio::test]
    async fn test_set_codec() {
        let deck = FakeDeck::start(Vec::new()).await;
        assert!(client(deck.port).set_codec("DNxHD145").await);
        assert_eq!(deck.received(), vec!["configuration: file format: DNxHD145"]);

        // Unknown names never reach the deck
        assert!(!client(deck.port).set_codec("H264").await);
        assert_eq!(deck.received().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_code_rejects() {
        let deck = FakeDeck::start(vec![("record", "102 unsupported\r\n")]).await;
        assert!(!client(deck.port).transport(&TransportCommand::Record).await);
        assert!(client(deck.port).transport(&TransportCommand::Stop).await);
    }

    #[tokio::test]
    async fn test_transport_info() {
        let deck = FakeDeck::start(vec![(
            "transport info",
            "208 transport info:\r\nstatus: record\r\nspeed: 100\r\ndisplay timecode: 00:01:02:03\r\n\r\n",
        )])
        .await;
        let info = client(deck.port).query_transport_info().await;
        assert_eq!(info.status, Some(TransportStatus::Record));
        assert_eq!(info.timecode.as_deref(), Some("00:01:02:03"));
    }

    #[tokio::test]
    async fn test_transport_info_keeps_partial_result_on_timeout() {
        // Block never closes, so the read runs into the timeout
        let deck = FakeDeck::start(vec![(
            "transport info",
            "208 transport info:\r\nstatus: play\r\n",
        )])
        .await;
        let info = client(deck.port).query_transport_info().await;
        assert_eq!(info.status, Some(TransportStatus::Play));
        assert_eq!(info.timecode, None);
    }

    #[tokio::test]
    async fn test_list_clips() {
        let deck = FakeDeck::start(vec![(
            "clips get",
            "205 clips info:\r\nclip count: 2\r\n1: Clip1.mov 00:05:23:12\r\n2: Clip Two.mov 00:00:10:00\r\n\r\n",
        )])
        .await;
        let clips = client(deck.port).list_clips().await;
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].name, "Clip1.mov");
        assert_eq!(clips[1].id, 2);
        assert_eq!(clips[1].name, "Clip Two.mov");
        assert_eq!(clips[1].duration.as_deref(), Some("00:00:10:00"));
    }

    #[tokio::test]
    async fn test_list_clips_empty_on_timeout() {
        let deck = FakeDeck::start(vec![("clips get", "205 clips info:\r\n1: A.mov 00:00:01:00\r\n")]).await;
        assert!(client(deck.port).list_clips().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_take_filename_sends_both_commands() {
        let deck = FakeDeck::start(Vec::new()).await;
        assert!(client(deck.port).set_take_filename("DEMO_20250101").await);
        assert_eq!(
            deck.received(),
            vec![
                "disk select: slot id: 1",
                "disk select: video filename: DEMO_20250101"
            ]
        );
    }

    #[tokio::test]
    async fn test_set_take_filename_refuses_embedded_newline() {
        let deck = FakeDeck::start(Vec::new()).await;
        assert!(!client(deck.port).set_take_filename("SHOW\nrecord").await);
        assert!(deck.received().is_empty());
    }

    #[tokio::test]
    async fn test_set_take_filename_stops_after_rejection() {
        let deck = FakeDeck::start(vec![("disk select: slot", "120 slot not selected\r\n")]).await;
        assert!(!client(deck.port).set_take_filename("X").await);
        assert_eq!(deck.received(), vec!["disk select: slot id: 1"]);
    }

    #[tokio::test]
    async fn test_silent_deck_times_out() {
        let deck = FakeDeck::start(vec![("play", "")]).await;
        assert!(!client(deck.port).transport(&TransportCommand::Play).await);
    }

    #[tokio::test]
    async fn test_video_input() {
        let deck = FakeDeck::start(Vec::new()).await;
        assert!(client(deck.port).set_video_input(VideoInput::Hdmi).await);
        assert_eq!(deck.received(), vec!["configuration: video input: HDMI"]);
    }
}
