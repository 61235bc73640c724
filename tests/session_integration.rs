//! End-to-end sends against a scripted SMTP server on localhost.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use integrations_mailer::{
    ConnectionConfig, ConnectionConfigBuilder, MailErrorKind, Mailer, ResponsePolicy, Transcript,
};
use rstest::rstest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Replies the server gives, keyed by step.
#[derive(Debug, Clone)]
struct Script {
    replies: HashMap<&'static str, String>,
}

impl Script {
    fn new() -> Self {
        let replies = [
            ("GREETING", "220 mail.test ESMTP ready"),
            ("HELO", "250 mail.test"),
            ("EHLO", "250-mail.test Hello\r\n250-SIZE 1048576\r\n250 AUTH LOGIN"),
            ("AUTH", "334 VXNlcm5hbWU6"),
            ("USER", "334 UGFzc3dvcmQ6"),
            ("PASS", "235 Authentication succeeded"),
            ("MAIL", "250 OK"),
            ("RCPT", "250 Accepted"),
            ("DATA", "354 End data with <CR><LF>.<CR><LF>"),
            ("MESSAGE", "250 Queued as 1234"),
            ("QUIT", "221 Bye"),
        ]
        .into_iter()
        .map(|(step, reply)| (step, reply.to_string()))
        .collect();

        Self { replies }
    }

    fn with(mut self, step: &'static str, reply: &str) -> Self {
        self.replies.insert(step, reply.to_string());
        self
    }

    fn reply(&self, step: &str) -> String {
        format!("{}\r\n", self.replies.get(step).map(String::as_str).unwrap_or("500 ?"))
    }
}

/// What the server saw.
#[derive(Debug, Default)]
struct Session {
    commands: Vec<String>,
    data: String,
    quit: bool,
}

async fn spawn_server(script: Script) -> (u16, JoinHandle<Session>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut seen = Session::default();
        let mut auth_step = 0;

        write_half
            .write_all(script.reply("GREETING").as_bytes())
            .await
            .unwrap();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            seen.commands.push(line.clone());

            let step = match auth_step {
                1 => "USER",
                2 => "PASS",
                _ => line.split([' ', ':']).next().unwrap_or(""),
            };
            let reply = script.reply(step);

            auth_step = match step {
                "AUTH" | "USER" if reply.starts_with("334") => auth_step + 1,
                _ => 0,
            };
            if step == "QUIT" {
                seen.quit = true;
            }

            write_half.write_all(reply.as_bytes()).await.unwrap();

            if step == "DATA" && reply.starts_with("354") {
                loop {
                    let mut data_line = String::new();
                    if reader.read_line(&mut data_line).await.unwrap() == 0 {
                        return seen;
                    }
                    if data_line == ".\r\n" {
                        break;
                    }
                    seen.data.push_str(&data_line);
                }
                write_half
                    .write_all(script.reply("MESSAGE").as_bytes())
                    .await
                    .unwrap();
            }
        }

        seen
    });

    (port, handle)
}

fn builder(port: u16) -> ConnectionConfigBuilder {
    ConnectionConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .local_hostname("client.test")
        .from("sender@example.com", Some("Sender"))
        .timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_plain_send_delivers_message() {
    let (port, server) = spawn_server(Script::new()).await;
    let config = builder(port).build().unwrap();

    let sent = Mailer::new(config)
        .to(("to@example.com", "To"))
        .cc("cc@example.com")
        .bcc("hidden@example.com")
        .subject("Status")
        .text("All systems go.\n.leading dot")
        .send()
        .await;
    assert!(sent);

    let seen = server.await.unwrap();
    assert_eq!(
        seen.commands,
        vec![
            "HELO client.test",
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<to@example.com>",
            "RCPT TO:<cc@example.com>",
            "RCPT TO:<hidden@example.com>",
            "DATA",
            "QUIT",
        ]
    );
    assert!(seen.quit);

    assert!(seen.data.starts_with("From: Sender <sender@example.com>\r\n"));
    assert!(seen.data.contains("To: To <to@example.com>\r\n"));
    assert!(seen.data.contains("CC: <cc@example.com>\r\n"));
    assert!(!seen.data.contains("hidden@example.com"));
    assert!(seen.data.contains("\r\n..leading dot\r\n"));
}

#[tokio::test]
async fn test_authenticated_send_redacts_password() {
    let (port, server) = spawn_server(Script::new()).await;
    let config = builder(port).credentials("user", "secret").build().unwrap();
    let transcript = Transcript::new();

    Mailer::new(config)
        .to("to@example.com")
        .text("Hello")
        .transcript(transcript.clone())
        .try_send()
        .await
        .unwrap();

    let seen = server.await.unwrap();
    assert_eq!(
        &seen.commands[..4],
        &["EHLO client.test", "AUTH LOGIN", "dXNlcg==", "c2VjcmV0"]
    );

    let logged = transcript.commands();
    assert!(logged.contains(&"dXNlcg==".to_string()));
    assert!(!logged.contains(&"c2VjcmV0".to_string()));

    // The multiline EHLO reply was consumed whole, so later replies line up.
    let received: Vec<_> = transcript
        .entries()
        .into_iter()
        .filter(|e| e.direction == integrations_mailer::Direction::Received)
        .map(|e| e.line)
        .collect();
    assert!(received.contains(&"250 AUTH LOGIN".to_string()));
    assert!(received.contains(&"250 Queued as 1234".to_string()));
}

#[rstest]
#[case::greeting("GREETING", "554 No service", MailErrorKind::UnexpectedGreeting)]
#[case::helo("HELO", "501 Bad hostname", MailErrorKind::GreetingRejected)]
#[case::message("MESSAGE", "554 Rejected as spam", MailErrorKind::MessageRejected)]
#[tokio::test]
async fn test_rejections_still_quit(
    #[case] step: &'static str,
    #[case] reply: &str,
    #[case] expected: MailErrorKind,
) {
    let (port, server) = spawn_server(Script::new().with(step, reply)).await;
    let config = builder(port).build().unwrap();

    let err = Mailer::new(config)
        .to("to@example.com")
        .text("Hello")
        .try_send()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), expected);

    let seen = server.await.unwrap();
    assert!(seen.quit);
    assert_eq!(seen.commands.last().map(String::as_str), Some("QUIT"));
}

#[rstest]
#[case::auth("AUTH", "504 Unrecognized mechanism")]
#[case::user("USER", "535 Bad user")]
#[case::pass("PASS", "535 Authentication failed")]
#[tokio::test]
async fn test_auth_failures(#[case] step: &'static str, #[case] reply: &str) {
    let (port, server) = spawn_server(Script::new().with(step, reply)).await;
    let config = builder(port).credentials("user", "secret").build().unwrap();

    let err = Mailer::new(config)
        .to("to@example.com")
        .try_send()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MailErrorKind::AuthenticationFailed);

    let seen = server.await.unwrap();
    assert!(!seen.commands.iter().any(|c| c.starts_with("MAIL FROM")));
    assert!(seen.quit);
}

#[tokio::test]
async fn test_strict_policy_stops_at_rejected_sender() {
    let script = Script::new().with("MAIL", "550 Sender denied");
    let (port, server) = spawn_server(script).await;
    let config = builder(port)
        .response_policy(ResponsePolicy::Strict)
        .build()
        .unwrap();

    let err = Mailer::new(config)
        .to("to@example.com")
        .try_send()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MailErrorKind::SenderRejected);
    assert_eq!(err.smtp_code(), Some(550));

    let seen = server.await.unwrap();
    assert_eq!(
        seen.commands,
        vec!["HELO client.test", "MAIL FROM:<sender@example.com>", "QUIT"]
    );
}

#[tokio::test]
async fn test_lenient_policy_ignores_rejected_recipient() {
    let script = Script::new().with("RCPT", "550 No such user");
    let (port, server) = spawn_server(script).await;
    let config = builder(port).build().unwrap();

    let sent = Mailer::new(config).to("nobody@example.com").send().await;
    assert!(sent);
    assert!(server.await.unwrap().commands.contains(&"DATA".to_string()));
}

#[tokio::test]
async fn test_attachment_is_sent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"attached notes").unwrap();
    drop(file);

    let (port, server) = spawn_server(Script::new()).await;
    let config = builder(port).build().unwrap();

    let sent = Mailer::new(config)
        .to("to@example.com")
        .text("See attached")
        .html("<p>See attached</p>")
        .attach(path.as_path())
        .attach(dir.path().join("missing.txt"))
        .send()
        .await;
    assert!(sent);

    let seen = server.await.unwrap();
    assert!(seen.data.contains("Content-Type: multipart/mixed; boundary="));
    assert!(seen.data.contains("Content-Type: text/html; charset=\"UTF-8\""));
    assert!(seen.data.contains("filename=\"notes.txt\""));
    // base64 of "attached notes"
    assert!(seen.data.contains("YXR0YWNoZWQgbm90ZXM="));
    assert!(!seen.data.contains("missing.txt"));
}
