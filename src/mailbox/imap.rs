//! IMAP4rev1 over TLS, driven by hand on a blocking socket.
//!
//! Only the handful of commands the converter needs are spoken: LOGIN,
//! SELECT, SEARCH, FETCH, CLOSE and LOGOUT. Run it on a blocking thread.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::ConnectionParams;
use crate::error::{ConfigError, MailboxError};
use crate::mailbox::{Mailbox, MailboxSession, MessageId, SearchCriteria};

/// Socket connect, read and write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal accepted from the server.
const MAX_LITERAL: usize = 64 * 1024 * 1024;

/// Mailbox reached over implicit TLS (usually port 993).
pub struct ImapMailbox {
    params: Arc<ConnectionParams>,
    tls: Arc<rustls::ClientConfig>,
}

impl ImapMailbox {
    pub fn new(params: Arc<ConnectionParams>) -> Result<Self, ConfigError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            params,
            tls: Arc::new(tls),
        })
    }

    fn connection_error(&self, reason: impl ToString) -> MailboxError {
        MailboxError::Connection {
            host: self.params.host.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Mailbox for ImapMailbox {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let params = &self.params;

        let tcp = connect_tcp(&params.host, params.port, IO_TIMEOUT)
            .map_err(|e| self.connection_error(e))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))
            .map_err(|e| self.connection_error(e))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))
            .map_err(|e| self.connection_error(e))?;

        let server_name =
            ServerName::try_from(params.host.clone()).map_err(|e| self.connection_error(e))?;
        let conn = rustls::ClientConnection::new(Arc::clone(&self.tls), server_name)
            .map_err(|e| self.connection_error(e))?;

        let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));

        let greeting = session.read_line().map_err(|e| self.connection_error(e))?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(self.connection_error(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        let login = session
            .command(&format!(
                "LOGIN {} {}",
                quote(&params.username),
                quote(params.password.expose_secret())
            ))
            .map_err(|e| self.connection_error(e))?;
        if !login.is_ok() {
            return Err(self.connection_error("login rejected"));
        }

        let select = session
            .command("SELECT \"INBOX\"")
            .map_err(|e| self.connection_error(e))?;
        if !select.is_ok() {
            return Err(self.connection_error(format!("SELECT INBOX: {}", select.status)));
        }

        debug!(host = %params.host, "IMAP session established");
        Ok(Box::new(session))
    }
}

/// Reply to one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged lines, literals removed.
    untagged: Vec<String>,
    /// Literal payloads, in arrival order.
    literals: Vec<Vec<u8>>,
    /// Text of the tagged completion after the tag, e.g. `OK FETCH completed`.
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.starts_with("OK")
    }
}

/// Try each resolved address in turn, each bounded by `timeout`.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} resolved to no addresses"))
    }))
}

struct ImapSession<S: Read + Write> {
    reader: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            ));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send one command and collect everything up to its tagged completion.
    fn command(&mut self, cmd: &str) -> io::Result<Response> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&prefix) {
                response.status = status.trim_end().to_string();
                return Ok(response);
            }

            if let Some(len) = literal_len(&line) {
                if len > MAX_LITERAL {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("literal of {len} bytes exceeds {MAX_LITERAL}"),
                    ));
                }
                let mut literal = vec![0u8; len];
                self.reader.read_exact(&mut literal)?;
                response.literals.push(literal);
                // The rest of the response line (usually ")") follows the literal.
                let _ = self.read_line()?;
            }
            response.untagged.push(line);
        }
    }
}

impl<S: Read + Write + Send> MailboxSession for ImapSession<S> {
    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>, MailboxError> {
        let response = self
            .command(&search_command(criteria))
            .map_err(|e| MailboxError::Search(e.to_string()))?;
        if !response.is_ok() {
            return Err(MailboxError::Search(response.status));
        }
        Ok(parse_search_response(&response.untagged))
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError> {
        let fetch_error = |reason: String| MailboxError::Fetch {
            id: id.to_string(),
            reason,
        };

        if id.as_str().is_empty() || !id.as_str().bytes().all(|b| b.is_ascii_digit()) {
            return Err(fetch_error("not a sequence number".into()));
        }

        let response = self
            .command(&format!("FETCH {id} RFC822"))
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.is_ok() {
            return Err(fetch_error(response.status));
        }

        response
            .literals
            .into_iter()
            .find(|literal| !literal.is_empty())
            .ok_or_else(|| fetch_error("server returned no message data".into()))
    }

    fn close(&mut self) -> Result<(), MailboxError> {
        let close = self
            .command("CLOSE")
            .map_err(|e| MailboxError::Protocol(e.to_string()))?;
        let logout = self
            .command("LOGOUT")
            .map_err(|e| MailboxError::Protocol(e.to_string()))?;
        if !close.is_ok() {
            return Err(MailboxError::Protocol(format!("CLOSE: {}", close.status)));
        }
        if !logout.is_ok() {
            return Err(MailboxError::Protocol(format!("LOGOUT: {}", logout.status)));
        }
        Ok(())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote a string for use as an IMAP quoted-string.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// `SEARCH FROM "<sender>" SUBJECT "<subject>"`.
pub fn search_command(criteria: &SearchCriteria) -> String {
    format!(
        "SEARCH FROM {} SUBJECT {}",
        quote(&criteria.sender),
        quote(&criteria.subject)
    )
}

/// Collect the sequence numbers from `* SEARCH` lines.
pub fn parse_search_response(lines: &[String]) -> Vec<MessageId> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(str::split_whitespace)
        .map(MessageId::new)
        .collect()
}

/// Length of the literal announced at the end of `line` (`... {123}\r\n`).
pub fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let body = trimmed.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;

    use super::*;

    /// Replays canned server output and records what the client sent.
    struct ScriptedStream {
        server: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.server.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(server: &str) -> ImapSession<ScriptedStream> {
        ImapSession::new(ScriptedStream {
            server: Cursor::new(server.as_bytes().to_vec()),
            sent: Vec::new(),
        })
    }

    fn sent(session: &ImapSession<ScriptedStream>) -> String {
        String::from_utf8_lossy(&session.reader.get_ref().sent).into_owned()
    }

    #[test]
    fn fetch_reads_exactly_the_announced_literal() {
        // The literal contains a line that looks like the tagged completion.
        let mut session = scripted(
            "* 7 FETCH (RFC822 {22}\r\n\
             Subject: x\r\nA0001 OK\r\n)\r\n\
             A0001 OK FETCH completed\r\n",
        );

        let raw = session.fetch(&MessageId::new("7")).unwrap();
        assert_eq!(raw, b"Subject: x\r\nA0001 OK\r\n");
        assert_eq!(sent(&session), "A0001 FETCH 7 RFC822\r\n");
    }

    #[test]
    fn fetch_without_literal_is_an_error() {
        let mut session = scripted(
            "* 7 FETCH (FLAGS (\\Seen))\r\n\
             A0001 OK FETCH completed\r\n",
        );

        let err = session.fetch(&MessageId::new("7")).unwrap_err();
        assert!(matches!(err, MailboxError::Fetch { ref id, .. } if id == "7"));
    }

    #[test]
    fn fetch_with_rejected_completion_is_an_error() {
        let mut session = scripted("A0001 NO [NONEXISTENT] No such message\r\n");

        match session.fetch(&MessageId::new("99")).unwrap_err() {
            MailboxError::Fetch { id, reason } => {
                assert_eq!(id, "99");
                assert!(reason.contains("NONEXISTENT"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_literal_is_refused() {
        let mut session = scripted("* 1 FETCH (RFC822 {18446744073709551615}\r\n");

        let err = session.fetch(&MessageId::new("1")).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn non_numeric_id_never_reaches_the_server() {
        let mut session = scripted("");
        assert!(session.fetch(&MessageId::new("1:*")).is_err());
        assert!(sent(&session).is_empty());
    }

    #[test]
    fn search_collects_ids_and_tags_increment() {
        let mut session = scripted(
            "* SEARCH 3 9\r\nA0001 OK SEARCH completed\r\n\
             * 9 FETCH (RFC822 {2}\r\nhi)\r\nA0002 OK done\r\n",
        );

        let criteria = SearchCriteria::new("a@b.c", "Ride");
        let ids = session.search(&criteria).unwrap();
        assert_eq!(ids, vec![MessageId::new("3"), MessageId::new("9")]);
        assert_eq!(session.fetch(&ids[1]).unwrap(), b"hi");
        assert_eq!(
            sent(&session),
            "A0001 SEARCH FROM \"a@b.c\" SUBJECT \"Ride\"\r\nA0002 FETCH 9 RFC822\r\n"
        );
    }

    #[test]
    fn close_sends_close_then_logout() {
        let mut session = scripted(
            "A0001 OK CLOSE completed\r\n\
             * BYE logging out\r\nA0002 OK LOGOUT completed\r\n",
        );

        session.close().unwrap();
        assert_eq!(sent(&session), "A0001 CLOSE\r\nA0002 LOGOUT\r\n");
    }

    #[test]
    fn close_reports_a_rejected_close() {
        let mut session =
            scripted("A0001 BAD No mailbox selected\r\nA0002 OK LOGOUT completed\r\n");

        let err = session.close().unwrap_err();
        assert!(matches!(err, MailboxError::Protocol(ref msg) if msg.starts_with("CLOSE")));
    }

    #[test]
    fn truncated_server_output_is_an_error() {
        let mut session = scripted("* 1 FETCH (RFC822 {50}\r\nshort");
        assert!(session.fetch(&MessageId::new("1")).is_err());
    }

    #[test]
    fn tcp_connect_reaches_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(connect_tcp("127.0.0.1", port, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn tcp_connect_to_a_closed_port_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(connect_tcp("127.0.0.1", port, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn quote_escapes_quotes_and_backslashes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn search_command_uses_sender_and_subject() {
        let criteria = SearchCriteria::new("no-reply@lyftmail.com", "Your ride with");
        assert_eq!(
            search_command(&criteria),
            r#"SEARCH FROM "no-reply@lyftmail.com" SUBJECT "Your ride with""#
        );
    }

    #[test]
    fn search_response_parsing() {
        let lines = vec![
            "* SEARCH 2 5 17\r\n".to_string(),
            "* 23 EXISTS\r\n".to_string(),
        ];
        let ids = parse_search_response(&lines);
        assert_eq!(
            ids,
            vec![MessageId::new("2"), MessageId::new("5"), MessageId::new("17")]
        );
    }

    #[test]
    fn empty_search_response_is_not_an_error() {
        let lines = vec!["* SEARCH\r\n".to_string()];
        assert!(parse_search_response(&lines).is_empty());
        assert!(parse_search_response(&[]).is_empty());
    }

    #[test]
    fn literal_length_detection() {
        assert_eq!(literal_len("* 3 FETCH (RFC822 {1024}\r\n"), Some(1024));
        assert_eq!(literal_len("* 3 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len("* 3 FETCH (RFC822 {abc}\r\n"), None);
    }
}
