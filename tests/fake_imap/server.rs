//! In-process fake IMAP server for integration testing.
//!
//! # Connection lifecycle
//!
//! Unlike a STARTTLS-based server, this one matches the connection
//! engine under test: the client dials straight into a TLS listener, so
//! the greeting is the first thing sent over the already-encrypted
//! stream.
//!
//! ```text
//!   Client TLS-connects
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client issues commands: LOGIN, SELECT, FETCH, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! Every client command starts with a tag the client chooses; the
//! server echoes it in the tagged completion so the client can match
//! responses to commands. Lines prefixed with `*` are untagged data
//! sent ahead of that completion.

use super::io::write_line;
use super::mailbox::Mailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAP server that runs on localhost with an OS-assigned port,
/// speaking direct TLS with a freshly generated self-signed certificate.
pub struct FakeImapServer {
    port: u16,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state. Runs
    /// until the returned handle is dropped.
    pub async fn start(mailbox: Mailbox) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()]).expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = mailbox.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &mailbox).await;
                });
            }
        });

        Self { port, _handle: handle }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, acceptor: TlsAcceptor, mailbox: &Mutex<Mailbox>) {
    let Ok(tls_stream) = acceptor.accept(stream).await else {
        return;
    };
    handle_session(tls_stream, mailbox).await;
}

struct Session {
    authenticated: bool,
    selected: Option<String>,
}

#[allow(clippy::too_many_lines)]
async fn handle_session<S: AsyncRead + AsyncWrite + Unpin>(stream: S, mailbox: &Mutex<Mailbox>) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 fake server ready\r\n").await.is_err() {
        return;
    }

    let mut session = Session {
        authenticated: false,
        selected: None,
    };

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        let mut parts = trimmed.splitn(3, ' ');
        let Some(tag) = parts.next() else { continue };
        let Some(verb) = parts.next() else {
            let _ = write_line(&mut reader, &format!("{tag} BAD missing command\r\n")).await;
            continue;
        };
        let rest = parts.next().unwrap_or("");
        let verb_upper = verb.to_ascii_uppercase();

        let outcome = match verb_upper.as_str() {
            "CAPABILITY" => cmd_capability(&mut reader, tag).await,
            "LOGIN" => cmd_login(&mut reader, tag, rest, &mut session).await,
            "SELECT" => cmd_select(&mut reader, tag, rest, mailbox, &mut session).await,
            "CREATE" => cmd_create(&mut reader, tag, rest, mailbox).await,
            "NOOP" => write_line(&mut reader, &format!("{tag} OK NOOP completed\r\n")).await,
            "UID" => cmd_uid(&mut reader, tag, rest, mailbox, &mut session).await,
            "EXPUNGE" => cmd_expunge(&mut reader, tag, mailbox, &mut session).await,
            "APPEND" => cmd_append(&mut reader, tag, rest, mailbox).await,
            "IDLE" => cmd_idle(&mut reader, tag).await,
            "LOGOUT" => {
                let _ = write_line(&mut reader, "* BYE logging out\r\n").await;
                let _ = write_line(&mut reader, &format!("{tag} OK LOGOUT completed\r\n")).await;
                break;
            }
            _ => write_line(&mut reader, &format!("{tag} BAD unknown command\r\n")).await,
        };
        if outcome.is_err() {
            break;
        }
    }
}

async fn cmd_capability<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>, tag: &str) -> std::io::Result<()> {
    write_line(
        reader,
        "* CAPABILITY IMAP4rev1 IDLE UIDPLUS MOVE UNSELECT ID NAMESPACE QUOTA SASL-IR AUTH=XOAUTH2\r\n",
    )
    .await?;
    write_line(reader, &format!("{tag} OK CAPABILITY completed\r\n")).await
}

async fn cmd_login<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    session: &mut Session,
) -> std::io::Result<()> {
    let mut args = rest.splitn(2, ' ');
    let user = args.next().unwrap_or("").trim_matches('"');
    let pass = args.next().unwrap_or("").trim_matches('"');
    if user == "testuser" && pass == "testpass" {
        session.authenticated = true;
        write_line(reader, &format!("{tag} OK LOGIN completed\r\n")).await
    } else {
        write_line(reader, &format!("{tag} NO LOGIN invalid credentials\r\n")).await
    }
}

async fn cmd_select<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    session: &mut Session,
) -> std::io::Result<()> {
    let name = rest.trim().trim_matches('"');
    let snap = mailbox.lock().unwrap().clone();
    let Some(folder) = snap.folder(name) else {
        return write_line(reader, &format!("{tag} NO [TRYCREATE] no such mailbox\r\n")).await;
    };
    write_line(reader, "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n").await?;
    write_line(reader, &format!("* {} EXISTS\r\n", folder.messages.len())).await?;
    write_line(reader, "* 0 RECENT\r\n").await?;
    write_line(reader, &format!("* OK [UIDVALIDITY {}] UIDs valid\r\n", folder.uidvalidity)).await?;
    write_line(reader, &format!("* OK [UIDNEXT {}] predicted next UID\r\n", folder.next_uid)).await?;
    write_line(reader, "* OK [PERMANENTFLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)] limited\r\n").await?;
    session.selected = Some(name.to_string());
    write_line(reader, &format!("{tag} OK [READ-WRITE] SELECT completed\r\n")).await
}

async fn cmd_create<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
) -> std::io::Result<()> {
    let name = rest.trim().trim_matches('"');
    let mut m = mailbox.lock().unwrap();
    if m.folder(name).is_none() {
        m.folders.push(super::mailbox::Folder::new(name));
    }
    drop(m);
    write_line(reader, &format!("{tag} OK CREATE completed\r\n")).await
}

fn parse_uid_set(set: &str, max_uid: u32) -> Vec<u32> {
    let mut uids = Vec::new();
    for part in set.split(',') {
        if let Some((lo, hi)) = part.split_once(':') {
            let lo: u32 = lo.parse().unwrap_or(1);
            let hi = if hi == "*" { max_uid } else { hi.parse().unwrap_or(max_uid) };
            uids.extend(lo..=hi);
        } else if let Ok(uid) = part.parse() {
            uids.push(uid);
        }
    }
    uids
}

async fn cmd_uid<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    session: &mut Session,
) -> std::io::Result<()> {
    let mut parts = rest.splitn(2, ' ');
    let sub_verb = parts.next().unwrap_or("").to_ascii_uppercase();
    let sub_rest = parts.next().unwrap_or("");

    let Some(selected) = session.selected.clone() else {
        return write_line(reader, &format!("{tag} BAD no mailbox selected\r\n")).await;
    };

    match sub_verb.as_str() {
        "FETCH" => cmd_uid_fetch(reader, tag, sub_rest, mailbox, &selected).await,
        "STORE" => cmd_uid_store(reader, tag, sub_rest, mailbox, &selected).await,
        "SEARCH" => cmd_uid_search(reader, tag, sub_rest, mailbox, &selected).await,
        "COPY" => cmd_uid_copy_move(reader, tag, sub_rest, mailbox, &selected, false).await,
        "MOVE" => cmd_uid_copy_move(reader, tag, sub_rest, mailbox, &selected, true).await,
        _ => write_line(reader, &format!("{tag} BAD unknown UID subcommand\r\n")).await,
    }
}

async fn cmd_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    selected: &str,
) -> std::io::Result<()> {
    let mut parts = rest.splitn(2, ' ');
    let set = parts.next().unwrap_or("");
    let snap = mailbox.lock().unwrap().clone();
    let Some(folder) = snap.folder(selected) else {
        return write_line(reader, &format!("{tag} NO mailbox gone\r\n")).await;
    };
    let max_uid = folder.messages.iter().map(|m| m.uid).max().unwrap_or(0);
    let wanted = parse_uid_set(set, max_uid);

    for (seq, msg) in folder.messages.iter().enumerate() {
        if !wanted.contains(&msg.uid) {
            continue;
        }
        let flags = msg.flags.join(" ");
        write_line(
            reader,
            &format!("* {} FETCH (UID {} FLAGS ({}))\r\n", seq + 1, msg.uid, flags),
        )
        .await?;
    }
    write_line(reader, &format!("{tag} OK UID FETCH completed\r\n")).await
}

async fn cmd_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    selected: &str,
) -> std::io::Result<()> {
    let mut parts = rest.splitn(2, ' ');
    let set = parts.next().unwrap_or("");
    let clause = parts.next().unwrap_or("");
    let (item, silent) = {
        let mut words = clause.split_whitespace();
        let item = words.next().unwrap_or("").to_ascii_uppercase();
        let silent = item.ends_with(".SILENT");
        (item.trim_end_matches(".SILENT").to_string(), silent)
    };
    let flags_arg: Vec<String> = clause
        .splitn(2, '(')
        .nth(1)
        .unwrap_or("")
        .trim_end_matches(')')
        .split_whitespace()
        .map(std::string::ToString::to_string)
        .collect();

    let mut m = mailbox.lock().unwrap();
    let max_uid = m.folder(selected).map_or(0, |f| f.messages.iter().map(|msg| msg.uid).max().unwrap_or(0));
    let wanted = parse_uid_set(set, max_uid);
    let Some(folder) = m.folder_mut(selected) else {
        return write_line(reader, &format!("{tag} NO mailbox gone\r\n")).await;
    };

    let mut updated = Vec::new();
    for (seq, msg) in folder.messages.iter_mut().enumerate() {
        if !wanted.contains(&msg.uid) {
            continue;
        }
        match item.as_str() {
            "+FLAGS" => {
                for f in &flags_arg {
                    if !msg.flags.contains(f) {
                        msg.flags.push(f.clone());
                    }
                }
            }
            "-FLAGS" => msg.flags.retain(|f| !flags_arg.contains(f)),
            _ => msg.flags = flags_arg.clone(),
        }
        updated.push((seq + 1, msg.uid, msg.flags.clone()));
    }
    drop(m);

    if !silent {
        for (seq, uid, flags) in updated {
            write_line(reader, &format!("* {seq} FETCH (UID {uid} FLAGS ({}))\r\n", flags.join(" "))).await?;
        }
    }
    write_line(reader, &format!("{tag} OK UID STORE completed\r\n")).await
}

async fn cmd_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    selected: &str,
) -> std::io::Result<()> {
    let query = rest.trim().to_ascii_uppercase();
    let snap = mailbox.lock().unwrap().clone();
    let Some(folder) = snap.folder(selected) else {
        return write_line(reader, &format!("{tag} NO mailbox gone\r\n")).await;
    };
    let matching: Vec<u32> = folder
        .messages
        .iter()
        .filter(|m| {
            if query.contains("UNSEEN") {
                !m.flags.iter().any(|f| f == "\\Seen")
            } else {
                true
            }
        })
        .map(|m| m.uid)
        .collect();
    let ids = matching.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join(" ");
    write_line(reader, &format!("* SEARCH {ids}\r\n")).await?;
    write_line(reader, &format!("{tag} OK UID SEARCH completed\r\n")).await
}

async fn cmd_uid_copy_move<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
    selected: &str,
    is_move: bool,
) -> std::io::Result<()> {
    let mut parts = rest.splitn(2, ' ');
    let set = parts.next().unwrap_or("");
    let dest = parts.next().unwrap_or("").trim().trim_matches('"');

    let mut m = mailbox.lock().unwrap();
    let max_uid = m.folder(selected).map_or(0, |f| f.messages.iter().map(|msg| msg.uid).max().unwrap_or(0));
    let wanted = parse_uid_set(set, max_uid);

    if m.folder(dest).is_none() {
        return write_line(reader, &format!("{tag} NO [TRYCREATE] destination mailbox missing\r\n")).await;
    }

    let Some(src) = m.folder_mut(selected) else {
        return write_line(reader, &format!("{tag} NO mailbox gone\r\n")).await;
    };
    let (moved, kept): (Vec<_>, Vec<_>) = src.messages.drain(..).partition(|msg| wanted.contains(&msg.uid));
    src.messages = kept;

    let dest_uidvalidity;
    let mut dest_uids = Vec::new();
    {
        let dest_folder = m.folder_mut(dest).expect("checked above");
        dest_uidvalidity = dest_folder.uidvalidity;
        for mut msg in moved {
            let new_uid = dest_folder.next_uid;
            dest_folder.next_uid += 1;
            dest_uids.push(new_uid);
            msg.uid = new_uid;
            dest_folder.messages.push(msg);
        }
    }
    drop(m);

    let src_set = wanted.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join(",");
    let dst_set = dest_uids.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join(",");
    let verb = if is_move { "UID MOVE" } else { "UID COPY" };
    write_line(
        reader,
        &format!("{tag} OK [COPYUID {dest_uidvalidity} {src_set} {dst_set}] {verb} completed\r\n"),
    )
    .await
}

async fn cmd_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    session: &mut Session,
) -> std::io::Result<()> {
    let Some(selected) = session.selected.clone() else {
        return write_line(reader, &format!("{tag} BAD no mailbox selected\r\n")).await;
    };
    let mut m = mailbox.lock().unwrap();
    let Some(folder) = m.folder_mut(&selected) else {
        return write_line(reader, &format!("{tag} NO mailbox gone\r\n")).await;
    };
    let mut expunged_seqs = Vec::new();
    let mut seq = 1usize;
    folder.messages.retain(|msg| {
        let keep = !msg.flags.iter().any(|f| f == "\\Deleted");
        if !keep {
            expunged_seqs.push(seq);
        }
        seq += 1;
        keep
    });
    drop(m);

    for s in expunged_seqs.iter().rev() {
        write_line(reader, &format!("* {s} EXPUNGE\r\n")).await?;
    }
    write_line(reader, &format!("{tag} OK EXPUNGE completed\r\n")).await
}

async fn cmd_append<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    tag: &str,
    rest: &str,
    mailbox: &Mutex<Mailbox>,
) -> std::io::Result<()> {
    let Some(brace_start) = rest.find('{') else {
        return write_line(reader, &format!("{tag} BAD APPEND missing literal\r\n")).await;
    };
    let Some(brace_end) = rest[brace_start..].find('}') else {
        return write_line(reader, &format!("{tag} BAD APPEND malformed literal\r\n")).await;
    };
    let size: usize = rest[brace_start + 1..brace_start + brace_end].parse().unwrap_or(0);
    let header = &rest[..brace_start];
    let mut header_parts = header.splitn(2, ' ');
    let mailbox_name = header_parts.next().unwrap_or("").trim().trim_matches('"').to_string();

    write_line(reader, "+ Ready for literal data\r\n").await?;

    let mut body = vec![0u8; size];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body).await?;
    let mut trailer = String::new();
    reader.read_line(&mut trailer).await?;

    let mut m = mailbox.lock().unwrap();
    let Some(folder) = m.folder_mut(&mailbox_name) else {
        return write_line(reader, &format!("{tag} NO [TRYCREATE] no such mailbox\r\n")).await;
    };
    let uid = folder.next_uid;
    folder.next_uid += 1;
    let uidvalidity = folder.uidvalidity;
    folder.messages.push(super::mailbox::TestMessage {
        uid,
        flags: Vec::new(),
        body,
    });
    drop(m);

    write_line(reader, &format!("{tag} OK [APPENDUID {uidvalidity} {uid}] APPEND completed\r\n")).await
}

async fn cmd_idle<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>, tag: &str) -> std::io::Result<()> {
    write_line(reader, "+ idling\r\n").await?;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return Ok(()),
            Ok(_) => {}
        }
        if line.trim_end_matches(['\r', '\n']).eq_ignore_ascii_case("DONE") {
            break;
        }
    }
    write_line(reader, &format!("{tag} OK IDLE completed\r\n")).await
}
