//! Semantic parsing: turns a [`RawUnit`] into one or more [`Response`]
//! values. Kept deliberately close to the wire grammar's actual shape
//! (whitespace-split tokens, bracketed response codes) rather than a
//! general-purpose grammar engine — IMAP4rev1 lines are regular enough
//! that a hand-rolled scanner reads more clearly than a parser
//! combinator stack would.

use super::framer::{Part, RawUnit};
use super::response::{
    ConditionalState, FetchEvent, MailboxData, MessageData, ResponseCode, Response, Status,
    Untagged,
};
use crate::error::{Error, Result};

/// Parse one raw unit into zero or more responses. A `FETCH` line
/// expands into a `Start`/`StartUid` event, one event per attribute,
/// and a trailing `Finish`; everything else maps to exactly one
/// `Response`.
pub fn parse_unit(unit: &RawUnit) -> Result<Vec<Response>> {
    let text = unit.text_only();
    let trimmed = text.trim_end_matches(['\r', '\n']);

    if let Some(rest) = trimmed.strip_prefix("+ ") {
        return Ok(vec![parse_continuation(rest)]);
    }
    if trimmed == "+" {
        return Ok(vec![Response::IdleStarted]);
    }

    if let Some(rest) = trimmed.strip_prefix("* ") {
        return parse_untagged(rest, unit);
    }

    parse_tagged(trimmed)
}

fn parse_continuation(rest: &str) -> Response {
    if rest.eq_ignore_ascii_case("idling") {
        return Response::IdleStarted;
    }
    match base64_decode(rest) {
        Some(bytes) => Response::AuthenticationChallenge(bytes),
        None => Response::AuthenticationChallenge(rest.as_bytes().to_vec()),
    }
}

fn parse_tagged(line: &str) -> Result<Vec<Response>> {
    let mut parts = line.splitn(3, ' ');
    let tag = parts
        .next()
        .ok_or_else(|| Error::MalformedResponse("missing tag".into()))?;
    let word = parts
        .next()
        .ok_or_else(|| Error::MalformedResponse(format!("missing status in: {line}")))?;
    let rest = parts.next().unwrap_or("");
    let status = parse_status(word)
        .ok_or_else(|| Error::MalformedResponse(format!("unknown status word: {word}")))?;
    let (code, text) = parse_code_and_text(rest);
    Ok(vec![Response::Tagged {
        tag: tag.to_string(),
        status,
        code,
        text,
    }])
}

fn parse_status(word: &str) -> Option<Status> {
    match word.to_ascii_uppercase().as_str() {
        "OK" => Some(Status::Ok),
        "NO" => Some(Status::No),
        "BAD" => Some(Status::Bad),
        _ => None,
    }
}

/// Split `[CODE ...] free text` into the parsed code (if any) and the
/// remaining human-readable text.
fn parse_code_and_text(rest: &str) -> (Option<ResponseCode>, String) {
    let rest = rest.trim_start();
    if let Some(inner_rest) = rest.strip_prefix('[') {
        if let Some(close) = inner_rest.find(']') {
            let code_str = &inner_rest[..close];
            let text = inner_rest[close + 1..].trim_start().to_string();
            return (Some(parse_response_code(code_str)), text);
        }
    }
    (None, rest.to_string())
}

fn parse_response_code(code: &str) -> ResponseCode {
    let mut words = code.split_whitespace();
    let Some(kind) = words.next() else {
        return ResponseCode::Other(code.to_string());
    };
    let arg = words.clone().collect::<Vec<_>>().join(" ");
    match kind.to_ascii_uppercase().as_str() {
        "ALERT" => ResponseCode::Alert,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "CAPABILITY" => ResponseCode::Capability(split_upper(&arg)),
        "PERMANENTFLAGS" => ResponseCode::PermanentFlags(parse_paren_list(&arg)),
        "UIDNEXT" => arg
            .parse()
            .map(ResponseCode::UidNext)
            .unwrap_or_else(|_| ResponseCode::Other(code.to_string())),
        "UIDVALIDITY" => arg
            .parse()
            .map(ResponseCode::UidValidity)
            .unwrap_or_else(|_| ResponseCode::Other(code.to_string())),
        "UNSEEN" => arg
            .parse()
            .map(ResponseCode::Unseen)
            .unwrap_or_else(|_| ResponseCode::Other(code.to_string())),
        "CLIENTBUG" => ResponseCode::ClientBug(arg),
        "APPENDUID" => {
            let mut nums = arg.split_whitespace();
            match (nums.next().and_then(|v| v.parse().ok()), nums.next().and_then(|v| v.parse().ok())) {
                (Some(validity), Some(uid)) => ResponseCode::AppendUid(validity, uid),
                _ => ResponseCode::Other(code.to_string()),
            }
        }
        "COPYUID" => {
            let mut nums = arg.splitn(3, ' ');
            match (nums.next(), nums.next(), nums.next()) {
                (Some(validity), Some(src), Some(dst)) => {
                    match validity.parse() {
                        Ok(validity) => ResponseCode::CopyUid(validity, src.to_string(), dst.to_string()),
                        Err(_) => ResponseCode::Other(code.to_string()),
                    }
                }
                _ => ResponseCode::Other(code.to_string()),
            }
        }
        _ => ResponseCode::Other(code.to_string()),
    }
}

fn split_upper(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_uppercase).collect()
}

fn parse_paren_list(s: &str) -> Vec<String> {
    s.trim_start_matches('(')
        .trim_end_matches(')')
        .split_whitespace()
        .map(std::string::ToString::to_string)
        .collect()
}

fn parse_untagged(rest: &str, unit: &RawUnit) -> Result<Vec<Response>> {
    if rest.eq_ignore_ascii_case("BYE") || rest.to_ascii_uppercase().starts_with("BYE ") {
        let text = rest.splitn(2, ' ').nth(1).unwrap_or("").to_string();
        return Ok(vec![Response::Fatal(text)]);
    }

    if let Some(status_word) = rest.split_whitespace().next() {
        if matches!(status_word.to_ascii_uppercase().as_str(), "OK" | "NO" | "BAD") {
            let tail = rest[status_word.len()..].trim_start();
            let (code, text) = parse_code_and_text(tail);
            let status = parse_status(status_word).unwrap();
            return Ok(vec![Response::Untagged(Untagged::Conditional(
                ConditionalState { status, code, text },
            ))]);
        }
    }

    // "<n> EXISTS" / "<n> RECENT" / "<n> EXPUNGE" / "<n> FETCH (...)"
    let mut words = rest.splitn(2, ' ');
    let first = words.next().unwrap_or("");
    let remainder = words.next().unwrap_or("");

    if let Ok(n) = first.parse::<u32>() {
        let keyword = remainder.split_whitespace().next().unwrap_or("");
        return match keyword.to_ascii_uppercase().as_str() {
            "EXISTS" => Ok(vec![Response::Untagged(Untagged::Mailbox(
                MailboxData::Exists(n),
            ))]),
            "RECENT" => Ok(vec![Response::Untagged(Untagged::Mailbox(
                MailboxData::Recent(n),
            ))]),
            "EXPUNGE" => Ok(vec![Response::Untagged(Untagged::Message(
                MessageData::Expunge(n),
            ))]),
            "FETCH" => parse_fetch(n, remainder, unit),
            _ => Ok(vec![Response::Untagged(Untagged::Conditional(
                ConditionalState {
                    status: Status::Ok,
                    code: None,
                    text: rest.to_string(),
                },
            ))]),
        };
    }

    match first.to_ascii_uppercase().as_str() {
        "FLAGS" => Ok(vec![Response::Untagged(Untagged::Mailbox(
            MailboxData::Flags(parse_paren_list(remainder)),
        ))]),
        "CAPABILITY" => Ok(vec![Response::Untagged(Untagged::Capability(split_upper(
            remainder,
        )))]),
        "ENABLE" => Ok(vec![Response::Untagged(Untagged::Enable(split_upper(
            remainder,
        )))]),
        "SEARCH" => {
            let ids = remainder
                .split_whitespace()
                .filter_map(|w| w.parse().ok())
                .collect();
            Ok(vec![Response::Untagged(Untagged::Mailbox(
                MailboxData::Search(ids),
            ))])
        }
        "LIST" => parse_list_like(remainder, false),
        "LSUB" => parse_list_like(remainder, true),
        "STATUS" => parse_status_data(remainder),
        "NAMESPACE" => Ok(vec![Response::Untagged(Untagged::Mailbox(
            MailboxData::Namespace(remainder.to_string()),
        ))]),
        "ID" => Ok(vec![Response::Untagged(Untagged::Id(parse_id(remainder)))]),
        "QUOTA" => parse_quota(remainder),
        "VANISHED" => parse_vanished(remainder),
        _ => Ok(vec![Response::Untagged(Untagged::Conditional(
            ConditionalState {
                status: Status::Ok,
                code: None,
                text: rest.to_string(),
            },
        ))]),
    }
}

fn parse_list_like(rest: &str, lsub: bool) -> Result<Vec<Response>> {
    let rest = rest.trim_start();
    let Some(close) = rest.find(')') else {
        return Err(Error::MalformedResponse(format!(
            "LIST/LSUB missing flag list: {rest}"
        )));
    };
    let flags = parse_paren_list(&rest[..=close]);
    let tail = rest[close + 1..].trim_start();
    let mut tail_parts = tail.splitn(2, ' ');
    let delim_token = tail_parts.next().unwrap_or("NIL");
    let name = tail_parts.next().unwrap_or("").trim().trim_matches('"').to_string();
    let delimiter = delim_token.trim_matches('"').chars().next().filter(|_| delim_token != "NIL");

    let data = if lsub {
        MailboxData::Lsub { flags, delimiter, name }
    } else {
        MailboxData::List { flags, delimiter, name }
    };
    Ok(vec![Response::Untagged(Untagged::Mailbox(data))])
}

fn parse_status_data(rest: &str) -> Result<Vec<Response>> {
    let rest = rest.trim_start();
    let mut parts = rest.splitn(2, ' ');
    let mailbox = parts.next().unwrap_or("").trim_matches('"').to_string();
    let attr_list = parts.next().unwrap_or("");
    let inner = attr_list.trim_start_matches('(').trim_end_matches(')');
    let mut attributes = Vec::new();
    let mut tokens = inner.split_whitespace();
    while let (Some(name), Some(value)) = (tokens.next(), tokens.next()) {
        if let Ok(v) = value.parse() {
            attributes.push((name.to_string(), v));
        }
    }
    Ok(vec![Response::Untagged(Untagged::Mailbox(
        MailboxData::Status { mailbox, attributes },
    ))])
}

fn parse_id(rest: &str) -> Option<Vec<(String, String)>> {
    let rest = rest.trim();
    if rest.eq_ignore_ascii_case("NIL") {
        return None;
    }
    let inner = rest.trim_start_matches('(').trim_end_matches(')');
    let mut pairs = Vec::new();
    let mut tokens = inner.split_whitespace();
    while let (Some(k), Some(v)) = (tokens.next(), tokens.next()) {
        pairs.push((k.trim_matches('"').to_string(), v.trim_matches('"').to_string()));
    }
    Some(pairs)
}

fn parse_quota(rest: &str) -> Result<Vec<Response>> {
    let rest = rest.trim_start();
    let mut parts = rest.splitn(2, ' ');
    let root = parts.next().unwrap_or("").trim_matches('"').to_string();
    let inner = parts
        .next()
        .unwrap_or("")
        .trim_start_matches('(')
        .trim_end_matches(')');
    let mut resources = Vec::new();
    let mut tokens = inner.split_whitespace();
    while let (Some(name), Some(usage), Some(limit)) = (tokens.next(), tokens.next(), tokens.next()) {
        if let (Ok(usage), Ok(limit)) = (usage.parse(), limit.parse()) {
            resources.push((name.to_string(), usage, limit));
        }
    }
    Ok(vec![Response::Untagged(Untagged::Quota { root, resources })])
}

fn parse_vanished(rest: &str) -> Result<Vec<Response>> {
    let rest = rest.trim_start();
    let (earlier, uid_set) = if let Some(tail) = rest.strip_prefix("(EARLIER)") {
        (true, tail.trim().to_string())
    } else {
        (false, rest.to_string())
    };
    Ok(vec![Response::Untagged(Untagged::Message(
        MessageData::Vanished { uid_set, earlier },
    ))])
}

/// Decompose a `* n FETCH (...)` unit into a `Start`, attribute events,
/// and a `Finish`. Any literal segment in the raw unit becomes a
/// `StreamingBegin`/`StreamingBytes`/`StreamingEnd` triple for the
/// attribute it belongs to (by position).
fn parse_fetch(seq: u32, remainder: &str, unit: &RawUnit) -> Result<Vec<Response>> {
    let open = remainder
        .find('(')
        .ok_or_else(|| Error::MalformedResponse("FETCH missing attribute list".into()))?;
    let body = &remainder[open + 1..];
    let body = body.strip_suffix(')').unwrap_or(body);

    let mut events = vec![Response::Fetch(FetchEvent::Start { seq })];
    let mut literal_iter = unit.literals().into_iter();
    let mut chars = body.char_indices().peekable();
    let mut uid_seen = false;

    while let Some(&(idx, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let token_start = idx;
        let mut depth = 0i32;
        let mut end = body.len();
        for (i, c) in body[token_start..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                ' ' if depth == 0 => {
                    end = token_start + i;
                    break;
                }
                _ => {}
            }
        }
        let name_token = &body[token_start..end];

        if name_token.eq_ignore_ascii_case("UID") {
            let value_start = end + 1;
            let value_end = body[value_start..]
                .find(' ')
                .map_or(body.len(), |i| value_start + i);
            if let Ok(uid) = body[value_start..value_end].parse() {
                events.push(Response::Fetch(FetchEvent::StartUid { uid }));
                uid_seen = true;
            }
            advance_past(&mut chars, value_end);
            continue;
        }

        if name_token.contains("BODY[") || name_token.eq_ignore_ascii_case("RFC822")
            || name_token.eq_ignore_ascii_case("RFC822.TEXT")
        {
            if let Some(bytes) = literal_iter.next() {
                events.push(Response::Fetch(FetchEvent::StreamingBegin {
                    section: name_token.to_string(),
                    size: bytes.len() as u64,
                }));
                events.push(Response::Fetch(FetchEvent::StreamingBytes {
                    bytes: bytes.to_vec(),
                }));
                events.push(Response::Fetch(FetchEvent::StreamingEnd));
            }
            advance_past(&mut chars, end);
            continue;
        }

        let value_start = end + 1;
        let depth_end = find_balanced_end(body, value_start);
        let value = body.get(value_start..depth_end).unwrap_or("").to_string();
        events.push(Response::Fetch(FetchEvent::SimpleAttribute {
            name: name_token.to_string(),
            value,
        }));
        advance_past(&mut chars, depth_end);
    }

    let _ = uid_seen;
    events.push(Response::Fetch(FetchEvent::Finish));
    Ok(events)
}

fn advance_past(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, target_byte: usize) {
    while let Some(&(idx, _)) = chars.peek() {
        if idx >= target_byte {
            break;
        }
        chars.next();
    }
}

fn find_balanced_end(body: &str, start: usize) -> usize {
    if start >= body.len() {
        return body.len();
    }
    let rest = &body[start..];
    if rest.starts_with('(') {
        let mut depth = 0i32;
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return start + i + 1;
                    }
                }
                _ => {}
            }
        }
        body.len()
    } else {
        rest.find(' ').map_or(body.len(), |i| start + i)
    }
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let s = s.trim().trim_end_matches('=');
    if s.is_empty() {
        return Some(Vec::new());
    }
    let mut out = Vec::with_capacity(s.len() * 3 / 4 + 3);
    let mut buf = 0u32;
    let mut bits = 0u32;
    for c in s.bytes() {
        let val = ALPHABET.iter().position(|&b| b == c)? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::framer::Framer;

    fn units(raw: &[u8]) -> Vec<RawUnit> {
        let mut framer = Framer::new(1024 * 1024);
        framer.feed(raw);
        let mut out = Vec::new();
        while let Some(unit) = framer.next_unit().unwrap() {
            out.push(unit);
        }
        out
    }

    #[test]
    fn tagged_ok_with_no_code() {
        let u = units(b"A1 OK LOGIN completed\r\n");
        let responses = parse_unit(&u[0]).unwrap();
        assert_eq!(
            responses[0],
            Response::Tagged {
                tag: "A1".into(),
                status: Status::Ok,
                code: None,
                text: "LOGIN completed".into(),
            }
        );
    }

    #[test]
    fn tagged_no_with_code() {
        let u = units(b"A2 NO [TRYCREATE] mailbox missing\r\n");
        let responses = parse_unit(&u[0]).unwrap();
        assert_eq!(
            responses[0],
            Response::Tagged {
                tag: "A2".into(),
                status: Status::No,
                code: Some(ResponseCode::TryCreate),
                text: "mailbox missing".into(),
            }
        );
    }

    #[test]
    fn untagged_exists_and_recent() {
        let u = units(b"* 23 EXISTS\r\n* 3 RECENT\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::Untagged(Untagged::Mailbox(MailboxData::Exists(23)))
        );
        assert_eq!(
            parse_unit(&u[1]).unwrap()[0],
            Response::Untagged(Untagged::Mailbox(MailboxData::Recent(3)))
        );
    }

    #[test]
    fn bye_is_fatal() {
        let u = units(b"* BYE autologout\r\n");
        assert_eq!(parse_unit(&u[0]).unwrap()[0], Response::Fatal("autologout".into()));
    }

    #[test]
    fn capability_splits_into_upper_tokens() {
        let u = units(b"* CAPABILITY IMAP4rev1 idle STARTTLS\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::Untagged(Untagged::Capability(vec![
                "IMAP4REV1".into(),
                "IDLE".into(),
                "STARTTLS".into(),
            ]))
        );
    }

    #[test]
    fn search_collects_ids() {
        let u = units(b"* SEARCH 1 4 9\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::Untagged(Untagged::Mailbox(MailboxData::Search(vec![1, 4, 9])))
        );
    }

    #[test]
    fn fetch_with_uid_and_flags_decomposes_into_events() {
        let u = units(b"* 1 FETCH (UID 100 FLAGS (\\Seen))\r\n");
        let events = parse_unit(&u[0]).unwrap();
        assert_eq!(events[0], Response::Fetch(FetchEvent::Start { seq: 1 }));
        assert_eq!(events[1], Response::Fetch(FetchEvent::StartUid { uid: 100 }));
        assert!(matches!(events.last().unwrap(), Response::Fetch(FetchEvent::Finish)));
    }

    #[test]
    fn fetch_streams_body_literal() {
        let u = units(b"* 1 FETCH (UID 5 BODY[] {5}\r\nhello)\r\n");
        let events = parse_unit(&u[0]).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, Response::Fetch(FetchEvent::StreamingBytes { bytes }) if bytes == b"hello")));
    }

    #[test]
    fn continuation_decodes_base64_challenge() {
        let u = units(b"+ dGVzdA==\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::AuthenticationChallenge(b"test".to_vec())
        );
    }

    #[test]
    fn idle_continuation_is_recognized() {
        let u = units(b"+ idling\r\n");
        assert_eq!(parse_unit(&u[0]).unwrap()[0], Response::IdleStarted);
    }

    #[test]
    fn list_parses_flags_delimiter_and_name() {
        let u = units(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::Untagged(Untagged::Mailbox(MailboxData::List {
                flags: vec!["\\HasNoChildren".into()],
                delimiter: Some('/'),
                name: "INBOX".into(),
            }))
        );
    }

    #[test]
    fn vanished_earlier_is_marked() {
        let u = units(b"* VANISHED (EARLIER) 1:5\r\n");
        assert_eq!(
            parse_unit(&u[0]).unwrap()[0],
            Response::Untagged(Untagged::Message(MessageData::Vanished {
                uid_set: "1:5".into(),
                earlier: true,
            }))
        );
    }
}
