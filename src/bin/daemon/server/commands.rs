//! Commands Module
//!
//! This module registers all operator commands with the command registry.
//! It maps command names to the hub operations, parsing the arguments of each
//! command line into typed requests first so that malformed input never
//! reaches the hub.

use super::command_registry::{CommandError, CommandRegistry, args_command, text_command};
use super::response_handler::format_members;
use crate::hub::Hub;
use crate::hub::operator::{Flag, SearchQuery};
use crate::simple_command;
use async_std::task;
use regex::Regex;
use std::sync::Arc;

/// Token that makes a moderation change persistent
pub const FOREVER: &str = "forever";

/// What a `ban` or `enable` command addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanTarget {
    Ips(Vec<String>),
    Words(Vec<String>),
    Length(usize),
}

/// Strip the `forever` marker, accepted as first or last token
pub fn split_forever<'a>(args: &[&'a str]) -> (bool, Vec<&'a str>) {
    match args {
        [first, rest @ ..] if *first == FOREVER => (true, rest.to_vec()),
        [rest @ .., last] if *last == FOREVER => (true, rest.to_vec()),
        _ => (false, args.to_vec()),
    }
}

fn invalid(msg: impl Into<String>) -> CommandError {
    CommandError::InvalidArguments(msg.into())
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Parse `ip <ip...>` / `words <word...>` / `length <n>` with optional `forever`
pub fn parse_ban(args: &[&str]) -> Result<(BanTarget, bool), CommandError> {
    let (forever, args) = split_forever(args);
    let Some((kind, values)) = args.split_first().filter(|(_, values)| !values.is_empty()) else {
        return Err(invalid("usage: ban ip|words|length <value...> [forever]"));
    };

    let target = match *kind {
        "ip" => BanTarget::Ips(owned(values)),
        "words" => BanTarget::Words(owned(values)),
        "length" => match values {
            [n] => BanTarget::Length(
                n.parse()
                    .map_err(|_| invalid(format!("length must be a non-negative integer, got '{}'", n)))?,
            ),
            _ => return Err(invalid("usage: ban length <n> [forever]")),
        },
        other => return Err(invalid(format!("cannot ban '{}': expected ip, words or length", other))),
    };
    Ok((target, forever))
}

/// Parse `ip <ip...>` / `words <word...>` with optional `forever`
pub fn parse_enable(args: &[&str]) -> Result<(BanTarget, bool), CommandError> {
    let (forever, args) = split_forever(args);
    match args.split_first() {
        Some((&"ip", values)) if !values.is_empty() => Ok((BanTarget::Ips(owned(values)), forever)),
        Some((&"words", values)) if !values.is_empty() => {
            Ok((BanTarget::Words(owned(values)), forever))
        }
        _ => Err(invalid("usage: enable ip|words <value...> [forever]")),
    }
}

/// Parse `EAP on|off` / `SEM on|off` with optional `forever`
pub fn parse_set(args: &[&str]) -> Result<(Flag, bool, bool), CommandError> {
    let (forever, args) = split_forever(args);
    let [flag, value] = args.as_slice() else {
        return Err(invalid("usage: set EAP|SEM on|off [forever]"));
    };
    let flag = match *flag {
        "EAP" => Flag::RequireApproval,
        "SEM" => Flag::AnnounceOnJoin,
        other => return Err(invalid(format!("unknown flag '{}': expected EAP or SEM", other))),
    };
    let enabled = match *value {
        "on" => true,
        "off" => false,
        other => return Err(invalid(format!("expected on or off, got '{}'", other))),
    };
    Ok((flag, enabled, forever))
}

/// Parse a list of join-request slot numbers
pub fn parse_slots(args: &[&str]) -> Result<Vec<usize>, CommandError> {
    if args.is_empty() {
        return Err(invalid("at least one slot number is required"));
    }
    args.iter()
        .map(|arg| {
            arg.parse()
                .map_err(|_| invalid(format!("'{}' is not a slot number", arg)))
        })
        .collect()
}

/// Parse a `search` query
pub fn parse_search(args: &[&str]) -> Result<SearchQuery, CommandError> {
    let pattern = |p: &str| Regex::new(p).map_err(|e| invalid(format!("bad pattern: {}", e)));
    match args {
        ["ip", p] => Ok(SearchQuery::Ip(pattern(*p)?)),
        ["user", p] => Ok(SearchQuery::User(pattern(*p)?)),
        ["online"] => Ok(SearchQuery::Online),
        ["offline"] => Ok(SearchQuery::Offline),
        ["banned"] => Ok(SearchQuery::Banned),
        ["send_times", n] => n
            .parse()
            .map(SearchQuery::SendTimes)
            .map_err(|_| invalid(format!("send_times needs a non-negative integer, got '{}'", n))),
        _ => Err(invalid(
            "usage: search ip <pattern> | user <pattern> | online | offline | banned | send_times <n>",
        )),
    }
}

/// Initialize all operator commands in the registry
///
/// Hub operations that do network I/O are async; commands are synchronous
/// and run them to completion with `block_on`, so callers must not invoke
/// `handle` from inside the async runtime's executor threads.
///
/// # Returns
/// * `CommandRegistry` - A registry containing all available commands
pub fn init_commands(hub: Arc<Hub>) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    let h = Arc::clone(&hub);
    registry.register(
        "ban",
        args_command(
            "Ban IPs, words or set the max message length: ban ip|words|length <value...> [forever]",
            move |args| {
                let result = match parse_ban(args)? {
                    (BanTarget::Ips(ips), forever) => task::block_on(h.ban_ips(&ips, forever)),
                    (BanTarget::Words(words), forever) => h.ban_words(&words, forever),
                    (BanTarget::Length(n), forever) => task::block_on(h.set_max_length(n, forever)),
                };
                Ok(result?)
            },
        ),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "enable",
        args_command(
            "Lift bans on IPs or words: enable ip|words <value...> [forever]",
            move |args| {
                let result = match parse_enable(args)? {
                    (BanTarget::Ips(ips), forever) => task::block_on(h.unban_ips(&ips, forever)),
                    (BanTarget::Words(words), forever) => h.unban_words(&words, forever),
                    (BanTarget::Length(_), _) => {
                        return Err(invalid("the length limit cannot be lifted, set a new one"));
                    }
                };
                Ok(result?)
            },
        ),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "set",
        args_command(
            "Toggle join approval (EAP) or join announcements (SEM): set EAP|SEM on|off [forever]",
            move |args| {
                let (flag, enabled, forever) = parse_set(args)?;
                Ok(h.set_flag(flag, enabled, forever)?)
            },
        ),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "accept",
        args_command("Admit pending join requests: accept <slot...>", move |args| {
            let slots = parse_slots(args)?;
            Ok(task::block_on(h.accept_requests(&slots))?)
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "reject",
        args_command("Turn away pending join requests: reject <slot...>", move |args| {
            let slots = parse_slots(args)?;
            Ok(task::block_on(h.reject_requests(&slots))?)
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "broadcast",
        text_command("Send an announcement to every member: broadcast <message>", move |message| {
            if message.is_empty() {
                return Err(invalid("usage: broadcast <message>"));
            }
            Ok(task::block_on(h.operator_broadcast(message)))
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "search",
        args_command(
            "Query members: search ip <pattern> | user <pattern> | online | offline | banned | send_times <n>",
            move |args| {
                let query = parse_search(args)?;
                Ok(format_members(&h.search(&query)))
            },
        ),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "flush",
        simple_command!("Append the buffered activity log to its file", move || {
            let written = h.flush_activity()?;
            Ok(format!("Flushed {} log entries", written))
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "sweep",
        simple_command!("Remove every offline connection now", move || {
            Ok(format!("Removed {} offline connection(s)", h.sweep()))
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "requests",
        simple_command!("List join requests and their state", move || {
            Ok(h.list_requests())
        }),
    );

    let h = Arc::clone(&hub);
    registry.register(
        "status",
        simple_command!("Show a JSON snapshot of the hub", move || {
            Ok(h.status().to_string())
        }),
    );

    let h = hub;
    registry.register(
        "exit",
        simple_command!("Flush the activity log and stop the hub", move || {
            Ok(h.exit()?)
        }),
    );

    registry
}
