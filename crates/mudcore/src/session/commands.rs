//! 內部命令
//!
//! `#` 開頭的輸入走這裡，永遠不給別名比對。命令名稱支援
//! 前綴縮寫（按字母序取第一個命中）。

use std::sync::Arc;

use tracing::debug;

use super::{Session, SessionHandler};
use crate::msdp::MsdpValue;

type CommandFn = fn(&mut SessionHandler, &Arc<Session>, &str);

/// 依字母排序；前綴比對取第一個命中
const COMMANDS: &[(&str, CommandFn)] = &[
    ("actions", cmd_actions),
    ("aliases", cmd_aliases),
    ("events", cmd_events),
    ("help", cmd_help),
    ("modules", cmd_modules),
    ("msdp", cmd_msdp),
    ("queue", cmd_queue),
    ("ring", cmd_ring),
    ("session", cmd_session),
    ("sessions", cmd_sessions),
    ("tickers", cmd_tickers),
];

const COMMAND_HELP: &[(&str, &str)] = &[
    ("actions", "Show triggers"),
    ("aliases", "Show aliases"),
    ("events", "Show event hooks"),
    ("help", "This help command"),
    ("modules", "Show modules or enable/disable: #modules [enable|disable] <name>"),
    ("msdp", "Show MSDP values"),
    ("queue", "Show the command queue, or dispatch ready items: #queue run"),
    ("ring", "Show a ring log entry: #ring <n>"),
    ("session", "Switch or create: #session <name> [host:port]"),
    ("sessions", "Show current sessions"),
    ("tickers", "Show tickers"),
];

pub(crate) fn dispatch(handler: &mut SessionHandler, session: &Arc<Session>, input: &str) {
    let body = &input[1..];
    let mut parts = body.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().unwrap_or("").trim().to_string();

    if name.is_empty() {
        session.output("Usage: #<command> — try #help\n");
        return;
    }

    for (candidate, func) in COMMANDS {
        if candidate.starts_with(&name) {
            func(handler, session, &args);
            return;
        }
    }

    debug!(command = %name, "未知的內部命令");
    session.output(&format!("Unknown command: #{name} (try #help)\n"));
}

fn cmd_help(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let mut out = String::from("Commands:\n");
    for (name, help) in COMMAND_HELP {
        out.push_str(&format!("{name:>15}: {help}\n"));
    }
    session.output(&out);
}

fn cmd_actions(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let mut rows: Vec<(String, bool, u64)> = {
        let triggers = session.triggers.read().unwrap();
        triggers
            .list()
            .iter()
            .map(|t| (t.name.clone(), t.enabled, t.count))
            .collect()
    };
    rows.sort();

    let mut out = format!("{:<25} {:>8} {:>8}\n", "Trigger", "Enabled", "Count");
    for (name, enabled, count) in rows {
        out.push_str(&format!(
            "{:<25} {:>8} {:>8}\n",
            name,
            if enabled { "yes" } else { "no" },
            count
        ));
    }
    session.output(&out);
}

fn cmd_aliases(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let mut rows: Vec<(String, String, bool, u64)> = {
        let aliases = session.aliases.read().unwrap();
        aliases
            .list()
            .iter()
            .map(|a| (a.name.clone(), a.pattern.clone(), a.enabled, a.count))
            .collect()
    };
    rows.sort();

    let mut out = format!("{:<20} {:<30} {:>8} {:>8}\n", "Alias", "Pattern", "Enabled", "Count");
    for (name, pattern, enabled, count) in rows {
        out.push_str(&format!(
            "{:<20} {:<30} {:>8} {:>8}\n",
            name,
            pattern,
            if enabled { "yes" } else { "no" },
            count
        ));
    }
    session.output(&out);
}

fn cmd_events(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let mut rows: Vec<(String, String, bool, u64)> = {
        let events = session.events.read().unwrap();
        events
            .list()
            .iter()
            .map(|e| (e.name.clone(), e.event.clone(), e.enabled, e.count))
            .collect()
    };
    rows.sort();

    let mut out = format!("{:<20} {:<20} {:>8} {:>8}\n", "Name", "Event", "Enabled", "Count");
    for (name, event, enabled, count) in rows {
        out.push_str(&format!(
            "{:<20} {:<20} {:>8} {:>8}\n",
            name,
            event,
            if enabled { "yes" } else { "no" },
            count
        ));
    }
    session.output(&out);
}

fn cmd_tickers(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let now = std::time::Instant::now();
    let mut rows: Vec<(String, u64, u64, i64)> = {
        let tickers = session.tickers.read().unwrap();
        tickers
            .list()
            .iter()
            .map(|t| {
                let next_ms = if t.next_fire > now {
                    (t.next_fire - now).as_millis() as i64
                } else {
                    0
                };
                (t.name.clone(), t.interval_ms, t.count, next_ms)
            })
            .collect()
    };
    rows.sort();

    let mut out = format!(
        "{:<20} {:>12} {:>8} {:>12}\n",
        "Ticker", "Interval", "Count", "Next (ms)"
    );
    for (name, interval, count, next_ms) in rows {
        out.push_str(&format!("{name:<20} {interval:>12} {count:>8} {next_ms:>12}\n"));
    }
    session.output(&out);
}

fn cmd_modules(_handler: &mut SessionHandler, session: &Arc<Session>, args: &str) {
    let fields: Vec<&str> = args.split_whitespace().collect();

    match fields.as_slice() {
        [] => {
            let mut rows: Vec<(String, String, bool, usize, usize, usize)> = {
                let modules = session.modules.read().unwrap();
                modules
                    .list()
                    .iter()
                    .map(|m| {
                        (
                            m.name.clone(),
                            m.path.display().to_string(),
                            m.enabled,
                            m.triggers.len(),
                            m.aliases.len(),
                            m.timers.len(),
                        )
                    })
                    .collect()
            };
            rows.sort();

            let mut out = format!(
                "{:<20} {:<10} {:>8} {:>8} {:>8}  {}\n",
                "Module", "Status", "Triggers", "Aliases", "Timers", "Path"
            );
            for (name, path, enabled, triggers, aliases, timers) in rows {
                out.push_str(&format!(
                    "{:<20} {:<10} {:>8} {:>8} {:>8}  {}\n",
                    name,
                    if enabled { "enabled" } else { "disabled" },
                    triggers,
                    aliases,
                    timers,
                    path
                ));
            }
            session.output(&out);
        }
        ["enable", name] => match session.enable_module(name) {
            Ok(()) => session.output(&format!("Enabled module: {name}\n")),
            Err(err) => session.output(&format!("Error enabling module {name}: {err}\n")),
        },
        ["disable", name] => match session.disable_module(name) {
            Ok(()) => session.output(&format!("Disabled module: {name}\n")),
            Err(err) => session.output(&format!("Error disabling module {name}: {err}\n")),
        },
        _ => session.output("Usage: #modules [enable|disable] <name>\n"),
    }
}

fn cmd_ring(_handler: &mut SessionHandler, session: &Arc<Session>, args: &str) {
    let Ok(index) = args.trim().parse::<usize>() else {
        session.output("Invalid ring number\n");
        return;
    };
    match session.ringlog_get(index) {
        Some(entry) => session.output(&format!("Record: {}\n", entry.stripped)),
        None => session.output(&format!("No record at ring index {index}\n")),
    }
}

fn cmd_queue(_handler: &mut SessionHandler, session: &Arc<Session>, args: &str) {
    if args.trim() == "run" {
        let dispatched = session.drain_queue();
        if dispatched.is_empty() {
            session.output("Nothing ready in the queue.\n");
        } else {
            let mut out = String::new();
            for item in dispatched {
                out.push_str(&format!("Run {}\n", item.name));
            }
            session.output(&out);
        }
        return;
    }

    let items = session.queue.lock().unwrap().view();
    let mut out = format!(
        "{:>5} {:<20} {:<25} {:>10} {:>8}\n",
        "ID", "Name", "Command", "Dep", "Priority"
    );
    for item in items {
        let dep = item
            .dependency
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:>5} {:<20} {:<25} {:>10} {:>8}\n",
            item.id, item.name, item.command, dep, item.priority
        ));
    }
    session.output(&out);
}

fn cmd_session(handler: &mut SessionHandler, session: &Arc<Session>, args: &str) {
    let fields: Vec<&str> = args.split_whitespace().collect();

    match fields.as_slice() {
        [name] => {
            if !handler.switch_to(name) {
                session.output(&format!("Invalid session: {name}\n"));
            }
        }
        [name, address] => {
            match handler.add_session(name, address) {
                Ok(()) => {
                    handler.switch_to(name);
                }
                Err(err) => {
                    session.output(&format!("Error creating session: {err}\n"));
                }
            }
        }
        _ => session.output("Usage: #session <name> [host:port]\n"),
    }
}

fn cmd_sessions(handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let mut out = format!("  {:<15} {:<25} {:>10}\n", "Name", "Address", "Uptime");
    for name in handler.session_names() {
        let Some(target) = handler.get(&name) else {
            continue;
        };
        let marker = if name == handler.active { "> " } else { "  " };
        let address = target.address().unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}{:<15} {:<25} {:>9}s\n",
            marker,
            name,
            address,
            target.uptime().as_secs()
        ));
    }
    session.output(&out);
}

fn cmd_msdp(_handler: &mut SessionHandler, session: &Arc<Session>, _args: &str) {
    let data = session.msdp.snapshot();
    if data.is_empty() {
        session.output("No MSDP data available.\n");
        return;
    }

    let mut out = String::from("MSDP Values:\n");
    for (key, value) in &data {
        let formatted = format_msdp_value(value, 1);
        out.push_str(&format!("  {key}: {formatted}\n"));
    }
    session.output(&out);
}

/// 遞迴渲染 MSDP 值；深度與長度都有上限，避免整個畫面被灌爆
fn format_msdp_value(value: &MsdpValue, depth: usize) -> String {
    const MAX_DEPTH: usize = 10;
    const MAX_ITEMS: usize = 100;

    if depth > MAX_DEPTH {
        return "... (max depth exceeded)".to_string();
    }
    let indent = "  ".repeat(depth);

    match value {
        MsdpValue::String(s) => format!("{s:?}"),
        MsdpValue::Int(i) => i.to_string(),
        MsdpValue::Array(items) => {
            if items.is_empty() {
                return "[]".to_string();
            }
            let shown = &items[..items.len().min(MAX_ITEMS)];
            let all_simple = shown
                .iter()
                .all(|v| matches!(v, MsdpValue::String(_) | MsdpValue::Int(_)));

            if all_simple && shown.len() <= 5 && items.len() <= MAX_ITEMS {
                let inline: Vec<String> =
                    shown.iter().map(|v| format_msdp_value(v, depth)).collect();
                return format!("[{}]", inline.join(", "));
            }

            let mut lines = vec!["[".to_string()];
            for item in shown {
                lines.push(format!("{indent}  {},", format_msdp_value(item, depth + 1)));
            }
            if items.len() > MAX_ITEMS {
                lines.push(format!("{indent}  ... ({} more items)", items.len() - MAX_ITEMS));
            }
            lines.push(format!("{indent}]"));
            lines.join("\n")
        }
        MsdpValue::Table(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let mut lines = vec!["{".to_string()];
            for (i, (key, val)) in map.iter().enumerate() {
                if i >= MAX_ITEMS {
                    lines.push(format!("{indent}  ... ({} more keys)", map.len() - MAX_ITEMS));
                    break;
                }
                lines.push(format!(
                    "{indent}  {key}: {},",
                    format_msdp_value(val, depth + 1)
                ));
            }
            lines.push(format!("{indent}}}"));
            lines.join("\n")
        }
    }
}
