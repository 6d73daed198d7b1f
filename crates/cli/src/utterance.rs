//! Typed-in utterances for the terminal.
//!
//! The first word names the command (`add_book`, `list-books`, ...) and the
//! rest are `key=value` slots, quoted when they contain spaces:
//!
//! ```text
//! add_book title="The Left Hand of Darkness" author=Le_Guin
//! answer Ursula K. Le Guin
//! ?
//! ```

use std::iter;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use shelf_app::Intent;

/// Short words accepted in place of the full command name.
const ALIASES: &[(&str, &str)] = &[
    ("next", "next_page"),
    ("exit", "exit_listing"),
    ("bye", "cancel"),
    ("options", "show_options"),
];

pub fn parse(line: &str) -> anyhow::Result<Intent> {
    let line = line.trim();
    if line.is_empty() || line == "?" {
        return Ok(Intent::Unrecognized);
    }

    let (head, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    let command = head.to_lowercase().replace('-', "_");
    let command = ALIASES
        .iter()
        .find(|(alias, _)| *alias == command)
        .map_or(command.clone(), |(_, full)| (*full).to_string());

    if command == "answer" {
        let value = Some(rest.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        return Ok(Intent::Answer { value });
    }

    let mut fields = Map::new();
    fields.insert("command".to_string(), Value::String(command.clone()));
    for (key, value) in slots(rest)? {
        fields.insert(key, Value::String(value));
    }

    serde_json::from_value(Value::Object(fields))
        .with_context(|| format!("'{command}' is not a command I know"))
}

fn slots(rest: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut slots = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let key: String =
            iter::from_fn(|| chars.next_if(|c| *c != '=' && !c.is_whitespace())).collect();
        if chars.next_if_eq(&'=').is_none() {
            bail!("expected key=value, found '{key}'");
        }

        let value: String = match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let value: String = iter::from_fn(|| chars.next_if(|c| *c != quote)).collect();
                if chars.next().is_none() {
                    bail!("unterminated quote in '{key}'");
                }
                value
            }
            _ => iter::from_fn(|| chars.next_if(|c| !c.is_whitespace())).collect(),
        };
        slots.push((key, value));
    }

    Ok(slots)
}
