//! Commands typed at the console prompt.

use anyhow::{anyhow, bail, Result};
use shared::domain::UserId;

pub const HELP: &str = "\
commands:
  l, list          show the user list
  r, refresh       reload the list from the backend
  s, show <id>     show one user
  n, new           create a user
  e, edit <id>     edit a user
  d, delete <id>   delete a user
  h, help          this text
  q, quit          exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Refresh,
    Show(UserId),
    New,
    Edit(UserId),
    Delete(UserId),
    Help,
    Quit,
}

fn user_id(verb: &str, arg: Option<&str>) -> Result<UserId> {
    let raw = arg.ok_or_else(|| anyhow!("usage: {verb} <id>"))?;
    let id: i64 = raw
        .parse()
        .map_err(|_| anyhow!("'{raw}' is not a user id"))?;
    if !UserId(id).is_bound() {
        bail!("user ids start at 1");
    }
    Ok(UserId(id))
}

pub fn parse(line: &str) -> Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleCommand::List);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "l" | "list" => ConsoleCommand::List,
        "r" | "refresh" => ConsoleCommand::Refresh,
        "s" | "show" => ConsoleCommand::Show(user_id(verb, arg)?),
        "n" | "new" => ConsoleCommand::New,
        "e" | "edit" => ConsoleCommand::Edit(user_id(verb, arg)?),
        "d" | "delete" => ConsoleCommand::Delete(user_id(verb, arg)?),
        "h" | "help" | "?" => ConsoleCommand::Help,
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{other}' (type 'help')"),
    };
    Ok(command)
}
