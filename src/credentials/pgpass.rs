//! libpq-style password file (`~/.pgpass`).
//!
//! Each line is `hostname:port:database:username:password`. Any of the first
//! four fields may be `*`. `:` and `\` inside a field are escaped with `\`.
//! Lines starting with `#` are comments. The first matching line wins.

use std::io;
use std::path::{Path, PathBuf};

use super::PasswordFile;

/// Password file on disk.
#[derive(Debug, Clone)]
pub struct PgPassFile {
    path: PathBuf,
}

impl PgPassFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Uses `PGPASSFILE` if set, otherwise `$HOME/.pgpass`.
    /// Returns `None` when neither can be determined.
    pub fn from_env() -> Option<Self> {
        if let Ok(path) = std::env::var("PGPASSFILE") {
            return Some(Self::new(path));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| Self::new(Path::new(&home).join(".pgpass")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PasswordFile for PgPassFile {
    fn lookup(
        &self,
        host: &str,
        port: u16,
        database: &str,
        user: &str,
    ) -> io::Result<Option<String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(find_password(&contents, host, &port.to_string(), database, user))
    }
}

fn find_password(contents: &str, host: &str, port: &str, database: &str, user: &str) -> Option<String> {
    let wanted = [host, port, database, user];
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#') && !line.trim().is_empty())
        .filter_map(split_fields)
        .find(|fields| {
            fields[..4]
                .iter()
                .zip(wanted)
                .all(|(field, value)| field == "*" || field == value)
        })
        .map(|mut fields| fields.swap_remove(4))
}

/// Splits a line into exactly five unescaped fields. Malformed lines yield `None`.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::with_capacity(5);
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' if fields.len() < 4 => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    (fields.len() == 5).then_some(fields)
}
