use crate::error::{RelmapError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Parsed `scheme://host/dbname;key=value;...` connection string.
///
/// `host` and `dbname` may also be given as parameters, which is how
/// PDO-style strings (`mysql:host=db;dbname=app`) carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionString {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub charset: String,
    pub params: BTreeMap<String, String>,
    /// The input with `;charset=...` appended when absent.
    pub dsn: String,
}

impl ConnectionString {
    pub fn parse(dsn: &str, charset: &str, default_port: u16) -> Result<Self> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(invalid("empty connection string"));
        }
        if charset.is_empty() {
            return Err(invalid("charset must not be empty"));
        }
        let (scheme, rest) = dsn
            .split_once(':')
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
        {
            return Err(invalid(format!("malformed scheme '{scheme}'")));
        }

        let mut host = String::new();
        let mut dbname = String::new();
        let mut port = None;
        let tail = match rest.strip_prefix("//") {
            Some(authority_and_path) => {
                let (head, tail) = split_params(authority_and_path);
                let (authority, path) = match head.find('/') {
                    Some(i) => (&head[..i], &head[i + 1..]),
                    None => (head, ""),
                };
                let (h, p) = split_port(authority)?;
                host = h.to_string();
                port = p;
                dbname = path.to_string();
                tail
            }
            None => rest,
        };

        let mut params = BTreeMap::new();
        for pair in tail.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid(format!("parameter '{pair}' is not key=value")));
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(invalid(format!("parameter '{pair}' has an empty key")));
            }
            match key {
                "host" => host = value.to_string(),
                "dbname" => dbname = value.to_string(),
                "port" => {
                    port = Some(value.parse::<u16>().map_err(|_| {
                        invalid(format!("port '{value}' is not a valid port number"))
                    })?);
                }
                _ => {}
            }
            params.insert(key.to_string(), value.to_string());
        }

        if host.is_empty() {
            return Err(invalid("host is required"));
        }
        if dbname.is_empty() {
            return Err(invalid("database name is required"));
        }

        let mut normalized = dsn.to_string();
        let charset = match params.get("charset") {
            Some(existing) => existing.clone(),
            None => {
                normalized.push_str(";charset=");
                normalized.push_str(charset);
                params.insert("charset".into(), charset.to_string());
                charset.to_string()
            }
        };

        Ok(Self {
            driver: scheme.to_ascii_lowercase(),
            host,
            port: port.unwrap_or(default_port),
            dbname,
            charset,
            params,
            dsn: normalized,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.dbname == ":memory:"
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dsn)
    }
}

fn split_params(input: &str) -> (&str, &str) {
    match input.split_once(';') {
        Some((head, tail)) => (head, tail),
        None => (input, ""),
    }
}

fn split_port(authority: &str) -> Result<(&str, Option<u16>)> {
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(format!("port '{port}' is not a valid port number")))?;
            Ok((host, Some(port)))
        }
        None => Ok((authority, None)),
    }
}

fn invalid(message: impl Into<String>) -> RelmapError {
    RelmapError::InvalidConnectionString(message.into())
}

/// Login pair handed to the backend. The password is wiped on drop.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", "")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
