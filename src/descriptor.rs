//! Connection descriptors and their URL form.
//!
//! [`build_connection_descriptor`] turns a [`RawEntry`] into a validated
//! [`ConnectionDescriptor`], resolving credential references on the way.
//! The descriptor serializes to a URL of the form
//! `dialect+driver://[user:password@]host[/database][?options]`.
use crate::config::{check_required_keys, scalar_to_string, RawEntry, SearchPaths};
use crate::core::{Result, SqlconnectError};
use crate::credentials::{resolve_credentials, CredentialRef, Credentials};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use secrecy::{ExposeSecret, SecretString};
use serde_yaml::Value;
use std::fmt;
use tracing::debug;

/// A single driver-specific option, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOption {
    pub key: String,
    pub value: Option<String>,
}

impl ConnectOption {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        ConnectOption {
            key: key.into(),
            value,
        }
    }

    /// Splits `key=value` at the first `=`; a bare flag has no value.
    pub fn parse(item: &str) -> Self {
        match item.split_once('=') {
            Some((key, value)) => ConnectOption::new(key, Some(value.to_string())),
            None => ConnectOption::new(item, None),
        }
    }
}

impl fmt::Display for ConnectOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Everything needed to open a database session.
///
/// `Display` renders the URL with the password replaced by `****`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    pub dialect: String,
    pub driver: String,
    pub host: String,
    pub database: Option<String>,
    pub credentials: Option<Credentials>,
    pub options: Vec<ConnectOption>,
}

impl ConnectionDescriptor {
    pub fn new(dialect: impl Into<String>, driver: impl Into<String>, host: impl Into<String>) -> Self {
        ConnectionDescriptor {
            dialect: dialect.into(),
            driver: driver.into(),
            host: host.into(),
            database: None,
            credentials: None,
            options: Vec::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_option(mut self, option: ConnectOption) -> Self {
        self.options.push(option);
        self
    }

    /// The full connection URL, credentials included.
    pub fn url(&self) -> SecretString {
        let password = self
            .credentials
            .as_ref()
            .map(|c| encode_userinfo(c.password().expose_secret()));
        SecretString::new(self.render(password.as_deref()).into_boxed_str())
    }

    /// The connection URL with the password masked, safe for logs.
    pub fn redacted_url(&self) -> String {
        self.render(Some("****"))
    }

    fn render(&self, password: Option<&str>) -> String {
        let mut url = format!("{}+{}://", self.dialect, self.driver);
        if let (Some(credentials), Some(password)) = (&self.credentials, password) {
            url.push_str(&encode_userinfo(credentials.username()));
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&self.host);
        if let Some(database) = &self.database {
            url.push('/');
            url.push_str(database);
        }
        if !self.options.is_empty() {
            let query: Vec<String> = self.options.iter().map(ToString::to_string).collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted_url())
    }
}

/// Everything outside the RFC 3986 unreserved set.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn encode_userinfo(raw: &str) -> String {
    utf8_percent_encode(raw, USERINFO).to_string()
}

fn parse_options(value: Option<&Value>) -> Result<Vec<ConnectOption>> {
    let invalid = |detail: &str| SqlconnectError::InvalidConfig(format!("'options' {detail}"));

    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                scalar_to_string(item)
                    .map(|s| ConnectOption::parse(&s))
                    .ok_or_else(|| invalid("list items must be scalars"))
            })
            .collect(),
        Some(Value::Mapping(map)) => map
            .iter()
            .map(|(key, value)| {
                let key = scalar_to_string(key).ok_or_else(|| invalid("keys must be scalars"))?;
                let value = match value {
                    Value::Null => None,
                    other => Some(
                        scalar_to_string(other).ok_or_else(|| invalid("values must be scalars"))?,
                    ),
                };
                Ok(ConnectOption::new(key, value))
            })
            .collect(),
        Some(_) => Err(invalid("must be a mapping or a list")),
    }
}

/// Builds a descriptor from a raw entry.
///
/// Required keys are checked again here since entries supplied directly by
/// the caller never went through file validation. When `username` or
/// `password` is present, both are resolved through the environment after
/// loading the first existing file from `env_search`.
pub fn build_connection_descriptor(
    connection_name: &str,
    entry: &RawEntry,
    env_search: &SearchPaths,
) -> Result<ConnectionDescriptor> {
    check_required_keys(connection_name, entry)?;

    let required = |key: &str| -> Result<String> {
        entry.get_str(key)?.ok_or_else(|| SqlconnectError::MissingFields {
            connection: connection_name.to_string(),
            keys: vec![key.to_string()],
        })
    };

    let mut descriptor =
        ConnectionDescriptor::new(required("dialect")?, required("dbapi")?, required("host")?);
    descriptor.database = entry.get_str("database")?;
    descriptor.options = parse_options(entry.get("options"))?;

    let username = entry
        .get_str("username")?
        .map(|value| CredentialRef::parse(&value))
        .transpose()?;
    let password = entry
        .get_str("password")?
        .map(|value| CredentialRef::parse(&value))
        .transpose()?;
    descriptor.credentials = resolve_credentials(username.as_ref(), password.as_ref(), env_search)?;

    debug!(connection = connection_name, url = %descriptor, "built connection descriptor");
    Ok(descriptor)
}
