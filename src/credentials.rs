//! Credential references and their resolution through the environment.
//!
//! A configuration value like `${DB_PASS}` names an environment variable
//! instead of holding the secret itself. Before the environment is read, the
//! first existing dotenv file from a [`SearchPaths`] list is loaded without
//! overriding variables that are already set.
use crate::config::SearchPaths;
use crate::core::{Result, SqlconnectError};
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\$\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*))$")
        .expect("credential reference pattern is valid")
});

/// The name of an environment variable holding a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    var: String,
}

impl CredentialRef {
    /// Parses `${NAME}` or a bare `NAME`.
    ///
    /// Surrounding whitespace is ignored. Anything else (an empty name,
    /// unbalanced braces, a literal secret with punctuation) is rejected.
    pub fn parse(value: &str) -> Result<Self> {
        let captures = REFERENCE.captures(value.trim()).ok_or_else(|| {
            SqlconnectError::InvalidConfig(
                "credentials must be environment variable references like ${NAME}".to_string(),
            )
        })?;
        let var = captures
            .name("braced")
            .or_else(|| captures.name("bare"))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok(CredentialRef { var })
    }

    pub fn var_name(&self) -> &str {
        &self.var
    }

    /// Reads the variable; unset and empty values are both `None`.
    pub fn lookup(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|value| !value.is_empty())
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}}}", self.var)
    }
}

/// A resolved username/password pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: SecretString::new(password.into().into_boxed_str()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

/// Loads the first existing env file in `search` without overriding
/// variables that are already set. Returns the file that was loaded.
pub fn load_env_file(search: &SearchPaths) -> Result<Option<PathBuf>> {
    let Some(path) = search.first_existing() else {
        debug!(candidates = ?search.candidates(), "no environment file found");
        return Ok(None);
    };

    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!(path = %path.display(), "loaded environment file");
            Ok(Some(path.to_path_buf()))
        }
        Err(err) => Err(env_file_error(path, err)),
    }
}

fn env_file_error(path: &Path, err: dotenvy::Error) -> SqlconnectError {
    // Never echo the offending line, it may hold a secret.
    let message = match err {
        dotenvy::Error::LineParse(_, index) => format!("parse error at position {index}"),
        dotenvy::Error::Io(io_err) => io_err.kind().to_string(),
        _ => "unreadable file".to_string(),
    };
    SqlconnectError::EnvFile {
        path: path.to_path_buf(),
        message,
    }
}

/// Resolves optional username/password references into [`Credentials`].
///
/// Neither reference present means an anonymous (or trusted) connection.
/// Otherwise both must resolve to non-empty values.
pub fn resolve_credentials(
    username: Option<&CredentialRef>,
    password: Option<&CredentialRef>,
    env_search: &SearchPaths,
) -> Result<Option<Credentials>> {
    if username.is_none() && password.is_none() {
        return Ok(None);
    }

    load_env_file(env_search)?;

    let resolved_user = username.and_then(CredentialRef::lookup);
    let resolved_pass = password.and_then(CredentialRef::lookup);

    match (resolved_user, resolved_pass) {
        (Some(user), Some(pass)) => Ok(Some(Credentials::new(user, pass))),
        _ => {
            let var_or_missing =
                |r: Option<&CredentialRef>| r.map_or("<not configured>".to_string(), |r| r.var_name().to_string());
            let err = SqlconnectError::EnvironmentResolution {
                username_var: var_or_missing(username),
                password_var: var_or_missing(password),
                searched: env_search.candidates().to_vec(),
            };
            warn!("{err}");
            Err(err)
        }
    }
}
