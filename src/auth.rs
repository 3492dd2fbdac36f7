use anyhow::{Context, Result};
use console::Term;

/// A secret (password, API token, private token) that never shows up in logs.
#[derive(Clone)]
pub struct Token(String);

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Username/password pair for servers using HTTP basic auth.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Token,
}

/// Returns `value` when present, otherwise asks on the terminal.
pub fn value_or_prompt(value: Option<String>, prompt: &str) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }

    let term = Term::stderr();
    term.write_str(prompt)
        .context("Failed to write prompt")?;
    term.read_line().context("Failed to read from terminal")
}

/// Returns `secret` when present, otherwise asks on the terminal without echo.
pub fn secret_or_prompt(secret: Option<String>, prompt: &str) -> Result<Token> {
    if let Some(secret) = secret {
        return Ok(Token::from(secret));
    }

    let term = Term::stderr();
    term.write_str(prompt)
        .context("Failed to write prompt")?;
    term.read_secure_line()
        .map(Token::from)
        .context("Failed to read secret from terminal")
}
