use anyhow::{Context, Result, bail};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tally_sync::{AuthUser, FirebaseAuth};

use crate::config::Config;
use crate::state::{read_session, write_session};

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

fn prompt_secret(label: &str) -> Result<String> {
    // Plain stdin; the password is echoed.
    prompt(label)
}

/// Ask a yes/no question; anything but y/yes is a no
pub fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [y/N]"))?;
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub fn looks_like_email(s: &str) -> bool {
    // shape only; the server does the real check
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

fn read_credentials(email: Option<String>) -> Result<(String, String)> {
    let email = match email {
        Some(e) => e,
        None => prompt("Email")?,
    };
    if !looks_like_email(&email) {
        bail!("{email:?} doesn't look like an email address");
    }
    let password = prompt_secret("Password")?;
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok((email, password))
}

pub async fn login(cfg: &Config, email: Option<String>) -> Result<()> {
    let (email, password) = read_credentials(email)?;
    let auth = FirebaseAuth::new(cfg.api_key()?);
    let user = auth
        .sign_in_with_password(&email, &password)
        .await
        .context("sign in failed")?;
    write_session(&user)?;
    println!("Signed in as {} ({})", user.email, user.user_id);
    Ok(())
}

pub async fn signup(cfg: &Config, email: Option<String>) -> Result<()> {
    let (email, password) = read_credentials(email)?;
    if password.len() < 6 {
        bail!("password must be at least 6 characters");
    }
    let auth = FirebaseAuth::new(cfg.api_key()?);
    let user = auth
        .sign_up(&email, &password)
        .await
        .context("sign up failed")?;
    write_session(&user)?;
    println!("Created account {} ({})", user.email, user.user_id);
    Ok(())
}

/// Load the saved session, trade its refresh token for a fresh id token and
/// persist the result.
pub async fn resume(cfg: &Config) -> Result<(Arc<FirebaseAuth>, AuthUser)> {
    let Some(saved) = read_session()? else {
        bail!("not signed in; run: tally login");
    };
    let auth = Arc::new(FirebaseAuth::new(cfg.api_key()?));
    auth.restore(saved);
    let user = auth
        .refresh()
        .await
        .context("session expired; run: tally login")?;
    write_session(&user)?;
    log::debug!("resumed session for {}", user.user_id);
    Ok((auth, user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_check_accepts_plain_addresses() {
        assert!(looks_like_email("me@example.com"));
        assert!(looks_like_email("first.last+tag@mail.co.in"));
    }

    #[test]
    fn email_check_rejects_garbage() {
        assert!(!looks_like_email(""));
        assert!(!looks_like_email("me"));
        assert!(!looks_like_email("me@localhost"));
        assert!(!looks_like_email("a b@example.com"));
        assert!(!looks_like_email("a@@example.com"));
    }
}
