use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tally_sync::AuthUser;

pub fn tally_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".tally"))
}

pub fn ensure_tally_home() -> Result<PathBuf> {
    let dir = tally_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn session_path() -> Result<PathBuf> {
    Ok(ensure_tally_home()?.join("auth.json"))
}

pub fn read_session() -> Result<Option<AuthUser>> {
    read_session_from(&session_path()?)
}

pub fn write_session(user: &AuthUser) -> Result<()> {
    write_session_to(&session_path()?, user)
}

pub fn clear_session() -> Result<()> {
    let p = session_path()?;
    if p.exists() {
        fs::remove_file(&p).with_context(|| format!("remove {}", p.display()))?;
    }
    Ok(())
}

pub fn read_session_from(path: &Path) -> Result<Option<AuthUser>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let user = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(user))
}

pub fn write_session_to(path: &Path, user: &AuthUser) -> Result<()> {
    let json = serde_json::to_string_pretty(user)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("auth.json");
        assert!(read_session_from(&p).unwrap().is_none());

        let user = AuthUser {
            user_id: "uid-1".to_string(),
            email: "me@example.com".to_string(),
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
        };
        write_session_to(&p, &user).unwrap();
        assert_eq!(read_session_from(&p).unwrap(), Some(user));
    }

    #[test]
    fn corrupt_session_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("auth.json");
        fs::write(&p, "{not json").unwrap();
        assert!(read_session_from(&p).is_err());
    }
}
