use std::path::Path;

use anyhow::Result;
use log::info;
use rand::RngCore as _;

pub const KEYMANAGER_API_TOKEN_FILENAME: &str = "keymanager-api-token.txt";

const TOKEN_BYTE_LENGTH: usize = 32;

/// Loads the bearer token for the Keymanager API from the data directory,
/// generating and persisting a fresh one on first use.
pub fn load_or_generate_api_token(token_file_path: &Path) -> Result<String> {
    if token_file_path.exists() {
        let token = fs_err::read_to_string(token_file_path)?;
        return Ok(token.trim().to_owned());
    }

    let mut bytes = [0_u8; TOKEN_BYTE_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);

    let token = hex::encode(bytes);

    if let Some(parent) = token_file_path.parent() {
        fs_err::create_dir_all(parent)?;
    }

    fs_err::write(token_file_path, &token)?;

    // The token grants control over the validator set; keep it owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;

        fs_err::set_permissions(
            token_file_path,
            std::fs::Permissions::from_mode(0o600),
        )?;
    }

    info!("generated a new Keymanager API token at {}", token_file_path.display());

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_generated_once_and_reread_verbatim() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join(KEYMANAGER_API_TOKEN_FILENAME);

        let first = load_or_generate_api_token(&path)?;
        let second = load_or_generate_api_token(&path)?;

        assert_eq!(first, second);
        assert_eq!(first.len(), 2 * TOKEN_BYTE_LENGTH);
        assert!(first.chars().all(|character| character.is_ascii_hexdigit()));

        Ok(())
    }

    #[test]
    fn existing_tokens_are_not_overwritten() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join(KEYMANAGER_API_TOKEN_FILENAME);

        fs_err::write(&path, "operator-chosen-token\n")?;

        assert_eq!(load_or_generate_api_token(&path)?, "operator-chosen-token");

        Ok(())
    }
}
