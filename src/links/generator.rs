//! Short code generation
//!
//! Codes are uniform random draws from a 62-symbol alphanumeric alphabet.
//! The existence check against storage only filters out obvious collisions;
//! the storage insert remains the sole arbiter of uniqueness.

use rand::RngExt;
use tracing::debug;

use crate::config::CodeConfig;
use crate::links::LinkError;
use crate::storage::Storage;

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 64;

const ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Characters easily confused with one another when read aloud or printed
const AMBIGUOUS: &[u8] = b"0O1lI";

/// Codes that would shadow API routes
pub const RESERVED_CODES: &[&str] = &["links", "health", "summary"];

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    alphabet: Vec<u8>,
    max_attempts: u32,
    max_alias_length: usize,
}

impl CodeGenerator {
    pub fn new(exclude_ambiguous: bool, max_attempts: u32, max_alias_length: usize) -> Self {
        let alphabet = ALPHANUMERIC
            .iter()
            .copied()
            .filter(|c| !exclude_ambiguous || !AMBIGUOUS.contains(c))
            .collect();

        Self {
            alphabet,
            max_attempts: max_attempts.max(1),
            max_alias_length,
        }
    }

    pub fn from_config(config: &CodeConfig) -> Self {
        Self::new(
            config.exclude_ambiguous,
            config.max_attempts,
            config.max_alias_length,
        )
    }

    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn validate_length(length: usize) -> Result<(), LinkError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            return Err(LinkError::InvalidLength {
                got: length,
                min: MIN_CODE_LENGTH,
                max: MAX_CODE_LENGTH,
            });
        }
        Ok(())
    }

    /// Draw one random candidate. Does not consult storage.
    pub fn candidate(&self, length: usize) -> String {
        let mut rng = rand::rng();
        (0..length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())] as char)
            .collect()
    }

    /// Generate a code that was free at the time of the check.
    pub async fn generate(&self, storage: &dyn Storage, length: usize) -> Result<String, LinkError> {
        let mut remaining = self.max_attempts;
        self.draw_free(storage, length, &mut remaining).await
    }

    /// Draw candidates until one is absent from storage, spending from a
    /// shared attempt budget so insert conflicts can draw from it too.
    pub(crate) async fn draw_free(
        &self,
        storage: &dyn Storage,
        length: usize,
        remaining: &mut u32,
    ) -> Result<String, LinkError> {
        Self::validate_length(length)?;

        while *remaining > 0 {
            *remaining -= 1;
            let code = self.candidate(length);

            if RESERVED_CODES.contains(&code.as_str()) {
                continue;
            }
            if !storage.exists(&code).await? {
                return Ok(code);
            }
            debug!(short_code = %code, "generated code collided, drawing again");
        }

        Err(LinkError::ExhaustedKeyspace(self.max_attempts))
    }

    pub fn validate_alias(&self, alias: &str) -> Result<(), LinkError> {
        if alias.is_empty() || alias.chars().count() > self.max_alias_length {
            return Err(LinkError::InvalidAlias(format!(
                "must be 1-{} characters",
                self.max_alias_length
            )));
        }

        if !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LinkError::InvalidAlias(
                "only letters, digits, '-' and '_' are allowed".to_string(),
            ));
        }

        if RESERVED_CODES.contains(&alias) {
            return Err(LinkError::InvalidAlias(format!("'{alias}' is reserved")));
        }

        Ok(())
    }

    /// Check that a custom alias is usable and free
    pub async fn reserve(&self, storage: &dyn Storage, alias: &str) -> Result<String, LinkError> {
        self.validate_alias(alias)?;

        if storage.exists(alias).await? {
            return Err(LinkError::AliasTaken);
        }

        Ok(alias.to_string())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::from_config(&CodeConfig::default())
    }
}
