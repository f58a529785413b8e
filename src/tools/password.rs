#![forbid(unsafe_code)]

use rand::Rng;
use rand::seq::SliceRandom as _;

use crate::error::ToolhubError;

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGITS: &str = "0123456789";
pub const SYMBOLS: &str = "!@#$%^&*()-_=+[]{};:,.<>?";

/// Which character classes a password draws from.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharPools {
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
}

impl Default for CharPools {
    fn default() -> Self {
        Self {
            lowercase: true,
            uppercase: true,
            digits: true,
            symbols: false,
        }
    }
}

impl CharPools {
    fn selected(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.lowercase {
            out.push(LOWERCASE);
        }
        if self.uppercase {
            out.push(UPPERCASE);
        }
        if self.digits {
            out.push(DIGITS);
        }
        if self.symbols {
            out.push(SYMBOLS);
        }
        out
    }

    /// Every character a generated password may contain.
    #[must_use]
    pub fn alphabet(self) -> Vec<char> {
        self.selected().concat().chars().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordOptions {
    pub length: usize,
    pub pools: CharPools,
    /// Include at least one character from every selected pool.
    pub require_each: bool,
}

pub fn generate<R: Rng + ?Sized>(
    rng: &mut R,
    opts: &PasswordOptions,
) -> Result<String, ToolhubError> {
    if opts.length == 0 {
        return Err(ToolhubError::Validation(
            "password length must be at least 1".to_owned(),
        ));
    }
    let pools = opts.pools.selected();
    if pools.is_empty() {
        return Err(ToolhubError::Validation(
            "select at least one character pool".to_owned(),
        ));
    }
    if opts.require_each && opts.length < pools.len() {
        return Err(ToolhubError::Validation(format!(
            "length {} is too short to include all {} selected pools",
            opts.length,
            pools.len()
        )));
    }

    let alphabet = opts.pools.alphabet();
    let mut out: Vec<char> = Vec::with_capacity(opts.length);
    if opts.require_each {
        for pool in &pools {
            let chars: Vec<char> = pool.chars().collect();
            if let Some(c) = chars.choose(rng) {
                out.push(*c);
            }
        }
    }
    while out.len() < opts.length {
        if let Some(c) = alphabet.choose(rng) {
            out.push(*c);
        }
    }
    out.shuffle(rng);
    Ok(out.into_iter().collect())
}

/// Generates with the thread-local CSPRNG.
pub fn generate_password(opts: &PasswordOptions) -> Result<String, ToolhubError> {
    generate(&mut rand::thread_rng(), opts)
}
