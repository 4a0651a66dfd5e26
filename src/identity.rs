//! Produce identities: `code(filename@method:hexdigest)`.
use crate::error::{IoContext, ScriptError};
use regex::Regex;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

const IDENTITY_PATTERN: &str = r"^([A-Za-z0-9_]+)\(([^@()]+)@([^()]+)\)$";

fn identity_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(IDENTITY_PATTERN).expect("regex for produce identities"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    Sha1,
    Sha256,
}

impl HashMethod {
    pub fn name(self) -> &'static str {
        match self {
            HashMethod::Sha1 => "sha1",
            HashMethod::Sha256 => "sha256",
        }
    }

    pub fn digest(self, bytes: &[u8]) -> String {
        match self {
            HashMethod::Sha1 => format!("{:x}", Sha1::digest(bytes)),
            HashMethod::Sha256 => format!("{:x}", Sha256::digest(bytes)),
        }
    }
}

impl FromStr for HashMethod {
    type Err = ScriptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sha1" => Ok(HashMethod::Sha1),
            "sha256" => Ok(HashMethod::Sha256),
            other => Err(ScriptError::UnknownHashMethod(other.to_string())),
        }
    }
}

/// `method:hexdigest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSpec {
    pub method: HashMethod,
    pub digest: String,
}

impl HashSpec {
    pub fn of_file(method: HashMethod, path: &Path) -> Result<Self, ScriptError> {
        Ok(Self {
            method,
            digest: hash_file(method, path)?,
        })
    }
}

impl fmt::Display for HashSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method.name(), self.digest)
    }
}

impl FromStr for HashSpec {
    type Err = ScriptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (method, digest) = value
            .split_once(':')
            .ok_or_else(|| ScriptError::MalformedIdentity(format!("hash spec {value}")))?;
        if digest.is_empty() || !digest.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(ScriptError::MalformedIdentity(format!("hash spec {value}")));
        }
        Ok(Self {
            method: method.parse()?,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

/// A sealed produce identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceIdentity {
    pub code: String,
    pub filename: String,
    pub hash: HashSpec,
}

impl ProduceIdentity {
    /// Hash `path` and build the identity for `code`/`filename`.
    pub fn seal(
        code: &str,
        filename: &str,
        method: HashMethod,
        path: &Path,
    ) -> Result<Self, ScriptError> {
        Ok(Self {
            code: code.to_string(),
            filename: filename.to_string(),
            hash: HashSpec::of_file(method, path)?,
        })
    }

    /// Re-hash `path` and compare with the sealed digest.
    pub fn verify(&self, path: &Path) -> Result<(), ScriptError> {
        let actual = hash_file(self.hash.method, path)?;
        if actual != self.hash.digest {
            tracing::warn!(identity = %self, actual = %actual, "sealed hash mismatch");
            return Err(ScriptError::HashMismatch {
                identity: self.to_string(),
                expected: self.hash.digest.clone(),
                actual,
            });
        }
        tracing::debug!(identity = %self, "seal verified");
        Ok(())
    }
}

impl fmt::Display for ProduceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}@{})", self.code, self.filename, self.hash)
    }
}

impl FromStr for ProduceIdentity {
    type Err = ScriptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = identity_regex()
            .captures(value)
            .ok_or_else(|| ScriptError::MalformedIdentity(value.to_string()))?;
        Ok(Self {
            code: captures[1].to_string(),
            filename: captures[2].to_string(),
            hash: captures[3].parse()?,
        })
    }
}

/// Filename a declared product resolves to: the identity's filename when
/// the declaration follows the grammar, the literal text otherwise.
pub fn product_filename(declared: &str) -> String {
    match identity_regex().captures(declared) {
        Some(captures) => captures[2].to_string(),
        None => declared.to_string(),
    }
}

pub fn hash_file(method: HashMethod, path: &Path) -> Result<String, ScriptError> {
    let bytes = std::fs::read(path).io_context(|| format!("read {}", path.display()))?;
    Ok(method.digest(&bytes))
}
