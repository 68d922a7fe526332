//! Typed mutation identities.
//!
//! A [`MutationSite`] is a (chain, wild-type residue, position) triple and a
//! [`Mutation`] adds the target residue. Every textual form used by the
//! pipeline goes through the parser and formatters in this module:
//!
//! * site, canonical: `A-S-133`
//! * mutation, canonical: `E-N-654-P`
//! * mutation, directory name used by the external tool: `E-N654P`
//!
//! The parser additionally accepts dotted (`A.S.133`, `A.S.133.P`) and
//! whitespace separated (`A S 133`) forms as well as three-letter residue
//! codes (`E-Asn654Pro`).


use std::{fmt, str::FromStr};
use thiserror::Error;

/// the 20 standard amino acids in one-letter code
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

const THREE_TO_ONE: [(&str, char); 20] = [
    ("ALA", 'A'),
    ("CYS", 'C'),
    ("ASP", 'D'),
    ("GLU", 'E'),
    ("PHE", 'F'),
    ("GLY", 'G'),
    ("HIS", 'H'),
    ("ILE", 'I'),
    ("LYS", 'K'),
    ("LEU", 'L'),
    ("MET", 'M'),
    ("ASN", 'N'),
    ("PRO", 'P'),
    ("GLN", 'Q'),
    ("ARG", 'R'),
    ("SER", 'S'),
    ("THR", 'T'),
    ("VAL", 'V'),
    ("TRP", 'W'),
    ("TYR", 'Y'),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationParseError {
    #[error("Empty mutation identifier")]
    Empty,
    #[error("Invalid chain identifier in {0:?}")]
    InvalidChain(String),
    #[error("Unknown residue code {code:?} in {input:?}")]
    UnknownResidue { code: String, input: String },
    #[error("Invalid sequence position in {0:?}")]
    InvalidPosition(String),
    #[error("Unrecognized mutation format {0:?}")]
    UnrecognizedFormat(String),
    #[error("{0:?} names a site but no target residue")]
    MissingTarget(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationSite {
    pub chain: char,
    pub wildtype: char,
    pub position: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mutation {
    pub site: MutationSite,
    pub target: char,
}

impl MutationSite {
    pub fn new(chain: char, wildtype: char, position: u32) -> Self {
        Self {
            chain,
            wildtype,
            position,
        }
    }

    /// file name of the chunk file holding this site
    pub fn chunk_file_name(&self) -> String {
        format!("{self}.txt")
    }

    pub fn mutate(&self, target: char) -> Mutation {
        Mutation { site: *self, target }
    }
}

impl Mutation {
    /// name of the directory the external tool writes this mutation's replicas to
    pub fn dir_name(&self) -> String {
        format!(
            "{}-{}{}{}",
            self.site.chain, self.site.wildtype, self.site.position, self.target
        )
    }
}

impl fmt::Display for MutationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.chain, self.wildtype, self.position)
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.site, self.target)
    }
}

impl FromStr for MutationSite {
    type Err = MutationParseError;

    /// parse any supported form, a trailing target residue is validated but dropped
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse(input).map(|(site, _)| site)
    }
}

impl FromStr for Mutation {
    type Err = MutationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match parse(input)? {
            (site, Some(target)) => Ok(site.mutate(target)),
            (_, None) => Err(MutationParseError::MissingTarget(input.trim().to_owned())),
        }
    }
}

/// convert a one- or three-letter residue code into its one-letter form
pub fn residue_code(code: &str, input: &str) -> Result<char, MutationParseError> {
    let upper = code.to_ascii_uppercase();
    let unknown = || MutationParseError::UnknownResidue {
        code: code.to_owned(),
        input: input.to_owned(),
    };

    match upper.len() {
        1 => upper
            .chars()
            .next()
            .filter(|residue| AMINO_ACIDS.contains(*residue))
            .ok_or_else(unknown),
        3 => THREE_TO_ONE
            .iter()
            .find(|(three, _)| *three == upper)
            .map(|(_, one)| *one)
            .ok_or_else(unknown),
        _ => Err(unknown()),
    }
}

fn chain(part: &str, input: &str) -> Result<char, MutationParseError> {
    let mut chars = part.chars();

    match (chars.next(), chars.next()) {
        (Some(chain), None) if chain.is_ascii_alphanumeric() => Ok(chain),
        _ => Err(MutationParseError::InvalidChain(input.to_owned())),
    }
}

fn position(part: &str, input: &str) -> Result<u32, MutationParseError> {
    part.parse()
        .map_err(|_| MutationParseError::InvalidPosition(input.to_owned()))
}

/// split `N654P` / `Asn654Pro` / `N654` into residue, position and optional target
fn compact(
    body: &str,
    input: &str,
) -> Result<(char, u32, Option<char>), MutationParseError> {
    let digits_start = body
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| MutationParseError::InvalidPosition(input.to_owned()))?;
    let (wildtype, rest) = body.split_at(digits_start);
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (number, target) = rest.split_at(digits_end);

    let target = if target.is_empty() {
        None
    } else {
        Some(residue_code(target, input)?)
    };

    Ok((residue_code(wildtype, input)?, position(number, input)?, target))
}

fn parse(input: &str) -> Result<(MutationSite, Option<char>), MutationParseError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(MutationParseError::Empty);
    }

    let unrecognized = || MutationParseError::UnrecognizedFormat(trimmed.to_owned());

    let parts: Vec<&str> = if trimmed.contains(|c: char| c == '.' || c.is_whitespace()) {
        trimmed
            .split(|c: char| c == '.' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect()
    } else {
        trimmed.split('-').collect()
    };

    match parts.as_slice() {
        [chain_part, body] => {
            let (wildtype, position, target) = compact(body, trimmed)?;

            Ok((
                MutationSite::new(chain(chain_part, trimmed)?, wildtype, position),
                target,
            ))
        }
        [chain_part, wildtype, number] => Ok((
            MutationSite::new(
                chain(chain_part, trimmed)?,
                residue_code(wildtype, trimmed)?,
                position(number, trimmed)?,
            ),
            None,
        )),
        [chain_part, wildtype, number, target] => Ok((
            MutationSite::new(
                chain(chain_part, trimmed)?,
                residue_code(wildtype, trimmed)?,
                position(number, trimmed)?,
            ),
            Some(residue_code(target, trimmed)?),
        )),
        _ => Err(unrecognized()),
    }
}
