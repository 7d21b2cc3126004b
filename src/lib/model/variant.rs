//! The closed set of sequence variations a read can show against its region.
//!
//! A [`Variation`] is pure data produced by CIGAR/sequence comparison. Its
//! `pos` is always an offset into the owning region's induced coordinate
//! space (covered bases counted left to right in reference orientation, with
//! introns and the missing-information gap skipped). Sequence *content* is
//! stored 5'-oriented: bases contributed by reverse-strand evidence arrive
//! here already (reverse-)complemented.
//!
//! Every kind round-trips through a compact token encoding, used both for
//! the explicit variant tag on records and inside dedup keys:
//!
//! ```text
//! M<pos><genomic><read>   mismatch, e.g. M4AT
//! I<pos><bases>           insertion, e.g. I3GG
//! D<pos><bases>           deletion, e.g. D7AC
//! S5<bases> / S3<bases>   5' / 3' soft-clip
//! ```
//!
//! A trailing `'` marks a token as second-mate evidence.

use std::fmt;

use serde::Serialize;

use crate::core::error::{RegataError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Variation {
    Mismatch {
        pos: u32,
        genomic: u8,
        read: u8,
        second_mate: bool,
    },
    Insertion {
        pos: u32,
        bases: Vec<u8>,
        second_mate: bool,
    },
    Deletion {
        pos: u32,
        bases: Vec<u8>,
        second_mate: bool,
    },
    Softclip {
        five_prime: bool,
        bases: Vec<u8>,
        second_mate: bool,
    },
}

impl Variation {
    /// Whether this variation was observed on the second mate of a pair.
    pub fn is_second_mate(&self) -> bool {
        match self {
            Variation::Mismatch { second_mate, .. }
            | Variation::Insertion { second_mate, .. }
            | Variation::Deletion { second_mate, .. }
            | Variation::Softclip { second_mate, .. } => *second_mate,
        }
    }

    /// Region-space position for positional kinds; soft-clips have none.
    pub fn position(&self) -> Option<u32> {
        match self {
            Variation::Mismatch { pos, .. }
            | Variation::Insertion { pos, .. }
            | Variation::Deletion { pos, .. } => Some(*pos),
            Variation::Softclip { .. } => None,
        }
    }

    /// Return the same variation shifted right by `offset` region positions.
    pub fn shifted(self, offset: u32) -> Variation {
        match self {
            Variation::Mismatch {
                pos,
                genomic,
                read,
                second_mate,
            } => Variation::Mismatch {
                pos: pos + offset,
                genomic,
                read,
                second_mate,
            },
            Variation::Insertion {
                pos,
                bases,
                second_mate,
            } => Variation::Insertion {
                pos: pos + offset,
                bases,
                second_mate,
            },
            Variation::Deletion {
                pos,
                bases,
                second_mate,
            } => Variation::Deletion {
                pos: pos + offset,
                bases,
                second_mate,
            },
            clip @ Variation::Softclip { .. } => clip,
        }
    }

    /// Return the same variation with the second-mate flag forced to `flag`.
    pub fn with_second_mate(self, flag: bool) -> Variation {
        match self {
            Variation::Mismatch {
                pos, genomic, read, ..
            } => Variation::Mismatch {
                pos,
                genomic,
                read,
                second_mate: flag,
            },
            Variation::Insertion { pos, bases, .. } => Variation::Insertion {
                pos,
                bases,
                second_mate: flag,
            },
            Variation::Deletion { pos, bases, .. } => Variation::Deletion {
                pos,
                bases,
                second_mate: flag,
            },
            Variation::Softclip {
                five_prime, bases, ..
            } => Variation::Softclip {
                five_prime,
                bases,
                second_mate: flag,
            },
        }
    }

    /// Parse one token of the compact encoding.
    pub fn from_token(token: &str) -> Result<Variation> {
        let invalid = || RegataError::InvalidVariantToken(token.to_string());
        let (body, second_mate) = match token.strip_suffix('\'') {
            Some(stripped) => (stripped, true),
            None => (token, false),
        };
        let mut chars = body.chars();
        let kind = chars.next().ok_or_else(invalid)?;
        let rest = chars.as_str();
        match kind {
            'M' => {
                let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                if digits == 0 || rest.len() != digits + 2 {
                    return Err(invalid());
                }
                let pos: u32 = rest[..digits].parse().map_err(|_| invalid())?;
                let bases = rest[digits..].as_bytes();
                Ok(Variation::Mismatch {
                    pos,
                    genomic: bases[0].to_ascii_uppercase(),
                    read: bases[1].to_ascii_uppercase(),
                    second_mate,
                })
            }
            'I' | 'D' => {
                let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                if digits == 0 || rest.len() == digits {
                    return Err(invalid());
                }
                let pos: u32 = rest[..digits].parse().map_err(|_| invalid())?;
                let bases: Vec<u8> = rest[digits..]
                    .bytes()
                    .map(|b| b.to_ascii_uppercase())
                    .collect();
                if !bases.iter().all(|b| b.is_ascii_alphabetic()) {
                    return Err(invalid());
                }
                if kind == 'I' {
                    Ok(Variation::Insertion {
                        pos,
                        bases,
                        second_mate,
                    })
                } else {
                    Ok(Variation::Deletion {
                        pos,
                        bases,
                        second_mate,
                    })
                }
            }
            'S' => {
                let mut rest_chars = rest.chars();
                let five_prime = match rest_chars.next() {
                    Some('5') => true,
                    Some('3') => false,
                    _ => return Err(invalid()),
                };
                let bases: Vec<u8> = rest_chars
                    .as_str()
                    .bytes()
                    .map(|b| b.to_ascii_uppercase())
                    .collect();
                if bases.is_empty() || !bases.iter().all(|b| b.is_ascii_alphabetic()) {
                    return Err(invalid());
                }
                Ok(Variation::Softclip {
                    five_prime,
                    bases,
                    second_mate,
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Parse a comma-separated token list (the explicit variant tag payload).
    pub fn parse_list(encoded: &str) -> Result<Vec<Variation>> {
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        encoded.split(',').map(Variation::from_token).collect()
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variation::Mismatch {
                pos, genomic, read, ..
            } => write!(f, "M{}{}{}", pos, *genomic as char, *read as char)?,
            Variation::Insertion { pos, bases, .. } => {
                write!(f, "I{}{}", pos, String::from_utf8_lossy(bases))?
            }
            Variation::Deletion { pos, bases, .. } => {
                write!(f, "D{}{}", pos, String::from_utf8_lossy(bases))?
            }
            Variation::Softclip {
                five_prime, bases, ..
            } => write!(
                f,
                "S{}{}",
                if *five_prime { '5' } else { '3' },
                String::from_utf8_lossy(bases)
            )?,
        }
        if self.is_second_mate() {
            write!(f, "'")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        let variations = vec![
            Variation::Mismatch {
                pos: 4,
                genomic: b'A',
                read: b'T',
                second_mate: false,
            },
            Variation::Insertion {
                pos: 3,
                bases: b"GG".to_vec(),
                second_mate: true,
            },
            Variation::Deletion {
                pos: 7,
                bases: b"AC".to_vec(),
                second_mate: false,
            },
            Variation::Softclip {
                five_prime: true,
                bases: b"NNN".to_vec(),
                second_mate: true,
            },
        ];
        for v in variations {
            let token = v.to_string();
            assert_eq!(Variation::from_token(&token).unwrap(), v, "token {}", token);
        }
    }

    #[test]
    fn list_parsing() {
        let parsed = Variation::parse_list("M0CA,I12TTT',S3A").unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed[1].is_second_mate());
        assert_eq!(parsed[0].position(), Some(0));
        assert_eq!(parsed[2].position(), None);
        assert!(Variation::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["", "M4A", "X1AC", "I", "Ix", "S2AC", "M4AT5"] {
            assert!(Variation::from_token(bad).is_err(), "token {:?}", bad);
        }
    }

    #[test]
    fn shift_leaves_clips_alone() {
        let clip = Variation::Softclip {
            five_prime: false,
            bases: b"AA".to_vec(),
            second_mate: false,
        };
        assert_eq!(clip.clone().shifted(10), clip);
        let mm = Variation::Mismatch {
            pos: 2,
            genomic: b'G',
            read: b'C',
            second_mate: false,
        };
        assert_eq!(mm.shifted(10).position(), Some(12));
    }
}
