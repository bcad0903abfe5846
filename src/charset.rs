//! Supported character sets and collations.

use crate::errors::{Result, ValidationError};

pub const CHARSET_BIN: &str = "binary";
pub const COLLATION_BIN: &str = "binary";

pub struct Charset {
    pub name: &'static str,
    pub default_collation: &'static str,
    pub collations: &'static [&'static str],
}

pub const CHARSETS: &[Charset] = &[
    Charset {
        name: "utf8",
        default_collation: "utf8_bin",
        collations: &["utf8_bin", "utf8_general_ci", "utf8_unicode_ci"],
    },
    Charset {
        name: "utf8mb4",
        default_collation: "utf8mb4_bin",
        collations: &["utf8mb4_bin", "utf8mb4_general_ci", "utf8mb4_unicode_ci", "utf8mb4_0900_ai_ci"],
    },
    Charset {
        name: "ascii",
        default_collation: "ascii_bin",
        collations: &["ascii_bin"],
    },
    Charset {
        name: "latin1",
        default_collation: "latin1_bin",
        collations: &["latin1_bin"],
    },
    Charset {
        name: "binary",
        default_collation: "binary",
        collations: &["binary"],
    },
    Charset {
        name: "gbk",
        default_collation: "gbk_bin",
        collations: &["gbk_bin", "gbk_chinese_ci"],
    },
];

pub fn get_charset(name: &str) -> Result<&'static Charset> {
    let lower = name.to_lowercase();
    CHARSETS
        .iter()
        .find(|c| c.name == lower)
        .ok_or_else(|| ValidationError::UnknownCharset(name.to_string()).into())
}

/// Charset owning the collation.
pub fn charset_of_collation(collation: &str) -> Result<&'static Charset> {
    let lower = collation.to_lowercase();
    CHARSETS
        .iter()
        .find(|c| c.collations.contains(&lower.as_str()))
        .ok_or_else(|| ValidationError::UnknownCollation(collation.to_string()).into())
}

pub fn validate_charset_collation(charset: &str, collation: &str) -> Result<()> {
    let cs = get_charset(charset)?;
    let owner = charset_of_collation(collation)?;
    if owner.name != cs.name {
        return Err(ValidationError::CollationCharsetMismatch {
            collation: collation.to_string(),
            charset: charset.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Resolve an explicit charset and an ordered list of COLLATE clauses.
///
/// The first collation fixes the charset when none was given; every later one
/// must belong to it. Falls back to `inherited` when nothing is specified.
pub fn resolve_charset_collation(
    charset: Option<&str>,
    collations: &[String],
    inherited: (&str, &str),
) -> Result<(String, String)> {
    let mut resolved_cs = match charset {
        Some(cs) => Some(get_charset(cs)?.name),
        None => None,
    };
    let mut resolved_coll: Option<String> = None;
    for collation in collations {
        let owner = charset_of_collation(collation)?;
        match resolved_cs {
            Some(cs) if cs != owner.name => {
                return Err(ValidationError::CollationCharsetMismatch {
                    collation: collation.to_lowercase(),
                    charset: cs.to_string(),
                }
                .into());
            }
            Some(_) => {}
            None => resolved_cs = Some(owner.name),
        }
        resolved_coll = Some(collation.to_lowercase());
    }
    match (resolved_cs, resolved_coll) {
        (Some(cs), Some(coll)) => Ok((cs.to_string(), coll)),
        (Some(cs), None) => {
            let cs = get_charset(cs)?;
            if cs.name == inherited.0.to_lowercase() {
                Ok((cs.name.to_string(), inherited.1.to_string()))
            } else {
                Ok((cs.name.to_string(), cs.default_collation.to_string()))
            }
        }
        _ => Ok((inherited.0.to_string(), inherited.1.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INHERIT: (&str, &str) = ("utf8mb4", "utf8mb4_bin");

    #[test]
    fn test_collation_decides_charset() {
        let (cs, coll) = resolve_charset_collation(
            None,
            &["utf8_bin".into(), "utf8_general_ci".into()],
            INHERIT,
        )
        .unwrap();
        assert_eq!((cs.as_str(), coll.as_str()), ("utf8", "utf8_general_ci"));
    }

    #[test]
    fn test_mismatch_reports_later_collation() {
        let err = resolve_charset_collation(
            None,
            &["utf8_unicode_ci".into(), "utf8mb4_general_ci".into()],
            INHERIT,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[ddl:1253]COLLATION 'utf8mb4_general_ci' is not valid for CHARACTER SET 'utf8'"
        );

        let err = resolve_charset_collation(Some("utf8mb4"), &["utf8_unicode_ci".into()], INHERIT)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[ddl:1253]COLLATION 'utf8_unicode_ci' is not valid for CHARACTER SET 'utf8mb4'"
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            resolve_charset_collation(Some("latin1"), &[], INHERIT).unwrap(),
            ("latin1".to_string(), "latin1_bin".to_string())
        );
        assert_eq!(
            resolve_charset_collation(None, &[], ("utf8", "utf8_general_ci")).unwrap(),
            ("utf8".to_string(), "utf8_general_ci".to_string())
        );
        assert!(get_charset("utf16").is_err());
    }
}
