//! RFC 3659 §7 MLST/MLSD fact-list parsing.
//!
//! A listing line is `facts SP pathname`, each fact `name=value;` with
//! the trailing semicolon required. A line opening with a space is the
//! MLST control-reply form: no facts, the remainder is the pathname
//! (which may itself contain spaces).

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use retronet_core::{ErrorKind, Kinded};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MlsxError {
    #[error("no space between facts and pathname")]
    MissingPath,

    #[error("empty pathname")]
    EmptyPath,

    #[error("fact list not terminated by ';'")]
    UnterminatedFact,

    #[error("fact without '=': {0:?}")]
    MissingFactValue(String),

    #[error("unparsable size fact: {0:?}")]
    InvalidSize(String),

    #[error("unparsable modify fact: {0:?}")]
    InvalidTimestamp(String),
}

impl Kinded for MlsxError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    #[default]
    Unknown,
}

/// Who a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Access {
    User = 0,
    Group = 1,
    World = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Permission {
    Read = 0,
    Write = 1,
    Execute = 2,
}

/// One MLST/MLSD listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MlsxEntry {
    pub name: String,
    pub size: Option<u64>,
    pub modify: Option<DateTime<Utc>>,
    pub kind: EntryKind,
    pub owner: Option<String>,
    pub group: Option<String>,
    permissions: [[bool; 3]; 3],
}

impl MlsxEntry {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn has_permission(&self, access: Access, permission: Permission) -> bool {
        self.permissions[access as usize][permission as usize]
    }

    fn set_permission(&mut self, access: Access, permission: Permission, value: bool) {
        self.permissions[access as usize][permission as usize] = value;
    }
}

/// Parse one listing line into an entry.
///
/// Any malformed recognized fact rejects the whole entry; unknown fact
/// names are ignored.
pub fn parse_mlsx_line(line: &str) -> Result<MlsxEntry, MlsxError> {
    // MLST control replies indent the pathname and carry no facts.
    if let Some(path) = line.strip_prefix(' ') {
        if path.is_empty() {
            return Err(MlsxError::EmptyPath);
        }
        return Ok(MlsxEntry::named(path));
    }

    // Only the first space separates facts from the pathname.
    let (facts, path) = line.split_once(' ').ok_or(MlsxError::MissingPath)?;
    if path.is_empty() {
        return Err(MlsxError::EmptyPath);
    }
    if !facts.ends_with(';') {
        return Err(MlsxError::UnterminatedFact);
    }

    let mut entry = MlsxEntry::named(path);
    let mut unix_mode_seen = false;

    for fact in facts.split_terminator(';') {
        let (name, value) = fact
            .split_once('=')
            .ok_or_else(|| MlsxError::MissingFactValue(fact.to_string()))?;

        match name.to_ascii_lowercase().as_str() {
            "size" => {
                entry.size = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| MlsxError::InvalidSize(value.to_string()))?,
                );
            }
            "modify" => {
                entry.modify = Some(
                    parse_timestamp(value)
                        .ok_or_else(|| MlsxError::InvalidTimestamp(value.to_string()))?,
                );
            }
            "type" => {
                entry.kind = match value.to_ascii_lowercase().as_str() {
                    "file" => EntryKind::File,
                    "dir" | "cdir" | "pdir" => EntryKind::Directory,
                    other => {
                        debug!(value = other, "unrecognized type fact");
                        EntryKind::Unknown
                    }
                };
            }
            "unix.owner" => entry.owner = Some(value.to_string()),
            "unix.group" => entry.group = Some(value.to_string()),
            "unix.mode" => {
                unix_mode_seen = true;
                apply_unix_mode(&mut entry, value);
            }
            "perm" if !unix_mode_seen => apply_perm_fact(&mut entry, value),
            _ => {} // unknown facts are ignored per RFC 3659
        }
    }

    Ok(entry)
}

/// RFC 3659 time-val: `YYYYMMDDHHMMSS[.F+]` in GMT, parsed strictly --
/// the whole value must be consumed.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let (body, frac) = match value.split_once('.') {
        Some((body, frac)) => (body, Some(frac)),
        None => (value, None),
    };

    if body.len() != 14 || !body.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| body[range].parse::<u32>().ok();
    let naive = NaiveDate::from_ymd_opt(
        body[0..4].parse::<i32>().ok()?,
        field(4..6)?,
        field(6..8)?,
    )?
    .and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)?;

    let millis = match frac {
        None => 0,
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            // Fraction precision beyond milliseconds is discarded.
            let digits = &f[..f.len().min(3)];
            let scale = 10u32.pow(3 - digits.len() as u32);
            digits.parse::<u32>().ok()? * scale
        }
        Some(_) => return None,
    };

    Some(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(i64::from(millis)))
}

/// The last three octal digits of `unix.mode` populate the standard
/// rwx matrix.
fn apply_unix_mode(entry: &mut MlsxEntry, value: &str) {
    if value.is_empty() || !value.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return;
    }
    let digits = &value[value.len().saturating_sub(3)..];
    let accesses = [Access::World, Access::Group, Access::User];

    // Clear first: unix.mode is authoritative over any earlier perm fact.
    entry.permissions = [[false; 3]; 3];
    for (i, digit) in digits.bytes().rev().enumerate() {
        let Some(&access) = accesses.get(i) else {
            break;
        };
        let bits = digit - b'0';
        entry.set_permission(access, Permission::Read, bits & 0b100 != 0);
        entry.set_permission(access, Permission::Write, bits & 0b010 != 0);
        entry.set_permission(access, Permission::Execute, bits & 0b001 != 0);
    }
}

/// Heuristic mapping of the RFC 3659 `perm` fact onto USER permissions:
/// `r` grants read; `w`, `a`, `c`, `d`, `m`, `p` grant write; `e`, `l`
/// grant execute. `f` (renamable) is deliberately ignored -- the RFC
/// does not tie it to a UNIX bit. Unknown characters are skipped.
fn apply_perm_fact(entry: &mut MlsxEntry, value: &str) {
    for c in value.chars() {
        match c.to_ascii_lowercase() {
            'r' => entry.set_permission(Access::User, Permission::Read, true),
            'w' | 'a' | 'c' | 'd' | 'm' | 'p' => {
                entry.set_permission(Access::User, Permission::Write, true)
            }
            'e' | 'l' => entry.set_permission(Access::User, Permission::Execute, true),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_fact_list() {
        let entry = parse_mlsx_line(
            "size=25730;modify=20260121051132;type=file;unix.owner=ftp;unix.group=users;unix.mode=0644; pub/notes.txt",
        )
        .unwrap();

        assert_eq!(entry.name, "pub/notes.txt");
        assert_eq!(entry.size, Some(25730));
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.owner.as_deref(), Some("ftp"));
        assert_eq!(entry.group.as_deref(), Some("users"));
        let modify = entry.modify.unwrap();
        assert_eq!(modify.to_rfc3339(), "2026-01-21T05:11:32+00:00");

        assert!(entry.has_permission(Access::User, Permission::Read));
        assert!(entry.has_permission(Access::User, Permission::Write));
        assert!(!entry.has_permission(Access::User, Permission::Execute));
        assert!(entry.has_permission(Access::Group, Permission::Read));
        assert!(!entry.has_permission(Access::Group, Permission::Write));
        assert!(entry.has_permission(Access::World, Permission::Read));
        assert!(!entry.has_permission(Access::World, Permission::Write));
    }

    #[test]
    fn pathname_may_contain_spaces() {
        let entry = parse_mlsx_line("type=file; my file with spaces.txt").unwrap();
        assert_eq!(entry.name, "my file with spaces.txt");
    }

    #[test]
    fn control_reply_form_has_no_facts() {
        let entry = parse_mlsx_line(" /home/user/file.bin").unwrap();
        assert_eq!(entry.name, "/home/user/file.bin");
        assert_eq!(entry.kind, EntryKind::Unknown);
        assert_eq!(entry.size, None);
    }

    #[test]
    fn cdir_and_pdir_collapse_to_directory() {
        for t in ["cdir", "pdir", "dir"] {
            let entry = parse_mlsx_line(&format!("type={t}; .")).unwrap();
            assert_eq!(entry.kind, EntryKind::Directory);
        }
    }

    #[test]
    fn unrecognized_type_is_unknown() {
        let entry = parse_mlsx_line("type=OS.unix=slink:/target; link").unwrap();
        assert_eq!(entry.kind, EntryKind::Unknown);
    }

    #[test]
    fn fact_names_are_case_insensitive() {
        let entry = parse_mlsx_line("Type=file;SIZE=10;UNIX.Mode=0755; f").unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(10));
        assert!(entry.has_permission(Access::User, Permission::Execute));
    }

    #[test]
    fn modify_accepts_millisecond_fraction() {
        let entry = parse_mlsx_line("modify=20251231235959.125; x").unwrap();
        assert_eq!(
            entry.modify.unwrap().timestamp_subsec_millis(),
            125
        );
    }

    #[test]
    fn bad_size_rejects_entry() {
        assert_eq!(
            parse_mlsx_line("size=-4; x"),
            Err(MlsxError::InvalidSize("-4".to_string()))
        );
        assert!(parse_mlsx_line("size=big; x").is_err());
    }

    #[test]
    fn bad_modify_rejects_entry() {
        assert!(parse_mlsx_line("modify=2026012; x").is_err());
        assert!(parse_mlsx_line("modify=20260121051132Z; x").is_err());
        assert!(parse_mlsx_line("modify=20261321051132; x").is_err()); // month 13
        assert!(parse_mlsx_line("modify=20260121051132.; x").is_err());
    }

    #[test]
    fn missing_trailing_semicolon_rejects_entry() {
        assert_eq!(
            parse_mlsx_line("size=10;type=file x"),
            Err(MlsxError::UnterminatedFact)
        );
    }

    #[test]
    fn fact_without_equals_rejects_entry() {
        assert!(matches!(
            parse_mlsx_line("size; x"),
            Err(MlsxError::MissingFactValue(_))
        ));
    }

    #[test]
    fn missing_or_empty_path_rejects_entry() {
        assert_eq!(parse_mlsx_line("type=file;"), Err(MlsxError::MissingPath));
        assert_eq!(parse_mlsx_line("type=file; "), Err(MlsxError::EmptyPath));
        assert_eq!(parse_mlsx_line(" "), Err(MlsxError::EmptyPath));
    }

    #[test]
    fn perm_fact_maps_onto_user_permissions() {
        let entry = parse_mlsx_line("perm=adfrw; d").unwrap();
        assert!(entry.has_permission(Access::User, Permission::Read));
        assert!(entry.has_permission(Access::User, Permission::Write));
        assert!(!entry.has_permission(Access::User, Permission::Execute));
        // Group and world untouched by the heuristic.
        assert!(!entry.has_permission(Access::Group, Permission::Read));

        let entry = parse_mlsx_line("perm=el; d").unwrap();
        assert!(entry.has_permission(Access::User, Permission::Execute));
        assert!(!entry.has_permission(Access::User, Permission::Read));
    }

    #[test]
    fn unix_mode_wins_over_perm_fact() {
        // perm first, unix.mode later: mode is authoritative.
        let entry = parse_mlsx_line("perm=adfrw;unix.mode=0111; d").unwrap();
        assert!(!entry.has_permission(Access::User, Permission::Read));
        assert!(entry.has_permission(Access::User, Permission::Execute));

        // unix.mode first: perm is skipped entirely.
        let entry = parse_mlsx_line("unix.mode=0444;perm=el; d").unwrap();
        assert!(entry.has_permission(Access::User, Permission::Read));
        assert!(!entry.has_permission(Access::User, Permission::Execute));
    }

    #[test]
    fn unknown_facts_are_ignored() {
        let entry = parse_mlsx_line("size=5;charset=UTF-8;media-type=text/plain; a").unwrap();
        assert_eq!(entry.size, Some(5));
    }

    #[test]
    fn all_octal_digits_map_to_the_standard_rwx_sets() {
        let expect = [
            (0, [false, false, false]),
            (1, [false, false, true]),
            (2, [false, true, false]),
            (3, [false, true, true]),
            (4, [true, false, false]),
            (5, [true, false, true]),
            (6, [true, true, false]),
            (7, [true, true, true]),
        ];
        for (digit, [r, w, x]) in expect {
            let entry = parse_mlsx_line(&format!("unix.mode={digit}{digit}{digit}; f")).unwrap();
            for access in [Access::User, Access::Group, Access::World] {
                assert_eq!(entry.has_permission(access, Permission::Read), r);
                assert_eq!(entry.has_permission(access, Permission::Write), w);
                assert_eq!(entry.has_permission(access, Permission::Execute), x);
            }
        }
    }
}
