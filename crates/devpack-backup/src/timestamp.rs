use chrono::NaiveDateTime;

/// Separator between the package name and the timestamp in a snapshot
/// directory name: `<package>.backup-<yyyyMMdd-HHmmss>`.
pub const BACKUP_MARKER: &str = ".backup-";
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
pub const BACKUP_TIMESTAMP_LEN: usize = 15;

pub fn format_backup_timestamp(at: NaiveDateTime) -> String {
    at.format(BACKUP_TIMESTAMP_FORMAT).to_string()
}

/// Strict parse: exactly 15 characters, digits everywhere except a `-` at
/// offset 8. chrono alone would accept shorter numeric fields.
pub fn parse_backup_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() != BACKUP_TIMESTAMP_LEN {
        return None;
    }

    let well_formed = raw.bytes().enumerate().all(|(idx, byte)| {
        if idx == 8 {
            byte == b'-'
        } else {
            byte.is_ascii_digit()
        }
    });
    if !well_formed {
        return None;
    }

    NaiveDateTime::parse_from_str(raw, BACKUP_TIMESTAMP_FORMAT).ok()
}

pub fn backup_dir_name(package_name: &str, timestamp: &str) -> String {
    format!("{package_name}{BACKUP_MARKER}{timestamp}")
}

/// Matches `<package_name>.backup-<timestamp>` for a known package. Characters
/// after the 15-character timestamp are tolerated.
pub(crate) fn match_package_backup<'a>(
    dir_name: &'a str,
    package_name: &str,
) -> Option<(&'a str, NaiveDateTime)> {
    let rest = dir_name
        .strip_prefix(package_name)?
        .strip_prefix(BACKUP_MARKER)?;
    let raw = rest.get(..BACKUP_TIMESTAMP_LEN)?;
    let parsed = parse_backup_timestamp(raw)?;
    Some((raw, parsed))
}

/// Splits on the last `.backup-` so package names may contain dots or even
/// an earlier `.backup-` of their own.
pub(crate) fn split_backup_dir_name(dir_name: &str) -> Option<(&str, &str, NaiveDateTime)> {
    let marker_at = dir_name.rfind(BACKUP_MARKER)?;
    let package_name = &dir_name[..marker_at];
    if package_name.is_empty() {
        return None;
    }

    let rest = &dir_name[marker_at + BACKUP_MARKER.len()..];
    let raw = rest.get(..BACKUP_TIMESTAMP_LEN)?;
    let parsed = parse_backup_timestamp(raw)?;
    Some((package_name, raw, parsed))
}
