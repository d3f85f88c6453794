use crate::constants::MAX_DUPLICATE_MOUNTS_PER_DEVICE;
use crate::error::AgentError;

/// One line of `/proc/self/mountinfo`, decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountRecord {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub options_csv: String,
}

/// Decode the kernel's `\NNN` octal escapes (space, tab, backslash, newline).
fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &s[i + 1..i + 4];
            if let Ok(val) = u8::from_str_radix(octal, 8) {
                out.push(val as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b' ' => out.push_str("\\040"),
            b'\t' => out.push_str("\\011"),
            b'\\' => out.push_str("\\134"),
            b'\n' => out.push_str("\\012"),
            _ => out.push(b as char),
        }
    }
    out
}

/// Parse a single mount-info line.
///
/// Format: `mount_id parent_id major:minor root target options
/// [optional_fields...] - fs_type source super_options`. The number of
/// optional fields preceding the `-` separator is not fixed and must not be
/// assumed.
pub fn parse_line(line: &str) -> Result<MountRecord, AgentError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Malformed {
            line: line.to_string(),
        });
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    // minimum positional prefix: mount_id parent_id major:minor root target options
    if fields.len() < 6 {
        return Err(AgentError::Malformed {
            line: line.to_string(),
        });
    }
    let target = unescape(fields[4]);
    let options_csv = fields[5].to_string();

    let sep_pos = fields.iter().position(|f| *f == "-").ok_or_else(|| AgentError::Malformed {
        line: line.to_string(),
    })?;
    // after "-" we need: fs_type source super_options
    if fields.len() < sep_pos + 4 {
        return Err(AgentError::Malformed {
            line: line.to_string(),
        });
    }
    let fs_type = fields[sep_pos + 1].to_string();
    let source = unescape(fields[sep_pos + 2]);

    Ok(MountRecord {
        source,
        target,
        fs_type,
        options_csv,
    })
}

/// Render a [`MountRecord`] back into kernel mount-info line form, suitable
/// for round-trip tests. Positional fields this crate does not track
/// (mount_id, parent_id, major:minor, root, optional fields, super_options)
/// are filled with placeholder values.
pub fn format_line(record: &MountRecord) -> String {
    format!(
        "0 0 0:0 / {} {} - {} {} {}",
        escape(&record.target),
        record.options_csv,
        record.fs_type,
        escape(&record.source),
        record.options_csv
    )
}

/// Parse a full mount-info stream, one record per non-empty line. Malformed
/// lines are surfaced individually; the caller decides whether to abort.
pub fn parse_stream(contents: &str) -> Vec<Result<MountRecord, AgentError>> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// Count how many records have a source matched by `device_predicate`,
/// failing with [`AgentError::MountStorm`] once the count reaches
/// [`MAX_DUPLICATE_MOUNTS_PER_DEVICE`]. The predicate form lets callers match
/// by exact device, prefix, or any other notion of "the same device" (e.g.
/// equivalent symlink aliases) rather than only exact string equality.
pub fn detect_mount_storm<P>(records: &[MountRecord], device_predicate: P) -> Result<usize, AgentError>
where
    P: Fn(&str) -> bool,
{
    let mut count = 0;
    let mut first_match: Option<&str> = None;
    for record in records {
        if device_predicate(&record.source) {
            count += 1;
            if first_match.is_none() {
                first_match = Some(&record.source);
            }
        }
    }
    if count >= MAX_DUPLICATE_MOUNTS_PER_DEVICE {
        return Err(AgentError::MountStorm {
            device: first_match.unwrap_or("").to_string(),
            count,
            hint: "inspect active mounts with findmnt and address the loop creating them".into(),
        });
    }
    Ok(count)
}

/// First record whose target equals `target`, if any.
pub fn find_mount<'a>(records: &'a [MountRecord], target: &str) -> Option<&'a MountRecord> {
    records.iter().find(|r| r.target == target)
}
