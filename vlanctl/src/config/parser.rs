//! Desired-state definitions file.
//!
//! One VLAN address per line:
//!
//! ```text
//! 90  10.11.9.10/24     # literal CIDR
//! 90  10.11.9.11 24     # address and prefix as separate tokens
//! 200 dhcp
//! 201 dhcp6
//! ```
//!
//! Everything from the first `#` is a comment. The first invalid line aborts
//! the whole parse.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, VlanError};
use crate::types::{AddressFamily, AddressSpec, VlanEntry, VlanId};

/// Longest prefix accepted in the split `<ip> <prefix>` form
const MAX_SPLIT_PREFIX: u8 = 32;

/// Read and parse a definitions file
pub fn load_definitions(path: &Path) -> Result<Vec<VlanEntry>> {
    let content = fs::read_to_string(path).map_err(|source| VlanError::Input {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = parse_definitions(content.lines())?;
    debug!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Parse a sequence of lines, stopping at the first invalid one
pub fn parse_definitions<'a, I>(lines: I) -> Result<Vec<VlanEntry>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut entries = Vec::new();

    for (idx, line) in lines.into_iter().enumerate() {
        if let Some(entry) = parse_line(idx + 1, line)? {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// Parse a single line. Blank and comment-only lines yield `None`.
pub fn parse_line(line_no: usize, text: &str) -> Result<Option<VlanEntry>> {
    let content = match text.find('#') {
        Some(idx) => &text[..idx],
        None => text,
    };

    let tokens: Vec<&str> = content.split_whitespace().collect();
    let (id_token, second, third) = match tokens.as_slice() {
        [] => return Ok(None),
        [id] => {
            return Err(VlanError::MalformedLine {
                line: line_no,
                reason: format!("VLAN {} has no address (expected CIDR, 'dhcp' or 'dhcp6')", id),
            })
        }
        [id, second] => (*id, *second, None),
        [id, second, third] => (*id, *second, Some(*third)),
        _ => {
            return Err(VlanError::MalformedLine {
                line: line_no,
                reason: format!("too many fields ({}), expected at most 3", tokens.len()),
            })
        }
    };

    let vlan_id = VlanId::parse(id_token).ok_or_else(|| VlanError::InvalidVlanId {
        line: line_no,
        value: id_token.to_string(),
    })?;

    let address = parse_address(line_no, second, third)?;

    Ok(Some(VlanEntry {
        line: line_no,
        vlan_id,
        address,
    }))
}

fn parse_address(line_no: usize, second: &str, third: Option<&str>) -> Result<AddressSpec> {
    let keyword = second.to_ascii_lowercase();

    let spec = match keyword.as_str() {
        "dhcp" => AddressSpec::Dhcp {
            family: AddressFamily::V4,
        },
        "dhcp6" => AddressSpec::Dhcp {
            family: AddressFamily::V6,
        },
        _ if second.contains('/') => AddressSpec::Static {
            cidr: second.to_string(),
        },
        _ => {
            let prefix = third.ok_or_else(|| VlanError::InvalidPrefix {
                line: line_no,
                address: second.to_string(),
                value: "(missing)".to_string(),
            })?;
            if !is_valid_prefix(prefix) {
                return Err(VlanError::InvalidPrefix {
                    line: line_no,
                    address: second.to_string(),
                    value: prefix.to_string(),
                });
            }
            return Ok(AddressSpec::Static {
                cidr: format!("{}/{}", second, prefix),
            });
        }
    };

    if let Some(extra) = third {
        warn!("line {}: ignoring extra field '{}'", line_no, extra);
    }

    Ok(spec)
}

fn is_valid_prefix(token: &str) -> bool {
    !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && token
            .parse::<u8>()
            .map(|p| p <= MAX_SPLIT_PREFIX)
            .unwrap_or(false)
}
