//! Input validation
//!
//! Every check here runs before an operation touches the system, so a
//! rejected input never leaves a partial change behind.

use crate::error::{GwctlError, GwctlResult};
use std::net::Ipv4Addr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum length for configuration values
const MAX_CONFIG_VALUE_LEN: usize = 255;

/// Reject an empty required field
pub fn require(field: &str, value: &str) -> GwctlResult<()> {
    if value.is_empty() {
        return Err(GwctlError::invalid(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Empty string means "not given"
pub fn optional(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes, dots and
/// underscores, and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> GwctlResult<()> {
    require("Device", name)?;

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(GwctlError::invalid(format!(
            "Interface name too long (max {} characters)",
            MAX_INTERFACE_NAME_LEN
        )));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(GwctlError::invalid(format!(
                "Invalid interface name '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    // Would be read as an option by ip(8)
    if name.starts_with('-') {
        return Err(GwctlError::invalid("Interface name cannot start with dash"));
    }

    Ok(())
}

/// Parse an IPv4 address
pub fn validate_ipv4_address(addr: &str) -> GwctlResult<Ipv4Addr> {
    require("Address", addr)?;
    addr.parse::<Ipv4Addr>()
        .map_err(|_| GwctlError::invalid(format!("Invalid IPv4 address: {}", addr)))
}

/// Normalize a netmask to a prefix length
///
/// Accepts a prefix length (`24`) or a dotted mask (`255.255.255.0`); the
/// result is the prefix of the network `0.0.0.0/<netmask>`.
pub fn netmask_to_prefix(netmask: &str) -> GwctlResult<u8> {
    require("Netmask", netmask)?;
    let netmask = netmask.trim_start_matches('/');

    if let Ok(prefix) = netmask.parse::<u8>() {
        if prefix > 32 {
            return Err(GwctlError::invalid(format!(
                "Prefix length {} exceeds maximum 32",
                prefix
            )));
        }
        return Ok(prefix);
    }

    let mask = netmask
        .parse::<Ipv4Addr>()
        .map_err(|_| GwctlError::invalid(format!("Invalid netmask: {}", netmask)))?;
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    // All ones must be contiguous from the top
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return Err(GwctlError::invalid(format!("Non-contiguous netmask: {}", netmask)));
    }
    Ok(prefix as u8)
}

/// Validate MTU value
pub fn validate_mtu(mtu: &str) -> GwctlResult<u32> {
    require("MTU", mtu)?;
    let value: u32 = mtu
        .parse()
        .map_err(|_| GwctlError::invalid(format!("MTU is not a number: {}", mtu)))?;

    // Ethernet minimum is 68, maximum is typically 9000 (jumbo frames)
    if value < 68 {
        return Err(GwctlError::invalid("MTU must be at least 68 bytes"));
    }
    if value > 9000 {
        return Err(GwctlError::invalid("MTU cannot exceed 9000 bytes"));
    }
    Ok(value)
}

/// Parse a required non-negative integer field
pub fn require_number(field: &str, value: &str) -> GwctlResult<u32> {
    require(field, value)?;
    value
        .parse()
        .map_err(|_| GwctlError::invalid(format!("{} is not a number: {}", field, value)))
}

/// Sanitize values that end up in a config file or on a command line
///
/// A newline would start a new `key = value` line in the section file.
pub fn sanitize_config_value(field: &str, value: &str) -> GwctlResult<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(GwctlError::invalid(format!(
            "{} contains invalid control characters",
            field
        )));
    }

    if value.len() > MAX_CONFIG_VALUE_LEN {
        return Err(GwctlError::invalid(format!(
            "{} too long (max {} characters)",
            field, MAX_CONFIG_VALUE_LEN
        )));
    }

    Ok(())
}
