//! # LTM Checksum
//!
//! LTM protects each frame with a single byte: the XOR of all payload bytes.
//! The `$T` header and function byte are not covered.

/// Calculate the LTM checksum of a payload
///
/// # Arguments
///
/// * `payload` - Frame payload (excluding header and function byte)
///
/// # Returns
///
/// * `u8` - XOR of all payload bytes
///
/// # Examples
///
/// ```
/// use flightlog_replay::ltm::crc::ltm_checksum;
///
/// assert_eq!(ltm_checksum(&[0x01, 0x02, 0x04]), 0x07);
/// ```
pub fn ltm_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc ^ b)
}
