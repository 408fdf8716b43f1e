//! Minimal ABI helpers
//!
//! Arguments are static words (address, uint, bool) plus `string`, which is
//! the only dynamic type the scenario runner sends. Return data is read word
//! by word; revert payloads are decoded separately.

use anyhow::{Context, Result};
use sha3::{Digest, Keccak256};

/// Selector of `Error(string)`, the payload Solidity emits for `require`/`revert`.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Selector of `Panic(uint256)`, emitted for assertion failures and overflows.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// A single ABI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiArg<'a> {
    /// 20-byte address, `0x`-prefixed hex
    Address(&'a str),
    /// Unsigned integer that fits in 128 bits
    Uint(u128),
    /// Boolean
    Bool(bool),
    /// UTF-8 string, encoded in the tail
    String(&'a str),
}

/// Returns the 4-byte function selector for a canonical signature,
/// e.g. `"transfer(address,uint256)"`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Returns the `0x`-prefixed topic hash for an event signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// Builds `0x`-prefixed calldata: selector, one head word per argument, then
/// the tails of dynamic arguments.
///
/// # Arguments
///
/// * `signature` - Canonical function signature
/// * `args` - Arguments in declaration order
///
/// # Returns
///
/// * `Ok(String)` - Hex calldata
/// * `Err(anyhow::Error)` - An address argument is not valid 20-byte hex
pub fn encode_call(signature: &str, args: &[AbiArg<'_>]) -> Result<String> {
    let head_len = 32 * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for arg in args {
        let word = match arg {
            AbiArg::Address(addr) => encode_address(addr)?,
            AbiArg::Uint(value) => encode_uint(*value),
            AbiArg::Bool(flag) => encode_uint(u128::from(*flag)),
            AbiArg::String(text) => {
                // Offset is counted from the start of the head.
                let offset = encode_uint((head_len + tail.len()) as u128);
                tail.extend_from_slice(&encode_uint(text.len() as u128));
                tail.extend_from_slice(text.as_bytes());
                tail.resize(tail.len() + (32 - text.len() % 32) % 32, 0);
                offset
            }
        };
        head.extend_from_slice(&word);
    }

    let mut calldata = Vec::with_capacity(4 + head.len() + tail.len());
    calldata.extend_from_slice(&selector(signature));
    calldata.extend_from_slice(&head);
    calldata.extend_from_slice(&tail);
    Ok(format!("0x{}", hex::encode(calldata)))
}

/// Left-pads a 20-byte address into a 32-byte word.
pub fn encode_address(addr: &str) -> Result<[u8; 32]> {
    let clean = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(clean).with_context(|| format!("Invalid EVM address hex: {}", addr))?;
    if bytes.len() != 20 {
        anyhow::bail!("Invalid EVM address length for {}: expected 20 bytes, got {}", addr, bytes.len());
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

/// Big-endian 32-byte encoding of an unsigned integer.
pub fn encode_uint(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Splits hex-encoded return data into 32-byte words.
pub fn decode_words(data: &str) -> Result<Vec<[u8; 32]>> {
    let clean = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(clean).with_context(|| format!("Invalid return data hex: {}", data))?;
    if bytes.len() % 32 != 0 {
        anyhow::bail!("Return data length {} is not a multiple of 32 bytes", bytes.len());
    }
    Ok(bytes
        .chunks(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// Interprets a word as an unsigned integer, rejecting values above `u128::MAX`.
pub fn word_to_u128(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        anyhow::bail!("uint256 value 0x{} does not fit in 128 bits", hex::encode(word));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Interprets a word as an unsigned integer, clamping values above `u128::MAX`.
///
/// `type(uint256).max` (the usual unlimited allowance) reads as `u128::MAX`.
pub fn word_to_u128_saturating(word: &[u8; 32]) -> u128 {
    word_to_u128(word).unwrap_or(u128::MAX)
}

fn word_at(data: &str, index: usize) -> Result<[u8; 32]> {
    let words = decode_words(data)?;
    words
        .get(index)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Return data has {} words, wanted index {}", words.len(), index))
}

/// Decodes the `index`-th word of return data as an unsigned integer.
pub fn decode_uint(data: &str, index: usize) -> Result<u128> {
    word_to_u128(&word_at(data, index)?)
}

/// Like `decode_uint`, but clamps values above `u128::MAX` instead of failing.
pub fn decode_uint_saturating(data: &str, index: usize) -> Result<u128> {
    Ok(word_to_u128_saturating(&word_at(data, index)?))
}

/// Decodes the `index`-th word of return data as a boolean.
pub fn decode_bool(data: &str, index: usize) -> Result<bool> {
    Ok(decode_uint(data, index)? != 0)
}

/// Decodes the `index`-th word of return data as a lowercase `0x` address.
pub fn decode_address(data: &str, index: usize) -> Result<String> {
    let word = word_at(data, index)?;
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

/// Extracts a human-readable revert reason from revert data.
///
/// Handles `Error(string)` and `Panic(uint256)` payloads. Returns `None` for
/// empty data or custom errors.
pub fn decode_revert_reason(data: &str) -> Option<String> {
    let clean = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(clean).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let (head, body) = bytes.split_at(4);
    if head == ERROR_STRING_SELECTOR {
        // offset (32) + length (32) + utf8 bytes
        if body.len() < 64 {
            return None;
        }
        let mut len_word = [0u8; 32];
        len_word.copy_from_slice(&body[32..64]);
        let len = usize::try_from(word_to_u128(&len_word).ok()?).ok()?;
        let text = body.get(64..64usize.checked_add(len)?)?;
        return String::from_utf8(text.to_vec()).ok();
    }
    if head == PANIC_SELECTOR && body.len() >= 32 {
        let mut code = [0u8; 32];
        code.copy_from_slice(&body[..32]);
        return Some(format!("Panic(0x{:x})", word_to_u128(&code).ok()?));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_selector_matches_erc20() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn encode_call_pads_arguments() {
        let data = encode_call(
            "transfer(address,uint256)",
            &[AbiArg::Address("0x00000000000000000000000000000000000000aa"), AbiArg::Uint(1_000_000)],
        )
        .unwrap();
        assert_eq!(data.len(), 2 + 8 + 64 + 64);
        assert!(data.starts_with("0xa9059cbb"));
        assert!(data.ends_with("00000000000000000000000000000000000000000000000000000000000f4240"));
    }

    #[test]
    fn encode_call_rejects_short_address() {
        assert!(encode_call("sweep(address)", &[AbiArg::Address("0x1234")]).is_err());
    }

    #[test]
    fn decode_uint_rejects_overflow() {
        let data = format!("0x{}", "ff".repeat(32));
        assert!(decode_uint(&data, 0).is_err());
    }

    #[test]
    fn decode_uint_saturating_clamps_max_uint256() {
        let data = format!("0x{}", "ff".repeat(32));
        assert_eq!(decode_uint_saturating(&data, 0).unwrap(), u128::MAX);
        let small = format!("0x{}{}", "00".repeat(31), "2a");
        assert_eq!(decode_uint_saturating(&small, 0).unwrap(), 42);
        assert!(decode_uint_saturating(&small, 1).is_err());
    }

    #[test]
    fn encode_call_places_string_in_tail() {
        let data = encode_call("setName(uint256,string)", &[AbiArg::Uint(7), AbiArg::String("abc")]).unwrap();
        let words = decode_words(&format!("0x{}", &data[10..])).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(word_to_u128(&words[0]).unwrap(), 7);
        // offset past the two head words
        assert_eq!(word_to_u128(&words[1]).unwrap(), 64);
        assert_eq!(word_to_u128(&words[2]).unwrap(), 3);
        assert_eq!(&words[3][..3], b"abc");
        assert!(words[3][3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn malformed_error_length_is_ignored() {
        // Error(string) whose length word is far beyond the payload
        let data = format!(
            "0x08c379a0{}{}{}",
            format!("{:064x}", 32),
            format!("{:064x}", u64::MAX),
            "41".repeat(32)
        );
        assert_eq!(decode_revert_reason(&data), None);

        let huge = format!("0x08c379a0{}{}", format!("{:064x}", 32), "ff".repeat(32));
        assert_eq!(decode_revert_reason(&huge), None);
    }

    #[test]
    fn decode_error_string_payload() {
        // Error("!want")
        let data = "0x08c379a0\
            0000000000000000000000000000000000000000000000000000000000000020\
            0000000000000000000000000000000000000000000000000000000000000005\
            2177616e74000000000000000000000000000000000000000000000000000000";
        assert_eq!(decode_revert_reason(data).as_deref(), Some("!want"));
    }

    #[test]
    fn decode_panic_payload() {
        let data = "0x4e487b71\
            0000000000000000000000000000000000000000000000000000000000000011";
        assert_eq!(decode_revert_reason(data).as_deref(), Some("Panic(0x11)"));
    }
}
