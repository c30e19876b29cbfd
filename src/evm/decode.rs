//! Display decoding of stack words, memory and storage by Solidity type

use std::collections::BTreeMap;

use alloy_primitives::{hex, Address, U256};

use super::backend::ValueDecoder;
use super::trace::Word;

const WORD: usize = 32;

/// Decoder for the static ABI types
#[derive(Debug, Clone, Copy, Default)]
pub struct AbiDecoder;

impl AbiDecoder {
    fn decode_u256(&self, value: U256, type_name: &str) -> String {
        if let Some(bits) = int_bits(type_name, "uint") {
            return mask(value, bits).to_string();
        }
        if let Some(bits) = int_bits(type_name, "int") {
            return signed(value, bits);
        }
        match type_name {
            "address" | "address payable" => {
                let bytes = value.to_be_bytes::<WORD>();
                Address::from_slice(&bytes[12..]).to_checksum(None)
            }
            "bool" => (!value.is_zero()).to_string(),
            "string" => format!("<string at 0x{:x}>", value),
            _ => {
                if let Some(size) = fixed_bytes_size(type_name) {
                    let bytes = value.to_be_bytes::<WORD>();
                    format!("0x{}", hex::encode(&bytes[..size]))
                } else {
                    format!("0x{:x}", value)
                }
            }
        }
    }
}

impl ValueDecoder for AbiDecoder {
    fn decode_word(&self, word: &Word, type_name: &str) -> Option<String> {
        match word {
            Word::Int(v) => Some(self.decode_u256(*v, type_name)),
            Word::Text(s) => Some(s.clone()),
        }
    }

    fn decode_memory(&self, memory: &str, offset: u64, type_name: &str) -> Option<String> {
        let memory = hex::decode(memory.trim_start_matches("0x")).ok()?;
        let offset = usize::try_from(offset).ok()?;

        match type_name {
            "string" => {
                let data = dynamic_slice(&memory, offset)?;
                Some(String::from_utf8_lossy(data).into_owned())
            }
            "bytes" | "bytes[]" => {
                let data = dynamic_slice(&memory, offset)?;
                Some(format!("0x{}", hex::encode(data)))
            }
            _ => {
                if let Some(size) = fixed_bytes_size(type_name) {
                    let data = memory.get(offset..offset.checked_add(size)?)?;
                    return Some(format!("0x{}", hex::encode(data)));
                }
                let value = read_word(&memory, offset)?;
                Some(self.decode_u256(value, type_name))
            }
        }
    }

    fn decode_storage(
        &self,
        storage: &BTreeMap<String, String>,
        slot: u64,
        type_name: &str,
    ) -> Option<String> {
        let keys = [
            format!("0x{:x}", slot),
            slot.to_string(),
            format!("{:064x}", slot),
            format!("0x{:064x}", slot),
        ];
        let raw = keys.iter().find_map(|k| storage.get(k))?;
        self.decode_word(&Word::from_hex(raw), type_name)
    }
}

/// Width of `uint<N>`/`int<N>`, `None` if the name is not that family
fn int_bits(type_name: &str, prefix: &str) -> Option<usize> {
    let rest = type_name.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(256);
    }
    let bits: usize = rest.parse().ok()?;
    (bits > 0 && bits <= 256 && bits % 8 == 0).then_some(bits)
}

fn fixed_bytes_size(type_name: &str) -> Option<usize> {
    let size: usize = type_name.strip_prefix("bytes")?.parse().ok()?;
    (1..=WORD).contains(&size).then_some(size)
}

fn mask(value: U256, bits: usize) -> U256 {
    if bits >= 256 {
        value
    } else {
        value & ((U256::from(1) << bits) - U256::from(1))
    }
}

/// Two's complement at the declared width
fn signed(value: U256, bits: usize) -> String {
    let value = mask(value, bits);
    if !value.bit(bits - 1) {
        return value.to_string();
    }
    let magnitude = if bits >= 256 {
        (!value).wrapping_add(U256::from(1))
    } else {
        (U256::from(1) << bits) - value
    };
    format!("-{}", magnitude)
}

fn read_word(memory: &[u8], offset: usize) -> Option<U256> {
    let bytes = memory.get(offset..offset.checked_add(WORD)?)?;
    Some(U256::from_be_slice(bytes))
}

/// Length-prefixed data at `offset`
fn dynamic_slice(memory: &[u8], offset: usize) -> Option<&[u8]> {
    let len = usize::try_from(read_word(memory, offset)?).ok()?;
    let start = offset + WORD;
    memory.get(start..start.checked_add(len)?)
}
