//! `kkey` derivation: the opaque hex token KissKH-style endpoints demand as a query parameter.
//!
//! A payload of client fingerprint constants is hashed, re-serialised, padded to whole
//! 16-byte blocks and pushed through a 10-round substitution-permutation cipher in CBC mode.
//! Field order, sentinel values and the hash's number semantics are part of the upstream's
//! contract; any drift produces a token the server silently rejects.

use std::fmt;

use crate::error::{AniResolveError, Result};
use crate::kkey_tables::{expand_key, DEFAULT_ROUND_KEYS, TABLES};
pub use crate::kkey_tables::{KKEY_CIPHER_KEY, KKEY_IV, ROUND_KEY_WORDS};

const ROUNDS: usize = 10;
const APP_MARKER: &str = "kisskh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Video,
    Subtitle,
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::Video => "video",
            ResourceType::Subtitle => "subtitle",
        }
    }
}

/// Client fingerprint baked into the site's `common.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConstants {
    pub client_hash: String,
    pub api_version: String,
    pub video_guid: String,
    pub subtitle_guid: String,
    pub platform_version: String,
}

impl Default for KeyConstants {
    fn default() -> Self {
        KeyConstants {
            client_hash: "mg3c3b04ba".to_string(),
            api_version: "2.8.10".to_string(),
            video_guid: "62f176f3bb1b5b8e70e39932ad34a0c7".to_string(),
            subtitle_guid: "VgV52sWhwvBSf8BsM3BRY9weWiiCbtGp".to_string(),
            platform_version: "4830201".to_string(),
        }
    }
}

/// Resource ids arrive either as numbers (KissKH episode ids) or opaque strings (AnimeKai tokens).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Number(i64),
    Text(String),
}

impl From<i64> for ResourceId {
    fn from(id: i64) -> Self {
        ResourceId::Number(id)
    }
}

/// Ids past `i64::MAX` keep their decimal digits as text; the payload renders both the same.
impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        i64::try_from(id)
            .map(ResourceId::Number)
            .unwrap_or_else(|_| ResourceId::Text(id.to_string()))
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId::Text(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId::Text(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadField {
    Text(String),
    Number(i64),
    /// Serialises to nothing, like a JS `null` inside `Array.join`.
    Null,
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadField::Text(s) => f.write_str(s),
            PayloadField::Number(n) => write!(f, "{}", n),
            PayloadField::Null => Ok(()),
        }
    }
}

impl From<ResourceId> for PayloadField {
    fn from(id: ResourceId) -> Self {
        match id {
            ResourceId::Number(n) => PayloadField::Number(n),
            ResourceId::Text(s) => PayloadField::Text(s),
        }
    }
}

fn text(s: &str) -> PayloadField {
    PayloadField::Text(s.to_string())
}

fn truncate_48(s: &str) -> String {
    s.chars().take(48).collect()
}

/// Ordered payload assembled before hashing and encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherPayload {
    fields: Vec<PayloadField>,
}

impl CipherPayload {
    pub fn new(
        resource_id: ResourceId,
        resource_type: ResourceType,
        constants: &KeyConstants,
    ) -> Self {
        let guid = match resource_type {
            ResourceType::Subtitle => &constants.subtitle_guid,
            ResourceType::Video => &constants.video_guid,
        };

        let fields = vec![
            text(""),
            resource_id.into(),
            PayloadField::Null,
            text(&constants.client_hash),
            text(&constants.api_version),
            text(guid),
            text(&constants.platform_version),
            PayloadField::Text(truncate_48(APP_MARKER)),
            PayloadField::Text(truncate_48(&APP_MARKER.to_lowercase())),
            PayloadField::Text(truncate_48(APP_MARKER)),
            text(APP_MARKER),
            text(APP_MARKER),
            text(APP_MARKER),
            text("00"),
            text(""),
        ];

        CipherPayload { fields }
    }

    pub fn fields(&self) -> &[PayloadField] {
        &self.fields
    }

    pub fn joined(&self) -> String {
        self.fields
            .iter()
            .map(|field| field.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Inserts the rolling hash of the current serialisation at index 1.
    pub fn sealed(mut self) -> Self {
        let hash = rolling_hash(&self.joined());
        self.fields.insert(1, PayloadField::Number(hash));
        self
    }
}

/// `hash = (hash << 5) - hash + code` with JS number semantics: the shift truncates the running
/// value to a signed 32-bit integer, the subtraction and addition do not.
pub fn rolling_hash(input: &str) -> i64 {
    let mut unit = [0u16; 2];
    input.chars().fold(0i64, |hash, ch| {
        let code = ch.encode_utf16(&mut unit)[0] as i64;
        let shifted = ((hash as u32) << 5) as i32 as i64;
        shifted - hash + code
    })
}

/// Pads to a whole number of 16-byte blocks; the pad value is the pad length.
fn pad_units(mut units: Vec<u8>) -> Vec<u8> {
    let pad = 16 - (units.len() % 16);
    units.extend(std::iter::repeat(pad as u8).take(pad));
    units
}

fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Clone)]
pub struct KkeyCipher {
    round_keys: [u32; ROUND_KEY_WORDS],
    iv: [u32; 4],
}

impl Default for KkeyCipher {
    fn default() -> Self {
        KkeyCipher {
            round_keys: *DEFAULT_ROUND_KEYS,
            iv: KKEY_IV,
        }
    }
}

impl fmt::Debug for KkeyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KkeyCipher").finish_non_exhaustive()
    }
}

impl KkeyCipher {
    pub fn new(key: &[u8; 16], iv: [u32; 4]) -> Self {
        KkeyCipher {
            round_keys: expand_key(key),
            iv,
        }
    }

    /// Uses an already expanded schedule, e.g. one lifted from the site's `common.js`.
    pub fn from_round_keys(round_keys: [u32; ROUND_KEY_WORDS], iv: [u32; 4]) -> Self {
        KkeyCipher { round_keys, iv }
    }

    pub fn derive_key(
        &self,
        resource_id: impl Into<ResourceId>,
        resource_type: ResourceType,
        constants: &KeyConstants,
    ) -> String {
        let payload = CipherPayload::new(resource_id.into(), resource_type, constants)
            .sealed()
            .joined();

        // One byte per UTF-16 unit, masked like `charCodeAt(i) & 0xff`.
        let units: Vec<u8> = payload.encode_utf16().map(|u| u as u8).collect();
        let visible = units.len();

        let mut words = to_words(&pad_units(units));
        self.encrypt_cbc(&mut words);

        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        hex::encode_upper(&bytes[..visible])
    }

    fn encrypt_cbc(&self, words: &mut [u32]) {
        let mut previous = self.iv;
        for block in words.chunks_exact_mut(4) {
            let input = [
                block[0] ^ previous[0],
                block[1] ^ previous[1],
                block[2] ^ previous[2],
                block[3] ^ previous[3],
            ];
            let output = self.encrypt_block(input);
            block.copy_from_slice(&output);
            previous = output;
        }
    }

    pub fn encrypt_block(&self, block: [u32; 4]) -> [u32; 4] {
        let rk = &self.round_keys;
        let te = &TABLES.t_box;
        let sb = &TABLES.s_box;

        let mut s0 = block[0] ^ rk[0];
        let mut s1 = block[1] ^ rk[1];
        let mut s2 = block[2] ^ rk[2];
        let mut s3 = block[3] ^ rk[3];
        let mut k = 4;

        let lookup = |a: u32, b: u32, c: u32, d: u32| {
            te[0][(a >> 24) as usize]
                ^ te[1][((b >> 16) & 0xff) as usize]
                ^ te[2][((c >> 8) & 0xff) as usize]
                ^ te[3][(d & 0xff) as usize]
        };

        for _ in 1..ROUNDS {
            let t0 = lookup(s0, s1, s2, s3) ^ rk[k];
            let t1 = lookup(s1, s2, s3, s0) ^ rk[k + 1];
            let t2 = lookup(s2, s3, s0, s1) ^ rk[k + 2];
            let t3 = lookup(s3, s0, s1, s2) ^ rk[k + 3];
            k += 4;
            s0 = t0;
            s1 = t1;
            s2 = t2;
            s3 = t3;
        }

        let last = |a: u32, b: u32, c: u32, d: u32| {
            ((sb[(a >> 24) as usize] as u32) << 24)
                | ((sb[((b >> 16) & 0xff) as usize] as u32) << 16)
                | ((sb[((c >> 8) & 0xff) as usize] as u32) << 8)
                | sb[(d & 0xff) as usize] as u32
        };

        [
            last(s0, s1, s2, s3) ^ rk[k],
            last(s1, s2, s3, s0) ^ rk[k + 1],
            last(s2, s3, s0, s1) ^ rk[k + 2],
            last(s3, s0, s1, s2) ^ rk[k + 3],
        ]
    }
}

/// Parses a 44-word round-key schedule separated by commas or whitespace.
///
/// Words may be decimal (signed, as JavaScript prints them) or `0x` hex.
pub fn parse_round_keys(text: &str) -> Result<[u32; ROUND_KEY_WORDS]> {
    let words = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(parse_word)
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| AniResolveError::validation("round keys must be 32-bit integers"))?;

    <[u32; ROUND_KEY_WORDS]>::try_from(words).map_err(|words| {
        AniResolveError::validation(format!(
            "expected {} round-key words, got {}",
            ROUND_KEY_WORDS,
            words.len()
        ))
    })
}

fn parse_word(word: &str) -> Option<u32> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    let value: i64 = word.parse().ok()?;
    if value < i32::MIN as i64 || value > u32::MAX as i64 {
        return None;
    }
    Some(value as u32)
}

/// Derives a kkey with the built-in cipher key and IV.
pub fn derive_key(
    resource_id: impl Into<ResourceId>,
    resource_type: ResourceType,
    constants: &KeyConstants,
) -> String {
    KkeyCipher::default().derive_key(resource_id, resource_type, constants)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible_len(id: ResourceId, kind: ResourceType) -> usize {
        CipherPayload::new(id, kind, &KeyConstants::default())
            .sealed()
            .joined()
            .encode_utf16()
            .count()
    }

    #[test]
    fn block_function_matches_fips_197_vector() {
        let key: [u8; 16] = core::array::from_fn(|i| i as u8);
        let cipher = KkeyCipher::new(&key, [0; 4]);
        let out = cipher.encrypt_block([0x00112233, 0x44556677, 0x8899aabb, 0xccddeeff]);
        assert_eq!(out, [0x69c4e0d8, 0x6a7b0430, 0xd8cdb780, 0x70b4c55a]);
    }

    #[test]
    fn explicit_schedule_matches_expanded_key() {
        let expanded = KkeyCipher::from_round_keys(*DEFAULT_ROUND_KEYS, KKEY_IV);
        let constants = KeyConstants::default();
        assert_eq!(
            expanded.derive_key(180_521i64, ResourceType::Video, &constants),
            derive_key(180_521i64, ResourceType::Video, &constants)
        );
    }

    #[test]
    fn round_keys_parse_from_js_dump() {
        let mut text: Vec<String> = DEFAULT_ROUND_KEYS
            .iter()
            .map(|w| (*w as i32).to_string())
            .collect();
        text[0] = format!("0x{:08x}", DEFAULT_ROUND_KEYS[0]);
        assert_eq!(parse_round_keys(&text.join(", ")).unwrap(), *DEFAULT_ROUND_KEYS);

        assert!(parse_round_keys("1, 2, 3").unwrap_err().is_validation());
        assert!(parse_round_keys("nope").unwrap_err().is_validation());
        assert!(parse_round_keys(&"-2147483649 ".repeat(44)).is_err());
    }

    #[test]
    fn large_unsigned_ids_do_not_wrap() {
        assert_eq!(ResourceId::from(42u64), ResourceId::Number(42));
        assert_eq!(
            ResourceId::from(u64::MAX),
            ResourceId::Text("18446744073709551615".into())
        );

        let constants = KeyConstants::default();
        assert_eq!(
            derive_key(u64::MAX, ResourceType::Video, &constants),
            derive_key("18446744073709551615", ResourceType::Video, &constants)
        );
        assert_ne!(
            derive_key(u64::MAX, ResourceType::Video, &constants),
            derive_key(-1i64, ResourceType::Video, &constants)
        );
    }

    #[test]
    fn hash_follows_js_number_semantics() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("ab"), 3105);
        assert_eq!(
            rolling_hash("The quick brown fox jumps over the lazy dog, repeatedly and at length"),
            -4_485_903_464
        );
    }

    #[test]
    fn payload_layout() {
        let payload =
            CipherPayload::new("12345".into(), ResourceType::Video, &KeyConstants::default())
                .sealed();
        assert_eq!(payload.fields().len(), 16);
        assert_eq!(payload.fields()[1], PayloadField::Number(-11_800_057_661));
        assert_eq!(
            payload.joined(),
            "|-11800057661|12345||mg3c3b04ba|2.8.10|62f176f3bb1b5b8e70e39932ad34a0c7|4830201|kisskh|kisskh|kisskh|kisskh|kisskh|kisskh|00|"
        );
    }

    #[test]
    fn video_token_golden() {
        assert_eq!(
            derive_key("12345", ResourceType::Video, &KeyConstants::default()),
            "51CE718680A8342264E29F1BF0021D6D6A34C29B7891F8578272846EA0AB541A2E99D1EC2C3B33788C4A5611B8ECEDE0B0DCBF9927DF0B9515696365880F72D6FD726B3FE3706604B21DEAC1684EDB0F8304B0CC614E941C8A178FB0948A0927857B9C7936123641787A15302BD48B20EBACA7636E572672047BF2527B"
        );
    }

    #[test]
    fn subtitle_token_golden_numeric_id() {
        assert_eq!(
            derive_key(12345_i64, ResourceType::Subtitle, &KeyConstants::default()),
            "63449EAF217E26503F6441ECE7A3951B042239B8471E7919449DF193AD21C8DCBE6E5A632CD7C46E12627D23920611E4A46EAE7E86FBE50FA48F9A091F7B4A963025927694C8CE0FEBB556C80D484D399757866CC96518C913049AAD34BA83A91D7FFCB3F20BA160B675733452538C513C168402D5BF901B985A6EE2"
        );
    }

    #[test]
    fn deterministic() {
        let constants = KeyConstants::default();
        let a = derive_key("ep-token-abc", ResourceType::Video, &constants);
        let b = derive_key("ep-token-abc", ResourceType::Video, &constants);
        assert_eq!(a, b);
    }

    #[test]
    fn every_constant_changes_output() {
        let base = KeyConstants::default();
        let reference = derive_key("42", ResourceType::Video, &base);

        let variants = [
            KeyConstants {
                client_hash: "mg3c3b04bb".into(),
                ..base.clone()
            },
            KeyConstants {
                api_version: "2.8.11".into(),
                ..base.clone()
            },
            KeyConstants {
                video_guid: "00000000000000000000000000000000".into(),
                ..base.clone()
            },
            KeyConstants {
                platform_version: "4830202".into(),
                ..base.clone()
            },
        ];
        for constants in variants.iter() {
            assert_ne!(derive_key("42", ResourceType::Video, constants), reference);
        }

        // the subtitle guid only matters for subtitle tokens
        let other_sub = KeyConstants {
            subtitle_guid: "x".into(),
            ..base.clone()
        };
        assert_eq!(derive_key("42", ResourceType::Video, &other_sub), reference);
        assert_ne!(
            derive_key("42", ResourceType::Subtitle, &other_sub),
            derive_key("42", ResourceType::Subtitle, &base)
        );
    }

    #[test]
    fn hex_length_is_twice_unpadded_payload() {
        let ids: Vec<ResourceId> = vec![
            ResourceId::Number(0),
            ResourceId::Number(7),
            ResourceId::Number(1_234_567_890),
            "a".into(),
            "ep-token-abc".into(),
            "x".repeat(37).into(),
            "ünïcode-ïd".into(),
        ];
        for id in ids {
            for kind in [ResourceType::Video, ResourceType::Subtitle] {
                let token = derive_key(id.clone(), kind, &KeyConstants::default());
                assert_eq!(token.len(), 2 * visible_len(id.clone(), kind), "{:?}", id);
                assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
            }
        }
    }
}
