//! Lookup tables for the kkey block cipher.
//!
//! The round function is a 128-bit substitution-permutation network: an 8-bit S-box, four
//! 256-entry T-boxes folding SubBytes/ShiftRows/MixColumns into one lookup per byte, and a
//! 44-word round-key schedule expanded once from the fixed cipher key.

use lazy_static::lazy_static;

/// Cipher key the round-key schedule is expanded from.
pub const KKEY_CIPHER_KEY: [u8; 16] = *b"AmSmZVcH93UQUezi";

/// CBC initialisation vector for the first block.
pub const KKEY_IV: [u32; 4] = [
    22_039_283,
    1_457_920_463,
    776_125_350,
    -1_941_999_367_i32 as u32,
];

pub const ROUND_KEY_WORDS: usize = 44;

const ROUND_CONSTANTS: [u8; 10] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1b, 0x36];

pub struct CipherTables {
    pub s_box: [u8; 256],
    pub t_box: [[u32; 256]; 4],
}

lazy_static! {
    pub static ref TABLES: CipherTables = CipherTables::generate();
    pub static ref DEFAULT_ROUND_KEYS: [u32; ROUND_KEY_WORDS] = expand_key(&KKEY_CIPHER_KEY);
}

fn xtime(b: u8) -> u8 {
    (b << 1) ^ if b & 0x80 != 0 { 0x1b } else { 0 }
}

impl CipherTables {
    fn generate() -> Self {
        let mut s_box = [0u8; 256];
        s_box[0] = 0x63;

        // p walks the multiplicative group by powers of 3, q tracks its inverse.
        let mut p: u8 = 1;
        let mut q: u8 = 1;
        loop {
            p ^= xtime(p);

            q ^= q << 1;
            q ^= q << 2;
            q ^= q << 4;
            if q & 0x80 != 0 {
                q ^= 0x09;
            }

            let affine =
                q ^ q.rotate_left(1) ^ q.rotate_left(2) ^ q.rotate_left(3) ^ q.rotate_left(4);
            s_box[p as usize] = affine ^ 0x63;

            if p == 1 {
                break;
            }
        }

        let mut t_box = [[0u32; 256]; 4];
        for (x, &s) in s_box.iter().enumerate() {
            let s2 = xtime(s);
            let s3 = s2 ^ s;
            let word = u32::from_be_bytes([s2, s, s, s3]);
            t_box[0][x] = word;
            t_box[1][x] = word.rotate_right(8);
            t_box[2][x] = word.rotate_right(16);
            t_box[3][x] = word.rotate_right(24);
        }

        CipherTables { s_box, t_box }
    }

    fn sub_word(&self, word: u32) -> u32 {
        let [a, b, c, d] = word.to_be_bytes();
        u32::from_be_bytes([
            self.s_box[a as usize],
            self.s_box[b as usize],
            self.s_box[c as usize],
            self.s_box[d as usize],
        ])
    }
}

/// Expands a 16-byte key into the 44-word schedule consumed four words per round.
pub fn expand_key(key: &[u8; 16]) -> [u32; ROUND_KEY_WORDS] {
    let mut words = [0u32; ROUND_KEY_WORDS];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        words[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    for i in 4..ROUND_KEY_WORDS {
        let mut temp = words[i - 1];
        if i % 4 == 0 {
            temp = TABLES.sub_word(temp.rotate_left(8)) ^ ((ROUND_CONSTANTS[i / 4 - 1] as u32) << 24);
        }
        words[i] = words[i - 4] ^ temp;
    }

    words
}
