//! Password-derived master key with labeled subkeys.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use scrypt::Params;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::KeyError;

/// Size of the scrypt-derived master secret.
pub const SECRET_SIZE: usize = 128;

/// Size of each labeled subkey.
pub const DERIVED_KEY_SIZE: usize = 64;

/// scrypt cost: N = 2^19, r = 8, p = 1 — about 512 MiB of memory and one
/// to two seconds of single-core work on a desktop CPU.
const SCRYPT_LOG_N: u8 = 19;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Fixed salt. A fixed salt trades rainbow-table resistance the scrypt
/// cost already provides for the ability to re-derive the same keys from
/// the same password with no stored state.
const STATIC_SALT: [u8; 64] = [
    0x06, 0xCA, 0x7E, 0xA7, 0x42, 0x01, 0x65, 0xBB, 0xC1, 0xEF, 0xBB, 0x02, 0x21, 0x5B, 0x90,
    0xCF, 0x2F, 0x45, 0x53, 0x90, 0x75, 0x2D, 0x1C, 0x21, 0x6F, 0x72, 0x36, 0xF4, 0xD4, 0x12,
    0xE7, 0xFA, 0x4A, 0xDB, 0xB1, 0x52, 0x2B, 0x6C, 0xCE, 0xB5, 0x55, 0xF6, 0xA4, 0x41, 0x02,
    0xFA, 0x42, 0x0C, 0x15, 0xB0, 0xAF, 0x6C, 0x35, 0x16, 0x53, 0x0A, 0xA8, 0x9B, 0x43, 0xFA,
    0x86, 0xC5, 0xAA, 0xBE,
];

/// Passphrase symbol dictionaries.
///
/// Visually ambiguous symbols are removed, so a passphrase survives being
/// read aloud or copied by hand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dictionary {
    /// Digits and Latin letters minus `l`, `B`, `D`, `I`, `O` (57 symbols).
    Latin,
    /// Digits only (10 symbols).
    Pin,
    /// Digits and Cyrillic letters minus the ambiguous set (64 symbols).
    Cyrillic,
}

const LATIN: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
    'i', 'j', 'k', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A',
    'C', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W',
    'X', 'Y', 'Z',
];

const PIN: &[char] = &['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

const CYRILLIC: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'а', 'в', 'г', 'д', 'е', 'ж', 'з', 'и',
    'й', 'к', 'м', 'н', 'о', 'п', 'р', 'с', 'т', 'у', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ы', 'э',
    'ю', 'я', 'А', 'Б', 'Г', 'Д', 'Е', 'Ж', 'И', 'Й', 'К', 'М', 'Н', 'П', 'Р', 'С', 'Т', 'У',
    'Ф', 'Х', 'Ц', 'Ч', 'Ш', 'Щ', 'Ы', 'Э', 'Ю', 'Я',
];

impl Dictionary {
    /// All dictionaries, in menu order.
    pub const ALL: [Dictionary; 3] = [Dictionary::Latin, Dictionary::Pin, Dictionary::Cyrillic];

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Dictionary::Latin => "Latin",
            Dictionary::Pin => "PIN",
            Dictionary::Cyrillic => "Cyrillic",
        }
    }

    fn symbols(&self) -> &'static [char] {
        match self {
            Dictionary::Latin => LATIN,
            Dictionary::Pin => PIN,
            Dictionary::Cyrillic => CYRILLIC,
        }
    }

    /// Per-symbol strength in centibits, rounded towards zero:
    /// `⌊log2(|dictionary|) · 100⌋`.
    pub fn strength_centibits(&self) -> u32 {
        ((self.symbols().len() as f64).log2() * 100.0) as u32
    }

    /// Display name with a freshly sampled example of roughly 64 bits.
    pub fn example(&self) -> String {
        let strength = self.strength_centibits();
        let symbols = 6400 / strength + u32::from(6400 % strength != 0);

        let mut text = format!("{}, ex.: ", self.name());
        let dict = self.symbols();
        let mut rng = OsRng;
        for _ in 0..symbols {
            text.push(dict[rng.gen_range(0..dict.len())]);
        }
        text
    }

    /// Samples a random passphrase of `symbols` symbols after `prefix`.
    pub fn passphrase(&self, prefix: &str, symbols: usize) -> Zeroizing<String> {
        let dict = self.symbols();
        let mut rng = OsRng;

        let mut out = Zeroizing::new(String::with_capacity(prefix.len() + symbols * 2));
        out.push_str(prefix);
        for _ in 0..symbols {
            out.push(dict[rng.gen_range(0..dict.len())]);
        }
        out
    }
}

/// A password-derived secret handing out per-purpose subkeys.
///
/// The password runs through scrypt with a fixed salt into a 128-byte
/// secret; that secret keys an HMAC-SHA-512, and each [`derive`]
/// (MasterKey::derive) call labels one 64-byte subkey with an info string.
/// Everything sensitive is scrubbed on [`reset`](MasterKey::reset) and on
/// drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    secret: [u8; SECRET_SIZE],
    #[zeroize(skip)]
    mac: Option<Hmac<Sha512>>,
    password: Option<Zeroizing<String>>,
}

impl MasterKey {
    /// Derives the master secret from a password with the memory-hard
    /// scrypt pass. Expect roughly 512 MiB of peak memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the scrypt backend rejects the operation.
    pub fn from_password(password: &str) -> Result<Self, KeyError> {
        let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SECRET_SIZE)
            .map_err(|e| KeyError::Scrypt(e.to_string()))?;

        let mut secret = [0u8; SECRET_SIZE];
        scrypt::scrypt(password.as_bytes(), &STATIC_SALT, &params, &mut secret)
            .map_err(|e| KeyError::Scrypt(e.to_string()))?;

        let mut key = Self::from_secret(&secret);
        secret.zeroize();
        key.password = Some(Zeroizing::new(password.to_owned()));
        Ok(key)
    }

    /// Wraps an existing 128-byte secret (no password attached).
    pub fn from_secret(secret: &[u8; SECRET_SIZE]) -> Self {
        let mac = Hmac::<Sha512>::new_from_slice(secret).expect("HMAC accepts any key length");
        MasterKey {
            secret: *secret,
            mac: Some(mac),
            password: None,
        }
    }

    /// Generates a random passphrase over `dictionary` and derives a key
    /// from it. The passphrase stays readable through
    /// [`password`](MasterKey::password) until the next reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the scrypt backend rejects the operation.
    pub fn generate(prefix: &str, dictionary: Dictionary, symbols: usize) -> Result<Self, KeyError> {
        let passphrase = dictionary.passphrase(prefix, symbols);
        Self::from_password(&passphrase)
    }

    /// Labels one 64-byte subkey with `info`. Returns `None` after a
    /// reset.
    pub fn derive(&self, info: &str) -> Option<[u8; DERIVED_KEY_SIZE]> {
        let mut mac = self.mac.clone()?;
        mac.update(info.as_bytes());

        let mut out = [0u8; DERIVED_KEY_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Some(out)
    }

    /// The password this key was derived from, when known.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    /// Scrubs the secret and the password; the key becomes unusable.
    pub fn reset(&mut self) {
        self.secret.zeroize();
        self.mac = None;
        self.password = None;
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
