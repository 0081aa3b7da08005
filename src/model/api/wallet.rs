use std::fmt::{Display, Formatter};
use std::{ops::Deref, str::FromStr};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use data_encoding::{BASE64, HEXLOWER, HEXLOWER_PERMISSIVE};
use ethers::types::Address;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::Config;

pub type HmacSha256 = Hmac<Sha256>;

/// Length of an AES-GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// A wallet address supplied by a client, e.g. `0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed`.
///
/// Parsing is strict: the `0x` prefix and exactly 40 hex digits are required.
/// The canonical form is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(Address);

impl WalletAddress {
    /// Compute the lookup key for this address: a keyed hash, so the address
    /// itself never needs to be stored in the clear.
    pub fn into_hmac(self, config: &Config) -> String {
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(config.hmac_secret())
            .expect("HMAC can take key of any size");
        hmac.update(self.to_string().as_bytes());
        HEXLOWER.encode(&hmac.finalize().into_bytes())
    }

    /// Encrypt this address with the configured key.
    pub fn encrypt(&self, config: &Config) -> EncryptedAddress {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(config.encryption_key()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, self.to_string().as_bytes())
            .expect("AES-GCM encryption of a short buffer cannot fail");
        let mut bytes = nonce.to_vec();
        bytes.extend(ciphertext);
        EncryptedAddress(BASE64.encode(&bytes))
    }
}

impl Deref for WalletAddress {
    type Target = Address;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<WalletAddress> for Address {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl Display for WalletAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // `Address`'s own `Display` abbreviates the middle of the address.
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid wallet address `{0}`: expected `0x` followed by 40 hex digits")]
pub struct AddressError(pub String);

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .filter(|digits| digits.len() == 40)
            .ok_or_else(|| AddressError(s.to_string()))?;
        let bytes = HEXLOWER_PERMISSIVE
            .decode(digits.as_bytes())
            .map_err(|_| AddressError(s.to_string()))?;
        Ok(Self(Address::from_slice(&bytes)))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.to_string()
    }
}

/// A wallet address encrypted at rest: base64 of `nonce || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedAddress(String);

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Encrypted address is not valid base64 or is truncated")]
    Encoding,
    #[error("Encrypted address failed authentication")]
    Decryption,
    #[error(transparent)]
    Address(#[from] AddressError),
}

impl EncryptedAddress {
    /// Recover the plaintext address.
    pub fn decrypt(&self, config: &Config) -> Result<WalletAddress, CipherError> {
        let bytes = BASE64
            .decode(self.0.as_bytes())
            .map_err(|_| CipherError::Encoding)?;
        if bytes.len() <= NONCE_LENGTH {
            return Err(CipherError::Encoding);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(config.encryption_key()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decryption)?;
        let address = String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)?;
        Ok(address.parse()?)
    }

    /// A short display form, e.g. `AbCdEf...wXyZ`, for admin listings.
    pub fn masked(&self) -> String {
        let s = &self.0;
        if s.len() <= 10 {
            return s.clone();
        }
        // Base64 is pure ASCII, so byte indexing is safe.
        format!("{}...{}", &s[..6], &s[s.len() - 4..])
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_strict() {
        let address = WalletAddress::example();
        assert_eq!(
            address.to_string(),
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );

        // Case-insensitive, canonicalised to lowercase.
        let upper: WalletAddress = "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED"
            .parse()
            .unwrap();
        assert_eq!(upper, address);

        for bad in [
            "",
            "0x",
            "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeA",
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAedff",
            "0xZZAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        ] {
            assert!(bad.parse::<WalletAddress>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn hmac_ignores_case() {
        let config = Config::example();
        let lower: WalletAddress = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
            .parse()
            .unwrap();
        assert_eq!(
            WalletAddress::example().into_hmac(&config),
            lower.into_hmac(&config)
        );
        assert_ne!(
            WalletAddress::example().into_hmac(&config),
            WalletAddress::example2().into_hmac(&config)
        );
    }

    #[test]
    fn encryption_round_trip() {
        let config = Config::example();
        let encrypted = WalletAddress::example().encrypt(&config);
        assert_eq!(encrypted.decrypt(&config).unwrap(), WalletAddress::example());

        // Fresh nonce every time.
        assert_ne!(encrypted, WalletAddress::example().encrypt(&config));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let config = Config::example();
        let encrypted = WalletAddress::example().encrypt(&config);
        let mut bytes = BASE64.decode(encrypted.0.as_bytes()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        let tampered = EncryptedAddress(BASE64.encode(&bytes));
        assert!(matches!(
            tampered.decrypt(&config),
            Err(CipherError::Decryption)
        ));

        let garbage = EncryptedAddress("not base64!".to_string());
        assert!(matches!(garbage.decrypt(&config), Err(CipherError::Encoding)));
    }

    #[test]
    fn masking() {
        let encrypted = EncryptedAddress("ABCDEFGHIJKLMNOP".to_string());
        assert_eq!(encrypted.masked(), "ABCDEF...MNOP");
        let short = EncryptedAddress("ABC".to_string());
        assert_eq!(short.masked(), "ABC");
    }
}
