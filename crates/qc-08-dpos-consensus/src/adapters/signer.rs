//! secp256k1 signing adapter
//!
//! Signatures are 65 bytes `r || s || v` with `v = recovery id + 27`;
//! addresses are the last 20 bytes of the Keccak-256 of the uncompressed
//! public key.

use crate::ports::SignatureService;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use shared_types::{keccak256, Address, Hash, Signature};

pub struct K256Signer {
    key: SigningKey,
    address: Address,
}

impl K256Signer {
    pub fn new(key: SigningKey) -> Self {
        let address = address_from_pubkey(key.verifying_key());
        Self { key, address }
    }

    pub fn from_slice(secret: &[u8]) -> Result<Self, String> {
        SigningKey::from_slice(secret)
            .map(Self::new)
            .map_err(|e| format!("invalid secret key: {e}"))
    }
}

/// Derive the account address of a public key.
pub fn address_from_pubkey(public_key: &VerifyingKey) -> Address {
    let pubkey_bytes = public_key.to_encoded_point(false);
    let hash = keccak256(&pubkey_bytes.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

impl SignatureService for K256Signer {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, hash: &Hash) -> Result<Signature, String> {
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(hash)
            .map_err(|e| format!("signing failed: {e}"))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        Ok(Signature(out))
    }

    fn recover(&self, hash: &Hash, signature: &Signature) -> Option<Address> {
        let v = signature.0[64].checked_sub(27)?;
        let recovery_id = RecoveryId::from_byte(v)?;
        let sig = EcdsaSignature::from_slice(&signature.0[..64]).ok()?;
        let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id).ok()?;
        Some(address_from_pubkey(&key))
    }
}
