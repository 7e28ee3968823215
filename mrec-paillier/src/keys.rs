//! Paillier key pair and homomorphic operations.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand_core::{CryptoRng, RngCore};
use std::fmt;

use crate::Error;

/// Public half: the modulus `n`, with `g = n + 1` fixed.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierPublicKey {
    n: BigUint,
    n_squared: BigUint,
}

impl PaillierPublicKey {
    pub fn new(n: BigUint) -> Result<Self, Error> {
        if n < BigUint::from(4u8) {
            return Err(Error::InvalidPrimes);
        }
        let n_squared = &n * &n;
        Ok(Self { n, n_squared })
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn n_squared(&self) -> &BigUint {
        &self.n_squared
    }

    pub fn bit_length(&self) -> u64 {
        self.n.bits()
    }

    /// Encrypt `m` under a fresh random blinding factor.
    pub fn encrypt<T: RngCore + CryptoRng>(
        &self,
        m: &BigUint,
        mut rng: T,
    ) -> Result<BigUint, Error> {
        if m >= &self.n {
            return Err(Error::MessageOutOfRange);
        }
        let r = self.random_coprime(&mut rng);
        Ok(self.encrypt_with_blinding(m, &r))
    }

    /// Encrypt with an explicit blinding factor. `r` must be in
    /// `[1, n)` and coprime to `n`; the additive identity `Enc(0)`
    /// with `r = 1` is the seed value for homomorphic folds.
    pub fn encrypt_with_blinding(&self, m: &BigUint, r: &BigUint) -> BigUint {
        // g = n + 1 makes g^m collapse to (1 + m n) mod n^2
        let g_m = (BigUint::one() + m * &self.n) % &self.n_squared;
        let r_n = r.modpow(&self.n, &self.n_squared);
        (g_m * r_n) % &self.n_squared
    }

    /// The additive identity, `Enc(0)` with `r = 1`.
    pub fn zero_ciphertext(&self) -> BigUint {
        BigUint::one()
    }

    /// Homomorphic addition: `Dec(add(a, b)) = Dec(a) + Dec(b)`.
    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.n_squared
    }

    /// Add a plaintext constant to a ciphertext.
    pub fn add_plain(&self, c: &BigUint, m: &BigUint) -> BigUint {
        let g_m = (BigUint::one() + m * &self.n) % &self.n_squared;
        (c * g_m) % &self.n_squared
    }

    /// Multiply the underlying plaintext by a constant.
    pub fn mul_plain(&self, c: &BigUint, k: &BigUint) -> BigUint {
        c.modpow(k, &self.n_squared)
    }

    fn random_coprime<T: RngCore + CryptoRng>(&self, rng: &mut T) -> BigUint {
        let byte_len = self.n.to_bytes_be().len();
        loop {
            let mut bytes = vec![0u8; byte_len];
            rng.fill_bytes(&mut bytes);
            let r = BigUint::from_bytes_be(&bytes) % &self.n;
            if !r.is_zero() && r.gcd(&self.n).is_one() {
                return r;
            }
        }
    }
}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaillierPublicKey")
            .field("bits", &self.n.bits())
            .finish_non_exhaustive()
    }
}

/// Private half: the factorization and the CRT-free decryption
/// parameters `lambda`, `mu`.
#[derive(Clone)]
pub struct PaillierPrivateKey {
    p: BigUint,
    q: BigUint,
    lambda: BigUint,
    mu: BigUint,
    public: PaillierPublicKey,
}

impl PaillierPrivateKey {
    /// Assemble the full key from its two primes.
    pub fn from_primes(p: BigUint, q: BigUint) -> Result<Self, Error> {
        if p == q || p.is_one() || q.is_one() || p.is_zero() || q.is_zero() {
            return Err(Error::InvalidPrimes);
        }
        let n = &p * &q;
        let public = PaillierPublicKey::new(n.clone())?;

        let p_1 = &p - BigUint::one();
        let q_1 = &q - BigUint::one();
        let lambda = p_1.lcm(&q_1);
        let mu = lambda.modinv(&n).ok_or(Error::InvalidPrimes)?;

        Ok(Self {
            p,
            q,
            lambda,
            mu,
            public,
        })
    }

    /// Rebuild a key from serialized components, verifying their
    /// internal consistency.
    pub(crate) fn from_components(
        p: BigUint,
        q: BigUint,
        lambda: BigUint,
        mu: BigUint,
    ) -> Result<Self, Error> {
        let rebuilt = Self::from_primes(p, q)?;
        if rebuilt.lambda != lambda || rebuilt.mu != mu {
            return Err(Error::InvalidKeyBuffer);
        }
        Ok(rebuilt)
    }

    pub fn public(&self) -> &PaillierPublicKey {
        &self.public
    }

    pub(crate) fn p(&self) -> &BigUint {
        &self.p
    }

    pub(crate) fn q(&self) -> &BigUint {
        &self.q
    }

    pub(crate) fn lambda(&self) -> &BigUint {
        &self.lambda
    }

    pub(crate) fn mu(&self) -> &BigUint {
        &self.mu
    }

    pub fn decrypt(&self, c: &BigUint) -> Result<BigUint, Error> {
        if c.is_zero() || c >= self.public.n_squared() {
            return Err(Error::CiphertextOutOfRange);
        }
        let u = c.modpow(&self.lambda, self.public.n_squared());
        // L(u) = (u - 1) / n
        let l = (u - BigUint::one()) / self.public.n();
        Ok((l * &self.mu) % self.public.n())
    }
}

impl fmt::Debug for PaillierPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaillierPrivateKey")
            .field("bits", &self.public.n().bits())
            .finish_non_exhaustive()
    }
}

/// A matched public/private pair.
pub struct PaillierKeyPair {
    pub public: PaillierPublicKey,
    pub private: PaillierPrivateKey,
}

impl PaillierKeyPair {
    pub fn from_private(private: PaillierPrivateKey) -> Self {
        Self {
            public: private.public().clone(),
            private,
        }
    }
}
