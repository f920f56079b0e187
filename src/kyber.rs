// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Kyber512 ciphertext construction for the KyberSlash trigger payloads.
//!
//! KyberSlash is a secret-dependent division in the decapsulation of the `v` polynomial. A
//! ciphertext whose `u` part is zero and whose `v` coefficients all decompress to a chosen
//! constant makes the division input depend only on the secret key, which is what the fixed
//! class of a KyberSlash dataset uses.

use crate::error::{Error, Result};

pub const KYBER_Q: u32 = 3329;
pub const KYBER512_K: usize = 2;
pub const KYBER512_N: usize = 256;
/// Bits per coefficient of the compressed `u` vector
pub const KYBER512_DU: u32 = 10;
/// Bits per coefficient of the compressed `v` polynomial
pub const KYBER512_DV: u32 = 4;

pub const KYBER512_U_BYTES: usize = KYBER512_K * KYBER512_N * KYBER512_DU as usize / 8;
pub const KYBER512_V_BYTES: usize = KYBER512_N * KYBER512_DV as usize / 8;
pub const KYBER512_CT_BYTES: usize = KYBER512_U_BYTES + KYBER512_V_BYTES;
pub const KYBER512_DK_BYTES: usize = 1632;

/// One KyberSlash payload record: decapsulation key followed by a ciphertext
pub const KYBER512_RECORD_BYTES: usize = KYBER512_DK_BYTES + KYBER512_CT_BYTES;

/// Coefficient used for the fixed class unless configured otherwise
pub const DEFAULT_SLOW_COEFFICIENT: u32 = 3204;

/// Coefficients measured as slow by the division benchmark
pub const SLOW_COEFFICIENTS: [u32; 5] = [2276, 2654, 1420, 1050, 1731];

/// Coefficients used by the first version of the fixed class
pub const LEGACY_SLOW_COEFFICIENTS: [u32; 5] = [103, 2858, 893, 1294, 3253];

/// `round(c * 2^d / q) mod 2^d`, rounding half to even
pub fn compress(c: u32, d: u32) -> u16 {
    let val = (f64::from(c) * f64::from(1u32 << d)) / f64::from(KYBER_Q);
    let rounded = val.round_ties_even() as u32;
    (rounded % (1 << d)) as u16
}

/// Packs 256 coefficients into 128 bytes, two compressed 4-bit values per byte with the first
/// coefficient in the low nibble.
pub fn pack_poly_v(coeffs: &[u32]) -> Result<[u8; KYBER512_V_BYTES]> {
    if coeffs.len() != KYBER512_N {
        return Err(Error::Payload(format!(
            "v polynomial must have {} coefficients, got {}",
            KYBER512_N,
            coeffs.len()
        )));
    }

    let mut packed = [0u8; KYBER512_V_BYTES];
    for (byte, pair) in packed.iter_mut().zip(coeffs.chunks_exact(2)) {
        let lo = compress(pair[0], KYBER512_DV);
        let hi = compress(pair[1], KYBER512_DV);
        *byte = (lo | (hi << 4)) as u8;
    }
    Ok(packed)
}

/// A ciphertext with zero `u` and every `v` coefficient equal to `coeff`
pub fn fixed_ciphertext(coeff: u32) -> [u8; KYBER512_CT_BYTES] {
    let mut ct = [0u8; KYBER512_CT_BYTES];
    let v_coeffs = [coeff; KYBER512_N];
    // The coefficient slice always has the right length
    if let Ok(v) = pack_poly_v(&v_coeffs) {
        ct[KYBER512_U_BYTES..].copy_from_slice(&v);
    }
    ct
}

/// The earlier fixed ciphertext: 640 zero bytes and 128 copies of the compressed coefficient in
/// both nibbles
pub fn legacy_slow_ciphertext(coeff: u32) -> [u8; KYBER512_CT_BYTES] {
    let c = compress(coeff, KYBER512_DV) as u8;
    let mut ct = [0u8; KYBER512_CT_BYTES];
    for byte in ct[KYBER512_U_BYTES..].iter_mut() {
        *byte = (c << 4) | c;
    }
    ct
}
