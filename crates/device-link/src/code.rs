//! Polling code generation

use rand::RngExt;

/// Digits per code.
pub const CODE_DIGITS: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Largest multiple of `CODE_SPACE` representable in a u32; draws at or
/// above it are rejected so every code is equally likely.
const ACCEPT_BELOW: u32 = (u32::MAX / CODE_SPACE) * CODE_SPACE;

/// Uniformly random zero-padded 6-digit code from the OS CSPRNG.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    loop {
        let mut bytes = [0u8; 4];
        rng.fill(&mut bytes);
        let draw = u32::from_le_bytes(bytes);
        if draw < ACCEPT_BELOW {
            return format!("{:0width$}", draw % CODE_SPACE, width = CODE_DIGITS);
        }
    }
}
