use rand::Rng;

/// Symbols a record identifier is drawn from.
pub const ID_ALPHABET: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const ID_LENGTH: usize = 16;

/// Draws a fresh record identifier from `rng`.
///
/// Every character is picked uniformly and independently from [`ID_ALPHABET`].
/// Uniqueness is probabilistic only (62^16 possible values); callers never
/// check for collisions.
pub fn generate_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
