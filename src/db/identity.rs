//! Container names and instance credentials.

use chrono::Utc;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use crate::error::{AppError, Result};

const ADJECTIVES: &[&str] = &[
    "quick", "lazy", "sleepy", "noisy", "hungry", "dark", "light", "cold", "busy", "brave", "calm",
    "eager", "fancy", "glamorous", "jolly", "kind", "lively", "mighty", "nice", "proud", "silly",
    "witty", "zealous",
];

const NOUNS: &[&str] = &[
    "rabbit", "turtle", "fox", "dog", "cat", "mouse", "elephant", "tom", "tongue", "lion", "tiger",
    "bear", "wolf", "eagle", "shark", "whale", "dolphin", "panda", "giraffe", "zebra", "kangaroo",
    "koala", "penguin",
];

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// `adjective-noun-suffix`, where the suffix is the base36 millisecond clock
/// followed by five random base36 characters. Uniqueness rests on entropy alone.
pub fn generate_container_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quick");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("fox");

    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let random: String = (0..5)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect();

    format!("{adjective}-{noun}-{}{random}", to_base36(millis))
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Random credential with at least one uppercase letter, one lowercase letter
/// and one digit; the rest is uniform over the full alphabet, then shuffled.
///
/// Lengths below 3 are raised to 3 so the class guarantees always hold.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    let length = length.max(3);

    let mut chars = Vec::with_capacity(length);
    chars.push(UPPERCASE[rng.random_range(0..UPPERCASE.len())]);
    chars.push(LOWERCASE[rng.random_range(0..LOWERCASE.len())]);
    chars.push(DIGITS[rng.random_range(0..DIGITS.len())]);
    while chars.len() < length {
        chars.push(ALPHABET[rng.random_range(0..ALPHABET.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// Database names and usernames end up in container env and connection URLs,
/// so both are held to Postgres' unquoted identifier rules.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid {}: {}", kind, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_has_three_parts() {
        let name = generate_container_name();
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert!(parts[2].len() > 5);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn container_names_differ() {
        let a = generate_container_name();
        let b = generate_container_name();
        assert_ne!(a, b);
    }

    #[test]
    fn password_meets_class_requirements() {
        for _ in 0..200 {
            let password = generate_password(40);
            assert_eq!(password.len(), 40);
            assert!(password.bytes().any(|b| b.is_ascii_uppercase()));
            assert!(password.bytes().any(|b| b.is_ascii_lowercase()));
            assert!(password.bytes().any(|b| b.is_ascii_digit()));
            assert!(password.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn short_password_still_has_every_class() {
        let password = generate_password(1);
        assert_eq!(password.len(), 3);
        assert!(password.bytes().any(|b| b.is_ascii_uppercase()));
        assert!(password.bytes().any(|b| b.is_ascii_lowercase()));
        assert!(password.bytes().any(|b| b.is_ascii_digit()));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("database name", "mydatabase").is_ok());
        assert!(validate_identifier("database name", "_orders_2024").is_ok());
        assert!(validate_identifier("database name", "1abc").is_err());
        assert!(validate_identifier("database name", "a-b").is_err());
        assert!(validate_identifier("database name", "").is_err());
        assert!(validate_identifier("database name", &"a".repeat(64)).is_err());
    }

    #[test]
    fn usernames_that_break_urls_are_rejected() {
        for name in ["a@b", "user:pw", "x/y", "bob smith"] {
            let err = validate_identifier("username", name).unwrap_err();
            assert!(matches!(err, AppError::Validation(ref msg) if msg.starts_with("invalid username")));
        }
        assert!(validate_identifier("username", "alice").is_ok());
    }
}
