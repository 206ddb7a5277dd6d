// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

/// Lazily yields lowercase `[a-z0-9]+` tokens.
///
/// Every byte outside ASCII alphanumerics acts as a separator, which covers
/// whitespace, punctuation and non-ASCII bytes alike.
pub fn tokenize(text: &[u8]) -> impl Iterator<Item = String> + '_ {
    text.split(|b| !b.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .iter()
                .map(|b| b.to_ascii_lowercase() as char)
                .collect()
        })
}

pub fn join_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    fn tokens(text: &str) -> Vec<String> {
        tokenize(text.as_bytes()).collect()
    }

    #[test]
    fn test_lowercases_and_strips_punctuation() {
        assert_eq!(tokens("Hello, world! HELLO."), vec!["hello", "world", "hello"]);
    }

    #[test]
    fn test_splits_on_any_whitespace_run() {
        assert_eq!(tokens("  a\tb\n\nc \r\n"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_keeps_digits() {
        assert_eq!(tokens("Route 66, x9-y10"), vec!["route", "66", "x9", "y10"]);
    }

    #[test]
    fn test_empty_and_separator_only_input() {
        assert!(tokens("").is_empty());
        assert!(tokens(" ,.;!? \n").is_empty());
    }

    #[test]
    fn test_non_ascii_bytes_separate_tokens() {
        assert_eq!(tokens("caf\u{e9} na\u{ef}ve"), vec!["caf", "na", "ve"]);

        let invalid_utf8 = [b'a', 0xff, b'B'];
        let collected: Vec<String> = tokenize(&invalid_utf8).collect();
        assert_eq!(collected, vec!["a", "b"]);
    }

    #[test]
    fn test_tokenize_join_roundtrip() {
        let original = vec!["the", "quick", "42", "fox"];

        let retokenized = tokens(&join_tokens(&original));

        assert_eq!(retokenized, original);
    }

    #[test]
    fn test_tokenize_is_idempotent_on_random_sequences() {
        let mut rng = rand::rng();

        for _ in 0..200 {
            let sequence: Vec<String> = (0..rng.random_range(0..40))
                .map(|_| {
                    (0..rng.random_range(1..=12))
                        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
                        .collect()
                })
                .collect();

            let retokenized = tokens(&join_tokens(&sequence));

            assert_eq!(retokenized, sequence);
        }
    }
}
