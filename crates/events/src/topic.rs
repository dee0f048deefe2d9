//! Topic-exchange routing: match a routing key against a binding pattern.
//!
//! Keys and patterns are dot-separated words. In a pattern `*` matches exactly
//! one word and `#` matches zero or more words.

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && matches_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && matches_words(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn exact_keys_match_only_themselves() {
        assert!(topic_matches("order.created", "order.created"));
        assert!(!topic_matches("order.created", "order.cancelled"));
        assert!(!topic_matches("order.created", "order.created.v2"));
    }

    #[test]
    fn star_matches_one_word() {
        assert!(topic_matches("order.*", "order.created"));
        assert!(!topic_matches("order.*", "order"));
        assert!(!topic_matches("order.*", "order.created.v2"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.created.v2"));
        assert!(topic_matches("#", "tyres.get"));
        assert!(topic_matches("#.get", "tyres.get"));
        assert!(!topic_matches("#.get", "tyres.put"));
    }
}
