pub mod time;

/// Generates a url-safe unique id.
pub fn longid() -> String {
    nanoid::nanoid!()
}

/// Generates a short id for workers and tasks.
pub fn shortid() -> String {
    nanoid::nanoid!(10)
}

/// Truncates `text` to `max` characters, appending `...` when cut.
pub fn truncate(
    text: &str,
    max: usize,
) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut = text.chars().take(max).collect::<String>();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ééé", 2), "éé...");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(longid(), longid());
        assert_eq!(shortid().len(), 10);
    }
}
